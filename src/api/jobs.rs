//! Job details, commands and queues

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::job::{
        AllQueuesResponse, JobAction, JobCommandRequest, JobCommandResponse, JobDetail, JobListEntry,
    },
    repository::jobs::JobList,
};

use super::CurrentCaller;

/// Job details with parameters, outputs and files
#[utoipa::path(
    get,
    path = "/jobs/{id}",
    tag = "jobs",
    security((), ("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job details", body = JobDetail),
        (status = 403, description = "Job owned by another user"),
        (status = 404, description = "Job not found")
    )
)]
pub async fn get_job(
    State(state): State<crate::AppState>,
    CurrentCaller(caller): CurrentCaller,
    Path(id): Path<i32>,
) -> AppResult<Json<JobDetail>> {
    let detail = state.services.jobs.detail(id, &caller).await?;
    Ok(Json(detail))
}

/// Job details by uuid, for sharing
#[utoipa::path(
    get,
    path = "/jobs/uuid/{uuid}",
    tag = "jobs",
    params(
        ("uuid" = Uuid, Path, description = "Job UUID")
    ),
    responses(
        (status = 200, description = "Job details", body = JobDetail),
        (status = 404, description = "Job not found")
    )
)]
pub async fn get_job_by_uuid(
    State(state): State<crate::AppState>,
    Path(uuid): Path<Uuid>,
) -> AppResult<Json<JobDetail>> {
    let detail = state.services.jobs.detail_by_uuid(uuid).await?;
    Ok(Json(detail))
}

/// Resubmit, rerun or delete a job
#[utoipa::path(
    post,
    path = "/jobs/{id}/command",
    tag = "jobs",
    security((), ("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Job ID")
    ),
    request_body = JobCommandRequest,
    responses(
        (status = 200, description = "Command applied", body = JobCommandResponse),
        (status = 422, description = "Unknown command", body = crate::error::ErrorResponse),
        (status = 403, description = "Job owned by another user"),
        (status = 404, description = "Job not found")
    )
)]
pub async fn job_command(
    State(state): State<crate::AppState>,
    CurrentCaller(caller): CurrentCaller,
    Path(id): Path<i32>,
    Json(request): Json<JobCommandRequest>,
) -> AppResult<Json<JobCommandResponse>> {
    let jobs = &state.services.jobs;
    let job_id = match request.command {
        JobAction::Resubmit => jobs.resubmit(id, &caller).await?.id,
        JobAction::Rerun => jobs.rerun(id, &caller).await?.id,
        JobAction::Delete => {
            jobs.delete(id, &caller).await?;
            id
        }
        JobAction::Stop => return Err(AppError::form_message("Unknown Command")),
    };

    let redirect = match request.command {
        JobAction::Delete => "/api/v1/jobs/results".to_string(),
        _ => format!("/api/v1/jobs/{}", job_id),
    };
    Ok(Json(JobCommandResponse {
        valid: true,
        job_id,
        redirect,
    }))
}

/// Running and submitted jobs of every user
#[utoipa::path(
    get,
    path = "/jobs/queue/global",
    tag = "jobs",
    security((), ("bearer_auth" = [])),
    responses(
        (status = 200, description = "Global queue", body = Vec<JobListEntry>)
    )
)]
pub async fn global_queue(
    State(state): State<crate::AppState>,
    CurrentCaller(caller): CurrentCaller,
) -> AppResult<Json<Vec<JobListEntry>>> {
    let entries = state.services.jobs.list(JobList::Global, &caller).await?;
    Ok(Json(entries))
}

/// Running jobs of the caller
#[utoipa::path(
    get,
    path = "/jobs/queue/user",
    tag = "jobs",
    security((), ("bearer_auth" = [])),
    responses(
        (status = 200, description = "User queue", body = Vec<JobListEntry>)
    )
)]
pub async fn user_queue(
    State(state): State<crate::AppState>,
    CurrentCaller(caller): CurrentCaller,
) -> AppResult<Json<Vec<JobListEntry>>> {
    let entries = state.services.jobs.list(JobList::User, &caller).await?;
    Ok(Json(entries))
}

/// Finished jobs of the caller
#[utoipa::path(
    get,
    path = "/jobs/results",
    tag = "jobs",
    security((), ("bearer_auth" = [])),
    responses(
        (status = 200, description = "User results", body = Vec<JobListEntry>)
    )
)]
pub async fn results(
    State(state): State<crate::AppState>,
    CurrentCaller(caller): CurrentCaller,
) -> AppResult<Json<Vec<JobListEntry>>> {
    let entries = state.services.jobs.list(JobList::Results, &caller).await?;
    Ok(Json(entries))
}

/// Totals and first entries of every job list
#[utoipa::path(
    get,
    path = "/jobs/queues",
    tag = "jobs",
    security((), ("bearer_auth" = [])),
    responses(
        (status = 200, description = "All queues", body = AllQueuesResponse)
    )
)]
pub async fn all_queues(
    State(state): State<crate::AppState>,
    CurrentCaller(caller): CurrentCaller,
) -> AppResult<Json<AllQueuesResponse>> {
    let queues = state.services.jobs.all_queues(&caller).await?;
    Ok(Json(queues))
}
