//! Script group, script form and submission endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use axum_extra::extract::Multipart;

use crate::{
    error::{AppError, AppResult},
    forms::validation::{Submission, Upload},
    models::{
        job::SubmitResponse,
        script::{ScriptGroupListing, ScriptSearchQuery, ScriptSearchResult, VersionInfo},
    },
    services::scripts::{GroupDetail, ScriptFormQuery, ScriptPage},
};

use super::CurrentCaller;

/// Read a multipart form into a submission. Parts with a filename are
/// uploads, everything else is a text value.
pub(crate) async fn read_submission(mut multipart: Multipart) -> AppResult<Submission> {
    let mut submission = Submission::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match field.file_name().map(str::to_string) {
            Some(filename) => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                submission.add_file(
                    name,
                    Upload {
                        filename,
                        bytes: bytes.to_vec(),
                    },
                );
            }
            None => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                submission.add_text(name, value);
            }
        }
    }
    Ok(submission)
}

/// Script groups with the scripts the caller can see
#[utoipa::path(
    get,
    path = "/groups",
    tag = "scripts",
    security((), ("bearer_auth" = [])),
    responses(
        (status = 200, description = "Script groups", body = Vec<ScriptGroupListing>)
    )
)]
pub async fn list_groups(
    State(state): State<crate::AppState>,
    CurrentCaller(caller): CurrentCaller,
) -> AppResult<Json<Vec<ScriptGroupListing>>> {
    let groups = state.services.scripts.home(&caller).await?;
    Ok(Json(groups))
}

/// A script group with the form of each script
#[utoipa::path(
    get,
    path = "/groups/{id}",
    tag = "scripts",
    security((), ("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Script group ID")
    ),
    responses(
        (status = 200, description = "Script group", body = GroupDetail),
        (status = 404, description = "Script group not found")
    )
)]
pub async fn get_group(
    State(state): State<crate::AppState>,
    CurrentCaller(caller): CurrentCaller,
    Path(id): Path<i32>,
) -> AppResult<Json<GroupDetail>> {
    let group = state.services.scripts.group_detail(id, &caller).await?;
    Ok(Json(group))
}

/// Search scripts by name
#[utoipa::path(
    get,
    path = "/scripts/search",
    tag = "scripts",
    params(ScriptSearchQuery),
    responses(
        (status = 200, description = "Matching scripts", body = Vec<ScriptSearchResult>)
    )
)]
pub async fn search_scripts(
    State(state): State<crate::AppState>,
    Query(query): Query<ScriptSearchQuery>,
) -> AppResult<Json<Vec<ScriptSearchResult>>> {
    let results = state
        .services
        .scripts
        .search(query.q.as_deref().unwrap_or_default())
        .await?;
    Ok(Json(results))
}

/// Form of a script version.
///
/// Query keys other than `version`, `iteration` and `job_id` are script
/// parameter names whose values prefill the form.
#[utoipa::path(
    get,
    path = "/scripts/{slug}",
    tag = "scripts",
    security((), ("bearer_auth" = [])),
    params(
        ("slug" = String, Path, description = "Script slug"),
        ("version" = Option<String>, Query, description = "Script version"),
        ("iteration" = Option<i16>, Query, description = "Iteration of the version"),
        ("job_id" = Option<i32>, Query, description = "Prefill the form from this job")
    ),
    responses(
        (status = 200, description = "Script form", body = ScriptPage),
        (status = 404, description = "Script or version not found")
    )
)]
pub async fn get_script(
    State(state): State<crate::AppState>,
    CurrentCaller(caller): CurrentCaller,
    Path(slug): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> AppResult<Json<ScriptPage>> {
    let query = ScriptFormQuery::from_pairs(pairs)?;
    let page = state.services.scripts.script_form(&slug, query, &caller).await?;
    Ok(Json(page))
}

/// Versions of a script
#[utoipa::path(
    get,
    path = "/scripts/{slug}/versions",
    tag = "scripts",
    params(
        ("slug" = String, Path, description = "Script slug")
    ),
    responses(
        (status = 200, description = "Script versions", body = Vec<VersionInfo>),
        (status = 404, description = "Script not found")
    )
)]
pub async fn list_versions(
    State(state): State<crate::AppState>,
    Path(slug): Path<String>,
) -> AppResult<Json<Vec<VersionInfo>>> {
    let versions = state.services.scripts.versions(&slug).await?;
    Ok(Json(versions))
}

/// Submit a script form and run the job
#[utoipa::path(
    post,
    path = "/scripts/submit",
    tag = "scripts",
    security((), ("bearer_auth" = [])),
    request_body(content = String, content_type = "multipart/form-data", description = "Script form values and uploads"),
    responses(
        (status = 200, description = "Job created and run", body = SubmitResponse),
        (status = 422, description = "Invalid form", body = crate::error::ErrorResponse)
    )
)]
pub async fn submit(
    State(state): State<crate::AppState>,
    CurrentCaller(caller): CurrentCaller,
    multipart: Multipart,
) -> AppResult<Json<SubmitResponse>> {
    let submission = read_submission(multipart).await?;
    let response = state.services.jobs.submit(submission, &caller).await?;
    Ok(Json(response))
}
