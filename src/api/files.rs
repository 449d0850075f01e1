//! File download endpoint

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::error::AppResult;

use super::CurrentCaller;

/// Download an input or output file of a job
#[utoipa::path(
    get,
    path = "/files/{id}/download",
    tag = "files",
    security((), ("bearer_auth" = [])),
    params(
        ("id" = i32, Path, description = "Job file ID")
    ),
    responses(
        (status = 200, description = "File content", content_type = "application/octet-stream"),
        (status = 403, description = "File of another user's job"),
        (status = 404, description = "File not found")
    )
)]
pub async fn download_file(
    State(state): State<crate::AppState>,
    CurrentCaller(caller): CurrentCaller,
    Path(id): Path<i32>,
) -> AppResult<impl IntoResponse> {
    let download = state.services.files.download(id, &caller).await?;
    let disposition = format!("attachment; filename=\"{}\"", download.filename.replace('"', ""));
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, download.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        download.bytes,
    ))
}
