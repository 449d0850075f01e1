//! Administration endpoints

use axum::{extract::State, http::StatusCode, Json};
use axum_extra::extract::Multipart;

use crate::{
    error::{AppError, AppResult},
    models::ScriptSchema,
    services::scripts::{AddScript, AddScriptResult},
};

use super::{scripts::read_submission, AuthenticatedUser};

/// Register a script, or a new version of an existing one.
///
/// Multipart fields: `script` (file), `schema` (JSON text or file),
/// optional `group`, `name` and `ignore_bad_imports`.
#[utoipa::path(
    post,
    path = "/admin/scripts",
    tag = "admin",
    security(("bearer_auth" = [])),
    request_body(content = String, content_type = "multipart/form-data", description = "Script file and parameter schema"),
    responses(
        (status = 201, description = "Script registered", body = AddScriptResult),
        (status = 400, description = "Invalid script or schema"),
        (status = 403, description = "Administrator privileges required"),
        (status = 409, description = "This script already exists")
    )
)]
pub async fn add_script(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<AddScriptResult>)> {
    claims.require_admin()?;

    let mut form = read_submission(multipart).await?;
    let script = form
        .files
        .shift_remove("script")
        .and_then(|mut uploads| uploads.pop())
        .ok_or_else(|| AppError::BadRequest("Missing script file".to_string()))?;

    let raw_schema = match form.files.shift_remove("schema").and_then(|mut uploads| uploads.pop()) {
        Some(upload) => String::from_utf8(upload.bytes)
            .map_err(|_| AppError::BadRequest("Schema must be UTF-8 JSON".to_string()))?,
        None => form
            .get("schema")
            .map(str::to_string)
            .ok_or_else(|| AppError::BadRequest("Missing schema".to_string()))?,
    };
    let schema = ScriptSchema::from_json(&raw_schema).map_err(AppError::BadRequest)?;

    let text = |name: &str| form.get(name).map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);
    let request = AddScript {
        filename: script.filename,
        bytes: script.bytes,
        schema,
        group: text("group"),
        name: text("name"),
        ignore_bad_imports: form
            .get("ignore_bad_imports")
            .is_some_and(|v| matches!(v.trim(), "true" | "on" | "1")),
        user_id: Some(claims.user_id),
    };

    let result = state.services.scripts.add_script(request).await?;
    Ok((StatusCode::CREATED, Json(result)))
}
