//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{admin, auth, files, health, jobs, scripts};

/// Registers the `bearer_auth` scheme used by the path annotations
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some("JWT from /auth/login, or an API key"))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Scriptly API",
        version = "1.0.0",
        description = "Run registered command-line scripts through generated forms"
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    modifiers(&BearerAuth),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Auth
        auth::login,
        auth::me,
        auth::list_api_keys,
        auth::create_api_key,
        auth::delete_api_key,
        // Scripts
        scripts::list_groups,
        scripts::get_group,
        scripts::search_scripts,
        scripts::get_script,
        scripts::list_versions,
        scripts::submit,
        // Admin
        admin::add_script,
        // Jobs
        jobs::get_job,
        jobs::get_job_by_uuid,
        jobs::job_command,
        jobs::global_queue,
        jobs::user_queue,
        jobs::results,
        jobs::all_queues,
        // Files
        files::download_file,
    ),
    components(
        schemas(
            // Users
            crate::models::user::UserInfo,
            crate::models::user::LoginRequest,
            crate::models::user::LoginResponse,
            crate::models::user::ApiKey,
            crate::models::user::CreateApiKey,
            crate::models::user::CreatedApiKey,
            // Scripts
            crate::models::script::Script,
            crate::models::script::ScriptVersion,
            crate::models::script::ScriptSummary,
            crate::models::script::ScriptGroupListing,
            crate::models::script::VersionInfo,
            crate::models::script::ScriptSearchResult,
            crate::services::scripts::Access,
            crate::services::scripts::AddScriptResult,
            crate::services::scripts::GroupDetail,
            crate::services::scripts::GroupScript,
            crate::services::scripts::ScriptPage,
            // Forms
            crate::models::parameter::FieldKind,
            crate::forms::ScriptForm,
            crate::forms::FormParser,
            crate::forms::FormGroup,
            crate::forms::FormField,
            crate::forms::Widget,
            // Jobs
            crate::models::job::JobStatus,
            crate::models::job::JobAction,
            crate::models::job::JobDetail,
            crate::models::job::JobParameterView,
            crate::models::job::JobListEntry,
            crate::models::job::JobCommandRequest,
            crate::models::job::JobCommandResponse,
            crate::models::job::SubmitResponse,
            crate::models::job::QueueTotals,
            crate::models::job::QueueItems,
            crate::models::job::AllQueuesResponse,
            // Files
            crate::models::file::FileGroups,
            crate::models::file::FilePreview,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Authentication and API keys"),
        (name = "scripts", description = "Script groups, forms and submission"),
        (name = "admin", description = "Script registration"),
        (name = "jobs", description = "Job details, commands and queues"),
        (name = "files", description = "Job file downloads")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_routes() {
        let doc = ApiDoc::openapi();
        for path in ["/scripts/submit", "/jobs/{id}/command", "/files/{id}/download", "/admin/scripts"] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
        let components = doc.components.unwrap();
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
