//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        DictionaryTocResponse, ErrorResponse, PlaybookResponse, SystemPromptResponse,
        TokenErrorResponse,
    },
    state::AppState,
};

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_token,
        handlers::list_playbooks,
        handlers::get_playbook,
        handlers::sys_prompt_functions,
        handlers::dictionary_toc,
        handlers::dictionary_section,
        handlers::health,
    ),
    components(
        schemas(PlaybookResponse, SystemPromptResponse, DictionaryTocResponse, ErrorResponse, TokenErrorResponse)
    ),
    tags(
        (name = "Wanda API", description = "Realtime session credentials and content for the Wanda voice agent")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/token", get(handlers::create_token))
        .route("/playbooks", get(handlers::list_playbooks))
        .route("/playbook/{id}", get(handlers::get_playbook))
        .route("/sys_prompt_functions", get(handlers::sys_prompt_functions))
        .route(
            "/get_talentiq_dictionary_toc",
            get(handlers::dictionary_toc),
        )
        .route(
            "/get_talentiq_dictionary_section",
            get(handlers::dictionary_section),
        )
        .route("/health", get(handlers::health))
        .with_state(app_state);

    // Browser clients fetch credentials cross-origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        for path in [
            "/token",
            "/playbooks",
            "/playbook/{id}",
            "/sys_prompt_functions",
            "/get_talentiq_dictionary_toc",
            "/get_talentiq_dictionary_section",
            "/health",
        ] {
            assert!(paths.contains(&path), "missing {path}");
        }
    }
}
