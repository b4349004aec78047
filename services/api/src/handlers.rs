//! Axum Handlers for the REST API
//!
//! Credential minting for realtime sessions and thin pass-throughs to the
//! Ask Wanda content API. It uses `utoipa` doc comments to generate OpenAPI
//! documentation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};
use wanda_core::settings::FALLBACK_SYSTEM_PROMPT;

use crate::{
    models::{
        DictionaryTocResponse, ErrorResponse, PlaybookResponse, SectionQuery,
        SystemPromptResponse, TokenErrorResponse, TokenQuery,
    },
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    /// The content API failed or answered with something unusable.
    Upstream(anyhow::Error),
    TokenGeneration(anyhow::Error),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Upstream(err) => {
                error!("Upstream request failed: {:?}", err);
                let message = "The content service request failed.".to_string();
                (StatusCode::BAD_GATEWAY, Json(ErrorResponse { message })).into_response()
            }
            ApiError::TokenGeneration(err) => {
                error!("Token generation error: {:?}", err);
                let error = "Failed to generate token".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(TokenErrorResponse { error }),
                )
                    .into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Mint an ephemeral realtime session for a client.
#[utoipa::path(
    get,
    path = "/token",
    params(TokenQuery),
    responses(
        (status = 200, description = "Upstream session, including client_secret.value", body = Object),
        (status = 500, description = "No session could be minted", body = TokenErrorResponse)
    )
)]
pub async fn create_token(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Value>, ApiError> {
    info!(playbook_id = ?query.playbook_id, "Minting realtime session token");
    let session = state
        .realtime_sessions
        .create_session()
        .await
        .map_err(ApiError::TokenGeneration)?;
    Ok(Json(session))
}

/// List the identifiers of all available playbooks.
#[utoipa::path(
    get,
    path = "/playbooks",
    responses(
        (status = 200, description = "Playbook identifiers", body = [String]),
        (status = 502, description = "Content service failure", body = ErrorResponse)
    )
)]
pub async fn list_playbooks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, ApiError> {
    let playbooks = state
        .knowledge_base
        .playbooks()
        .await
        .map_err(ApiError::Upstream)?;
    Ok(Json(playbooks))
}

/// Get the content of one playbook.
#[utoipa::path(
    get,
    path = "/playbook/{id}",
    responses(
        (status = 200, description = "Playbook content", body = PlaybookResponse),
        (status = 400, description = "Missing playbook id", body = ErrorResponse),
        (status = 502, description = "Content service failure", body = ErrorResponse)
    ),
    params(
        ("id" = String, Path, description = "Playbook ID")
    )
)]
pub async fn get_playbook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PlaybookResponse>, ApiError> {
    if id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Playbook ID is required to fetch playbook".to_string(),
        ));
    }
    let playbook = state
        .knowledge_base
        .playbook(&id)
        .await
        .map_err(ApiError::Upstream)?;
    Ok(Json(playbook))
}

/// Get the system prompt describing the model's functions.
///
/// Never fails: when the content service is unavailable the generic fallback
/// prompt is returned instead.
#[utoipa::path(
    get,
    path = "/sys_prompt_functions",
    responses(
        (status = 200, description = "Functions system prompt", body = SystemPromptResponse)
    )
)]
pub async fn sys_prompt_functions(
    State(state): State<Arc<AppState>>,
) -> Json<SystemPromptResponse> {
    let system_prompt = match state.knowledge_base.functions_system_prompt().await {
        Ok(prompt) if !prompt.trim().is_empty() => prompt,
        Ok(_) => FALLBACK_SYSTEM_PROMPT.to_string(),
        Err(err) => {
            warn!("Error fetching system prompt functions: {:?}", err);
            FALLBACK_SYSTEM_PROMPT.to_string()
        }
    };
    Json(SystemPromptResponse { system_prompt })
}

/// Get the TalentIQ dictionary table of contents.
#[utoipa::path(
    get,
    path = "/get_talentiq_dictionary_toc",
    responses(
        (status = 200, description = "Table of contents", body = DictionaryTocResponse),
        (status = 502, description = "Content service failure", body = ErrorResponse)
    )
)]
pub async fn dictionary_toc(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DictionaryTocResponse>, ApiError> {
    let body = state
        .knowledge_base
        .dictionary_toc()
        .await
        .map_err(ApiError::Upstream)?;
    // Upstream may already wrap the contents.
    let table_of_contents = match body {
        Value::Object(mut map) if map.contains_key("table_of_contents") => map
            .remove("table_of_contents")
            .unwrap_or(Value::Null),
        other => other,
    };
    Ok(Json(DictionaryTocResponse { table_of_contents }))
}

/// Get one TalentIQ dictionary section.
#[utoipa::path(
    get,
    path = "/get_talentiq_dictionary_section",
    params(SectionQuery),
    responses(
        (status = 200, description = "Dictionary section", body = Object),
        (status = 400, description = "Missing section id", body = ErrorResponse),
        (status = 502, description = "Content service failure", body = ErrorResponse)
    )
)]
pub async fn dictionary_section(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SectionQuery>,
) -> Result<Json<Value>, ApiError> {
    let section_id = query
        .section_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| {
            ApiError::BadRequest(
                "Section ID is required to get TalentIQ dictionary section!".to_string(),
            )
        })?;
    let section = state
        .knowledge_base
        .dictionary_section(&section_id)
        .await
        .map_err(ApiError::Upstream)?;
    Ok(Json(section))
}

/// Report the content service's health.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Upstream health report", body = Object),
        (status = 502, description = "Content service failure", body = ErrorResponse)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let report = state
        .knowledge_base
        .health()
        .await
        .map_err(ApiError::Upstream)?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::{MockKnowledgeBase, MockRealtimeSessions};
    use anyhow::anyhow;
    use mockall::predicate::eq;
    use serde_json::json;

    fn state(knowledge_base: MockKnowledgeBase, sessions: MockRealtimeSessions) -> State<Arc<AppState>> {
        State(Arc::new(AppState {
            knowledge_base: Arc::new(knowledge_base),
            realtime_sessions: Arc::new(sessions),
        }))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_create_token_passes_session_through() {
        let mut sessions = MockRealtimeSessions::new();
        sessions.expect_create_session().times(1).returning(|| {
            Ok(json!({ "client_secret": { "value": "ek_123" }, "model": "gpt-4o-realtime-preview-2025-06-03" }))
        });

        let Json(body) = create_token(
            state(MockKnowledgeBase::new(), sessions),
            Query(TokenQuery {
                playbook_id: Some("chad_vyhlidal".into()),
            }),
        )
        .await
        .unwrap_or_else(|_| panic!("token should be minted"));
        assert_eq!(body["client_secret"]["value"], "ek_123");
    }

    #[tokio::test]
    async fn test_create_token_failure_is_500() {
        let mut sessions = MockRealtimeSessions::new();
        sessions
            .expect_create_session()
            .returning(|| Err(anyhow!("401 Unauthorized")));

        let response = create_token(state(MockKnowledgeBase::new(), sessions), Query(TokenQuery::default()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "Failed to generate token" })
        );
    }

    #[tokio::test]
    async fn test_list_playbooks() {
        let mut kb = MockKnowledgeBase::new();
        kb.expect_playbooks()
            .returning(|| Ok(vec!["chad_vyhlidal".into(), "jake_playbook".into()]));

        let response = list_playbooks(state(kb, MockRealtimeSessions::new()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!(["chad_vyhlidal", "jake_playbook"]));
    }

    #[tokio::test]
    async fn test_upstream_failure_is_bad_gateway() {
        let mut kb = MockKnowledgeBase::new();
        kb.expect_playbooks().returning(|| Err(anyhow!("connection refused")));

        let response = list_playbooks(state(kb, MockRealtimeSessions::new()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_get_playbook() {
        let mut kb = MockKnowledgeBase::new();
        kb.expect_playbook()
            .with(eq("chad_vyhlidal"))
            .returning(|id| {
                Ok(PlaybookResponse {
                    playbook_id: id.to_string(),
                    content: "# Chad".into(),
                })
            });

        let response = get_playbook(state(kb, MockRealtimeSessions::new()), Path("chad_vyhlidal".into()))
            .await
            .into_response();
        assert_eq!(
            body_json(response).await,
            json!({ "playbook_id": "chad_vyhlidal", "content": "# Chad" })
        );
    }

    #[tokio::test]
    async fn test_sys_prompt_falls_back_on_error() {
        let mut kb = MockKnowledgeBase::new();
        kb.expect_functions_system_prompt()
            .returning(|| Err(anyhow!("timeout")));

        let Json(body) = sys_prompt_functions(state(kb, MockRealtimeSessions::new())).await;
        assert_eq!(body.system_prompt, FALLBACK_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn test_sys_prompt_passes_through() {
        let mut kb = MockKnowledgeBase::new();
        kb.expect_functions_system_prompt()
            .returning(|| Ok("Agent Instructions".into()));

        let Json(body) = sys_prompt_functions(state(kb, MockRealtimeSessions::new())).await;
        assert_eq!(body.system_prompt, "Agent Instructions");
    }

    #[tokio::test]
    async fn test_dictionary_toc_unwraps_upstream_envelope() {
        let mut kb = MockKnowledgeBase::new();
        kb.expect_dictionary_toc()
            .returning(|| Ok(json!({ "table_of_contents": [{ "id": "grit" }] })));

        let response = dictionary_toc(state(kb, MockRealtimeSessions::new()))
            .await
            .into_response();
        assert_eq!(
            body_json(response).await,
            json!({ "table_of_contents": [{ "id": "grit" }] })
        );
    }

    #[tokio::test]
    async fn test_dictionary_toc_wraps_bare_contents() {
        let mut kb = MockKnowledgeBase::new();
        kb.expect_dictionary_toc()
            .returning(|| Ok(json!([{ "id": "grit" }])));

        let response = dictionary_toc(state(kb, MockRealtimeSessions::new()))
            .await
            .into_response();
        assert_eq!(
            body_json(response).await,
            json!({ "table_of_contents": [{ "id": "grit" }] })
        );
    }

    #[tokio::test]
    async fn test_dictionary_section_requires_id() {
        let response = dictionary_section(
            state(MockKnowledgeBase::new(), MockRealtimeSessions::new()),
            Query(SectionQuery { section_id: None }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_dictionary_section_passes_through() {
        let mut kb = MockKnowledgeBase::new();
        kb.expect_dictionary_section()
            .with(eq("grit"))
            .times(1)
            .returning(|id| Ok(json!({ "section_id": id, "content": "Grit is..." })));

        let response = dictionary_section(
            state(kb, MockRealtimeSessions::new()),
            Query(SectionQuery {
                section_id: Some("grit".into()),
            }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["content"], "Grit is...");
    }

    #[tokio::test]
    async fn test_health_passes_through() {
        let mut kb = MockKnowledgeBase::new();
        kb.expect_health()
            .returning(|| Ok(json!({ "service": "Ask Wanda API", "status": "healthy" })));

        let response = health(state(kb, MockRealtimeSessions::new()))
            .await
            .into_response();
        assert_eq!(body_json(response).await["status"], "healthy");
    }
}
