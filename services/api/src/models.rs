//! API Models
//!
//! Request and response bodies, annotated for OpenAPI generation with `utoipa`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct PlaybookResponse {
    #[schema(example = "chad_vyhlidal")]
    pub playbook_id: String,
    #[schema(example = "# Chad Vyhlidal Playbook\n\nPlaybook content...")]
    #[serde(default)]
    pub content: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct SystemPromptResponse {
    pub system_prompt: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct DictionaryTocResponse {
    #[schema(value_type = Object)]
    pub table_of_contents: Value,
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct TokenQuery {
    /// Playbook the session will be about. Only logged.
    #[serde(rename = "playbookId")]
    pub playbook_id: Option<String>,
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct SectionQuery {
    pub section_id: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

/// Body returned when no realtime session could be minted.
#[derive(Serialize, ToSchema)]
pub struct TokenErrorResponse {
    #[schema(example = "Failed to generate token")]
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_token_query_uses_camel_case_parameter() {
        let query: TokenQuery = serde_json::from_value(json!({ "playbookId": "jake_playbook" })).unwrap();
        assert_eq!(query.playbook_id.as_deref(), Some("jake_playbook"));
    }

    #[test]
    fn test_playbook_response_tolerates_missing_content() {
        let playbook: PlaybookResponse =
            serde_json::from_value(json!({ "playbook_id": "chad_vyhlidal" })).unwrap();
        assert_eq!(playbook.content, "");
    }

    #[test]
    fn test_toc_response_serialization() {
        let toc = DictionaryTocResponse {
            table_of_contents: json!([{ "id": "grit" }]),
        };
        assert_eq!(
            serde_json::to_value(&toc).unwrap(),
            json!({ "table_of_contents": [{ "id": "grit" }] })
        );
    }
}
