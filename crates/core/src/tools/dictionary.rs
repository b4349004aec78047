use super::dispatcher::ToolHandler;
use crate::content::ContentService;
use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use wanda_realtime_types::ToolDefinition;

pub const DICTIONARY_SECTION_TOOL: &str = "get_talentiq_dictionary_section";

/// Looks up one section of the reference dictionary through the Content Service.
pub struct DictionarySectionTool {
    content: Arc<dyn ContentService>,
}

impl DictionarySectionTool {
    pub fn new(content: Arc<dyn ContentService>) -> Self {
        Self { content }
    }
}

#[async_trait]
impl ToolHandler for DictionarySectionTool {
    fn name(&self) -> &str {
        DICTIONARY_SECTION_TOOL
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            DICTIONARY_SECTION_TOOL,
            "Retrieve a specific section from the TalentIQ dictionary by section ID.",
            json!({
                "type": "object",
                "properties": {
                    "section_id": {
                        "type": "string",
                        "description": "ID of the dictionary section to retrieve"
                    }
                },
                "required": ["section_id"]
            }),
        )
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let section_id = arguments
            .get("section_id")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if section_id.is_empty() {
            bail!("{DICTIONARY_SECTION_TOOL} failed: section_id is required");
        }
        self.content.dictionary_section(section_id).await
    }
}
