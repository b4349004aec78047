//! Content Service boundary.
//!
//! The engine reads reference documents, the dictionary table of contents,
//! dictionary sections and the functions system prompt from an external
//! service. [`HttpContentService`] talks to the pass-through endpoints exposed
//! by the `wanda-api` process.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;

/// Read-only access to the content the engine seeds into a conversation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentService: Send + Sync {
    /// Lists the identifiers of the available reference documents.
    async fn list_references(&self) -> Result<Vec<String>>;

    /// Fetches the full content of one reference document.
    ///
    /// The content may be large; callers truncate it before use.
    async fn fetch_reference(&self, reference_id: &str) -> Result<String>;

    /// Fetches the structured table of contents of the reference dictionary.
    async fn dictionary_toc(&self) -> Result<Value>;

    /// Fetches one named section of the reference dictionary.
    async fn dictionary_section(&self, section_id: &str) -> Result<Value>;

    /// Fetches the system prompt describing the available functions.
    async fn functions_system_prompt(&self) -> Result<String>;
}

#[derive(Deserialize)]
struct ReferenceBody {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct TocBody {
    #[serde(default)]
    table_of_contents: Value,
}

#[derive(Deserialize)]
struct PromptBody {
    #[serde(default)]
    system_prompt: Option<String>,
}

/// `ContentService` backed by the api process over HTTP.
#[derive(Clone, Debug)]
pub struct HttpContentService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpContentService {
    /// Creates a client rooted at `base_url` (for example `http://localhost:3000`).
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Joins path segments onto the base URL, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("'{}' is not a valid server URL", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("'{}' cannot be used as a base URL", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<T> {
        let url = self.url(segments)?;
        let response = self
            .client
            .get(url.clone())
            .query(query)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("{url} returned an error status"))?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("{url} returned an unexpected body"))
    }
}

#[async_trait]
impl ContentService for HttpContentService {
    async fn list_references(&self) -> Result<Vec<String>> {
        self.get_json(&["playbooks"], &[]).await
    }

    async fn fetch_reference(&self, reference_id: &str) -> Result<String> {
        let body: ReferenceBody = self.get_json(&["playbook", reference_id], &[]).await?;
        Ok(body.content.unwrap_or_default())
    }

    async fn dictionary_toc(&self) -> Result<Value> {
        let body: TocBody = self.get_json(&["get_talentiq_dictionary_toc"], &[]).await?;
        Ok(body.table_of_contents)
    }

    async fn dictionary_section(&self, section_id: &str) -> Result<Value> {
        self.get_json(
            &["get_talentiq_dictionary_section"],
            &[("section_id", section_id)],
        )
        .await
    }

    async fn functions_system_prompt(&self) -> Result<String> {
        let body: PromptBody = self.get_json(&["sys_prompt_functions"], &[]).await?;
        Ok(body.system_prompt.unwrap_or_default())
    }
}
