//! Upstream Service Clients
//!
//! Two external services sit behind this process: the Ask Wanda content API,
//! which owns playbooks, the TalentIQ dictionary and system prompts, and the
//! realtime sessions endpoint, which mints short-lived client credentials.
//! Handlers only see the traits so tests can substitute them.

use crate::models::PlaybookResponse;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

/// Read access to the Ask Wanda content API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Lists the identifiers of every available playbook.
    async fn playbooks(&self) -> Result<Vec<String>>;

    /// Fetches one playbook document.
    ///
    /// # Arguments
    ///
    /// * `playbook_id` - The identifier as returned by [`KnowledgeBase::playbooks`].
    async fn playbook(&self, playbook_id: &str) -> Result<PlaybookResponse>;

    /// The system prompt that tells the model how to use its functions.
    async fn functions_system_prompt(&self) -> Result<String>;

    /// The dictionary's table of contents, as returned upstream.
    async fn dictionary_toc(&self) -> Result<Value>;

    /// One dictionary section.
    ///
    /// # Arguments
    ///
    /// * `section_id` - A section identifier taken from the table of contents.
    async fn dictionary_section(&self, section_id: &str) -> Result<Value>;

    async fn health(&self) -> Result<Value>;
}

/// Mints ephemeral realtime sessions on behalf of a client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RealtimeSessions: Send + Sync {
    /// Creates a session and returns the upstream body unchanged. The body
    /// carries `client_secret.value`, the credential the client presents
    /// when exchanging session descriptions.
    async fn create_session(&self) -> Result<Value>;
}

#[derive(Deserialize)]
struct PlaybooksBody {
    #[serde(default)]
    playbooks: Vec<String>,
}

#[derive(Deserialize)]
struct SystemPromptBody {
    #[serde(default)]
    system_prompt: String,
}

pub struct HttpKnowledgeBase {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpKnowledgeBase {
    pub fn new(client: reqwest::Client, base_url: &str, token: Option<String>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("'{base_url}' is not a valid content API URL"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("'{base_url}' cannot be used as a base URL"));
        }
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    /// Joins path segments onto the base URL, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: serde::de::DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self
            .authorized(request)
            .send()
            .await
            .context("content API request failed")?;
        let url = response.url().clone();
        let response = response
            .error_for_status()
            .with_context(|| format!("{url} returned an error status"))?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("{url} returned an unexpected body"))
    }
}

#[async_trait]
impl KnowledgeBase for HttpKnowledgeBase {
    #[instrument(skip(self))]
    async fn playbooks(&self) -> Result<Vec<String>> {
        let body: PlaybooksBody = self
            .send(self.client.get(self.url(&["get_playbooks"])))
            .await?;
        debug!(count = body.playbooks.len(), "fetched playbook list");
        Ok(body.playbooks)
    }

    #[instrument(skip(self))]
    async fn playbook(&self, playbook_id: &str) -> Result<PlaybookResponse> {
        self.send(self.client.get(self.url(&["get_playbook", playbook_id])))
            .await
    }

    #[instrument(skip(self))]
    async fn functions_system_prompt(&self) -> Result<String> {
        let body: SystemPromptBody = self
            .send(self.client.get(self.url(&["get_sys_prompt_functions"])))
            .await?;
        Ok(body.system_prompt)
    }

    #[instrument(skip(self))]
    async fn dictionary_toc(&self) -> Result<Value> {
        self.send(self.client.post(self.url(&["fc", "get_dictionary_toc"])))
            .await
    }

    #[instrument(skip(self))]
    async fn dictionary_section(&self, section_id: &str) -> Result<Value> {
        let request = self
            .client
            .post(self.url(&["get_talentiq_dictionary_section"]))
            .json(&json!({ "section_id": section_id }));
        self.send(request).await
    }

    async fn health(&self) -> Result<Value> {
        self.send(self.client.get(self.url(&["health"]))).await
    }
}

pub struct HttpRealtimeSessions {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    voice: String,
}

impl HttpRealtimeSessions {
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        voice: impl Into<String>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
            model: model.into(),
            voice: voice.into(),
        }
    }
}

#[async_trait]
impl RealtimeSessions for HttpRealtimeSessions {
    #[instrument(skip(self), fields(model = %self.model))]
    async fn create_session(&self) -> Result<Value> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.model, "voice": self.voice }))
            .send()
            .await
            .context("realtime sessions request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("realtime sessions endpoint returned {status}: {body}"));
        }
        response
            .json::<Value>()
            .await
            .context("realtime sessions endpoint returned an unexpected body")
    }
}
