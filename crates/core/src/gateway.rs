//! Credential minting and session-description exchange with the realtime
//! endpoint.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

/// Short-lived bearer token for one realtime session.
#[derive(Clone, PartialEq, Eq)]
pub struct EphemeralCredential {
    pub token: String,
    pub model: String,
}

impl std::fmt::Debug for EphemeralCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralCredential")
            .field("token", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

#[async_trait]
pub trait RealtimeGateway: Send + Sync {
    /// Mints a credential, optionally scoped to a reference document.
    async fn mint_credential(&self, reference_id: Option<&str>) -> Result<EphemeralCredential>;

    /// Posts the local offer and returns the remote answer, authenticating
    /// with `credential`.
    async fn exchange_sdp(&self, credential: &EphemeralCredential, offer_sdp: &str)
    -> Result<String>;
}

#[derive(Deserialize)]
struct ClientSecret {
    value: String,
}

#[derive(Deserialize)]
struct TokenBody {
    client_secret: ClientSecret,
    #[serde(default)]
    model: Option<String>,
}

/// Mints credentials through the api process and exchanges descriptions with
/// the realtime endpoint directly.
#[derive(Clone, Debug)]
pub struct HttpRealtimeGateway {
    client: reqwest::Client,
    server_url: String,
    realtime_url: String,
    default_model: String,
}

impl HttpRealtimeGateway {
    /// # Arguments
    ///
    /// * `server_url` - Base URL of the api process serving `/token`.
    /// * `realtime_url` - The realtime endpoint receiving the offer, e.g.
    ///   `https://api.openai.com/v1/realtime`.
    /// * `default_model` - Model used when the token response names none.
    pub fn new(
        client: reqwest::Client,
        server_url: impl Into<String>,
        realtime_url: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            server_url: server_url.into().trim_end_matches('/').to_string(),
            realtime_url: realtime_url.into(),
            default_model: default_model.into(),
        }
    }
}

#[async_trait]
impl RealtimeGateway for HttpRealtimeGateway {
    #[instrument(skip(self))]
    async fn mint_credential(&self, reference_id: Option<&str>) -> Result<EphemeralCredential> {
        let url = format!("{}/token", self.server_url);
        let mut request = self.client.get(&url);
        if let Some(id) = reference_id {
            request = request.query(&[("playbookId", id)]);
        }
        let body: TokenBody = request
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?
            .error_for_status()
            .context("token endpoint returned an error status")?
            .json()
            .await
            .context("token response is missing client_secret.value")?;

        if body.client_secret.value.is_empty() {
            bail!("token endpoint returned an empty client secret");
        }
        let model = body
            .model
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.default_model.clone());
        debug!(%model, "minted ephemeral credential");
        Ok(EphemeralCredential {
            token: body.client_secret.value,
            model,
        })
    }

    #[instrument(skip_all, fields(model = %credential.model))]
    async fn exchange_sdp(
        &self,
        credential: &EphemeralCredential,
        offer_sdp: &str,
    ) -> Result<String> {
        let response = self
            .client
            .post(&self.realtime_url)
            .query(&[("model", credential.model.as_str())])
            .bearer_auth(&credential.token)
            .header(reqwest::header::CONTENT_TYPE, "application/sdp")
            .body(offer_sdp.to_string())
            .send()
            .await
            .context("description exchange request failed")?;

        let status = response.status();
        let answer = response
            .text()
            .await
            .context("failed to read the remote description")?;
        if !status.is_success() {
            bail!("description exchange returned {status}: {answer}");
        }
        Ok(answer)
    }
}
