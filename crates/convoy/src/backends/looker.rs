//! # 📡 THE LOOKER BACKEND
//!
//! 🎬 COLD OPEN — INT. IDENTITY PROVIDER — THE BADGE OFFICE
//!
//! One service account walks in. It asks for its own badge. Then it asks for
//! everybody else's, one at a time, politely, with a `POST /login/{id}`.
//! The badge office says yes every time. This is either great design or a
//! compliance finding. Today, it is our ingestion strategy.
//!
//! 🧠 Knowledge graph:
//! - `SessionProvider`: `POST /login` (form), `POST /login/{id}` (sudo), `DELETE /logout`
//! - `ConversationSource`: `GET /queries/{id}/run/json?limit=-1`,
//!   `GET /conversations/search[?created_at=YYYY-MM-DD]`, `GET /conversations/{id}?fields=...`
//! - Auth header is `token <access_token>`, not `Bearer`. Yes, really.
//! - One `reqwest::Client` with a per-call timeout, shared by every worker.
//!
//! 🦆

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace, warn};

use super::{ConversationSource, SessionProvider};
use crate::common::{Conversation, ConversationSummary, Credential, Principal, SyncWindow};
use crate::errors::SyncError;

/// 📄 The projection the detail call asks for. Everything the warehouse row needs, nothing more.
const DETAIL_FIELDS: &str =
    "id,agent_id,user_id,name,sources,created_at,updated_at,messages,conversation_agent";

// -- error bodies can be whole HTML pages. nobody needs the whole HTML page.
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Deserialize, Clone)]
pub struct LookerSourceConfig {
    /// 📡 Instance URL, scheme included, no `/api/4.0` suffix.
    pub base_url: String,
    pub client_id: String,
    /// 🔒 If this is in plaintext in your config file, prefer the env var.
    pub client_secret: String,
    /// 🔎 Id of the saved query that lists active users.
    pub user_query_id: String,
}

#[derive(Debug, Deserialize)]
struct AuthToken {
    access_token: String,
    #[serde(default)]
    #[allow(dead_code)]
    expires_in: Option<u64>,
}

/// 📡 Talks to the Looker API. Cheap to share: the client pools connections internally.
#[derive(Debug)]
pub struct LookerSource {
    client: reqwest::Client,
    config: LookerSourceConfig,
}

impl LookerSource {
    pub fn new(config: LookerSourceConfig, timeout: Duration) -> anyhow::Result<Self> {
        use anyhow::Context;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .timeout(timeout)
            .build()
            .context("💀 The HTTP client refused to be born. Probably TLS. It's always TLS.")?;
        Ok(Self { client, config })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/4.0/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder, credential: &Credential) -> reqwest::RequestBuilder {
        request.header("Authorization", format!("token {}", credential.expose()))
    }
}

/// 🔍 Check the status, read the body, decode it. Errors come back as a sentence.
async fn decode_json<T: DeserializeOwned>(
    response: Result<reqwest::Response, reqwest::Error>,
) -> Result<T, String> {
    let response = response.map_err(|err| format!("request failed: {err}"))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| format!("failed to read body (status {status}): {err}"))?;
    if !status.is_success() {
        return Err(format!("status {status}: {}", truncate(&body)));
    }
    serde_json::from_str(&body)
        .map_err(|err| format!("failed to decode body: {err} (body: {})", truncate(&body)))
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body.to_string()
    } else {
        let head: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{head}…")
    }
}

#[async_trait]
impl SessionProvider for LookerSource {
    async fn login(&self) -> Result<Credential, SyncError> {
        let response = self
            .client
            .post(self.api_url("login"))
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await;
        let token: AuthToken = decode_json(response).await.map_err(SyncError::Login)?;
        debug!("🔒 Elevated login successful");
        Ok(Credential::new(token.access_token))
    }

    async fn impersonate(
        &self,
        elevated: &Credential,
        principal_id: u64,
    ) -> Result<Credential, SyncError> {
        let request = self
            .client
            .post(self.api_url(&format!("login/{principal_id}")));
        let response = self.authorized(request, elevated).send().await;
        let token: AuthToken = decode_json(response)
            .await
            .map_err(|reason| SyncError::Session { principal_id, reason })?;
        trace!("🎭 Impersonating principal {}", principal_id);
        Ok(Credential::new(token.access_token))
    }

    async fn end_session(&self, credential: &Credential) {
        let request = self.client.delete(self.api_url("logout"));
        match self.authorized(request, credential).send().await {
            Ok(response) if response.status().is_success() => trace!("🚪 Session ended"),
            Ok(response) => debug!(
                "⚠️ Logout answered {}. The session will expire on its own.",
                response.status()
            ),
            Err(err) => warn!("⚠️ Logout request failed: {}. Moving on.", err),
        }
    }
}

#[async_trait]
impl ConversationSource for LookerSource {
    async fn discover_principals(&self, elevated: &Credential) -> Result<Vec<Principal>, SyncError> {
        let path = format!("queries/{}/run/json", self.config.user_query_id);
        debug!("🔎 Running principal discovery query {}", self.config.user_query_id);
        let request = self.client.get(self.api_url(&path)).query(&[("limit", "-1")]);
        let principals: Vec<Principal> = decode_json(self.authorized(request, elevated).send().await)
            .await
            .map_err(SyncError::Discovery)?;
        debug!("🔎 Discovery returned {} principals", principals.len());
        Ok(principals)
    }

    async fn list_conversations(
        &self,
        session: &Credential,
        window: &SyncWindow,
    ) -> Result<Vec<ConversationSummary>, SyncError> {
        let mut request = self.client.get(self.api_url("conversations/search"));
        if let Some(created_at) = window.created_at_filter() {
            request = request.query(&[("created_at", created_at)]);
        }
        let summaries: Vec<ConversationSummary> =
            decode_json(self.authorized(request, session).send().await)
                .await
                .map_err(SyncError::Listing)?;
        trace!("📋 Listing returned {} conversations", summaries.len());
        Ok(summaries)
    }

    async fn conversation_detail(
        &self,
        session: &Credential,
        conversation_id: &str,
    ) -> Result<Conversation, SyncError> {
        let request = self
            .client
            .get(self.api_url(&format!("conversations/{conversation_id}")))
            .query(&[("fields", DETAIL_FIELDS)]);
        decode_json(self.authorized(request, session).send().await)
            .await
            .map_err(|reason| SyncError::DetailFetch {
                conversation_id: conversation_id.to_string(),
                reason,
            })
    }
}
