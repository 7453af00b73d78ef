//! # 🏗️ THE BIGQUERY BACKEND
//!
//! 🎬 COLD OPEN — EXT. LOADING DOCK — 11:58 PM
//!
//! One truck. One trip. Every conversation from every principal, shrink-wrapped
//! into a single pallet of NDJSON. The dock manager has one rule: the truck
//! backs in once. If the dock says no, the truck does not circle the block.
//! It goes home, and somebody reads the logs in the morning.
//!
//! 🧠 Knowledge graph:
//! - `TokenProvider`: static token (local dev) or the platform metadata server
//! - `BigQuerySink::send`: one `multipart/related` POST to the upload endpoint:
//!   part 1 = JSON job configuration, part 2 = the NDJSON bytes
//! - Write disposition is always append. Source format is always NDJSON.
//! - No retries. "This function does not retry. Retries are the caller's problem."
//!   The caller has decided it is nobody's problem. 🦆

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::Sink;
use crate::collectors::LoadJob;
use crate::common::Credential;
use crate::errors::SyncError;

const SOURCE_FORMAT: &str = "NEWLINE_DELIMITED_JSON";
const WRITE_DISPOSITION: &str = "WRITE_APPEND";

fn default_api_base_url() -> String {
    "https://bigquery.googleapis.com".to_string()
}

fn default_metadata_token_url() -> String {
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token"
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BigQuerySinkConfig {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
    /// 🌍 Job location. Optional: BigQuery figures it out from the dataset otherwise.
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// 🔒 Static bearer token for local development. Skips the metadata server.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_metadata_token_url")]
    pub metadata_token_url: String,
}

/// 📍 Where the rows land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationTable {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

/// 🎟️ Where the warehouse bearer token comes from.
#[derive(Debug, Clone)]
pub enum TokenProvider {
    /// A token injected through config. For laptops, not production.
    Static(Credential),
    /// The platform metadata server, asked fresh on every load.
    Metadata { url: String },
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
}

impl TokenProvider {
    pub fn from_config(config: &BigQuerySinkConfig) -> Self {
        match config.access_token.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(token) => TokenProvider::Static(Credential::new(token)),
            None => TokenProvider::Metadata {
                url: config.metadata_token_url.clone(),
            },
        }
    }

    pub async fn token(&self, client: &reqwest::Client) -> Result<Credential, SyncError> {
        match self {
            TokenProvider::Static(credential) => {
                debug!("🎟️ Using the configured static warehouse token");
                Ok(credential.clone())
            }
            TokenProvider::Metadata { url } => {
                let response = client
                    .get(url)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .map_err(|err| SyncError::Token(format!("metadata request failed: {err}")))?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(SyncError::Token(format!(
                        "metadata server answered {status}: {body}"
                    )));
                }
                let token: MetadataToken = response
                    .json()
                    .await
                    .map_err(|err| SyncError::Token(format!("metadata token did not decode: {err}")))?;
                Ok(Credential::new(token.access_token))
            }
        }
    }
}

/// 🏗️ Submits the run's single load job. Clone-per-run; the client pools connections.
#[derive(Debug, Clone)]
pub struct BigQuerySink {
    client: reqwest::Client,
    config: BigQuerySinkConfig,
    tokens: TokenProvider,
}

impl BigQuerySink {
    pub fn new(config: BigQuerySinkConfig, timeout: Duration) -> anyhow::Result<Self> {
        use anyhow::Context;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10).min(timeout))
            .timeout(timeout)
            .build()
            .context("💀 The HTTP client refused to be born. The TLS stack wept.")?;
        let tokens = TokenProvider::from_config(&config);
        Ok(Self {
            client,
            config,
            tokens,
        })
    }

    pub fn destination(&self) -> DestinationTable {
        DestinationTable {
            project_id: self.config.project_id.clone(),
            dataset_id: self.config.dataset_id.clone(),
            table_id: self.config.table_id.clone(),
        }
    }

    /// 📜 The JSON half of the multipart body.
    fn job_configuration(&self) -> Value {
        let mut job = json!({
            "configuration": {
                "load": {
                    "destinationTable": self.destination(),
                    "sourceFormat": SOURCE_FORMAT,
                    "writeDisposition": WRITE_DISPOSITION,
                }
            }
        });
        if let Some(location) = &self.config.location {
            job["jobReference"] = json!({ "location": location });
        }
        job
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/upload/bigquery/v2/projects/{}/jobs?uploadType=multipart",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.project_id
        )
    }
}

/// ✂️ A boundary that won't show up inside JSON text. Probably. It has a timestamp in it.
fn multipart_boundary() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("convoy_boundary_{nanos:x}")
}

/// 📦 `multipart/related`: metadata part, then media part. CRLF everywhere, as the RFC demands.
fn multipart_related_body(boundary: &str, metadata: &Value, payload: &str) -> Vec<u8> {
    let metadata = metadata.to_string();
    let mut body = Vec::with_capacity(payload.len() + metadata.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.as_bytes());
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(payload.as_bytes());
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[async_trait]
impl Sink for BigQuerySink {
    async fn send(&mut self, job: LoadJob) -> Result<(), SyncError> {
        let token = self.tokens.token(&self.client).await?;
        let boundary = multipart_boundary();
        let body = multipart_related_body(&boundary, &self.job_configuration(), &job.ndjson);
        let url = self.upload_url();

        info!(
            "📡 Creating load job for {} rows ({} bytes) at {}",
            job.records,
            job.ndjson.len(),
            url
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(token.expose())
            .header(
                "Content-Type",
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await
            .map_err(|err| SyncError::LoadSubmission {
                status: None,
                body: err.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SyncError::LoadSubmission {
                status: Some(status.as_u16()),
                body: text,
            });
        }

        let job_id = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v["jobReference"]["jobId"].as_str().map(str::to_string));
        match job_id {
            Some(job_id) => info!("✅ Load job {} created", job_id),
            None => info!("✅ Load job created. Response: {}", text),
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        debug!("🗑️ BigQuery sink closing — nothing buffered, nothing to flush");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, header_regex, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer, access_token: Option<&str>) -> BigQuerySinkConfig {
        BigQuerySinkConfig {
            project_id: "proj".into(),
            dataset_id: "agents".into(),
            table_id: "conversations".into(),
            location: Some("EU".into()),
            api_base_url: server.uri(),
            access_token: access_token.map(str::to_string),
            metadata_token_url: format!("{}/token", server.uri()),
        }
    }

    fn job() -> LoadJob {
        LoadJob {
            ndjson: "{\"id\":\"a\"}\n{\"id\":\"b\"}\n".into(),
            records: 2,
        }
    }

    #[tokio::test]
    async fn the_one_where_one_multipart_request_carries_config_and_rows() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/bigquery/v2/projects/proj/jobs"))
            .and(query_param("uploadType", "multipart"))
            .and(header("Authorization", "Bearer local-token"))
            .and(header_regex("Content-Type", "^multipart/related; boundary=convoy_boundary_"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"jobReference": {"jobId": "job_123"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut sink = BigQuerySink::new(config_for(&server, Some("local-token")), Duration::from_secs(5))
            .expect("💀 sink should build");
        sink.send(job()).await.expect("💀 load should be accepted");

        let requests = server.received_requests().await.expect("💀 recording is on");
        assert_eq!(requests.len(), 1);
        let body = String::from_utf8(requests[0].body.clone()).unwrap();
        assert!(body.contains("\"sourceFormat\":\"NEWLINE_DELIMITED_JSON\""));
        assert!(body.contains("\"writeDisposition\":\"WRITE_APPEND\""));
        assert!(body.contains("\"tableId\":\"conversations\""));
        assert!(body.contains("\"location\":\"EU\""));
        assert!(body.contains("Content-Type: application/octet-stream\r\n\r\n{\"id\":\"a\"}\n{\"id\":\"b\"}\n\r\n--"));
    }

    #[tokio::test]
    async fn the_one_where_the_metadata_server_provides_the_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(header("Metadata-Flavor", "Google"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "meta-token", "expires_in": 3599})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/upload/bigquery/v2/projects/proj/jobs"))
            .and(header("Authorization", "Bearer meta-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let mut sink = BigQuerySink::new(config_for(&server, None), Duration::from_secs(5))
            .expect("💀 sink should build");
        sink.send(job()).await.expect("💀 load should be accepted");
    }

    #[tokio::test]
    async fn the_one_where_a_refused_load_surfaces_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/bigquery/v2/projects/proj/jobs"))
            .respond_with(ResponseTemplate::new(403).set_body_string("access denied"))
            .expect(1)
            .mount(&server)
            .await;

        let mut sink = BigQuerySink::new(config_for(&server, Some("t")), Duration::from_secs(5))
            .expect("💀 sink should build");
        match sink.send(job()).await {
            Err(SyncError::LoadSubmission { status, body }) => {
                assert_eq!(status, Some(403));
                assert_eq!(body, "access denied");
            }
            honestly_who_knows => panic!("💀 expected a load error, got {honestly_who_knows:?}"),
        }
    }

    #[tokio::test]
    async fn the_one_where_no_token_means_no_load_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut sink = BigQuerySink::new(config_for(&server, Some("   ")), Duration::from_secs(5))
            .expect("💀 sink should build");
        let err = sink.send(job()).await.expect_err("💀 token failure should stop the load");
        assert!(matches!(err, SyncError::Token(_)));
    }

    #[test]
    fn the_one_where_the_multipart_body_is_framed_correctly() {
        let body = multipart_related_body("b", &json!({"k": 1}), "line\n");
        assert_eq!(
            String::from_utf8(body).unwrap(),
            "--b\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{\"k\":1}\r\n\
             --b\r\nContent-Type: application/octet-stream\r\n\r\nline\n\r\n--b--\r\n"
        );
    }
}
