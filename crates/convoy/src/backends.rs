//! 🔌 Backends — where the real I/O happens.
//!
//! 🚰 Source backends log in, borrow badges and pour conversations.
//! 🕳️ Sink backends take the single load job and ship it to the warehouse.
//! And in between, we panic! (kidding, we return `SyncError`)
//!
//! 🧠 Knowledge graph:
//! - Pattern: trait → concrete impls (Looker / BigQuery / InMemory) → `*Backend` enum dispatch
//! - `SessionProvider`: login, impersonate, end session
//! - `ConversationSource`: discovery report, per-principal listing, per-conversation detail
//! - `Sink`: one `send` per run, then `close`
//!
//! 🦆 The duck is here because every file must have one. This is law.

use async_trait::async_trait;

use crate::app_config::{RuntimeConfig, SinkConfig, SourceConfig};
use crate::collectors::LoadJob;
use crate::common::{Conversation, ConversationSummary, Credential, Principal, SyncWindow};
use crate::errors::SyncError;

pub mod bigquery;
pub mod in_mem;
pub mod looker;

pub use bigquery::{BigQuerySink, BigQuerySinkConfig, TokenProvider};
pub use in_mem::{InMemorySink, InMemorySource};
pub use looker::{LookerSource, LookerSourceConfig};

// ===== Source side =====

/// 🎭 Hands out credentials: one elevated, many impersonated.
#[async_trait]
pub trait SessionProvider: std::fmt::Debug + Send + Sync {
    /// 🔒 Log in with the service credentials.
    async fn login(&self) -> Result<Credential, SyncError>;
    /// 🎭 Borrow a principal's badge using the elevated one.
    async fn impersonate(
        &self,
        elevated: &Credential,
        principal_id: u64,
    ) -> Result<Credential, SyncError>;
    /// 🚪 Hand the badge back. Best-effort: failures are logged, never returned.
    async fn end_session(&self, credential: &Credential);
}

/// 📡 Reads principals and their conversations.
#[async_trait]
pub trait ConversationSource: std::fmt::Debug + Send + Sync {
    /// 🔎 Run the pre-registered principal report with no row limit.
    async fn discover_principals(&self, elevated: &Credential) -> Result<Vec<Principal>, SyncError>;
    /// 📋 List the caller's conversations inside `window`.
    async fn list_conversations(
        &self,
        session: &Credential,
        window: &SyncWindow,
    ) -> Result<Vec<ConversationSummary>, SyncError>;
    /// 📄 Fetch one conversation with the full field projection.
    async fn conversation_detail(
        &self,
        session: &Credential,
        conversation_id: &str,
    ) -> Result<Conversation, SyncError>;
}

/// 🎭 The many faces of a Source — a polymorphic casting call for data origins.
///
/// Shared behind an `Arc` by every worker, hence `&self` everywhere.
#[derive(Debug)]
pub enum SourceBackend {
    Looker(LookerSource),
    InMemory(InMemorySource),
}

impl SourceBackend {
    /// 🏗️ Build the configured source.
    pub fn from_config(source: &SourceConfig, runtime: &RuntimeConfig) -> anyhow::Result<Self> {
        match source {
            SourceConfig::Looker(config) => Ok(SourceBackend::Looker(LookerSource::new(
                config.clone(),
                runtime.http_timeout(),
            )?)),
        }
    }
}

#[async_trait]
impl SessionProvider for SourceBackend {
    async fn login(&self) -> Result<Credential, SyncError> {
        match self {
            SourceBackend::Looker(s) => s.login().await,
            SourceBackend::InMemory(s) => s.login().await,
        }
    }

    async fn impersonate(
        &self,
        elevated: &Credential,
        principal_id: u64,
    ) -> Result<Credential, SyncError> {
        match self {
            SourceBackend::Looker(s) => s.impersonate(elevated, principal_id).await,
            SourceBackend::InMemory(s) => s.impersonate(elevated, principal_id).await,
        }
    }

    async fn end_session(&self, credential: &Credential) {
        match self {
            SourceBackend::Looker(s) => s.end_session(credential).await,
            SourceBackend::InMemory(s) => s.end_session(credential).await,
        }
    }
}

#[async_trait]
impl ConversationSource for SourceBackend {
    async fn discover_principals(&self, elevated: &Credential) -> Result<Vec<Principal>, SyncError> {
        match self {
            SourceBackend::Looker(s) => s.discover_principals(elevated).await,
            SourceBackend::InMemory(s) => s.discover_principals(elevated).await,
        }
    }

    async fn list_conversations(
        &self,
        session: &Credential,
        window: &SyncWindow,
    ) -> Result<Vec<ConversationSummary>, SyncError> {
        match self {
            SourceBackend::Looker(s) => s.list_conversations(session, window).await,
            SourceBackend::InMemory(s) => s.list_conversations(session, window).await,
        }
    }

    async fn conversation_detail(
        &self,
        session: &Credential,
        conversation_id: &str,
    ) -> Result<Conversation, SyncError> {
        match self {
            SourceBackend::Looker(s) => s.conversation_detail(session, conversation_id).await,
            SourceBackend::InMemory(s) => s.conversation_detail(session, conversation_id).await,
        }
    }
}

// ===== Sink side =====

/// 🕳️ A sink that submits the run's one and only load job.
///
/// # Contract 📜
/// - `send` is called at most once per run, and never with an empty job.
/// - `close` releases whatever the sink holds. Call it. Always.
#[async_trait]
pub trait Sink: std::fmt::Debug + Send {
    async fn send(&mut self, job: LoadJob) -> Result<(), SyncError>;
    async fn close(&mut self) -> Result<(), SyncError>;
}

/// 🎭 The many faces of a Sink. Cloned once per run, handed to the aggregator.
#[derive(Debug, Clone)]
pub enum SinkBackend {
    BigQuery(BigQuerySink),
    InMemory(InMemorySink),
}

impl SinkBackend {
    /// 🏗️ Build the configured sink.
    pub fn from_config(sink: &SinkConfig, runtime: &RuntimeConfig) -> anyhow::Result<Self> {
        match sink {
            SinkConfig::BigQuery(config) => Ok(SinkBackend::BigQuery(BigQuerySink::new(
                config.clone(),
                runtime.http_timeout(),
            )?)),
            SinkConfig::InMemory => Ok(SinkBackend::InMemory(InMemorySink::new())),
        }
    }
}

#[async_trait]
impl Sink for SinkBackend {
    async fn send(&mut self, job: LoadJob) -> Result<(), SyncError> {
        match self {
            SinkBackend::BigQuery(sink) => sink.send(job).await,
            SinkBackend::InMemory(sink) => sink.send(job).await,
        }
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        match self {
            SinkBackend::BigQuery(sink) => sink.close().await,
            SinkBackend::InMemory(sink) => sink.close().await,
        }
    }
}
