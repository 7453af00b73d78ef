//! 🧠 In-memory backends — a source that never leaves RAM and a sink that never forgets.
//!
//! `InMemorySource` is a scripted stand-in for the real source system: you tell it
//! which principals exist, what each one's listing returns (or how it fails),
//! and which detail fetches blow up. It keeps a ledger of who got impersonated,
//! so tests can check that every principal was processed exactly once.
//!
//! `InMemorySink` keeps every load job it's handed. Clone it before handing it off,
//! then peek inside afterwards. The `Arc` means everyone shares the same Vec.
//!
//! 🦆 Why did the in-memory sink go to therapy? It had trouble letting go.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

use super::{ConversationSource, SessionProvider, Sink};
use crate::collectors::LoadJob;
use crate::common::{Conversation, ConversationSummary, Credential, Principal, SyncWindow};
use crate::errors::SyncError;

const ELEVATED_TOKEN: &str = "in-mem-elevated";
const PRINCIPAL_TOKEN_PREFIX: &str = "in-mem-principal-";

/// 📋 What a principal's listing call does.
#[derive(Debug, Clone)]
pub enum ScriptedListing {
    Conversations(Vec<Conversation>),
    Fails(String),
}

/// 🚰 A source scripted up front.
#[derive(Debug, Default, Clone)]
pub struct InMemorySource {
    principals: Vec<Principal>,
    listings: HashMap<u64, ScriptedListing>,
    failing_impersonations: HashSet<u64>,
    failing_details: HashSet<String>,
    discovery_failure: Option<String>,
    listing_gate: Option<Arc<Notify>>,
    impersonated: Arc<Mutex<Vec<u64>>>,
    ended_sessions: Arc<AtomicUsize>,
    discovery_calls: Arc<AtomicUsize>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// ➕ A principal whose listing returns these conversations.
    pub fn with_principal(mut self, principal: Principal, conversations: Vec<Conversation>) -> Self {
        self.listings
            .insert(principal.id, ScriptedListing::Conversations(conversations));
        self.principals.push(principal);
        self
    }

    /// ➕ A principal whose listing call fails.
    pub fn with_failing_listing(mut self, principal: Principal, reason: impl Into<String>) -> Self {
        self.listings
            .insert(principal.id, ScriptedListing::Fails(reason.into()));
        self.principals.push(principal);
        self
    }

    /// 🎭 Impersonating this principal will be refused.
    pub fn with_failing_impersonation(mut self, principal_id: u64) -> Self {
        self.failing_impersonations.insert(principal_id);
        self
    }

    /// 📄 Fetching this conversation's detail will fail.
    pub fn with_failing_detail(mut self, conversation_id: impl Into<String>) -> Self {
        self.failing_details.insert(conversation_id.into());
        self
    }

    /// 🔎 The discovery report will fail.
    pub fn with_failing_discovery(mut self, reason: impl Into<String>) -> Self {
        self.discovery_failure = Some(reason.into());
        self
    }

    /// 🚧 Every listing call parks until `gate` is notified, one permit per call.
    pub fn with_listing_gate(mut self, gate: Arc<Notify>) -> Self {
        self.listing_gate = Some(gate);
        self
    }

    /// 📒 Every principal id that got impersonated, in the order it happened.
    pub async fn impersonated(&self) -> Vec<u64> {
        self.impersonated.lock().await.clone()
    }

    /// 🚪 How many sessions were handed back, elevated one included.
    pub fn ended_sessions(&self) -> usize {
        self.ended_sessions.load(Ordering::SeqCst)
    }

    pub fn discovery_calls(&self) -> usize {
        self.discovery_calls.load(Ordering::SeqCst)
    }

    fn principal_behind(&self, session: &Credential) -> Result<u64, String> {
        session
            .expose()
            .strip_prefix(PRINCIPAL_TOKEN_PREFIX)
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| "not an impersonated session".to_string())
    }

    fn conversations_of(&self, principal_id: u64) -> Result<&[Conversation], String> {
        match self.listings.get(&principal_id) {
            Some(ScriptedListing::Conversations(conversations)) => Ok(conversations.as_slice()),
            Some(ScriptedListing::Fails(reason)) => Err(reason.clone()),
            None => Ok(&[]),
        }
    }
}

#[async_trait]
impl SessionProvider for InMemorySource {
    async fn login(&self) -> Result<Credential, SyncError> {
        Ok(Credential::new(ELEVATED_TOKEN))
    }

    async fn impersonate(
        &self,
        elevated: &Credential,
        principal_id: u64,
    ) -> Result<Credential, SyncError> {
        self.impersonated.lock().await.push(principal_id);
        if elevated.expose() != ELEVATED_TOKEN || self.failing_impersonations.contains(&principal_id) {
            return Err(SyncError::Session {
                principal_id,
                reason: "scripted impersonation failure".into(),
            });
        }
        Ok(Credential::new(format!("{PRINCIPAL_TOKEN_PREFIX}{principal_id}")))
    }

    async fn end_session(&self, _credential: &Credential) {
        self.ended_sessions.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConversationSource for InMemorySource {
    async fn discover_principals(&self, _elevated: &Credential) -> Result<Vec<Principal>, SyncError> {
        self.discovery_calls.fetch_add(1, Ordering::SeqCst);
        match &self.discovery_failure {
            Some(reason) => Err(SyncError::Discovery(reason.clone())),
            None => Ok(self.principals.clone()),
        }
    }

    async fn list_conversations(
        &self,
        session: &Credential,
        _window: &SyncWindow,
    ) -> Result<Vec<ConversationSummary>, SyncError> {
        let principal_id = self.principal_behind(session).map_err(SyncError::Listing)?;
        if let Some(gate) = &self.listing_gate {
            gate.notified().await;
        }
        let conversations = self.conversations_of(principal_id).map_err(SyncError::Listing)?;
        Ok(conversations
            .iter()
            .map(|c| ConversationSummary { id: c.id.clone() })
            .collect())
    }

    async fn conversation_detail(
        &self,
        session: &Credential,
        conversation_id: &str,
    ) -> Result<Conversation, SyncError> {
        let detail_error = |reason: String| SyncError::DetailFetch {
            conversation_id: conversation_id.to_string(),
            reason,
        };
        if self.failing_details.contains(conversation_id) {
            return Err(detail_error("scripted detail failure".into()));
        }
        let principal_id = self.principal_behind(session).map_err(detail_error)?;
        self.conversations_of(principal_id)
            .map_err(detail_error)?
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned()
            .ok_or_else(|| detail_error("no such conversation".into()))
    }
}

/// 📦 A sink that hoards load jobs.
#[derive(Debug, Default, Clone)]
pub struct InMemorySink {
    received: Arc<Mutex<Vec<LoadJob>>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🔍 Everything that was "loaded".
    pub async fn jobs(&self) -> Vec<LoadJob> {
        self.received.lock().await.clone()
    }
}

#[async_trait]
impl Sink for InMemorySink {
    async fn send(&mut self, job: LoadJob) -> Result<(), SyncError> {
        debug!(
            "🧠 In-memory load job: {} records on {} lines",
            job.records,
            job.line_count()
        );
        self.received.lock().await.push(job);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        Ok(())
    }
}
