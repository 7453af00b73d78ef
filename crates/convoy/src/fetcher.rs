//! 🎯 The per-principal fetcher — one badge, one listing, many detail calls.
//!
//! Steps, in order, every time:
//! 1. 🎭 impersonate the principal with the elevated credential
//! 2. 📋 list their conversations inside the run's window
//! 3. 📄 fetch each conversation's detail; a failure skips that one conversation
//! 4. ✂️ prune the messages
//! 5. 🚪 end the impersonated session, whatever happened in 2–4
//!
//! A failed impersonation or listing fails the principal. Nothing else does.

use std::sync::Arc;

use tracing::{trace, warn};

use crate::backends::{ConversationSource, SessionProvider, SourceBackend};
use crate::common::{Conversation, Credential, Principal, SyncWindow};
use crate::errors::SyncError;
use crate::transforms::{PruneAgentMessages, RecordTransform};

/// 🎯 Everything a worker needs to fetch any principal. Cheap to clone.
#[derive(Debug, Clone)]
pub(crate) struct PrincipalFetcher {
    source: Arc<SourceBackend>,
    elevated: Arc<Credential>,
    window: SyncWindow,
}

impl PrincipalFetcher {
    pub(crate) fn new(source: Arc<SourceBackend>, elevated: Arc<Credential>, window: SyncWindow) -> Self {
        Self {
            source,
            elevated,
            window,
        }
    }

    /// 🚀 Fetch, detail and prune every conversation `principal` owns in the window.
    pub(crate) async fn fetch(&self, principal: &Principal) -> Result<Vec<Conversation>, SyncError> {
        let session = self.source.impersonate(&self.elevated, principal.id).await?;
        let result = self.fetch_as(&session, principal).await;
        // -- 🚪 best-effort, and after every outcome. the badge goes back either way.
        self.source.end_session(&session).await;
        result
    }

    async fn fetch_as(
        &self,
        session: &Credential,
        principal: &Principal,
    ) -> Result<Vec<Conversation>, SyncError> {
        let summaries = self.source.list_conversations(session, &self.window).await?;
        if summaries.is_empty() {
            trace!("💤 Principal {} has nothing in this window", principal.id);
            return Ok(Vec::new());
        }

        let mut detailed = Vec::with_capacity(summaries.len());
        for summary in summaries {
            match self.source.conversation_detail(session, &summary.id).await {
                Ok(mut conversation) => {
                    PruneAgentMessages::transform(&mut conversation);
                    detailed.push(conversation);
                }
                Err(err) => warn!(
                    "⚠️ Skipping a conversation of principal {} ({}): {}",
                    principal.id,
                    principal.display_email(),
                    err
                ),
            }
        }
        Ok(detailed)
    }
}
