//! 💀 The run's error taxonomy — a field guide to everything that can go sideways.
//!
//! Two blast radii live here:
//! - **run-scoped** (`Login`, `Discovery`, `Token`, `LoadSubmission`, `RunInFlight`):
//!   the run stops and the error bubbles out of [`crate::supervisors::Supervisor::run`].
//! - **unit-scoped** (`Session`, `Listing`, `DetailFetch`): one principal or one
//!   conversation is skipped, a `warn!` is logged, and everybody else keeps going.
//!
//! Nothing here retries. Retries are a lifestyle, and we haven't committed to one. 🦆

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// 🔒 The elevated login failed. Nothing can happen without it.
    #[error("elevated login failed: {0}")]
    Login(String),

    /// 🔎 The principal report didn't run or didn't decode. Nothing to dispatch.
    #[error("principal discovery failed: {0}")]
    Discovery(String),

    /// 🎭 Could not impersonate one principal.
    #[error("could not impersonate principal {principal_id}: {reason}")]
    Session { principal_id: u64, reason: String },

    /// 📋 Listing one principal's conversations failed.
    #[error("listing conversations failed: {0}")]
    Listing(String),

    /// 📄 Fetching one conversation's detail failed.
    #[error("fetching conversation {conversation_id} failed: {reason}")]
    DetailFetch {
        conversation_id: String,
        reason: String,
    },

    /// 🎟️ No warehouse token, no warehouse write.
    #[error("could not obtain a warehouse token: {0}")]
    Token(String),

    /// 🏗️ The single load job was refused. The aggregated records are gone for this attempt.
    #[error("load job submission failed{}: {body}", with_status(.status))]
    LoadSubmission { status: Option<u16>, body: String },

    /// 🚦 Single-flight is on and another run already holds the gate.
    #[error("another sync run is already in flight")]
    RunInFlight,
}

fn with_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" with status {s}")).unwrap_or_default()
}
