//! 📦 Common data structures — the building blocks of convoy
//!
//! ---
//!
//! 🎬 COLD OPEN — INT. ANALYTICS TEAM STANDUP — 9:01 AM
//!
//! "How many people talked to the agent yesterday?" asked the PM.
//! Silence. The warehouse table was empty. The agent had been chatty all week.
//! The conversations existed. They were just... trapped. One per user. Behind
//! a login. Behind ANOTHER login. Like a matryoshka doll made of OAuth.
//!
//! ✅ This module defines the structs that carry those conversations out:
//! a [`Principal`] to impersonate, a [`ConversationSummary`] to find them,
//! a [`Conversation`] to carry them, and a [`RecordBatch`] to ship them.
//!
//! 🦆

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// 👤 A principal — one user on whose behalf we borrow a badge.
///
/// Decoded straight from the discovery report rows, which use dotted column
/// names (`user.id`, `user.email`) because reporting tools love a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Principal {
    #[serde(rename = "user.id")]
    pub id: u64,
    /// 📧 Optional because the report happily returns `null` for service users.
    #[serde(rename = "user.email", default)]
    pub email: Option<String>,
}

impl Principal {
    /// 🏷️ Email for log lines, with a placeholder for the nameless.
    pub fn display_email(&self) -> &str {
        self.email.as_deref().unwrap_or("<no email>")
    }
}

/// 🔎 The bare minimum the listing endpoint tells us: an id to go fetch the rest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConversationSummary {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
}

/// 💬 A fully detailed conversation, ready for the warehouse.
///
/// `sources`, `messages` and `conversation_agent` are opaque trees owned by the
/// upstream system. We don't validate them. We only prune `messages`.
/// Field names are the wire names, both inbound and outbound, so the NDJSON
/// lines land in the table with the columns it expects.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sources: Value,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub messages: Value,
    #[serde(default)]
    pub conversation_agent: Value,
}

/// 📦 One principal's haul — what a worker drops on the results channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    pub principal_id: u64,
    pub conversations: Vec<Conversation>,
}

/// 🗓️ Which slice of history a run pulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Only conversations created today (local date at run start).
    Daily,
    /// Everything. The whole archive. Bring snacks.
    Historical,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Daily => "daily",
            SyncMode::Historical => "historical",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 🪟 The listing filter a run hands to every worker.
///
/// Resolved once per run so two workers on either side of midnight
/// still agree on what "today" means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncWindow {
    pub created_on: Option<chrono::NaiveDate>,
}

impl SyncWindow {
    pub fn for_mode(mode: SyncMode, today: chrono::NaiveDate) -> Self {
        match mode {
            SyncMode::Daily => Self {
                created_on: Some(today),
            },
            SyncMode::Historical => Self { created_on: None },
        }
    }

    /// 📅 Window for `mode` anchored at the local calendar date right now.
    pub fn starting_now(mode: SyncMode) -> Self {
        Self::for_mode(mode, chrono::Local::now().date_naive())
    }

    /// `YYYY-MM-DD`, the only date dialect the listing endpoint speaks.
    pub fn created_at_filter(&self) -> Option<String> {
        self.created_on.map(|d| d.format("%Y-%m-%d").to_string())
    }
}

/// 🔒 A session token. Debug output is redacted, because logs end up in places.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

// -- 🎯 ids show up as numbers on some endpoints and strings on others.
// -- consistency is for people who don't ship fast enough.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    match raw {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        honestly_who_knows => Err(serde::de::Error::custom(format!(
            "expected a string or number id, got {honestly_who_knows}"
        ))),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(honestly_who_knows) => Err(serde::de::Error::custom(format!(
            "expected a string or number id, got {honestly_who_knows}"
        ))),
    }
}
