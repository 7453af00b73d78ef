//! 🔄 Transforms — where conversations go on a diet before the warehouse 🥗
//!
//! 🎬 COLD OPEN — INT. BILLING DASHBOARD — END OF MONTH
//!
//! The storage line went up and to the right. Someone zoomed in. Most of the bytes
//! were datasource schemas the agent had echoed back into every single reply.
//! Thousands of copies of the same column list. In a table about conversations.
//!
//! This module is the reason that line flattened.
//!
//! ## Knowledge Graph 🧠
//! - Pattern: zero-sized marker types + static dispatch (no vtables were harmed)
//! - [`RecordTransform`] runs on a fully fetched [`Conversation`] before it goes on the channel
//! - [`PruneAgentMessages`] is the only transform today; it edits `messages` in place
//! - Shape-tolerant: missing or wrong-shaped fields mean "nothing to prune", never an error
//!
//! ⚠️ No defensive copies. The tree you hand in is the tree that gets trimmed. 🦆

use crate::common::Conversation;

pub mod prune;

pub use prune::{PruneAgentMessages, prune_messages};

/// 🔄 A transform applied to each fetched conversation, in place.
///
/// Infallible by contract: the upstream owns the shape of these trees, so a
/// transform that meets something it doesn't recognise must leave it alone.
pub trait RecordTransform {
    fn transform(conversation: &mut Conversation);
}
