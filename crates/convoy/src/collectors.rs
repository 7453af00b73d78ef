//! 📦 The Collectors module — payload assembly for the one load job a run gets.
//!
//! 🧠 Knowledge graph:
//! - `NdjsonCollector` serializes each conversation to one JSON line as the
//!   aggregator drains the results channel. One line per record, trailing `\n`.
//! - `LoadJob` is the finished payload plus its record count. Sinks take it by value.
//! - A conversation that refuses to serialize is logged and left out. It does not
//!   count, and it does not take its neighbours down with it.
//!
//! What's the DEAL with NDJSON? It's JSON but unfriendly. Every line is lonely.
//! No brackets to hold them. No commas to connect them. Just newlines. 🦆

use tracing::warn;

use crate::common::Conversation;

/// 🏗️ The run's consolidated payload. Exactly what goes in the data part of the load request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJob {
    pub ndjson: String,
    pub records: usize,
}

impl LoadJob {
    /// 🔍 Newlines in the payload. Should always equal `records`.
    pub fn line_count(&self) -> usize {
        memchr::memchr_iter(b'\n', self.ndjson.as_bytes()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }
}

/// 📡 Newline-Delimited JSON, built incrementally.
#[derive(Debug, Default)]
pub(crate) struct NdjsonCollector {
    payload: String,
    records: usize,
    skipped: usize,
}

impl NdjsonCollector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 📥 Append one conversation as one line.
    pub(crate) fn push(&mut self, conversation: &Conversation) {
        match serde_json::to_string(conversation) {
            Ok(line) => {
                self.payload.push_str(&line);
                self.payload.push('\n');
                self.records += 1;
            }
            Err(err) => {
                // -- one bad apple gets left at the orchard. the crate still ships.
                warn!(
                    "⚠️ Failed to serialize conversation {}: {}. Leaving it out of the load job.",
                    conversation.id, err
                );
                self.skipped += 1;
            }
        }
    }

    pub(crate) fn records(&self) -> usize {
        self.records
    }

    pub(crate) fn skipped(&self) -> usize {
        self.skipped
    }

    pub(crate) fn finish(self) -> LoadJob {
        LoadJob {
            ndjson: self.payload,
            records: self.records,
        }
    }
}
