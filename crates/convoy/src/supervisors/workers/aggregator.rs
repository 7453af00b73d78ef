//! 🎬 *[a channel fills with batches. somewhere, a warehouse waits.]*
//! *[the clock on the wall reads 2:47am.]*
//!
//! 🏗️ The Aggregator — patient, tireless, and deeply unbothered by the chaos
//! upstream. It drains every batch until the channel is closed, and only then
//! decides anything. Zero records: no load job. Dry run: no load job, just
//! numbers. Otherwise: one load job, one attempt, no second chances.

use async_channel::Receiver;
use tracing::{debug, info, warn};

use crate::backends::{Sink, SinkBackend};
use crate::collectors::NdjsonCollector;
use crate::common::RecordBatch;
use crate::errors::SyncError;

/// 📊 What the aggregator saw and did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AggregateOutcome {
    pub(crate) contributing_principals: usize,
    pub(crate) total_records: usize,
    pub(crate) load_job_submitted: bool,
}

#[derive(Debug)]
pub(crate) struct Aggregator {
    results_rx: Receiver<RecordBatch>,
    sink: SinkBackend,
    dry_run: bool,
}

impl Aggregator {
    pub(crate) fn new(results_rx: Receiver<RecordBatch>, sink: SinkBackend, dry_run: bool) -> Self {
        Self {
            results_rx,
            sink,
            dry_run,
        }
    }

    /// 📥 Drain to the end, then load once.
    pub(crate) async fn drain(mut self) -> Result<AggregateOutcome, SyncError> {
        let mut outcome = AggregateOutcome::default();
        let mut collector = NdjsonCollector::new();

        while let Ok(batch) = self.results_rx.recv().await {
            debug!(
                "🪣 Aggregator received {} conversations from principal {}",
                batch.conversations.len(),
                batch.principal_id
            );
            outcome.contributing_principals += 1;
            if self.dry_run {
                outcome.total_records += batch.conversations.len();
            } else {
                for conversation in &batch.conversations {
                    collector.push(conversation);
                }
            }
        }
        debug!("🏁 Aggregator: results channel closed");

        if self.dry_run {
            info!(
                "🧪 Dry run: would have loaded {} total conversations from {} contributing principals in a single job",
                outcome.total_records, outcome.contributing_principals
            );
            return Ok(outcome);
        }

        if collector.skipped() > 0 {
            warn!(
                "⚠️ {} conversations could not be serialized and were left out",
                collector.skipped()
            );
        }
        outcome.total_records = collector.records();
        let job = collector.finish();
        if job.is_empty() {
            info!("💤 No conversations collected. Skipping the load job.");
            self.sink.close().await?;
            return Ok(outcome);
        }

        info!(
            "🚚 Loading {} conversations from {} contributing principals in a single job",
            job.records, outcome.contributing_principals
        );
        self.sink.send(job).await?;
        outcome.load_job_submitted = true;
        self.sink.close().await?;
        Ok(outcome)
    }
}
