//! 🎭 *[a worker picks a name off the board. borrows a badge. reads their mail.]*
//! *[hands the badge back. picks the next name. the board empties. the worker goes home.]*
//!
//! A principal worker never retries and never stops the pool. A principal that
//! fails is logged and contributes nothing; a principal with nothing in the
//! window contributes nothing either, quietly.

use async_channel::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{Worker, WorkerTally};
use crate::common::{Principal, RecordBatch};
use crate::fetcher::PrincipalFetcher;
use crate::progress::RunProgress;

#[derive(Debug)]
pub(crate) struct PrincipalWorker {
    worker_id: usize,
    work_rx: Receiver<Principal>,
    results_tx: Sender<RecordBatch>,
    fetcher: PrincipalFetcher,
    progress: RunProgress,
}

impl PrincipalWorker {
    pub(crate) fn new(
        worker_id: usize,
        work_rx: Receiver<Principal>,
        results_tx: Sender<RecordBatch>,
        fetcher: PrincipalFetcher,
        progress: RunProgress,
    ) -> Self {
        Self {
            worker_id,
            work_rx,
            results_tx,
            fetcher,
            progress,
        }
    }
}

impl Worker for PrincipalWorker {
    type Output = WorkerTally;

    fn start(self) -> JoinHandle<WorkerTally> {
        tokio::spawn(async move {
            let mut tally = WorkerTally::default();
            // -- Err from recv == queue closed and drained. clock out.
            while let Ok(principal) = self.work_rx.recv().await {
                tally.processed += 1;
                match self.fetcher.fetch(&principal).await {
                    Ok(conversations) if conversations.is_empty() => {
                        tally.empty += 1;
                        self.progress.principal_done(0);
                    }
                    Ok(conversations) => {
                        let records = conversations.len();
                        let batch = RecordBatch {
                            principal_id: principal.id,
                            conversations,
                        };
                        if self.results_tx.send(batch).await.is_err() {
                            warn!(
                                "⚠️ Worker {}: results channel closed early, dropping {} conversations of principal {}",
                                self.worker_id, records, principal.id
                            );
                        }
                        self.progress.principal_done(records as u64);
                    }
                    Err(err) => {
                        warn!(
                            "⚠️ Worker {}: skipping principal {} ({}): {}",
                            self.worker_id,
                            principal.id,
                            principal.display_email(),
                            err
                        );
                        tally.failed += 1;
                        self.progress.principal_failed();
                    }
                }
            }
            debug!(
                "🏁 Worker {} done: {} processed, {} failed, {} empty",
                self.worker_id, tally.processed, tally.failed, tally.empty
            );
            tally
        })
    }
}
