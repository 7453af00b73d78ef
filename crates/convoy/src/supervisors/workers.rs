//! 🧵 Workers: the ones who actually do the work while the Supervisor takes
//! all the credit in the sprint retro.
//!
//! - `PrincipalWorker`: pulls principals off the shared work queue until it's
//!   closed and empty, fetches each one, drops non-empty batches on the results channel.
//! - `Aggregator`: drains the results channel until the closer shuts it, then
//!   ships one load job (or, in dry-run, just counts).
//!
//! "What's the DEAL with lifetime annotations? You borrow something,
//!  you give it back. It's not that hard, Jerry!" 🦆

use std::ops::AddAssign;

use tokio::task::JoinHandle;

mod aggregator;
mod principal_worker;

pub(super) use aggregator::Aggregator;
pub(super) use principal_worker::PrincipalWorker;

/// 🏗️ A background worker, that does work. duh.
pub(super) trait Worker {
    type Output: Send + 'static;

    /// 🚀 Spawn it. The handle is the only way to hear back.
    fn start(self) -> JoinHandle<Self::Output>;
}

/// 🧮 What a principal worker got through before the queue ran dry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct WorkerTally {
    pub(super) processed: usize,
    pub(super) failed: usize,
    pub(super) empty: usize,
}

impl AddAssign for WorkerTally {
    fn add_assign(&mut self, other: Self) {
        self.processed += other.processed;
        self.failed += other.failed;
        self.empty += other.empty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_tallies_add_up() {
        let mut total = WorkerTally::default();
        total += WorkerTally {
            processed: 3,
            failed: 1,
            empty: 1,
        };
        total += WorkerTally {
            processed: 2,
            failed: 0,
            empty: 2,
        };
        assert_eq!(
            total,
            WorkerTally {
                processed: 5,
                failed: 1,
                empty: 3,
            }
        );
    }
}
