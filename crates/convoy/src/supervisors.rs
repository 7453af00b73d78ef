//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 *[fifty workers wait at a closed door, badges in hand]*
//! 🎬 "In a world where every principal must be visited exactly once..."
//! 🎬 "One supervisor dared to count them all."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor module — owns a run from login to logout.
//!
//! 🧠 Knowledge graph, in the order things happen:
//! 1. 🚦 single-flight gate (only when `runtime.single_flight` is on)
//! 2. 🔒 elevated login, once
//! 3. 🔎 discovery, once, before any worker exists
//! 4. 🧵 `min(W, n)` principal workers drain a pre-filled, closed work queue
//! 5. 🚧 the closer joins every worker, THEN closes the results channel
//! 6. 🏗️ the aggregator drains results until closed, then loads once (or counts, in dry-run)
//! 7. 🚪 elevated logout, best-effort, whatever happened above
//!
//! ⚠️ DO NOT MAKE THE WORKERS PUB EVER
//! 💀 WORKERS ARE THE SUPERVISOR'S PRIVATE LITTLE MINIONS WHOM THE WORLD FORGOT ABOUT

mod workers;

use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::app_config::AppConfig;
use crate::backends::{ConversationSource, SessionProvider, SinkBackend, SourceBackend};
use crate::common::{Credential, Principal, RecordBatch, SyncMode, SyncWindow};
use crate::errors::SyncError;
use crate::fetcher::PrincipalFetcher;
use crate::progress::RunProgress;
use workers::{Aggregator, PrincipalWorker, Worker, WorkerTally};

/// 📋 What one run did. Returned on success, logged either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub mode: SyncMode,
    pub dry_run: bool,
    pub principals_discovered: usize,
    /// Principals whose impersonation or listing failed. They contributed nothing.
    pub principals_failed: usize,
    /// Principals that put at least one conversation on the results channel.
    pub contributing_principals: usize,
    pub total_records: usize,
    pub load_job_submitted: bool,
}

impl RunReport {
    fn empty(mode: SyncMode, dry_run: bool, principals_discovered: usize) -> Self {
        Self {
            mode,
            dry_run,
            principals_discovered,
            principals_failed: 0,
            contributing_principals: 0,
            total_records: 0,
            load_job_submitted: false,
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} total records across {} contributing principal{}",
            self.total_records,
            self.contributing_principals,
            if self.contributing_principals == 1 { "" } else { "s" }
        )
    }
}

/// 📦 The Supervisor: because even async tasks need someone hovering over them
/// asking "is it done yet?".
///
/// Cheap to clone. Clones share backends and the single-flight gate, so a
/// daily trigger and a historical trigger on clones of one supervisor see each other.
#[derive(Debug, Clone)]
pub struct Supervisor {
    app_config: AppConfig,
    source: Arc<SourceBackend>,
    sink: SinkBackend,
    run_gate: Arc<Mutex<()>>,
}

impl Supervisor {
    /// 🏗️ Build backends from config and wrap them.
    pub fn from_config(app_config: AppConfig) -> anyhow::Result<Self> {
        app_config
            .validate()
            .context("💀 Refusing to build a supervisor from an invalid config")?;
        let source = SourceBackend::from_config(&app_config.source_config, &app_config.runtime)
            .context("💀 Could not build the source backend from the config")?;
        let sink = SinkBackend::from_config(&app_config.sink_config, &app_config.runtime)
            .context("💀 Could not build the sink backend from the config")?;
        Ok(Self::new(app_config, source, sink))
    }

    /// 🚀 Birth of a Supervisor. It's like a baby, but less crying.
    ///
    /// A `worker_pool_size` of 0 is treated as 1: somebody has to drain the queue.
    pub fn new(app_config: AppConfig, source: SourceBackend, sink: SinkBackend) -> Self {
        if app_config.runtime.worker_pool_size == 0 {
            warn!("⚠️ worker_pool_size is 0. Running with a single worker instead.");
        }
        Self {
            app_config,
            source: Arc::new(source),
            sink,
            run_gate: Arc::new(Mutex::new(())),
        }
    }

    /// 🧵 One full sync run for `mode`, with the window pinned to the local date right now.
    pub async fn run(&self, mode: SyncMode, dry_run: bool) -> Result<RunReport, SyncError> {
        self.run_in_window(mode, SyncWindow::starting_now(mode), dry_run)
            .await
    }

    /// 🪟 Same as [`Supervisor::run`], with the caller choosing the window.
    pub async fn run_in_window(
        &self,
        mode: SyncMode,
        window: SyncWindow,
        dry_run: bool,
    ) -> Result<RunReport, SyncError> {
        // -- 🚦 held until this fn returns. dropped guard == gate open.
        let _gate = if self.app_config.runtime.single_flight {
            Some(self.run_gate.try_lock().map_err(|_| SyncError::RunInFlight)?)
        } else {
            None
        };

        info!(
            "🚀 Starting {} sync{} (window: {})",
            mode,
            if dry_run { " (dry run)" } else { "" },
            window.created_at_filter().as_deref().unwrap_or("everything")
        );

        let elevated = Arc::new(self.source.login().await?);
        let result = self
            .run_with_session(mode, window, dry_run, Arc::clone(&elevated))
            .await;
        self.source.end_session(&elevated).await;

        match &result {
            Ok(report) => info!("✅ {} sync finished: {}", mode, report),
            Err(err) => error!("💀 {} sync failed: {}", mode, err),
        }
        result
    }

    async fn run_with_session(
        &self,
        mode: SyncMode,
        window: SyncWindow,
        dry_run: bool,
        elevated: Arc<Credential>,
    ) -> Result<RunReport, SyncError> {
        let principals = self.source.discover_principals(&elevated).await?;
        let discovered = principals.len();
        info!("🔎 Discovered {} principals", discovered);

        let mut report = RunReport::empty(mode, dry_run, discovered);
        if principals.is_empty() {
            info!("💤 Nobody to sync. No workers, no load job.");
            return Ok(report);
        }

        let progress = RunProgress::new(
            mode.as_str(),
            discovered as u64,
            self.app_config.runtime.show_progress,
        );
        let fetcher = PrincipalFetcher::new(Arc::clone(&self.source), elevated, window);

        let (results_rx, closer) = self.dispatch(principals, fetcher, progress.clone()).await;
        let outcome = Aggregator::new(results_rx, self.sink.clone(), dry_run)
            .drain()
            .await;
        let tally = match closer.await {
            Ok(tally) => tally,
            Err(join_err) => {
                error!("💀 The worker closer died: {}", join_err);
                WorkerTally::default()
            }
        };
        progress.finish();
        debug!(
            "📊 {} of {} principals accounted for ({} empty)",
            progress.principals_seen(),
            discovered,
            tally.empty
        );

        let outcome = outcome?;
        report.principals_failed = tally.failed;
        report.contributing_principals = outcome.contributing_principals;
        report.total_records = outcome.total_records;
        report.load_job_submitted = outcome.load_job_submitted;
        Ok(report)
    }

    /// 🧵 Fan out: fill the work queue, close it, start the pool, and spawn the
    /// closer that shuts the results channel after the last worker exits.
    async fn dispatch(
        &self,
        principals: Vec<Principal>,
        fetcher: PrincipalFetcher,
        progress: RunProgress,
    ) -> (
        async_channel::Receiver<RecordBatch>,
        tokio::task::JoinHandle<WorkerTally>,
    ) {
        let capacity = principals.len().max(1);
        let pool_size = self
            .app_config
            .runtime
            .worker_pool_size
            .max(1)
            .min(principals.len());
        let (work_tx, work_rx) = async_channel::bounded::<Principal>(capacity);
        let (results_tx, results_rx) = async_channel::bounded::<RecordBatch>(capacity);

        // -- queue has room for everyone, so these sends never wait
        for principal in principals {
            if let Err(err) = work_tx.send(principal).await {
                warn!("⚠️ Work queue refused principal {}", err.0.id);
            }
        }
        work_tx.close();

        let handles: Vec<_> = (0..pool_size)
            .map(|worker_id| {
                PrincipalWorker::new(
                    worker_id,
                    work_rx.clone(),
                    results_tx.clone(),
                    fetcher.clone(),
                    progress.clone(),
                )
                .start()
            })
            .collect();
        drop(work_rx);
        info!("🧵 Started {} workers", pool_size);

        let closer = tokio::spawn(async move {
            let mut tally = WorkerTally::default();
            for joined in join_all(handles).await {
                match joined {
                    Ok(worker_tally) => tally += worker_tally,
                    Err(join_err) => error!("💀 A principal worker died: {}", join_err),
                }
            }
            // -- every worker is gone. only now may the aggregator see the end.
            results_tx.close();
            tally
        });

        (results_rx, closer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::{RuntimeConfig, SinkConfig, SourceConfig};
    use crate::backends::{
        BigQuerySink, BigQuerySinkConfig, InMemorySink, InMemorySource, LookerSourceConfig,
    };
    use crate::common::Conversation;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn principal(id: u64) -> Principal {
        Principal {
            id,
            email: Some(format!("principal{id}@example.com")),
        }
    }

    fn conversation(id: &str) -> Conversation {
        Conversation {
            id: id.into(),
            messages: json!([]),
            ..Default::default()
        }
    }

    fn app_config(workers: usize, single_flight: bool) -> AppConfig {
        AppConfig {
            source_config: SourceConfig::Looker(LookerSourceConfig {
                base_url: "http://unused.invalid".into(),
                client_id: "id".into(),
                client_secret: "secret".into(),
                user_query_id: "1".into(),
            }),
            sink_config: SinkConfig::InMemory,
            runtime: RuntimeConfig {
                worker_pool_size: workers,
                single_flight,
                show_progress: false,
                ..Default::default()
            },
        }
    }

    fn mixed_bag() -> InMemorySource {
        InMemorySource::new()
            .with_failing_listing(principal(1), "listing exploded")
            .with_principal(principal(2), vec![])
            .with_principal(principal(3), vec![conversation("c1"), conversation("c2")])
    }

    fn supervisor_over(source: InMemorySource, sink: InMemorySink, config: AppConfig) -> Supervisor {
        Supervisor::new(
            config,
            SourceBackend::InMemory(source),
            SinkBackend::InMemory(sink),
        )
    }

    #[tokio::test]
    async fn the_one_where_three_principals_make_exactly_one_load_job() {
        let sink = InMemorySink::new();
        let source = mixed_bag();
        let supervisor = supervisor_over(source.clone(), sink.clone(), app_config(50, false));

        let report = supervisor.run(SyncMode::Daily, false).await.unwrap();

        let jobs = sink.jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].records, 2);
        assert_eq!(jobs[0].line_count(), 2);
        assert_eq!(report.principals_discovered, 3);
        assert_eq!(report.principals_failed, 1);
        assert_eq!(report.contributing_principals, 1);
        assert_eq!(report.total_records, 2);
        assert!(report.load_job_submitted);
        // -- three principal sessions plus the elevated one
        assert_eq!(source.ended_sessions(), 4);
    }

    #[tokio::test]
    async fn the_one_where_the_dry_run_only_counts() {
        let sink = InMemorySink::new();
        let supervisor = supervisor_over(mixed_bag(), sink.clone(), app_config(50, false));

        let report = supervisor.run(SyncMode::Historical, true).await.unwrap();

        assert!(sink.jobs().await.is_empty());
        assert!(!report.load_job_submitted);
        assert!(report.dry_run);
        assert_eq!(
            report.to_string(),
            "2 total records across 1 contributing principal"
        );
    }

    #[tokio::test]
    async fn the_one_where_two_hundred_principals_are_each_visited_once() {
        let mut source = InMemorySource::new();
        for id in 1..=200 {
            source = source.with_principal(principal(id), vec![conversation(&format!("c{id}"))]);
        }
        let sink = InMemorySink::new();
        let supervisor = supervisor_over(source.clone(), sink.clone(), app_config(50, false));

        let report = supervisor.run(SyncMode::Historical, false).await.unwrap();

        let mut visited = source.impersonated().await;
        visited.sort_unstable();
        assert_eq!(visited, (1..=200).collect::<Vec<u64>>());
        assert_eq!(report.contributing_principals, 200);
        assert_eq!(report.total_records, 200);
        assert_eq!(sink.jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn the_one_where_nobody_has_anything_and_nothing_is_loaded() {
        let sink = InMemorySink::new();
        let source = InMemorySource::new()
            .with_principal(principal(1), vec![])
            .with_principal(principal(2), vec![]);
        let supervisor = supervisor_over(source, sink.clone(), app_config(50, false));

        let report = supervisor.run(SyncMode::Daily, false).await.unwrap();

        assert!(sink.jobs().await.is_empty());
        assert!(!report.load_job_submitted);
        assert_eq!(report.total_records, 0);
    }

    #[tokio::test]
    async fn the_one_where_discovery_fails_and_the_badge_still_goes_back() {
        let sink = InMemorySink::new();
        let source = InMemorySource::new()
            .with_principal(principal(1), vec![conversation("c1")])
            .with_failing_discovery("report is on fire");
        let supervisor = supervisor_over(source.clone(), sink.clone(), app_config(50, false));

        let result = supervisor.run(SyncMode::Daily, false).await;

        assert!(matches!(result, Err(SyncError::Discovery(_))));
        assert!(source.impersonated().await.is_empty());
        assert!(sink.jobs().await.is_empty());
        assert_eq!(source.ended_sessions(), 1);
    }

    #[tokio::test]
    async fn the_one_where_single_flight_turns_the_second_run_away() {
        let source = mixed_bag();
        let supervisor = supervisor_over(source.clone(), InMemorySink::new(), app_config(50, true));
        let sibling = supervisor.clone();

        let _held = supervisor.run_gate.lock().await;
        let result = sibling.run(SyncMode::Daily, false).await;

        assert!(matches!(result, Err(SyncError::RunInFlight)));
        assert_eq!(source.discovery_calls(), 0);
    }

    #[tokio::test]
    async fn the_one_where_zero_workers_still_visits_everyone() {
        let sink = InMemorySink::new();
        let source = InMemorySource::new().with_principal(principal(1), vec![conversation("c1")]);
        let supervisor = supervisor_over(source.clone(), sink.clone(), app_config(0, false));

        let report = supervisor.run(SyncMode::Daily, false).await.unwrap();

        assert_eq!(source.impersonated().await, vec![1]);
        assert_eq!(report.contributing_principals, 1);
        assert_eq!(report.total_records, 1);
        assert_eq!(sink.jobs().await.len(), 1);
    }

    #[test]
    fn the_one_where_from_config_refuses_zero_workers() {
        let err = Supervisor::from_config(app_config(0, false)).unwrap_err();
        assert!(format!("{err:#}").contains("worker_pool_size"));
    }

    #[tokio::test]
    async fn the_one_where_two_real_runs_race_and_one_is_turned_away() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let source = InMemorySource::new()
            .with_principal(principal(1), vec![conversation("c1")])
            .with_listing_gate(Arc::clone(&gate));
        let sink = InMemorySink::new();
        let supervisor = supervisor_over(source.clone(), sink.clone(), app_config(4, true));

        let first = {
            let supervisor = supervisor.clone();
            tokio::spawn(async move { supervisor.run(SyncMode::Historical, false).await })
        };
        // -- wait until the first run is past the gate and into discovery
        while source.discovery_calls() == 0 {
            tokio::task::yield_now().await;
        }

        let second = supervisor.run(SyncMode::Daily, false).await;
        assert!(matches!(second, Err(SyncError::RunInFlight)));
        assert_eq!(source.discovery_calls(), 1);

        gate.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(first.load_job_submitted);
        assert_eq!(sink.jobs().await.len(), 1);

        // -- gate is open again once the first run is done
        gate.notify_one();
        assert!(supervisor.run(SyncMode::Daily, false).await.is_ok());
        assert_eq!(source.discovery_calls(), 2);
    }

    #[tokio::test]
    async fn the_one_where_overlapping_runs_are_allowed_by_default() {
        let source = mixed_bag();
        let sink = InMemorySink::new();
        let supervisor = supervisor_over(source, sink.clone(), app_config(50, false));

        let _held = supervisor.run_gate.lock().await;
        assert!(supervisor.run(SyncMode::Daily, false).await.is_ok());
        assert_eq!(sink.jobs().await.len(), 1);
    }

    #[tokio::test]
    async fn the_one_where_the_warehouse_gets_exactly_one_post() {
        let warehouse = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/bigquery/v2/projects/proj/jobs"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"jobReference": {"jobId": "job_123"}})),
            )
            .expect(1)
            .mount(&warehouse)
            .await;

        let bigquery = BigQuerySink::new(
            BigQuerySinkConfig {
                project_id: "proj".into(),
                dataset_id: "ds".into(),
                table_id: "conversations".into(),
                location: None,
                api_base_url: warehouse.uri(),
                access_token: Some("static-token".into()),
                metadata_token_url: format!("{}/metadata", warehouse.uri()),
            },
            std::time::Duration::from_secs(5),
        )
        .unwrap();
        let supervisor = Supervisor::new(
            app_config(4, false),
            SourceBackend::InMemory(mixed_bag()),
            SinkBackend::BigQuery(bigquery),
        );

        let report = supervisor.run(SyncMode::Daily, false).await.unwrap();
        assert!(report.load_job_submitted);
        assert_eq!(report.total_records, 2);
        // -- MockServer verifies `.expect(1)` on drop
    }

    #[tokio::test]
    async fn the_one_where_a_refused_load_is_the_run_error() {
        let warehouse = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("access denied"))
            .expect(1)
            .mount(&warehouse)
            .await;

        let bigquery = BigQuerySink::new(
            BigQuerySinkConfig {
                project_id: "proj".into(),
                dataset_id: "ds".into(),
                table_id: "conversations".into(),
                location: None,
                api_base_url: warehouse.uri(),
                access_token: Some("static-token".into()),
                metadata_token_url: format!("{}/metadata", warehouse.uri()),
            },
            std::time::Duration::from_secs(5),
        )
        .unwrap();
        let source = mixed_bag();
        let supervisor = Supervisor::new(
            app_config(4, false),
            SourceBackend::InMemory(source.clone()),
            SinkBackend::BigQuery(bigquery),
        );

        let result = supervisor.run(SyncMode::Daily, false).await;
        assert!(matches!(
            result,
            Err(SyncError::LoadSubmission {
                status: Some(403),
                ..
            })
        ));
        assert_eq!(source.ended_sessions(), 4);
    }
}
