//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! 🧠 Knowledge graph:
//! - Built once at startup, then handed by value/reference to the supervisor and backends.
//!   No globals. No `lazy_static!` lurking in the shadows.
//! - Backend configs (`LookerSourceConfig`, `BigQuerySinkConfig`) live next to their backends.
//! - Env vars: `CONVOY_` prefix, nested keys split on `__`, e.g.
//!   `CONVOY_SOURCE_CONFIG__LOOKER__CLIENT_SECRET`.

use anyhow::{Context, ensure};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::backends::{BigQuerySinkConfig, LookerSourceConfig};

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 📡 Where the conversations live.
    pub source_config: SourceConfig,
    /// 🏗️ Where the conversations go.
    pub sink_config: SinkConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// 🚰 The source system. One variant today, an enum because tomorrow is a mystery.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "snake_case")]
pub enum SourceConfig {
    Looker(LookerSourceConfig),
}

/// 🕳️ The destination. BigQuery for real runs, in-memory for rehearsals.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "snake_case")]
pub enum SinkConfig {
    #[serde(rename = "bigquery")]
    BigQuery(BigQuerySinkConfig),
    InMemory,
}

/// 🎛️ Knobs for the run itself.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// 🧵 How many principals are processed at once.
    #[serde(default = "default_worker_pool_size", alias = "workers")]
    pub worker_pool_size: usize,
    /// ⏱️ Per-call HTTP timeout. The only thing bounding a run's duration.
    #[serde(default = "default_http_timeout_secs", alias = "timeout_secs")]
    pub http_timeout_secs: u64,
    /// 🚦 Refuse to start a run while another one is in flight on the same service.
    #[serde(default)]
    pub single_flight: bool,
    /// 📊 Draw the progress bar (only ever shows up on a terminal anyway).
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

// 🧵 50 — enough to keep the source API busy, not enough to get us rate limited. Usually.
fn default_worker_pool_size() -> usize {
    50
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_show_progress() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            http_timeout_secs: default_http_timeout_secs(),
            single_flight: false,
            show_progress: default_show_progress(),
        }
    }
}

impl RuntimeConfig {
    pub fn http_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.http_timeout_secs)
    }
}

impl AppConfig {
    /// ✅ Catch the empty strings before they become 401s at 3am.
    pub fn validate(&self) -> anyhow::Result<()> {
        match &self.source_config {
            SourceConfig::Looker(looker) => {
                ensure!(!looker.base_url.trim().is_empty(), "💀 source_config.looker.base_url is empty");
                ensure!(!looker.client_id.trim().is_empty(), "💀 source_config.looker.client_id is empty");
                ensure!(
                    !looker.client_secret.trim().is_empty(),
                    "💀 source_config.looker.client_secret is empty"
                );
                ensure!(
                    !looker.user_query_id.trim().is_empty(),
                    "💀 source_config.looker.user_query_id is empty. Discovery needs a report to run."
                );
            }
        }
        if let SinkConfig::BigQuery(bq) = &self.sink_config {
            ensure!(!bq.project_id.trim().is_empty(), "💀 sink_config.bigquery.project_id is empty");
            ensure!(!bq.dataset_id.trim().is_empty(), "💀 sink_config.bigquery.dataset_id is empty");
            ensure!(!bq.table_id.trim().is_empty(), "💀 sink_config.bigquery.table_id is empty");
        }
        ensure!(
            self.runtime.worker_pool_size >= 1,
            "💀 runtime.worker_pool_size must be at least 1. Zero workers is a very quiet run."
        );
        Ok(())
    }
}

/// 🚀 Load the config — from a file, from env vars, or from the sheer power of hoping.
///
/// 📐 DESIGN NOTE:
///   - `config_file_name` is None  → env vars only.
///   - `config_file_name` is Some  → env vars + TOML file, merged. TOML wins on conflicts.
///
/// 💀 Returns an error if config is unparseable or fails validation.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("CONVOY_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (CONVOY_*). \
             The file exists in our hearts, but apparently not in the right shape.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (CONVOY_*). \
                 No file was provided — this one's all on the environment."
            .to_string(),
    };

    let app_config: AppConfig = config.extract().context(context_msg)?;
    app_config
        .validate()
        .context("💀 Configuration parsed, but it doesn't describe a run we can actually do")?;
    Ok(app_config)
}
