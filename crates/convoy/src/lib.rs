//! 🚚 convoy — pulls every principal's agent conversations out of the BI platform,
//! trims the heavy debug payloads off their messages, and drops the lot into the
//! warehouse in one load job per run.
//!
//! Start at [`run`] if you just want it to go. Start at [`supervisors::Supervisor`]
//! if you want to hold on to the backends between runs. 🦆

pub mod app_config;
pub mod backends;
pub mod collectors;
pub mod common;
pub mod errors;
pub mod supervisors;
pub mod transforms;

mod fetcher;
mod progress;

use anyhow::{Context, Result};

pub use app_config::{AppConfig, load_config};
pub use common::SyncMode;
pub use errors::SyncError;
pub use supervisors::{RunReport, Supervisor};

/// 🚀 Build the backends from `app_config` and run one sync to completion.
pub async fn run(app_config: AppConfig, mode: SyncMode, dry_run: bool) -> Result<RunReport> {
    let supervisor = Supervisor::from_config(app_config)
        .context("💀 Failed to assemble the supervisor from the config")?;
    supervisor
        .run(mode, dry_run)
        .await
        .with_context(|| format!("💀 The {mode} sync did not finish"))
}
