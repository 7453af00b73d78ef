//! 🚀 convoy-cli — the front door, the bouncer, the maitre d' of convoy.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Thin wrapper: logging, arguments, config, one run, one report table.
//! Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{Table, presets::UTF8_FULL};
use convoy::{RunReport, SyncMode};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// 🚚 Sync agent conversations into the warehouse.
#[derive(Debug, Parser)]
#[command(name = "convoy-cli", version, about)]
struct Cli {
    /// TOML config file. `CONVOY_*` environment variables are merged underneath it.
    #[arg(long, short, default_value = "convoy.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 📅 Only conversations created today (local date).
    Daily {
        /// Fetch and prune everything, report the counts, load nothing.
        #[arg(long)]
        dry_run: bool,
    },
    /// 🗄️ Every conversation, ever.
    Historical {
        #[arg(long)]
        dry_run: bool,
    },
}

impl Command {
    fn mode_and_dry_run(&self) -> (SyncMode, bool) {
        match self {
            Command::Daily { dry_run } => (SyncMode::Daily, *dry_run),
            Command::Historical { dry_run } => (SyncMode::Historical, *dry_run),
        }
    }
}

fn report_table(report: &RunReport) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["run", "value"]);
    table.add_row(vec!["mode".to_string(), report.mode.to_string()]);
    table.add_row(vec!["dry run".to_string(), report.dry_run.to_string()]);
    table.add_row(vec![
        "principals discovered".to_string(),
        report.principals_discovered.to_string(),
    ]);
    table.add_row(vec![
        "principals failed".to_string(),
        report.principals_failed.to_string(),
    ]);
    table.add_row(vec![
        "contributing principals".to_string(),
        report.contributing_principals.to_string(),
    ]);
    table.add_row(vec![
        "total conversations".to_string(),
        report.total_records.to_string(),
    ]);
    table.add_row(vec![
        "load job submitted".to_string(),
        report.load_job_submitted.to_string(),
    ]);
    table
}

/// 🚀 main() — where it all begins. The "I pressed F5 and held my breath" moment.
///
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse args
/// 3. Load config (the moment of truth)
/// 4. Run the thing (send it and pray 🙏)
/// 5. Handle errors (cry)
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 println! debugging is a lifestyle choice we're trying to move past
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let (mode, dry_run) = cli.command.mode_and_dry_run();

    // 🔒 No file is fine, env vars may carry everything. A typo'd path is not fine.
    let config_file = cli.config.as_path();
    let config_file = match config_file.try_exists().context(format!(
        "💀 Couldn't check whether the config file exists. Was checking here: '{}'",
        config_file.display()
    ))? {
        true => Some(config_file),
        false => None,
    };

    let app_config = convoy::load_config(config_file)
        .context("💀 In convoy-cli, main, we couldn't load the config. Check the TOML and the CONVOY_* variables")?;

    let result = convoy::run(app_config, mode, dry_run).await;

    match result {
        Ok(report) => {
            println!("{}", report_table(&report));
            Ok(())
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion of sadness, one layer at a time
            let mut the_vibes_are_giving_connection_issues = false;
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
                let cause_str = cause.to_string();
                if cause_str.contains("error sending request")
                    || cause_str.contains("connection refused")
                    || cause_str.contains("Connection refused")
                    || cause_str.contains("tcp connect error")
                    || cause_str.contains("dns error")
                    || cause_str.contains("timed out")
                {
                    the_vibes_are_giving_connection_issues = true;
                }
            }

            if the_vibes_are_giving_connection_issues {
                error!(
                    "🔧 hint: looks like the BI platform, the warehouse or the metadata server \
                    isn't reachable. Check `source_config.looker.base_url`, \
                    `sink_config.bigquery.api_base_url`, and whether you meant to set \
                    `access_token` for a local run. ☕"
                );
            }

            // 🗑️ Exit with prejudice.
            std::process::exit(1);
        }
    }
}
