//! 📊 progress.rs — "Are we there yet?" — every sync run, every time, forever.
//!
//! One bar, one tick per principal, and a comfy little table underneath with
//! the running totals. Workers each hold a clone; indicatif keeps the counts atomic.
//!
//! ⚠️ Watching this progress bar will not make the source API faster. We've tried.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

/// ⏱️ MM:SS, or HH:MM:SS for the historical runs that eat your afternoon.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📊 Shared progress for one run.
#[derive(Debug, Clone)]
pub(crate) struct RunProgress {
    progress_bar: ProgressBar,
    conversations: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
}

impl RunProgress {
    /// 🚀 A bar sized to the principal count. `visible = false` gives a hidden bar
    /// that still counts.
    pub(crate) fn new(label: &str, principals: u64, visible: bool) -> Self {
        let progress_bar = if visible {
            ProgressBar::new(principals)
        } else {
            ProgressBar::hidden()
        };
        progress_bar.set_length(principals);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{msg}\n| [{bar:40.cyan/blue}] {pos}/{len}")
        {
            progress_bar.set_style(style.progress_chars("=>-"));
        }
        progress_bar.set_prefix(label.to_string());
        let progress = Self {
            progress_bar,
            conversations: Arc::new(AtomicU64::new(0)),
            failures: Arc::new(AtomicU64::new(0)),
        };
        progress.render();
        progress
    }

    /// ✅ A principal finished with `conversations` records.
    pub(crate) fn principal_done(&self, conversations: u64) {
        self.conversations.fetch_add(conversations, Ordering::Relaxed);
        self.progress_bar.inc(1);
        self.render();
    }

    /// 💀 A principal was skipped.
    pub(crate) fn principal_failed(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.progress_bar.inc(1);
        self.render();
    }

    pub(crate) fn principals_seen(&self) -> u64 {
        self.progress_bar.position()
    }

    pub(crate) fn finish(&self) {
        self.progress_bar.finish();
    }

    /// 🎨 Rebuild the table under the bar.
    fn render(&self) {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!(
                "{} conversations",
                self.conversations.load(Ordering::Relaxed)
            ))
            .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} failed", self.failures.load(Ordering::Relaxed)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!(
                "{} elapsed",
                format_duration(self.progress_bar.elapsed())
            ))
            .set_alignment(CellAlignment::Right),
        ]);
        self.progress_bar
            .set_message(format!("sync: {}\n{}", self.progress_bar.prefix(), table));
    }
}
