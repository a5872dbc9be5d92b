//! Human-readable live stats block, overwritten on every mutation.
//!
//! Intended for `tail -f` in a second terminal while a long run is going.

use super::snapshot::{SessionStatus, Snapshot};

const RULE: &str = "============================================================";

/// Renders the snapshot as the live stats text block.
#[must_use]
pub(super) fn render(snapshot: &Snapshot) -> String {
    let status = match snapshot.session.status {
        SessionStatus::Initialized => "Initializing...",
        SessionStatus::InProgress => "Running",
        SessionStatus::Paused => "Paused",
        SessionStatus::Completed => "Completed",
        SessionStatus::Failed => "Failed",
    };

    let processed = snapshot.book_stats.downloaded
        + snapshot.book_stats.failed
        + snapshot.book_stats.skipped;
    let progress_pct = if snapshot.book_stats.total > 0 {
        processed as f64 / snapshot.book_stats.total as f64 * 100.0
    } else {
        0.0
    };

    let current_skill = snapshot
        .current
        .skill
        .as_deref()
        .unwrap_or("-")
        .to_string();

    let eta = snapshot
        .performance
        .estimated_minutes_remaining
        .map_or_else(|| "Calculating...".to_string(), format_minutes);

    let mut out = String::new();
    out.push_str(RULE);
    out.push('\n');
    out.push_str("Skillshelf Download Progress\n");
    out.push_str(RULE);
    out.push('\n');
    out.push_str(&format!("Status: {status}\n"));
    out.push_str(&format!(
        "Started: {}\n",
        snapshot.session.start_time.format("%Y-%m-%d %H:%M:%S")
    ));
    out.push_str(&format!("Current Skill: {current_skill}\n"));
    out.push_str(&format!("Total Books: {}\n", snapshot.book_stats.total));
    out.push_str(&format!("Downloaded: {}\n", snapshot.book_stats.downloaded));
    out.push_str(&format!("Failed: {}\n", snapshot.book_stats.failed));
    out.push_str(&format!("Skipped: {}\n", snapshot.book_stats.skipped));
    out.push_str(&format!("Progress: {progress_pct:.1}%\n"));
    out.push_str(&format!(
        "Elapsed: {}\n",
        format_seconds(snapshot.performance.elapsed_seconds)
    ));
    out.push_str(&format!("ETA: {eta}\n"));
    out.push_str(RULE);
    out.push('\n');
    out.push_str(&format!(
        "Last Updated: {}\n",
        snapshot.session.last_update.format("%Y-%m-%d %H:%M:%S")
    ));
    out
}

fn format_seconds(total: u64) -> String {
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

fn format_minutes(total: u64) -> String {
    if total < 60 {
        format!("{total}m")
    } else if total < 1440 {
        format!("{}h {}m", total / 60, total % 60)
    } else {
        format!("{}d {}h", total / 1440, (total % 1440) / 60)
    }
}
