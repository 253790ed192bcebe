// ABOUTME: Operator-facing text for the admin commands: follower hints, reset and sync summaries.
// ABOUTME: Rendering is kept apart from the operations so callers decide where lines are written.

use sluice_core::FollowerMap;

use crate::reset::ResetReport;
use crate::sync::SyncReport;

/// Lines destined for standard output and standard error.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

fn plural(count: u64, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("1 {singular}")
    } else {
        format!("{count} {plural}")
    }
}

/// Listing shown when no follower was named.
pub fn followers_hint(followers: &FollowerMap) -> Vec<String> {
    let mut lines = vec![
        "No follower selected. Do you need a hint?".to_string(),
        "Known followers which tracking states that can be reset:".to_string(),
    ];
    for (follower, upstreams) in followers {
        let count = upstreams.len() as u64;
        lines.push(format!(
            "\t- {follower}, tracking {}",
            plural(count, "upstream application", "upstream applications")
        ));
    }
    lines
}

/// Header announcing what a reset will touch.
pub fn reset_header(
    follower: &str,
    upstream_apps: &[String],
    dry_run: bool,
    verbose: bool,
) -> Vec<String> {
    let mut lines = Vec::new();
    if dry_run {
        lines.push(
            "Dry-run mode, the tracking states will be reset and the changes rolled back."
                .to_string(),
        );
    }
    if verbose {
        lines.push(format!(
            "The following tracking states of {follower} will be reset:"
        ));
        lines.extend(upstream_apps.iter().map(|app| format!("\t- {app}")));
    } else {
        lines.push(format!(
            "The tracking states of {follower} will be reset ({} upstream apps).",
            upstream_apps.len()
        ));
    }
    lines
}

/// One-line outcome of a reset.
pub fn reset_summary(report: &ResetReport, verbose: bool) -> String {
    let apps = report.upstream_apps.len() as u64;
    let extra = if verbose {
        format!(
            " (for a total of {})",
            plural(report.notifications_reset, "notification", "notifications")
        )
    } else {
        String::new()
    };

    if report.dry_run {
        format!(
            "{} would have been un-tracked{extra} (dry-run).",
            plural(apps, "upstream app", "upstream apps")
        )
    } else {
        let subject = if apps == 1 {
            "1 upstream app has".to_string()
        } else {
            format!("{apps} upstream apps have")
        };
        format!("{subject} been un-tracked{extra}.")
    }
}

/// Full output of a sync run.
pub fn sync_output(report: &SyncReport, verbose: bool) -> Rendered {
    let mut out = Rendered::default();
    let total = report.outcomes.len();

    if report.dry_run {
        out.stdout.push(
            "Dry-run mode, the events will be processed but the changes will be rolled back."
                .to_string(),
        );
    }
    let selected = if report.complete_selection {
        "All followers".to_string()
    } else {
        plural(total as u64, "follower", "followers")
    };
    out.stdout
        .push(format!("{selected} selected for synchronization."));

    let width = total.to_string().len();
    for (index, outcome) in report.outcomes.iter().enumerate() {
        let label = format!(
            "[{:>width$}/{total}] Synchronizing {}...",
            index + 1,
            outcome.follower
        );
        match &outcome.result {
            Ok(counts) => {
                let status = if report.dry_run { "OK (dry-run)" } else { "OK" };
                out.stdout.push(format!("{label} {status}"));
                if verbose {
                    for (leader, count) in counts {
                        out.stdout.push(format!(
                            "\t {} from {leader} processed",
                            plural(*count, "event", "events")
                        ));
                    }
                }
            }
            Err(err) => {
                let status = if report.dry_run {
                    "FAILED (dry-run)"
                } else {
                    "FAILED"
                };
                out.stdout.push(format!("{label} {status}"));
                if verbose {
                    out.stderr
                        .push(format!("\tCaught a {}: {err}", err.label()));
                }
            }
        }
    }

    if report.has_failures() && !verbose {
        out.stderr.push(
            "There were errors during synchronisation, please re-run with a higher \
             verbosity level (try: `--verbose`)."
                .to_string(),
        );
    }
    out
}
