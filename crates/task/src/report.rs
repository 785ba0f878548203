//! Plain-text run summary

use crate::stats::RunStats;
use std::fmt::Write;

const RULE_WIDTH: usize = 60;
const TOP_MISMATCHES: usize = 10;

/// Render the end-of-run summary printed by the CLI
pub fn render_summary(stats: &RunStats) -> String {
    let mut out = String::new();
    let rule = "=".repeat(RULE_WIDTH);

    if !stats.crashed_tasks.is_empty() {
        let _ = writeln!(out, "Crashed tasks ({}):", stats.crashed_tasks.len());
        for path in &stats.crashed_tasks {
            let _ = writeln!(out, "  CRASH {path}");
        }
        out.push('\n');
    }
    if !stats.timed_out_tasks.is_empty() {
        let _ = writeln!(out, "Timed out tasks ({}):", stats.timed_out_tasks.len());
        for path in &stats.timed_out_tasks {
            let _ = writeln!(out, "  TIMEOUT {path}");
        }
        out.push('\n');
    }

    let _ = writeln!(out, "{rule}");
    let _ = writeln!(
        out,
        "FINAL RESULTS: {}/{} passed ({:.1}%)",
        stats.passed,
        stats.evaluated(),
        stats.pass_rate()
    );
    let _ = writeln!(out, "  Failed:  {}", stats.failed);
    let _ = writeln!(out, "  Crashed: {}", stats.crashed);
    let _ = writeln!(out, "  OOM:     {}", stats.oom);
    let _ = writeln!(out, "  Timeout: {}", stats.timed_out);
    if stats.unknown > 0 {
        let _ = writeln!(out, "  Unknown: {}", stats.unknown);
    }
    let _ = writeln!(out, "  Skipped: {}", stats.skipped);
    let _ = writeln!(
        out,
        "  Cache:   {} hits, {} misses",
        stats.cache_hits, stats.cache_misses
    );
    let _ = writeln!(
        out,
        "  Workers: {} spawned, {} respawned, {} recycled",
        stats.health.spawned, stats.health.respawned, stats.health.recycled
    );
    let _ = writeln!(out, "  Time:    {:.1}s", stats.elapsed.as_secs_f64());

    if stats.categories.len() > 1 {
        out.push('\n');
        let _ = writeln!(out, "By category:");
        for (name, category) in &stats.categories {
            let _ = writeln!(
                out,
                "  {name}: {}/{} passed",
                category.passed,
                category.total - category.skipped
            );
        }
    }

    let top = stats.top_mismatches(TOP_MISMATCHES);
    if !top.is_empty() {
        out.push('\n');
        let _ = writeln!(out, "Top diagnostic code mismatches:");
        for (code, missing, extra) in top {
            let _ = writeln!(out, "  {code}: missing={missing}, extra={extra}");
        }
    }
    let _ = writeln!(out, "{rule}");
    out
}
