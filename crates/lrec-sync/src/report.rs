//! Markdown and JSON day reports under `reports/<day>/`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use lrec_core::{ChangeEvent, ChangeKind};
use serde::Serialize;
use tokio::fs;

use crate::DaySummary;

pub const DAILY_BRIEF_FILE: &str = "daily_brief.md";
pub const CHANGES_DELTA_FILE: &str = "changes_delta.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegionCounts {
    pub entered: usize,
    pub exited: usize,
    pub updated: usize,
}

pub fn region_counts(events: &[ChangeEvent]) -> BTreeMap<String, RegionCounts> {
    let mut counts: BTreeMap<String, RegionCounts> = BTreeMap::new();
    for event in events {
        let entry = counts.entry(event.key.region.clone()).or_default();
        match event.kind {
            ChangeKind::Enter => entry.entered += 1,
            ChangeKind::Exit => entry.exited += 1,
            ChangeKind::Update => entry.updated += 1,
        }
    }
    counts
}

/// Writes `daily_brief.md` and `changes_delta.json` for one committed day.
pub async fn write_day_report(
    reports_root: &Path,
    summary: &DaySummary,
    events: &[ChangeEvent],
) -> Result<PathBuf> {
    let report_dir = reports_root.join(summary.day.to_string());
    fs::create_dir_all(&report_dir)
        .await
        .with_context(|| format!("creating {}", report_dir.display()))?;

    let by_region = region_counts(events);
    fs::write(report_dir.join(DAILY_BRIEF_FILE), render_brief(summary, &by_region))
        .await
        .with_context(|| format!("writing {DAILY_BRIEF_FILE}"))?;

    let delta_json = serde_json::to_vec_pretty(&serde_json::json!({
        "summary": summary,
        "regions": by_region,
        "events": events,
    }))
    .context("serializing changes delta")?;
    fs::write(report_dir.join(CHANGES_DELTA_FILE), delta_json)
        .await
        .with_context(|| format!("writing {CHANGES_DELTA_FILE}"))?;

    Ok(report_dir)
}

fn render_brief(summary: &DaySummary, by_region: &BTreeMap<String, RegionCounts>) -> String {
    let compared = match (summary.yesterday, summary.yesterday_found) {
        (Some(day), true) => day.to_string(),
        (Some(day), false) => format!("{day} (no snapshot, every listing entered)"),
        (None, _) => "none".to_string(),
    };

    let mut lines = vec![
        "# Listing Reconciliation Daily Brief".to_string(),
        String::new(),
        format!("- Day: {}", summary.day),
        format!("- Run ID: `{}`", summary.run_id),
        format!("- Started: {}", summary.started_at),
        format!("- Finished: {}", summary.finished_at),
        format!("- Compared against: {compared}"),
        format!("- Artifacts: {}", summary.artifacts.len()),
        format!("- Listings today: {}", summary.rows_today),
        format!("- Entered: {}", summary.entered),
        format!("- Exited: {}", summary.exited),
        format!("- Updated: {}", summary.updated),
        format!("- Unchanged: {}", summary.unchanged),
        String::new(),
        "## Changes by Region".to_string(),
        String::new(),
    ];

    if by_region.is_empty() {
        lines.push("No changes.".to_string());
    } else {
        lines.push("| Region | ENTER | EXIT | UPDATE |".to_string());
        lines.push("|---|---:|---:|---:|".to_string());
        for (region, counts) in by_region {
            lines.push(format!(
                "| {region} | {} | {} | {} |",
                counts.entered, counts.exited, counts.updated
            ));
        }
    }

    lines.push(String::new());
    lines.push("## Artifacts".to_string());
    lines.push(String::new());
    for artifact in &summary.artifacts {
        lines.push(format!(
            "- `{}`: region {}, {} rows, {}, sha256 `{}`",
            artifact.source_id,
            artifact.region_hint,
            artifact.rows,
            artifact.encoding,
            artifact.content_hash
        ));
        if artifact.lossy_decode {
            lines.push("  - decoded lossily".to_string());
        }
        if !artifact.unmapped_columns.is_empty() {
            lines.push(format!(
                "  - unmapped columns: {}",
                artifact.unmapped_columns.join(", ")
            ));
        }
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Markdown index of the `runs` most recent day report directories.
pub fn report_daily_markdown(runs: usize, reports_root: &Path) -> Result<String> {
    let mut days = std::fs::read_dir(reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .filter_map(|entry| {
            let day = entry.file_name().to_str()?.parse::<NaiveDate>().ok()?;
            Some((day, entry.path()))
        })
        .collect::<Vec<_>>();
    days.sort_by(|a, b| b.0.cmp(&a.0));
    days.truncate(runs.max(1));

    let mut lines = vec!["# Listing Reconciliation Runs".to_string(), String::new()];
    for (day, dir) in days {
        let delta_path = dir.join(CHANGES_DELTA_FILE);
        let brief_path = dir.join(DAILY_BRIEF_FILE);
        let manifest_path = dir.join("snapshots").join("manifest.json");

        lines.push(format!("## {day}"));
        if delta_path.exists() {
            let delta: serde_json::Value = serde_json::from_str(
                &std::fs::read_to_string(&delta_path)
                    .with_context(|| format!("reading {}", delta_path.display()))?,
            )
            .with_context(|| format!("parsing {}", delta_path.display()))?;
            let count = |field: &str| {
                delta
                    .get("summary")
                    .and_then(|s| s.get(field))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0)
            };
            lines.push(format!("- listings: {}", count("rows_today")));
            lines.push(format!(
                "- entered / exited / updated: {} / {} / {}",
                count("entered"),
                count("exited"),
                count("updated")
            ));
            lines.push(format!("- delta: `{}`", delta_path.display()));
        } else {
            lines.push("- no changes delta recorded".to_string());
        }
        if brief_path.exists() {
            lines.push(format!("- daily brief: `{}`", brief_path.display()));
        }
        if manifest_path.exists() {
            lines.push(format!("- parquet manifest: `{}`", manifest_path.display()));
        }
        lines.push(String::new());
    }

    Ok(lines.join("\n"))
}
