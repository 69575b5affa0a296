use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pipward_core::{RunReport, UpgradeLedger};
use serde::Serialize;
use tracing::{debug, warn};

use crate::layout::StateLayout;

pub fn write_ledger(layout: &StateLayout, ledger: &UpgradeLedger) -> Result<PathBuf> {
    let path = layout.ledger_path(&ledger.run_id);
    write_ledger_to(&path, ledger)?;
    Ok(path)
}

/// Writes a ledger to an explicit path, e.g. one handed over by the orchestrator.
pub fn write_ledger_to(path: &Path, ledger: &UpgradeLedger) -> Result<()> {
    write_json_atomic(path, ledger)
        .with_context(|| format!("failed to write ledger: {}", path.display()))
}

pub fn write_run_report(layout: &StateLayout, report: &RunReport) -> Result<PathBuf> {
    let path = layout.report_path(&report.run_id);
    write_json_atomic(&path, report)
        .with_context(|| format!("failed to write run report: {}", path.display()))?;
    Ok(path)
}

pub fn read_ledger(path: &Path) -> Result<UpgradeLedger> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read ledger: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse ledger: {}", path.display()))
}

/// Most recently completed ledger under the state layout, if any.
///
/// Files that fail to parse are skipped with a warning.
pub fn latest_ledger(layout: &StateLayout) -> Result<Option<(PathBuf, UpgradeLedger)>> {
    let dir = layout.ledgers_dir();
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read ledgers: {}", dir.display()))
        }
    };

    let mut latest: Option<(PathBuf, UpgradeLedger)> = None;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let ledger = match read_ledger(&path) {
            Ok(ledger) => ledger,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable ledger");
                continue;
            }
        };
        let newer = latest
            .as_ref()
            .map_or(true, |(_, current)| ledger.completed_at > current.completed_at);
        if newer {
            latest = Some((path, ledger));
        }
    }
    Ok(latest)
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut rendered = serde_json::to_string_pretty(value)?;
    rendered.push('\n');

    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);
    fs::write(&part, rendered)
        .with_context(|| format!("failed to write {}", part.display()))?;
    fs::rename(&part, path).with_context(|| {
        format!(
            "failed to move {} into place at {}",
            part.display(),
            path.display()
        )
    })?;
    debug!(path = %path.display(), "wrote json");
    Ok(())
}
