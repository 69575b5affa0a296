use std::collections::HashSet;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::{PlannedAction, PlannedChange};
use crate::requirement::normalize_name;

pub const TOOL_NAME: &str = "pipward";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Ok,
    Failed,
    Skipped,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    Upgrade,
    ForceReinstall,
    DryRun,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upgrade => "upgrade",
            Self::ForceReinstall => "force-reinstall",
            Self::DryRun => "dry-run",
        }
    }

    pub fn is_dry_run(self) -> bool {
        self == Self::DryRun
    }
}

/// Why a run stopped before reaching the end of the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum HaltReason {
    HashMismatch {
        package: String,
        expected: Vec<String>,
        actual: String,
    },
    License {
        package: String,
        license: Option<String>,
        matched: Option<String>,
    },
}

impl HaltReason {
    pub fn package(&self) -> &str {
        match self {
            Self::HashMismatch { package, .. } | Self::License { package, .. } => package,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::HashMismatch {
                package, actual, ..
            } => format!("hash mismatch for '{package}' (artifact sha256:{actual})"),
            Self::License {
                package,
                license,
                matched,
            } => match matched {
                Some(matched) => format!(
                    "suspect license for '{package}': {} (matched '{matched}')",
                    license.as_deref().unwrap_or("unknown")
                ),
                None => format!("license for '{package}' could not be determined"),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerRecord {
    pub name: String,
    pub requirement: String,
    pub action: PlannedAction,
    pub previous_version: Option<String>,
    pub new_version: Option<String>,
    pub hash: Option<String>,
    pub expected_hash: Option<String>,
    pub changed: bool,
    pub status: RecordStatus,
    pub detail: Option<String>,
}

impl LedgerRecord {
    pub fn for_change(change: &PlannedChange) -> Self {
        Self {
            name: change.requirement.name.clone(),
            requirement: change.requirement.to_string(),
            action: change.action,
            previous_version: change.installed.clone(),
            new_version: None,
            hash: None,
            expected_hash: change
                .requirement
                .hashes
                .first()
                .map(|hash| hash.to_string()),
            changed: false,
            status: RecordStatus::Skipped,
            detail: None,
        }
    }

    pub fn mark_ok(mut self, new_version: Option<String>, hash: Option<String>) -> Self {
        self.changed = new_version.is_some() && new_version != self.previous_version;
        self.new_version = new_version;
        self.hash = hash;
        self.status = RecordStatus::Ok;
        self
    }

    pub fn mark_failed(mut self, detail: impl Into<String>) -> Self {
        self.changed = false;
        self.status = RecordStatus::Failed;
        self.detail = Some(detail.into());
        self
    }

    pub fn mark_skipped(mut self, detail: impl Into<String>) -> Self {
        self.new_version = self.previous_version.clone();
        self.changed = false;
        self.status = RecordStatus::Skipped;
        self.detail = Some(detail.into());
        self
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSummary {
    pub total: usize,
    pub ok: usize,
    pub failed: usize,
    pub skipped: usize,
    pub changed: usize,
}

impl LedgerSummary {
    fn from_records(records: &[LedgerRecord]) -> Self {
        records.iter().fold(
            Self {
                total: records.len(),
                ..Self::default()
            },
            |mut summary, record| {
                match record.status {
                    RecordStatus::Ok => summary.ok += 1,
                    RecordStatus::Failed => summary.failed += 1,
                    RecordStatus::Skipped => summary.skipped += 1,
                }
                if record.changed {
                    summary.changed += 1;
                }
                summary
            },
        )
    }
}

/// The serialized audit ledger for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpgradeLedger {
    pub run_id: String,
    pub tool: String,
    pub mode: RunMode,
    pub manifest: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub records: Vec<LedgerRecord>,
    pub halted: Option<HaltReason>,
    pub summary: LedgerSummary,
}

impl UpgradeLedger {
    pub fn exit_code(&self) -> i32 {
        if self.halted.is_some() || self.summary.failed > 0 {
            1
        } else {
            0
        }
    }

    pub fn record(&self, name: &str) -> Option<&LedgerRecord> {
        let key = normalize_name(name);
        self.records
            .iter()
            .find(|record| normalize_name(&record.name) == key)
    }

    pub fn changed_records(&self) -> impl Iterator<Item = &LedgerRecord> {
        self.records.iter().filter(|record| record.changed)
    }
}

/// Accumulates records during a run; `finish` freezes them into an [`UpgradeLedger`].
#[derive(Debug)]
pub struct LedgerBuilder {
    run_id: String,
    mode: RunMode,
    manifest: String,
    started_at: DateTime<Utc>,
    records: Vec<LedgerRecord>,
    names: HashSet<String>,
    halted: Option<HaltReason>,
}

impl LedgerBuilder {
    pub fn new(
        run_id: impl Into<String>,
        mode: RunMode,
        manifest: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            mode,
            manifest: manifest.into(),
            started_at,
            records: Vec::new(),
            names: HashSet::new(),
            halted: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn push(&mut self, record: LedgerRecord) -> Result<()> {
        if self.halted.is_some() {
            return Err(anyhow!(
                "ledger is halted; refusing record for '{}'",
                record.name
            ));
        }
        if !self.names.insert(normalize_name(&record.name)) {
            return Err(anyhow!(
                "ledger already has a record for '{}'",
                record.name
            ));
        }
        self.records.push(record);
        Ok(())
    }

    pub fn record_mut(&mut self, name: &str) -> Option<&mut LedgerRecord> {
        let key = normalize_name(name);
        self.records
            .iter_mut()
            .find(|record| normalize_name(&record.name) == key)
    }

    pub fn records(&self) -> &[LedgerRecord] {
        &self.records
    }

    /// Records the first halt reason; later calls keep the original.
    pub fn halt(&mut self, reason: HaltReason) {
        if self.halted.is_none() {
            self.halted = Some(reason);
        }
    }

    pub fn halted(&self) -> Option<&HaltReason> {
        self.halted.as_ref()
    }

    pub fn finish(self, completed_at: DateTime<Utc>) -> UpgradeLedger {
        let elapsed_ms = (completed_at - self.started_at).num_milliseconds().max(0);
        let summary = LedgerSummary::from_records(&self.records);
        UpgradeLedger {
            run_id: self.run_id,
            tool: TOOL_NAME.to_string(),
            mode: self.mode,
            manifest: self.manifest,
            started_at: self.started_at,
            completed_at,
            duration_seconds: elapsed_ms as f64 / 1000.0,
            records: self.records,
            halted: self.halted,
            summary,
        }
    }
}
