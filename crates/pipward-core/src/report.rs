use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::contract::PublishedArtifact;
use crate::ledger::{RunMode, TOOL_NAME};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportError {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportInputs {
    pub requested_packages: Vec<String>,
    pub normalized_packages: Vec<String>,
    pub use_user_flag: bool,
    pub manifest: Option<String>,
    pub repo_parent_root: Option<String>,
    #[serde(default)]
    pub published_versions: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub published_artifacts: BTreeMap<String, PublishedArtifact>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryDetail {
    pub packages: Vec<String>,
    pub return_code: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolAudit {
    pub tool: String,
    pub available: bool,
    pub exit_code: Option<i32>,
    pub findings: Option<usize>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditReport {
    pub tools: Vec<ToolAudit>,
}

impl AuditReport {
    pub fn total_findings(&self) -> usize {
        self.tools.iter().filter_map(|tool| tool.findings).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionDetail {
    pub package_manager: String,
    pub mode: RunMode,
    pub pinned: Vec<String>,
    pub loose: Vec<String>,
    pub retry: Option<RetryDetail>,
    pub audit: Option<AuditReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mismatch {
    pub package: String,
    pub expected: String,
    pub observed: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Performed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Verification {
    pub status: VerificationStatus,
    pub detail: Option<String>,
    pub reason: Option<String>,
    #[serde(default)]
    pub missing: Vec<String>,
}

impl Verification {
    pub fn performed(detail: impl Into<String>) -> Self {
        Self {
            status: VerificationStatus::Performed,
            detail: Some(detail.into()),
            reason: None,
            missing: Vec::new(),
        }
    }

    pub fn skipped(reason: impl Into<String>, missing: Vec<String>) -> Self {
        Self {
            status: VerificationStatus::Skipped,
            detail: None,
            reason: Some(reason.into()),
            missing,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Completed,
    Attention,
    Skipped,
}

/// Outcome block of a run report. A skipped result serializes as `status`
/// and `reason` alone; every other status carries all fields.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RunResult {
    pub status: ResultStatus,
    pub reason: Option<String>,
    #[serde(default)]
    pub any_failures: bool,
    #[serde(default)]
    pub initial_versions: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub final_versions: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub mismatches: Vec<Mismatch>,
    pub verification: Option<Verification>,
    pub ledger_path: Option<String>,
}

impl RunResult {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Skipped,
            reason: Some(reason.into()),
            any_failures: false,
            initial_versions: BTreeMap::new(),
            final_versions: BTreeMap::new(),
            mismatches: Vec::new(),
            verification: None,
            ledger_path: None,
        }
    }
}

impl Serialize for RunResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.status == ResultStatus::Skipped {
            let mut state = serializer.serialize_struct("RunResult", 2)?;
            state.serialize_field("status", &self.status)?;
            state.serialize_field("reason", &self.reason)?;
            return state.end();
        }
        let mut state = serializer.serialize_struct("RunResult", 8)?;
        state.serialize_field("status", &self.status)?;
        state.serialize_field("reason", &self.reason)?;
        state.serialize_field("any_failures", &self.any_failures)?;
        state.serialize_field("initial_versions", &self.initial_versions)?;
        state.serialize_field("final_versions", &self.final_versions)?;
        state.serialize_field("mismatches", &self.mismatches)?;
        state.serialize_field("verification", &self.verification)?;
        state.serialize_field("ledger_path", &self.ledger_path)?;
        state.end()
    }
}

/// Run envelope handed to the orchestrator alongside the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub run_id: String,
    pub tool: String,
    pub status: ReportStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ReportError>,
    pub inputs: ReportInputs,
    pub execution: ExecutionDetail,
    pub result: RunResult,
}

impl RunReport {
    pub fn new(
        run_id: impl Into<String>,
        started_at: DateTime<Utc>,
        inputs: ReportInputs,
        execution: ExecutionDetail,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            tool: TOOL_NAME.to_string(),
            status: ReportStatus::Success,
            started_at,
            completed_at: started_at,
            generated_at: started_at,
            duration_seconds: 0.0,
            errors: Vec::new(),
            inputs,
            execution,
            result: RunResult::skipped("run did not produce a result"),
        }
    }

    pub fn record_error(&mut self, kind: impl Into<String>, message: impl Into<String>) {
        self.status = ReportStatus::Error;
        self.errors.push(ReportError {
            kind: kind.into(),
            message: message.into(),
        });
    }

    pub fn finish(mut self, completed_at: DateTime<Utc>) -> Self {
        let elapsed_ms = (completed_at - self.started_at).num_milliseconds().max(0);
        self.completed_at = completed_at;
        self.generated_at = completed_at;
        self.duration_seconds = elapsed_ms as f64 / 1000.0;
        self
    }
}
