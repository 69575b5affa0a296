use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use pipward_core::{
    build_upgrade_plan, AuditReport, ExecutionDetail, HaltReason, LedgerBuilder, LedgerRecord,
    Mismatch, PlannedAction, PlannedChange, RecordStatus, ReportInputs, RequirementsManifest,
    ResultStatus, RetryDetail, RunMode, RunReport, RunResult, UpgradeLedger, UpgradePlan,
    Verification,
};
use pipward_security::{sha256_file_hex, LicensePolicy, LicenseVerdict};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::PackageBackend;

pub fn new_run_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: RunMode,
    pub license_policy: LicensePolicy,
    pub retry_mismatches: bool,
    pub keep_downloads: bool,
    /// Parent of the per-run download directories.
    pub downloads_dir: PathBuf,
}

impl RunOptions {
    pub fn new(mode: RunMode, downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            license_policy: LicensePolicy::default(),
            retry_mismatches: true,
            keep_downloads: false,
            downloads_dir: downloads_dir.into(),
        }
    }
}

/// Progress notifications emitted while a run executes.
#[derive(Debug, Clone, Copy)]
pub enum RunEvent<'a> {
    Planned { total: usize, pending: usize },
    Processing { name: &'a str, action: PlannedAction },
    Recorded(&'a LedgerRecord),
    Halted(&'a HaltReason),
    Retrying(&'a [String]),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub ledger: UpgradeLedger,
    pub plan: UpgradePlan,
    pub initial_versions: BTreeMap<String, Option<String>>,
    pub final_versions: BTreeMap<String, Option<String>>,
    pub mismatches: Vec<Mismatch>,
    pub retry: Option<RetryDetail>,
    /// Set when the environment could not be re-read after the packages ran;
    /// `final_versions` then reflects the ledger rather than pip.
    pub environment_error: Option<String>,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self.ledger.exit_code() {
            0 if self.environment_error.is_some() => 1,
            code => code,
        }
    }
}

struct Step {
    record: LedgerRecord,
    halt: Option<HaltReason>,
}

impl Step {
    fn recorded(record: LedgerRecord) -> Self {
        Self { record, halt: None }
    }

    fn halted(record: LedgerRecord, reason: HaltReason) -> Self {
        Self {
            record,
            halt: Some(reason),
        }
    }
}

pub struct UpgradeRunner<B> {
    backend: B,
    options: RunOptions,
}

impl<B: PackageBackend> UpgradeRunner<B> {
    pub fn new(backend: B, options: RunOptions) -> Self {
        Self { backend, options }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Inspects the environment and diffs it against `manifest` without changing anything.
    pub fn plan(&self, manifest: &RequirementsManifest) -> Result<UpgradePlan> {
        let installed = self.backend.installed_versions()?;
        let outdated = self.backend.outdated()?;
        Ok(build_upgrade_plan(
            manifest,
            &installed,
            &outdated,
            self.options.mode == RunMode::ForceReinstall,
        ))
    }

    pub fn run<F>(
        &self,
        manifest: &RequirementsManifest,
        manifest_label: &str,
        mut on_event: F,
    ) -> Result<RunOutcome>
    where
        F: FnMut(RunEvent<'_>),
    {
        let mode = self.options.mode;
        let run_id = new_run_id();
        let started_at = Utc::now();
        let plan = self.plan(manifest)?;
        let initial_versions = versions_by_name(&plan, |change| change.installed.clone());
        info!(
            run_id = %run_id,
            mode = mode.as_str(),
            total = plan.changes.len(),
            pending = plan.pending_count(),
            "starting upgrade run"
        );
        on_event(RunEvent::Planned {
            total: plan.changes.len(),
            pending: plan.pending_count(),
        });

        let run_dir = self.options.downloads_dir.join(&run_id);
        let mut builder = LedgerBuilder::new(&run_id, mode, manifest_label, started_at);
        for change in &plan.changes {
            on_event(RunEvent::Processing {
                name: change.name(),
                action: change.action,
            });
            let step = self.process(change, &run_dir);
            if let Err(err) = builder.push(step.record) {
                warn!(package = change.name(), error = %err, "record rejected");
            } else if let Some(record) = builder.records().last() {
                on_event(RunEvent::Recorded(record));
            }
            if let Some(reason) = step.halt {
                warn!(package = reason.package(), reason = %reason.describe(), "halting run");
                builder.halt(reason);
                if let Some(reason) = builder.halted() {
                    on_event(RunEvent::Halted(reason));
                }
                break;
            }
        }

        let reconciled = if mode.is_dry_run() {
            Reconciled {
                final_versions: initial_versions.clone(),
                mismatches: Vec::new(),
                retry: None,
                error: None,
            }
        } else {
            self.reconcile(&plan, &mut builder, &mut on_event)
        };

        if !self.options.keep_downloads && run_dir.exists() {
            if let Err(err) = fs::remove_dir_all(&run_dir) {
                warn!(path = %run_dir.display(), error = %err, "failed to clean download dir");
            }
        }

        let ledger = builder.finish(Utc::now());
        info!(
            run_id = %ledger.run_id,
            changed = ledger.summary.changed,
            failed = ledger.summary.failed,
            halted = ledger.halted.is_some(),
            "upgrade run finished"
        );
        Ok(RunOutcome {
            ledger,
            plan,
            initial_versions,
            final_versions: reconciled.final_versions,
            mismatches: reconciled.mismatches,
            retry: reconciled.retry,
            environment_error: reconciled.error,
        })
    }

    fn process(&self, change: &PlannedChange, run_dir: &Path) -> Step {
        let record = LedgerRecord::for_change(change);
        if change.action == PlannedAction::Keep {
            return Step::recorded(record.mark_skipped("up-to-date"));
        }
        if self.options.mode.is_dry_run() {
            let expected = record.expected_hash.clone();
            let target = change.target_version().map(str::to_string);
            let detail = format!("dry-run: would {}", change.action.as_str());
            return Step::recorded(record.mark_ok(target, expected).with_detail(detail));
        }

        match self.install_change(change, run_dir, record.clone()) {
            Ok(step) => step,
            Err(err) => {
                warn!(package = change.name(), error = %err, "package failed");
                Step::recorded(record.mark_failed(format!("{err:#}")))
            }
        }
    }

    fn install_change(
        &self,
        change: &PlannedChange,
        run_dir: &Path,
        record: LedgerRecord,
    ) -> Result<Step> {
        let requirement = &change.requirement;
        let dest = run_dir.join(requirement.normalized_name());
        let artifact = self.backend.download(&requirement.install_spec(), &dest)?;
        let actual = sha256_file_hex(&artifact)?;
        let hash = format!("sha256:{actual}");
        debug!(package = change.name(), %hash, "hashed artifact");

        if !requirement.hashes.is_empty() && !requirement.hashes.iter().any(|h| h.matches(&actual))
        {
            let reason = HaltReason::HashMismatch {
                package: requirement.name.clone(),
                expected: requirement.hashes.iter().map(|h| h.to_string()).collect(),
                actual: actual.clone(),
            };
            let record = record.with_hash(hash).mark_failed(reason.describe());
            return Ok(Step::halted(record, reason));
        }

        let force = self.options.mode == RunMode::ForceReinstall
            || change.action == PlannedAction::Reinstall;
        let output = self.backend.install_artifact(&artifact, force)?;
        if !output.success() {
            return Ok(Step::recorded(
                record.with_hash(hash).mark_failed(output.stderr_tail()),
            ));
        }

        let installed = self
            .backend
            .installed_versions()?
            .remove(&requirement.normalized_name());

        let license = self.backend.license(&requirement.name)?;
        let verdict = self.options.license_policy.evaluate(license.as_deref());
        if self.options.license_policy.halts_on(&verdict) {
            let matched = match verdict {
                LicenseVerdict::Suspect(token) => Some(token),
                LicenseVerdict::Allowed | LicenseVerdict::Unknown => None,
            };
            let reason = HaltReason::License {
                package: requirement.name.clone(),
                license,
                matched,
            };
            let mut record = record.with_hash(hash).mark_failed(reason.describe());
            record.new_version = installed;
            return Ok(Step::halted(record, reason));
        }

        Ok(Step::recorded(record.mark_ok(installed, Some(hash))))
    }

    /// Re-reads the environment, retries pinned packages that missed their pin
    /// once, and fails the records that still do not match.
    ///
    /// A failed re-read leaves the records as they are and is reported on the
    /// outcome, so the ledger of an already-modified environment is never lost.
    fn reconcile<F>(
        &self,
        plan: &UpgradePlan,
        builder: &mut LedgerBuilder,
        on_event: &mut F,
    ) -> Reconciled
    where
        F: FnMut(RunEvent<'_>),
    {
        let mut installed = match self.backend.installed_versions() {
            Ok(installed) => installed,
            Err(err) => {
                return Reconciled::unverified(plan, builder.records(), Vec::new(), None, &err)
            }
        };
        let mismatched: Vec<&PlannedChange> = plan
            .pending()
            .filter(|change| change.target_version().is_some())
            .filter(|change| {
                builder
                    .records()
                    .iter()
                    .any(|record| record.name == change.requirement.name)
            })
            .filter(|change| {
                !observed_version(&installed, change)
                    .is_some_and(|version| change.requirement.is_satisfied_by(&version))
            })
            .collect();
        let mismatches: Vec<Mismatch> = mismatched
            .iter()
            .map(|change| Mismatch {
                package: change.requirement.name.clone(),
                expected: change.target_version().unwrap_or_default().to_string(),
                observed: observed_version(&installed, change),
            })
            .collect();

        // Hash-locked requirements never go through the unverified batch install.
        let retryable: Vec<&PlannedChange> = mismatched
            .iter()
            .copied()
            .filter(|change| change.requirement.hashes.is_empty())
            .collect();

        let mut retry = None;
        if self.options.retry_mismatches && builder.halted().is_none() && !retryable.is_empty() {
            let specs: Vec<String> = retryable
                .iter()
                .map(|change| change.requirement.install_spec())
                .collect();
            info!(packages = ?specs, "retrying pinned mismatches");
            on_event(RunEvent::Retrying(&specs));
            let force = self.options.mode == RunMode::ForceReinstall;
            let return_code = match self.backend.install_specs(&specs, force) {
                Ok(output) => {
                    if !output.success() {
                        warn!(stderr = %output.stderr_tail(), "retry install failed");
                    }
                    output.status_code
                }
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "retry install could not run");
                    None
                }
            };
            retry = Some(RetryDetail {
                packages: retryable
                    .iter()
                    .map(|change| change.requirement.name.clone())
                    .collect(),
                return_code,
            });
            installed = match self.backend.installed_versions() {
                Ok(installed) => installed,
                Err(err) => {
                    return Reconciled::unverified(
                        plan,
                        builder.records(),
                        mismatches,
                        retry,
                        &err,
                    )
                }
            };
        }

        for change in &mismatched {
            let observed = observed_version(&installed, change);
            let Some(record) = builder.record_mut(&change.requirement.name) else {
                continue;
            };
            let satisfied = observed
                .as_deref()
                .is_some_and(|version| change.requirement.is_satisfied_by(version));
            if satisfied {
                *record = record
                    .clone()
                    .mark_ok(observed, None)
                    .with_detail("installed on retry without hash verification");
            } else if record.status != RecordStatus::Failed {
                let mut failed = record.clone().mark_failed(format!(
                    "version mismatch: expected {}, observed {}",
                    change.target_version().unwrap_or_default(),
                    observed.as_deref().unwrap_or("nothing")
                ));
                failed.new_version = observed;
                *record = failed;
            }
        }

        Reconciled {
            final_versions: versions_by_name(plan, |change| observed_version(&installed, change)),
            mismatches,
            retry,
            error: None,
        }
    }
}

struct Reconciled {
    final_versions: BTreeMap<String, Option<String>>,
    mismatches: Vec<Mismatch>,
    retry: Option<RetryDetail>,
    error: Option<String>,
}

impl Reconciled {
    fn unverified(
        plan: &UpgradePlan,
        records: &[LedgerRecord],
        mismatches: Vec<Mismatch>,
        retry: Option<RetryDetail>,
        err: &anyhow::Error,
    ) -> Self {
        let error = format!("failed to re-read installed versions: {err:#}");
        warn!(error = %error, "final versions taken from the ledger");
        Self {
            final_versions: recorded_versions(plan, records),
            mismatches,
            retry,
            error: Some(error),
        }
    }
}

// Best known version per package when pip cannot be asked again.
fn recorded_versions(
    plan: &UpgradePlan,
    records: &[LedgerRecord],
) -> BTreeMap<String, Option<String>> {
    versions_by_name(plan, |change| {
        records
            .iter()
            .find(|record| record.name == change.requirement.name)
            .and_then(|record| record.new_version.clone())
            .or_else(|| change.installed.clone())
    })
}

fn observed_version(
    installed: &BTreeMap<String, String>,
    change: &PlannedChange,
) -> Option<String> {
    installed.get(&change.requirement.normalized_name()).cloned()
}

fn versions_by_name<F>(plan: &UpgradePlan, version_of: F) -> BTreeMap<String, Option<String>>
where
    F: Fn(&PlannedChange) -> Option<String>,
{
    plan.changes
        .iter()
        .map(|change| (change.requirement.name.clone(), version_of(change)))
        .collect()
}

/// Wraps a finished run into the report handed to the orchestrator.
pub fn build_run_report(
    outcome: &RunOutcome,
    inputs: ReportInputs,
    package_manager: &str,
    audit: Option<AuditReport>,
    ledger_path: Option<&Path>,
) -> RunReport {
    let ledger = &outcome.ledger;
    let (pinned, loose) = outcome.plan.split_batches();
    let execution = ExecutionDetail {
        package_manager: package_manager.to_string(),
        mode: ledger.mode,
        pinned,
        loose,
        retry: outcome.retry.clone(),
        audit,
    };

    let mut report = RunReport::new(&ledger.run_id, ledger.started_at, inputs, execution);
    if let Some(reason) = &ledger.halted {
        let kind = match reason {
            HaltReason::HashMismatch { .. } => "hash-mismatch",
            HaltReason::License { .. } => "license",
        };
        report.record_error(kind, reason.describe());
    }
    if let Some(error) = &outcome.environment_error {
        report.record_error("environment", error.clone());
    }

    let any_failures = outcome.exit_code() != 0;
    report.result = RunResult {
        status: if any_failures {
            ResultStatus::Attention
        } else {
            ResultStatus::Completed
        },
        reason: ledger.halted.as_ref().map(HaltReason::describe),
        any_failures,
        initial_versions: outcome.initial_versions.clone(),
        final_versions: outcome.final_versions.clone(),
        mismatches: outcome.mismatches.clone(),
        verification: Some(verify(ledger)),
        ledger_path: ledger_path.map(|path| path.display().to_string()),
    };
    report.finish(ledger.completed_at)
}

/// Verification is `performed` only when every installed package has an artifact hash.
fn verify(ledger: &UpgradeLedger) -> Verification {
    if ledger.mode.is_dry_run() {
        return Verification::skipped("dry run", Vec::new());
    }
    let installed: Vec<&LedgerRecord> = ledger
        .records
        .iter()
        .filter(|record| record.status == RecordStatus::Ok && record.action != PlannedAction::Keep)
        .collect();
    if installed.is_empty() {
        return Verification::skipped("no packages installed", Vec::new());
    }
    let missing: Vec<String> = installed
        .iter()
        .filter(|record| record.hash.is_none())
        .map(|record| record.name.clone())
        .collect();
    if !missing.is_empty() {
        return Verification::skipped("missing artifact hashes", missing);
    }
    Verification::performed(format!(
        "{} artifacts hashed before install",
        installed.len()
    ))
}
