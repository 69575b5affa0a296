use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use pipward_core::{
    parse_contract_input, ContractInput, ExecutionDetail, FailurePayload, ReportInputs,
    RequirementsManifest, RunMode, RunReport, RunResult,
};
use pipward_installer::{
    build_run_report, latest_ledger, new_run_id, read_ledger, run_audit, write_ledger,
    write_ledger_to, write_run_report, PackageBackend, PipBackend, RunEvent, UpgradeRunner,
};
use pipward_security::{read_signature_file, verify_manifest_signature};
use serde_json::json;
use tracing::{debug, info};

use crate::config::Settings;
use crate::render::{
    format_audit_lines, format_ledger_lines, format_plan_lines, format_record_line,
    record_status_key, OutputStyle, TerminalProgress, TerminalRenderer,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunRequest {
    pub(crate) manifest: PathBuf,
    pub(crate) mode: RunMode,
    pub(crate) audit: bool,
    pub(crate) ledger: Option<PathBuf>,
    pub(crate) trusted_key: Option<String>,
    pub(crate) manifest_signature: Option<PathBuf>,
}

pub(crate) fn run_mode(dry_run: bool, force_reinstall: bool) -> RunMode {
    if dry_run {
        RunMode::DryRun
    } else if force_reinstall {
        RunMode::ForceReinstall
    } else {
        RunMode::Upgrade
    }
}

/// Reads and parses a manifest, refusing it when a trusted key is given and
/// the detached signature does not verify.
pub(crate) fn load_manifest(
    path: &Path,
    trusted: Option<(&str, &Path)>,
) -> Result<RequirementsManifest> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read manifest: {}", path.display()))?;
    if let Some((key_hex, signature_path)) = trusted {
        let signature = read_signature_file(signature_path)?;
        verify_manifest_signature(&bytes, key_hex, &signature)
            .with_context(|| format!("refusing unsigned manifest: {}", path.display()))?;
        debug!(manifest = %path.display(), "manifest signature verified");
    }
    let text = String::from_utf8(bytes)
        .with_context(|| format!("manifest is not valid UTF-8: {}", path.display()))?;
    RequirementsManifest::parse(&text)
        .with_context(|| format!("failed to parse manifest: {}", path.display()))
}

fn pip_backend(settings: &Settings, user: bool) -> PipBackend {
    PipBackend::new(&settings.python).with_user(user)
}

pub(crate) fn run_flow(settings: &Settings, request: RunRequest) -> Result<u8> {
    let trusted = request
        .trusted_key
        .as_deref()
        .zip(request.manifest_signature.as_deref());
    let manifest = load_manifest(&request.manifest, trusted)?;
    let label = request.manifest.display().to_string();

    let layout = settings.layout();
    layout.ensure_base_dirs()?;
    let backend = pip_backend(settings, settings.user);
    let package_manager = backend.describe();
    let runner = UpgradeRunner::new(backend, settings.run_options(request.mode));

    let renderer = TerminalRenderer::current();
    renderer.print_section(&format!("pipward {}", request.mode.as_str()));
    let mut progress: Option<TerminalProgress> = None;
    let mut recorded = 0_u64;
    let outcome = runner.run(&manifest, &label, |event| match event {
        RunEvent::Planned { total, pending } => {
            renderer.print_status(
                "step",
                &format!("planned {total} packages ({pending} pending)"),
            );
            progress = Some(renderer.start_progress(request.mode.as_str(), total as u64));
        }
        RunEvent::Processing { name, action } => {
            if let Some(progress) = progress.as_mut() {
                progress.set(recorded, &format!("{} {name}", action.as_str()));
            }
        }
        RunEvent::Recorded(record) => {
            recorded += 1;
            match progress.as_mut() {
                Some(progress) if renderer.style() == OutputStyle::Rich => {
                    progress.set(recorded, &record.name);
                }
                _ => renderer.print_status(
                    record_status_key(record.status),
                    &format_record_line(record),
                ),
            }
        }
        RunEvent::Halted(reason) => {
            if let Some(progress) = progress.take() {
                progress.finish_abandon();
            }
            renderer.print_status("fail", &format!("halted: {}", reason.describe()));
        }
        RunEvent::Retrying(specs) => {
            renderer.print_status("warn", &format!("retrying {}", specs.join(" ")));
        }
    })?;
    if let Some(progress) = progress.take() {
        progress.finish_success();
    }

    let ledger_path = match &request.ledger {
        Some(path) => {
            write_ledger_to(path, &outcome.ledger)?;
            path.clone()
        }
        None => write_ledger(&layout, &outcome.ledger)?,
    };

    let audit = request.audit.then(|| run_audit(&settings.audit));
    let inputs = ReportInputs {
        requested_packages: manifest.names(),
        normalized_packages: manifest
            .requirements
            .iter()
            .map(|requirement| requirement.normalized_name())
            .collect(),
        use_user_flag: settings.user,
        manifest: Some(label),
        ..ReportInputs::default()
    };
    let report = build_run_report(
        &outcome,
        inputs,
        &package_manager,
        audit,
        Some(&ledger_path),
    );
    let report_path = write_run_report(&layout, &report)?;

    if renderer.style() == OutputStyle::Rich {
        renderer.print_lines(&format_ledger_lines(&outcome.ledger, renderer.style()));
    }
    if let Some(audit) = &report.execution.audit {
        renderer.print_lines(&format_audit_lines(audit, renderer.style()));
    }
    if let Some(error) = &outcome.environment_error {
        renderer.print_status("warn", error);
    }
    renderer.print_status("ok", &format!("ledger: {}", ledger_path.display()));
    renderer.print_status("ok", &format!("report: {}", report_path.display()));
    info!(ledger = %ledger_path.display(), report = %report_path.display(), "run persisted");

    Ok(exit_byte(outcome.exit_code()))
}

pub(crate) fn plan_flow(settings: &Settings, manifest_path: &Path, force: bool) -> Result<u8> {
    let manifest = load_manifest(manifest_path, None)?;
    let runner = UpgradeRunner::new(
        pip_backend(settings, settings.user),
        settings.run_options(run_mode(false, force)),
    );
    let plan = runner.plan(&manifest)?;
    TerminalRenderer::current().print_lines(&format_plan_lines(&plan));
    Ok(0)
}

pub(crate) fn audit_flow(settings: &Settings) -> Result<u8> {
    let report = run_audit(&settings.audit);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(0)
}

pub(crate) fn ledger_flow(settings: &Settings, path: Option<&Path>, json: bool) -> Result<u8> {
    let ledger = match path {
        Some(path) => read_ledger(path)?,
        None => {
            let layout = settings.layout();
            let Some((_, ledger)) = latest_ledger(&layout)? else {
                return Err(anyhow!(
                    "no ledgers found under {}",
                    layout.ledgers_dir().display()
                ));
            };
            ledger
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&ledger)?);
    } else {
        let renderer = TerminalRenderer::current();
        renderer.print_lines(&format_ledger_lines(&ledger, renderer.style()));
    }
    Ok(0)
}

/// Orchestrator mode: every outcome, including bad input, is a JSON document on stdout.
pub(crate) fn json_flow(settings: &Settings, input: Option<&Path>) -> Result<u8> {
    let raw = match input {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read JSON input: {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read JSON input from stdin")?;
            buffer
        }
    };

    let (rendered, code) = match execute_contract(settings, &raw) {
        Ok(report) => {
            let code = if report.result.any_failures { 1 } else { 0 };
            (serde_json::to_string_pretty(&report)?, code)
        }
        Err(failure) => (serde_json::to_string_pretty(&failure)?, 1),
    };
    println!("{rendered}");
    Ok(code)
}

pub(crate) fn execute_contract(
    settings: &Settings,
    raw: &str,
) -> Result<RunReport, FailurePayload> {
    let input = parse_contract_input(raw)?;
    let manifest = input.manifest().map_err(|err| {
        FailurePayload::new("package list is invalid")
            .with_detail("error", json!(format!("{err:#}")))
    })?;
    let user = settings.user || input.use_user();
    let mode = if input.dry_run() {
        RunMode::DryRun
    } else {
        RunMode::Upgrade
    };
    let inputs = contract_inputs(&input, &manifest, user);
    let backend = pip_backend(settings, user);

    if manifest.is_empty() {
        info!("no published packages to update; skipping");
        let started_at = Utc::now();
        let execution = ExecutionDetail {
            package_manager: backend.describe(),
            mode,
            pinned: Vec::new(),
            loose: Vec::new(),
            retry: None,
            audit: None,
        };
        let mut report = RunReport::new(new_run_id(), started_at, inputs, execution);
        report.result = RunResult::skipped("no published packages to update");
        return Ok(report.finish(Utc::now()));
    }

    run_contract(settings, backend, &manifest, mode, inputs).map_err(|err| {
        FailurePayload::new("pipward execution failed")
            .with_detail("error", json!(format!("{err:#}")))
    })
}

fn run_contract(
    settings: &Settings,
    backend: PipBackend,
    manifest: &RequirementsManifest,
    mode: RunMode,
    inputs: ReportInputs,
) -> Result<RunReport> {
    let layout = settings.layout();
    layout.ensure_base_dirs()?;
    let package_manager = backend.describe();
    let runner = UpgradeRunner::new(backend, settings.run_options(mode));
    let outcome = runner.run(manifest, "orchestrator", |event| {
        if let RunEvent::Recorded(record) = event {
            debug!(
                package = %record.name,
                status = record.status.as_str(),
                action = record.action.as_str(),
                "recorded"
            );
        }
    })?;
    let ledger_path = write_ledger(&layout, &outcome.ledger)?;
    let report = build_run_report(&outcome, inputs, &package_manager, None, Some(&ledger_path));
    write_run_report(&layout, &report)?;
    Ok(report)
}

pub(crate) fn contract_inputs(
    input: &ContractInput,
    manifest: &RequirementsManifest,
    user: bool,
) -> ReportInputs {
    let parameters = &input.parameters;
    ReportInputs {
        requested_packages: parameters.packages.clone(),
        normalized_packages: manifest.names(),
        use_user_flag: user,
        manifest: None,
        repo_parent_root: Some(parameters.repo_parent_root.clone()),
        published_versions: parameters.published_versions.clone(),
        published_artifacts: parameters.published_artifacts.clone(),
    }
}

fn exit_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}
