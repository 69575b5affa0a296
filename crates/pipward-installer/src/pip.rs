use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use pipward_core::normalize_name;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::backend::PackageBackend;
use crate::command::{run_command, CommandOutput};

#[derive(Debug, Deserialize)]
struct PipListEntry {
    name: String,
    version: String,
}

/// Drives `python -m pip` as a subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipBackend {
    python: PathBuf,
    user: bool,
    extra_args: Vec<String>,
}

impl PipBackend {
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
            user: false,
            extra_args: Vec::new(),
        }
    }

    pub fn with_user(mut self, user: bool) -> Self {
        self.user = user;
        self
    }

    pub fn with_extra_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }

    pub fn python(&self) -> &Path {
        &self.python
    }

    fn pip(&self, subcommand: &str) -> Command {
        let mut command = Command::new(&self.python);
        command
            .args(["-m", "pip", subcommand])
            .arg("--disable-pip-version-check");
        command
    }

    fn install_command(&self, force_reinstall: bool) -> Command {
        let mut command = self.pip("install");
        if force_reinstall {
            command.arg("--force-reinstall");
        }
        if self.user {
            command.arg("--user");
        }
        command.args(&self.extra_args);
        command
    }
}

impl PackageBackend for PipBackend {
    fn describe(&self) -> String {
        format!("{} -m pip", self.python.display())
    }

    fn installed_versions(&self) -> Result<BTreeMap<String, String>> {
        let output = run_command(
            self.pip("list").arg("--format=json"),
            "failed to list installed packages",
        )?;
        output.require_success("pip list failed")?;
        let entries = parse_list_json(&output.stdout).context("pip list returned invalid JSON")?;
        Ok(entries
            .into_iter()
            .map(|entry| (normalize_name(&entry.name), entry.version))
            .collect())
    }

    fn outdated(&self) -> Result<BTreeSet<String>> {
        let output = run_command(
            self.pip("list").args(["--outdated", "--format=json"]),
            "failed to list outdated packages",
        )?;
        if !output.success() {
            warn!(
                stderr = %output.stderr_tail(),
                "pip list --outdated failed; treating nothing as outdated"
            );
            return Ok(BTreeSet::new());
        }
        match parse_list_json(&output.stdout) {
            Ok(entries) => Ok(entries
                .into_iter()
                .map(|entry| normalize_name(&entry.name))
                .collect()),
            Err(err) => {
                warn!(
                    error = %err,
                    "pip list --outdated returned invalid JSON; treating nothing as outdated"
                );
                Ok(BTreeSet::new())
            }
        }
    }

    fn download(&self, spec: &str, dest: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dest)
            .with_context(|| format!("failed to create download dir: {}", dest.display()))?;
        let mut command = self.pip("download");
        command
            .args(["--no-deps", "--dest"])
            .arg(dest)
            .args(&self.extra_args)
            .arg(spec);
        run_command(&mut command, &format!("failed to download '{spec}'"))?
            .require_success(&format!("pip download failed for '{spec}'"))?;
        single_artifact(dest)
    }

    fn install_artifact(&self, artifact: &Path, force_reinstall: bool) -> Result<CommandOutput> {
        let mut command = self.install_command(force_reinstall);
        command.arg("--no-deps").arg(artifact);
        run_command(
            &mut command,
            &format!("failed to install artifact {}", artifact.display()),
        )
    }

    fn install_specs(&self, specs: &[String], force_reinstall: bool) -> Result<CommandOutput> {
        if specs.is_empty() {
            return Ok(CommandOutput {
                status_code: Some(0),
                ..CommandOutput::default()
            });
        }
        let mut command = self.install_command(force_reinstall);
        command.arg("--upgrade").args(specs);
        run_command(&mut command, "failed to run batch pip install")
    }

    fn license(&self, name: &str) -> Result<Option<String>> {
        let output = run_command(
            self.pip("show").args(["--verbose", name]),
            &format!("failed to query metadata for '{name}'"),
        )?;
        if !output.success() {
            debug!(package = name, "pip show failed; license unknown");
            return Ok(None);
        }
        Ok(parse_show_license(&output.stdout))
    }
}

fn parse_list_json(stdout: &str) -> Result<Vec<PipListEntry>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(trimmed)?)
}

/// Picks the license out of `pip show --verbose` output.
///
/// Prefers `License-Expression`, then a non-empty `License` field, then the
/// last segment of the first `License ::` classifier.
pub fn parse_show_license(stdout: &str) -> Option<String> {
    let mut expression = None;
    let mut license = None;
    let mut classifier = None;

    for line in stdout.lines() {
        let trimmed = line.trim();
        if let Some(value) = trimmed.strip_prefix("License-Expression:") {
            expression = non_empty(value);
        } else if let Some(value) = trimmed.strip_prefix("License:") {
            license = non_empty(value);
        } else if classifier.is_none() && trimmed.starts_with("License ::") {
            classifier = trimmed
                .rsplit("::")
                .next()
                .and_then(non_empty);
        }
    }

    expression.or(license).or(classifier)
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn single_artifact(dest: &Path) -> Result<PathBuf> {
    let mut artifacts = Vec::new();
    for entry in fs::read_dir(dest)
        .with_context(|| format!("failed to read download dir: {}", dest.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            artifacts.push(entry.path());
        }
    }
    artifacts.sort();

    match artifacts.len() {
        1 => Ok(artifacts.remove(0)),
        0 => Err(anyhow!("pip download produced no artifact in {}", dest.display())),
        count => Err(anyhow!(
            "expected one artifact in {}, found {count}",
            dest.display()
        )),
    }
}
