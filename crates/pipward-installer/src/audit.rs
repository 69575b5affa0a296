use std::path::{Path, PathBuf};
use std::process::Command;

use pipward_core::{AuditReport, ToolAudit};
use serde_json::Value;
use tracing::{info, warn};

use crate::command::run_command;

pub const PIP_AUDIT_TOOL: &str = "pip-audit";
pub const PIPDEPTREE_TOOL: &str = "pipdeptree";

/// Explicit tool paths; `None` means look the tool up on `PATH`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditConfig {
    pub pip_audit: Option<PathBuf>,
    pub pipdeptree: Option<PathBuf>,
}

/// Runs the optional audit tools. Missing tools are reported, never fatal.
pub fn run_audit(config: &AuditConfig) -> AuditReport {
    let tools = vec![
        run_tool(
            PIP_AUDIT_TOOL,
            config.pip_audit.as_deref(),
            &["--format", "json"],
            count_vulnerabilities,
        ),
        run_tool(
            PIPDEPTREE_TOOL,
            config.pipdeptree.as_deref(),
            &["--json"],
            |_| None,
        ),
    ];
    AuditReport { tools }
}

fn run_tool(
    tool: &str,
    configured: Option<&Path>,
    args: &[&str],
    findings: fn(&Value) -> Option<usize>,
) -> ToolAudit {
    let Some(program) = configured
        .map(Path::to_path_buf)
        .or_else(|| find_on_path(tool))
    else {
        info!(tool, "audit tool not found on PATH");
        return unavailable(tool, format!("{tool} not found on PATH"));
    };

    let output = match run_command(Command::new(&program).args(args), &format!("{tool} failed")) {
        Ok(output) => output,
        Err(err) => {
            warn!(tool, error = %err, "audit tool could not be started");
            return unavailable(tool, format!("{err:#}"));
        }
    };

    let parsed = serde_json::from_str::<Value>(output.stdout.trim()).ok();
    let detail = match &parsed {
        Some(value) => summarize(tool, value),
        None => Some(output.stderr_tail()),
    };
    ToolAudit {
        tool: tool.to_string(),
        available: true,
        exit_code: output.status_code,
        findings: parsed.as_ref().and_then(findings),
        detail,
    }
}

fn unavailable(tool: &str, detail: String) -> ToolAudit {
    ToolAudit {
        tool: tool.to_string(),
        available: false,
        exit_code: None,
        findings: None,
        detail: Some(detail),
    }
}

/// Counts vulnerabilities in both the object (`{"dependencies": [...]}`) and
/// legacy list report shapes of `pip-audit --format json`.
fn count_vulnerabilities(report: &Value) -> Option<usize> {
    let dependencies = match report {
        Value::Object(map) => map.get("dependencies")?.as_array()?,
        Value::Array(items) => items,
        _ => return None,
    };
    Some(
        dependencies
            .iter()
            .filter_map(|dependency| dependency.get("vulns").and_then(Value::as_array))
            .map(Vec::len)
            .sum(),
    )
}

fn summarize(tool: &str, value: &Value) -> Option<String> {
    match tool {
        PIPDEPTREE_TOOL => value
            .as_array()
            .map(|packages| format!("{} packages in dependency graph", packages.len())),
        _ => count_vulnerabilities(value).map(|count| format!("{count} known vulnerabilities")),
    }
}

pub fn find_on_path(tool: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    let candidates: Vec<String> = if cfg!(windows) {
        vec![format!("{tool}.exe"), tool.to_string()]
    } else {
        vec![tool.to_string()]
    };
    std::env::split_paths(&path)
        .flat_map(|dir| candidates.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}
