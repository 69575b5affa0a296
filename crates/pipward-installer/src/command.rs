use std::process::Command;

use anyhow::{anyhow, Context, Result};
use tracing::debug;

const STDERR_TAIL_LINES: usize = 5;

/// Captured result of one subprocess invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }

    pub fn require_success(&self, context_message: &str) -> Result<()> {
        if self.success() {
            return Ok(());
        }
        Err(anyhow!(
            "{context_message}: status={} stdout='{}' stderr='{}'",
            self.status_label(),
            self.stdout.trim(),
            self.stderr.trim()
        ))
    }

    /// Last few non-empty stderr lines, joined for a ledger detail.
    pub fn stderr_tail(&self) -> String {
        let lines: Vec<&str> = self
            .stderr
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
        let tail = lines[start..].join(" | ");
        if tail.is_empty() {
            format!("exited with status {}", self.status_label())
        } else {
            tail
        }
    }

    fn status_label(&self) -> String {
        self.status_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "signal".to_string())
    }
}

pub fn run_command(command: &mut Command, context_message: &str) -> Result<CommandOutput> {
    debug!(command = %render_command(command), "running subprocess");
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    let captured = CommandOutput {
        status_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    debug!(status = ?captured.status_code, "subprocess finished");
    Ok(captured)
}

fn render_command(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
