use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{HumanCount, ProgressBar, ProgressStyle};
use pipward_core::{
    AuditReport, LedgerRecord, PlannedAction, RecordStatus, UpgradeLedger, UpgradePlan,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

pub(crate) struct TerminalProgress {
    style: OutputStyle,
    label: String,
    total: u64,
    current: u64,
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

pub(crate) fn resolve_output_style(stdout_is_tty: bool, no_color: bool) -> OutputStyle {
    if stdout_is_tty && !no_color {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn current_output_style() -> OutputStyle {
    resolve_output_style(
        std::io::stdout().is_terminal(),
        std::env::var_os("NO_COLOR").is_some(),
    )
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self { style }
    }

    pub(crate) fn current() -> Self {
        Self::from_style(current_output_style())
    }

    pub(crate) fn style(self) -> OutputStyle {
        self.style
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        println!("{}", render_status_line(self.style, status, message));
    }

    pub(crate) fn print_section(self, title: &str) {
        if self.style == OutputStyle::Rich {
            println!();
            println!("{}", colorize(section_style(), &format!("== {title} ==")));
        }
    }

    pub(crate) fn start_progress(self, label: &str, total: u64) -> TerminalProgress {
        let progress_bar = if self.style == OutputStyle::Rich {
            let progress_bar = ProgressBar::new(total.max(1));
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.cyan.bold} {msg:<16} [{bar:20.cyan/blue}] {pos:>3}/{len:3} {elapsed_precise}",
            ) {
                progress_bar.set_style(style.tick_chars(".oO@* ").progress_chars("=>-"));
            }
            progress_bar.set_message(label.to_string());
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            Some(progress_bar)
        } else {
            None
        };

        TerminalProgress {
            style: self.style,
            label: label.to_string(),
            total,
            current: 0,
            progress_bar,
            started_at: Instant::now(),
        }
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }
}

impl TerminalProgress {
    pub(crate) fn set(&mut self, current: u64, message: &str) {
        self.current = current.min(self.total);

        let Some(progress_bar) = &self.progress_bar else {
            return;
        };

        let safe_total = self.total.max(1);
        progress_bar.set_length(safe_total);
        progress_bar.set_position(self.current.min(safe_total));
        progress_bar.set_message(message.to_string());
    }

    pub(crate) fn finish_success(mut self) {
        let Some(progress_bar) = self.progress_bar.take() else {
            return;
        };

        progress_bar.finish_and_clear();
        if let Some(line) = render_progress_line(
            self.style,
            &self.label,
            self.current,
            self.total,
            Some(self.started_at.elapsed()),
        ) {
            println!("{line}");
        }
    }

    pub(crate) fn finish_abandon(mut self) {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("[{}] {message}", status_badge(status)),
    }
}

fn status_badge(status: &str) -> String {
    match status {
        "ok" => "OK".to_string(),
        "warn" => "WARN".to_string(),
        "fail" | "failed" => "FAIL".to_string(),
        "skip" | "skipped" => "SKIP".to_string(),
        "step" => "..".to_string(),
        other => other.to_ascii_uppercase(),
    }
}

pub(crate) fn record_status_key(status: RecordStatus) -> &'static str {
    match status {
        RecordStatus::Ok => "ok",
        RecordStatus::Failed => "fail",
        RecordStatus::Skipped => "skip",
    }
}

pub(crate) fn format_record_line(record: &LedgerRecord) -> String {
    let previous = record.previous_version.as_deref().unwrap_or("-");
    let new = record.new_version.as_deref().unwrap_or("-");
    let mut line = format!(
        "{} {} {previous} -> {new} status={}",
        record.action.as_str(),
        record.name,
        record.status.as_str()
    );
    if record.changed {
        line.push_str(" changed");
    }
    if let Some(detail) = &record.detail {
        line.push_str(&format!(" ({detail})"));
    }
    line
}

pub(crate) fn format_ledger_lines(ledger: &UpgradeLedger, style: OutputStyle) -> Vec<String> {
    let mut lines = vec![format!(
        "ledger {} mode={} manifest={}",
        ledger.run_id,
        ledger.mode.as_str(),
        ledger.manifest
    )];
    lines.extend(ledger.records.iter().map(|record| {
        render_status_line(
            style,
            record_status_key(record.status),
            &format_record_line(record),
        )
    }));
    if let Some(reason) = &ledger.halted {
        lines.push(render_status_line(
            style,
            "fail",
            &format!("halted: {}", reason.describe()),
        ));
    }
    let summary = &ledger.summary;
    lines.push(format!(
        "summary: total={} ok={} failed={} skipped={} changed={}",
        summary.total, summary.ok, summary.failed, summary.skipped, summary.changed
    ));
    lines
}

pub(crate) fn format_plan_lines(plan: &UpgradePlan) -> Vec<String> {
    let mut lines: Vec<String> = plan
        .changes
        .iter()
        .map(|change| {
            let installed = change.installed.as_deref().unwrap_or("-");
            let target = change
                .target_version()
                .map(str::to_string)
                .unwrap_or_else(|| change.requirement.install_spec());
            format!(
                "{:<9} {} {installed} -> {target}",
                change.action.as_str(),
                change.name()
            )
        })
        .collect();
    let keep = plan
        .changes
        .iter()
        .filter(|change| change.action == PlannedAction::Keep)
        .count();
    lines.push(format!(
        "plan: pending={} keep={keep}",
        plan.pending_count()
    ));
    lines
}

pub(crate) fn format_audit_lines(report: &AuditReport, style: OutputStyle) -> Vec<String> {
    report
        .tools
        .iter()
        .map(|tool| {
            let status = if !tool.available {
                "skip"
            } else if tool.findings.unwrap_or(0) > 0 {
                "warn"
            } else {
                "ok"
            };
            let detail = tool.detail.as_deref().unwrap_or("no output");
            render_status_line(style, status, &format!("{}: {detail}", tool.tool))
        })
        .collect()
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn progress_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn progress_bar_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::BrightBlue.into()))
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub(crate) fn render_progress_line(
    style: OutputStyle,
    label: &str,
    current: u64,
    total: u64,
    elapsed: Option<Duration>,
) -> Option<String> {
    if style == OutputStyle::Plain {
        return None;
    }

    let width = 18_usize;
    let safe_total = total.max(1);
    let bounded_current = current.min(safe_total);
    let filled = ((bounded_current as usize) * width) / (safe_total as usize);
    let bar = format!(
        "{}{}",
        "=".repeat(filled),
        "-".repeat(width.saturating_sub(filled))
    );
    let percent = (bounded_current * 100) / safe_total;
    let counts = format!("{}/{}", HumanCount(current), HumanCount(total));
    let suffix = elapsed
        .map(|value| format!(" complete in {}", format_elapsed(value)))
        .unwrap_or_default();

    Some(format!(
        "{} [{}] {:>3}% {}{}",
        colorize(progress_label_style(), label),
        colorize(progress_bar_style(), &bar),
        percent,
        counts,
        suffix
    ))
}
