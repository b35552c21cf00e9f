//! Reporting types: per-task outcomes, the result tree, and run summaries.

use serde::{Deserialize, Serialize};

use std::fmt::Write as _;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Reporter {
    Pretty,
    Json,
}

impl clap::ValueEnum for Reporter {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Pretty, Self::Json]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Pretty => clap::builder::PossibleValue::new("pretty"),
            Self::Json => clap::builder::PossibleValue::new("json"),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Pass,
    Fail,
    Error,
    Timeout,
}

/// Outcome of one task. `Skipped` marks serial siblings that never ran
/// because an earlier sibling failed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum TaskOutcome {
    Success,
    Failure(String),
    Timeout(String),
    Skipped,
}

impl TaskOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_) | Self::Timeout(_))
    }

    pub fn short(&self) -> &'static str {
        match self {
            Self::Success => "ok",
            Self::Failure(_) => "FAIL",
            Self::Timeout(_) => "TIMEOUT",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub label: String,
    pub outcome: TaskOutcome,
    #[serde(rename = "startedAt")]
    pub started_at: String,
    #[serde(rename = "finishedAt")]
    pub finished_at: String,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TaskResult>,
}

impl TaskResult {
    /// A result for a task that never started (serial abort).
    pub fn skipped(label: impl Into<String>) -> Self {
        let now = wall_time_iso_utc();
        Self {
            label: label.into(),
            outcome: TaskOutcome::Skipped,
            started_at: now.clone(),
            finished_at: now,
            duration_ms: 0,
            children: Vec::new(),
        }
    }

    pub fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        self.tally(&mut counts);
        counts
    }

    fn tally(&self, counts: &mut TaskCounts) {
        if self.children.is_empty() {
            match &self.outcome {
                TaskOutcome::Success => counts.passed += 1,
                TaskOutcome::Failure(_) => counts.failed += 1,
                TaskOutcome::Timeout(_) => counts.timed_out += 1,
                TaskOutcome::Skipped => counts.skipped += 1,
            }
        }
        for child in &self.children {
            child.tally(counts);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskCounts {
    pub passed: u64,
    pub failed: u64,
    #[serde(rename = "timedOut")]
    pub timed_out: u64,
    pub skipped: u64,
}

/// Flattened per-leaf trace record, appended concurrently from parallel
/// branches while the tree is being executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub action: String,
    pub detail: String,
    pub outcome: TaskOutcome,
    #[serde(rename = "startedAt")]
    pub started_at: String,
    #[serde(rename = "finishedAt")]
    pub finished_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunIdentity {
    #[serde(rename = "runId")]
    pub run_id: String,
    #[serde(rename = "reportPath", skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub status: ExitStatus,
    pub scenario: String,
    pub identity: RunIdentity,
    #[serde(rename = "startedAt")]
    pub started_at: String,
    #[serde(rename = "finishedAt")]
    pub finished_at: String,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    pub tasks: TaskCounts,
}

impl RunSummary {
    pub fn pretty(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "status={:?} scenario={} runId={}",
            self.status, self.scenario, self.identity.run_id
        );
        if let Some(path) = &self.identity.report_path {
            let _ = writeln!(out, "report={path}");
        }
        let _ = writeln!(
            out,
            "tasks: passed={} failed={} timed_out={} skipped={} ({}ms)",
            self.tasks.passed,
            self.tasks.failed,
            self.tasks.timed_out,
            self.tasks.skipped,
            self.duration_ms
        );
        out.trim_end().to_string()
    }
}

/// Everything a run produces: the summary, the result tree, and the
/// flattened leaf trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub summary: RunSummary,
    pub root: TaskResult,
    pub trace: Vec<TaskRecord>,
}

impl RunReport {
    pub fn pretty(&self) -> String {
        let mut out = self.summary.pretty();
        out.push('\n');
        render_tree(&self.root, 0, &mut out);
        out.trim_end().to_string()
    }
}

fn render_tree(result: &TaskResult, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    let _ = write!(out, "{indent}{} [{}]", result.label, result.outcome.short());
    match &result.outcome {
        TaskOutcome::Failure(reason) | TaskOutcome::Timeout(reason)
            if result.children.is_empty() =>
        {
            let _ = writeln!(out, " {reason}");
        }
        _ => {
            let _ = writeln!(out, " ({}ms)", result.duration_ms);
        }
    }
    for child in &result.children {
        render_tree(child, depth + 1, out);
    }
}

pub fn exit_status_for(root: &TaskOutcome) -> ExitStatus {
    match root {
        TaskOutcome::Success => ExitStatus::Pass,
        TaskOutcome::Timeout(_) => ExitStatus::Timeout,
        TaskOutcome::Failure(_) => ExitStatus::Fail,
        TaskOutcome::Skipped => ExitStatus::Error,
    }
}

pub fn wall_time_iso_utc() -> String {
    // Metadata only (startedAt/finishedAt); execution decisions never read this.
    let now = SystemTime::now();
    let dt: time::OffsetDateTime = now.into();
    dt.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
