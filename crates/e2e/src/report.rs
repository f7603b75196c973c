//! Human and CI reporters

use std::fmt::Write as _;

use crate::config::ReporterKind;
use crate::runner::{Outcome, RunResult, TestSuiteResult};

/// Render the run summary in the chosen format.
pub fn render(kind: ReporterKind, suite: &TestSuiteResult) -> String {
    match kind {
        ReporterKind::List => render_list(suite),
        ReporterKind::Github => render_github(suite),
        ReporterKind::Json => serde_json::to_string_pretty(suite).unwrap_or_default(),
    }
}

fn summary_line(suite: &TestSuiteResult) -> String {
    format!(
        "{} passed, {} retried, {} failed, {} skipped ({} ms)",
        suite.passed, suite.retried, suite.failed, suite.skipped, suite.duration_ms
    )
}

fn failure_details(out: &mut String, result: &RunResult, indent: &str) {
    if let Some(error) = &result.error {
        let _ = writeln!(out, "{}{}: {}", indent, error.kind, error.message);
        if let Some(step) = &error.step {
            let _ = writeln!(out, "{}step: {}", indent, step);
        }
        if let Some(target) = &error.target {
            let _ = writeln!(out, "{}target: {}", indent, target);
        }
    }
    for artifact in &result.artifacts {
        let _ = writeln!(
            out,
            "{}{:?} (attempt {}): {}",
            indent,
            artifact.kind,
            artifact.attempt,
            artifact.path.display()
        );
    }
}

fn render_list(suite: &TestSuiteResult) -> String {
    let mut out = String::new();
    for result in &suite.results {
        let mark = match result.outcome {
            Outcome::Passed => "✓",
            Outcome::Retried => "±",
            Outcome::Failed => "✗",
            Outcome::Skipped => "-",
        };
        let _ = write!(out, "  {} [{}] {}", mark, result.suite, result.name);
        match result.outcome {
            Outcome::Skipped => out.push_str(" (skipped)\n"),
            Outcome::Retried => {
                let _ = writeln!(
                    out,
                    " ({} ms, passed on attempt {})",
                    result.duration_ms, result.attempts
                );
            }
            _ => {
                let _ = writeln!(out, " ({} ms)", result.duration_ms);
            }
        }
        if result.outcome == Outcome::Failed {
            failure_details(&mut out, result, "      ");
        }
    }
    out.push('\n');
    out.push_str(&summary_line(suite));
    out.push('\n');
    out
}

/// GitHub Actions workflow commands: one `::error` per failed scenario.
fn render_github(suite: &TestSuiteResult) -> String {
    let mut out = String::new();
    for result in &suite.results {
        match result.outcome {
            Outcome::Failed => {
                let message = result
                    .error
                    .as_ref()
                    .map(|e| format!("{}: {}", e.kind, e.message))
                    .unwrap_or_else(|| "failed".to_string());
                let _ = writeln!(
                    out,
                    "::error title={}::{} after {} attempt(s)",
                    escape_property(&format!("[{}] {}", result.suite, result.name)),
                    escape_data(&message),
                    result.attempts
                );
            }
            Outcome::Retried => {
                let _ = writeln!(
                    out,
                    "::warning title={}::flaky, passed on attempt {}",
                    escape_property(&format!("[{}] {}", result.suite, result.name)),
                    result.attempts
                );
            }
            _ => {}
        }
    }
    out.push_str(&summary_line(suite));
    out.push('\n');
    out
}

fn escape_data(s: &str) -> String {
    s.replace('%', "%25").replace('\r', "%0D").replace('\n', "%0A")
}

fn escape_property(s: &str) -> String {
    escape_data(s).replace(':', "%3A").replace(',', "%2C")
}
