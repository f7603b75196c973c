//! Scenario runner: bounded parallelism, retries and artifact capture
//!
//! Each scenario moves through
//! `Pending -> Running -> {Passed | FailedAttempt -> Retrying -> Running | Failed}`.
//! Every attempt gets a brand-new [`ExecutionContext`] and a brand-new
//! identity, so nothing leaks from a failed attempt into its retry.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

use crate::action::{Action, Bindings};
use crate::context::{ArtifactPolicy, ArtifactRef, ExecutionContext};
use crate::error::{E2eError, E2eResult, ErrorKind};
use crate::identity::IdentitySource;
use crate::page::BrowserLauncher;
use crate::primitives::{Primitives, Timeouts};
use crate::scenario::{PreconditionFlows, Scenario};

/// Where a scenario is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioState {
    Pending,
    Running { attempt: u32 },
    FailedAttempt { attempt: u32 },
    Retrying { next_attempt: u32 },
    Passed,
    Failed,
}

impl ScenarioState {
    pub fn can_transition_to(&self, next: &ScenarioState) -> bool {
        use ScenarioState::*;
        match (self, next) {
            (Pending, Running { attempt }) => *attempt == 1,
            (Running { .. }, Passed) => true,
            (Running { attempt }, FailedAttempt { attempt: failed }) => attempt == failed,
            (FailedAttempt { attempt }, Retrying { next_attempt }) => *next_attempt == attempt + 1,
            (FailedAttempt { .. }, Failed) => true,
            (Retrying { next_attempt }, Running { attempt }) => next_attempt == attempt,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScenarioState::Passed | ScenarioState::Failed)
    }
}

struct StateMachine<'a> {
    scenario: &'a str,
    state: ScenarioState,
}

impl<'a> StateMachine<'a> {
    fn new(scenario: &'a str) -> Self {
        Self {
            scenario,
            state: ScenarioState::Pending,
        }
    }

    fn advance(&mut self, next: ScenarioState) {
        debug_assert!(
            self.state.can_transition_to(&next),
            "invalid transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("{}: {:?} -> {:?}", self.scenario, self.state, next);
        self.state = next;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    /// Passed after at least one failed attempt
    Retried,
    Failed,
    Skipped,
}

/// Why an attempt failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: ErrorKind,
    pub message: String,
    /// Failing selector or pattern
    pub target: Option<String>,
    /// Step that was running
    pub step: Option<String>,
}

impl FailureReport {
    fn from_error(err: &E2eError, step: Option<&Action>) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            target: err.target().map(String::from),
            step: step.map(Action::describe),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub username: Option<String>,
    pub duration_ms: u64,
    pub error: Option<FailureReport>,
    pub artifacts: Vec<ArtifactRef>,
}

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub name: String,
    pub suite: String,
    pub outcome: Outcome,
    pub attempts: u32,
    pub duration_ms: u64,
    /// Error of the last failed attempt
    pub error: Option<FailureReport>,
    pub artifacts: Vec<ArtifactRef>,
    pub attempt_log: Vec<AttemptRecord>,
}

impl RunResult {
    fn skipped(scenario: &Scenario) -> Self {
        Self {
            name: scenario.name.clone(),
            suite: scenario.suite.clone(),
            outcome: Outcome::Skipped,
            attempts: 0,
            duration_ms: 0,
            error: None,
            artifacts: Vec::new(),
            attempt_log: Vec::new(),
        }
    }
}

/// Result of running all scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub retried: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<RunResult>,
}

impl TestSuiteResult {
    fn from_results(results: Vec<RunResult>, duration_ms: u64) -> Self {
        let count = |o: Outcome| results.iter().filter(|r| r.outcome == o).count();
        Self {
            total: results.len(),
            passed: count(Outcome::Passed),
            retried: count(Outcome::Retried),
            failed: count(Outcome::Failed),
            skipped: count(Outcome::Skipped),
            duration_ms,
            results,
        }
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }

    /// Process exit code for the run
    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            1
        }
    }
}

/// Configuration for the test runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub base_url: String,
    pub workers: usize,
    pub retries: u32,
    pub timeouts: Timeouts,
    pub artifacts: ArtifactPolicy,
    pub output_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            workers: 1,
            retries: 0,
            timeouts: Timeouts::default(),
            artifacts: ArtifactPolicy::default(),
            output_dir: PathBuf::from("test-results"),
        }
    }
}

/// Main scenario runner
pub struct TestRunner {
    config: RunnerConfig,
    launcher: Arc<dyn BrowserLauncher>,
    identities: Arc<IdentitySource>,
    flows: PreconditionFlows,
}

struct Planned<'a> {
    index: usize,
    scenario: &'a Scenario,
    actions: Vec<Action>,
}

impl TestRunner {
    pub fn new(
        config: RunnerConfig,
        launcher: Arc<dyn BrowserLauncher>,
        identities: Arc<IdentitySource>,
        flows: PreconditionFlows,
    ) -> Self {
        Self {
            config,
            launcher,
            identities,
            flows,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// `<output>/artifacts`, emptied at the start of every run
    pub fn artifacts_root(&self) -> PathBuf {
        self.config.output_dir.join("artifacts")
    }

    /// Run scenarios with at most `workers` in flight.
    ///
    /// Invalid scenarios and fatal harness errors abort the run; scenario
    /// failures are recorded in the returned results.
    pub async fn run_scenarios(&self, scenarios: &[Scenario]) -> E2eResult<TestSuiteResult> {
        let start = Instant::now();

        // Artifacts belong to one run; never mix them with a previous one.
        let artifacts_root = self.artifacts_root();
        if artifacts_root.exists() {
            debug!("Clearing {}", artifacts_root.display());
            std::fs::remove_dir_all(&artifacts_root)?;
        }

        let mut planned = Vec::new();
        let mut results: Vec<(usize, RunResult)> = Vec::new();
        for (index, scenario) in scenarios.iter().enumerate() {
            if scenario.skip {
                results.push((index, RunResult::skipped(scenario)));
                continue;
            }
            planned.push(Planned {
                index,
                scenario,
                actions: scenario.plan(&self.flows)?,
            });
        }

        let workers = self.config.workers.max(1);
        info!(
            "Running {} scenario(s) with {} worker(s), {} retr{}",
            planned.len(),
            workers,
            self.config.retries,
            if self.config.retries == 1 { "y" } else { "ies" }
        );

        let mut runs = stream::iter(planned)
            .map(|p| async move {
                let result = self.run_scenario(p.scenario, &p.actions).await;
                (p.index, result)
            })
            .buffer_unordered(workers);

        while let Some((index, result)) = runs.next().await {
            let result = result?;
            match result.outcome {
                Outcome::Passed => info!("✓ {} ({} ms)", result.name, result.duration_ms),
                Outcome::Retried => warn!(
                    "✓ {} passed on attempt {} ({} ms)",
                    result.name, result.attempts, result.duration_ms
                ),
                Outcome::Failed => error!(
                    "✗ {} - {}",
                    result.name,
                    result
                        .error
                        .as_ref()
                        .map(|e| e.message.as_str())
                        .unwrap_or("unknown error")
                ),
                Outcome::Skipped => {}
            }
            results.push((index, result));
        }

        results.sort_by_key(|(index, _)| *index);
        let results = results.into_iter().map(|(_, r)| r).collect();
        let suite = TestSuiteResult::from_results(results, start.elapsed().as_millis() as u64);

        info!(
            "Results: {} passed, {} retried, {} failed, {} skipped ({} ms)",
            suite.passed, suite.retried, suite.failed, suite.skipped, suite.duration_ms
        );
        Ok(suite)
    }

    /// Run one scenario through its retry budget.
    pub async fn run_scenario(
        &self,
        scenario: &Scenario,
        actions: &[Action],
    ) -> E2eResult<RunResult> {
        let start = Instant::now();
        let max_attempts = self.config.retries + 1;
        let mut machine = StateMachine::new(&scenario.name);
        let mut attempt_log = Vec::new();
        let mut attempt = 1;

        machine.advance(ScenarioState::Running { attempt });
        loop {
            let span = tracing::info_span!("scenario", name = %scenario.name, attempt);
            let record = self
                .run_attempt(scenario, actions, attempt)
                .instrument(span)
                .await?;
            let failed = record.error.is_some();
            attempt_log.push(record);

            if !failed {
                machine.advance(ScenarioState::Passed);
                break;
            }
            machine.advance(ScenarioState::FailedAttempt { attempt });
            if attempt >= max_attempts {
                machine.advance(ScenarioState::Failed);
                break;
            }
            machine.advance(ScenarioState::Retrying {
                next_attempt: attempt + 1,
            });
            attempt += 1;
            info!("Retrying {} (attempt {}/{})", scenario.name, attempt, max_attempts);
            machine.advance(ScenarioState::Running { attempt });
        }

        let outcome = match machine.state {
            ScenarioState::Passed if attempt == 1 => Outcome::Passed,
            ScenarioState::Passed => Outcome::Retried,
            _ => Outcome::Failed,
        };

        Ok(RunResult {
            name: scenario.name.clone(),
            suite: scenario.suite.clone(),
            outcome,
            attempts: attempt,
            duration_ms: start.elapsed().as_millis() as u64,
            error: attempt_log.iter().rev().find_map(|a| a.error.clone()),
            artifacts: attempt_log
                .iter()
                .flat_map(|a| a.artifacts.iter().cloned())
                .collect(),
            attempt_log,
        })
    }

    /// One attempt in a fresh context. Only fatal errors escape as `Err`.
    async fn run_attempt(
        &self,
        scenario: &Scenario,
        actions: &[Action],
        attempt: u32,
    ) -> E2eResult<AttemptRecord> {
        let start = Instant::now();
        let failed_record = |err: &E2eError, step: Option<&Action>, username: Option<String>| {
            AttemptRecord {
                attempt,
                username,
                duration_ms: start.elapsed().as_millis() as u64,
                error: Some(FailureReport::from_error(err, step)),
                artifacts: Vec::new(),
            }
        };

        let identity = match &scenario.identity {
            Some(fixture) => match self.identities.make_identity(fixture) {
                Ok(identity) => Some(identity),
                Err(e) => return Ok(failed_record(&e, None, None)),
            },
            None => None,
        };
        let username = identity.as_ref().map(|i| i.username.clone());
        let bindings = identity
            .as_ref()
            .map(Bindings::for_identity)
            .unwrap_or_default();

        let artifacts_root = self.artifacts_root();
        let mut ctx = match ExecutionContext::open(
            self.launcher.as_ref(),
            &scenario.name,
            attempt,
            identity,
            self.config.artifacts,
            &artifacts_root,
            &self.config.timeouts,
        )
        .await
        {
            Ok(ctx) => ctx,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(failed_record(&e, None, username)),
        };

        if let Some(name) = &username {
            debug!("Using identity {}", name);
        }

        let mut failure = None;
        {
            let mut primitives =
                Primitives::new(ctx.page(), &self.config.base_url, self.config.timeouts);
            for action in actions {
                let resolved = action.resolve(&bindings);
                if let Err(e) = primitives.run(&resolved).await {
                    warn!("Step {} failed: {}", resolved.describe(), e);
                    failure = Some(FailureReport::from_error(&e, Some(&resolved)));
                    break;
                }
            }
        }

        let artifacts = match ctx.finish(failure.is_some()).await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                warn!("Closing context for {} failed: {}", scenario.name, e);
                Vec::new()
            }
        };

        Ok(AttemptRecord {
            attempt,
            username,
            duration_ms: start.elapsed().as_millis() as u64,
            error: failure,
            artifacts,
        })
    }

    /// Write results to `<output>/test-results.json`
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ScenarioState::*;

    #[test]
    fn state_machine_allows_retry_cycle() {
        let path = [
            Pending,
            Running { attempt: 1 },
            FailedAttempt { attempt: 1 },
            Retrying { next_attempt: 2 },
            Running { attempt: 2 },
            Passed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
        assert!(Passed.is_terminal());
    }

    #[test]
    fn state_machine_rejects_shortcuts() {
        assert!(!Pending.can_transition_to(&Passed));
        assert!(!Running { attempt: 1 }.can_transition_to(&Failed));
        assert!(!FailedAttempt { attempt: 1 }.can_transition_to(&Retrying { next_attempt: 3 }));
        assert!(!Failed.can_transition_to(&Running { attempt: 2 }));
    }

    #[test]
    fn exit_code_reflects_failures() {
        let result = |outcome| RunResult {
            name: "x".to_string(),
            suite: "s".to_string(),
            outcome,
            attempts: 1,
            duration_ms: 0,
            error: None,
            artifacts: Vec::new(),
            attempt_log: Vec::new(),
        };
        let ok = TestSuiteResult::from_results(
            vec![result(Outcome::Passed), result(Outcome::Retried), result(Outcome::Skipped)],
            5,
        );
        assert_eq!(ok.exit_code(), 0);
        assert_eq!(ok.retried, 1);

        let bad = TestSuiteResult::from_results(vec![result(Outcome::Failed)], 5);
        assert_eq!(bad.exit_code(), 1);
    }
}
