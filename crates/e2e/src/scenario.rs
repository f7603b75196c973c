//! Declarative scenarios
//!
//! A scenario is data: preconditions, the identity it needs, ordered steps
//! and the terminal assertions that define success. Scenarios come from the
//! built-in catalog or from YAML files.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::action::Action;
use crate::error::{E2eError, E2eResult};
use crate::identity::IdentityFixture;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this scenario
    pub name: String,

    /// Suite the scenario is grouped under
    pub suite: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub preconditions: Vec<Precondition>,

    /// Identity registered for each attempt
    #[serde(default)]
    pub identity: Option<IdentityFixture>,

    /// Steps to execute in order
    #[serde(default)]
    pub steps: Vec<Action>,

    /// Terminal assertions; all must hold for the scenario to pass
    pub expect: Vec<Action>,

    /// Focus marker: when any scenario has it, only focused ones run
    #[serde(default)]
    pub only: bool,

    #[serde(default)]
    pub skip: bool,
}

/// State a scenario needs before its own steps run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precondition {
    /// No prior session; every context already starts empty
    FreshSession,

    /// The scenario identity is registered and logged in
    RegisteredIdentity,

    /// The identity has completed one purchase
    CompletedPurchase,
}

/// Step sequences that establish preconditions.
#[derive(Debug, Clone, Default)]
pub struct PreconditionFlows {
    pub register: Vec<Action>,
    pub purchase: Vec<Action>,
}

impl Scenario {
    pub fn new(name: &str, suite: &str) -> Self {
        Self {
            name: name.to_string(),
            suite: suite.to_string(),
            description: String::new(),
            tags: Vec::new(),
            preconditions: Vec::new(),
            identity: None,
            steps: Vec::new(),
            expect: Vec::new(),
            only: false,
            skip: false,
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn requires(mut self, precondition: Precondition) -> Self {
        self.preconditions.push(precondition);
        self
    }

    pub fn identity(mut self, fixture: IdentityFixture) -> Self {
        self.identity = Some(fixture);
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = Action>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn expect(mut self, assertions: impl IntoIterator<Item = Action>) -> Self {
        self.expect.extend(assertions);
        self
    }

    /// Parse a scenario from a YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let scenario: Self = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::ScenarioParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all scenarios from a directory, sorted by path
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut paths: Vec<_> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        paths.iter().map(|p| Self::from_file(p)).collect()
    }

    fn needs_identity(&self) -> bool {
        self.preconditions.iter().any(|p| {
            matches!(
                p,
                Precondition::RegisteredIdentity | Precondition::CompletedPurchase
            )
        })
    }

    pub fn validate(&self) -> E2eResult<()> {
        if self.name.trim().is_empty() {
            return Err(E2eError::ScenarioParse("scenario name is empty".to_string()));
        }
        if self.expect.is_empty() {
            return Err(E2eError::ScenarioParse(format!(
                "{}: at least one terminal assertion is required",
                self.name
            )));
        }
        if let Some(step) = self.expect.iter().find(|a| !a.is_assertion()) {
            return Err(E2eError::ScenarioParse(format!(
                "{}: terminal step {} is not an assertion",
                self.name,
                step.describe()
            )));
        }
        if self.needs_identity() && self.identity.is_none() {
            return Err(E2eError::ScenarioParse(format!(
                "{}: preconditions require an identity fixture",
                self.name
            )));
        }
        Ok(())
    }

    /// Full ordered action list: precondition flows, steps, then assertions.
    pub fn plan(&self, flows: &PreconditionFlows) -> E2eResult<Vec<Action>> {
        self.validate()?;

        let registered = self.needs_identity();
        let purchased = self.preconditions.contains(&Precondition::CompletedPurchase);

        let mut plan = Vec::new();
        if registered {
            plan.extend(flows.register.iter().cloned());
        }
        if purchased {
            plan.extend(flows.purchase.iter().cloned());
        }
        plan.extend(self.steps.iter().cloned());
        plan.extend(self.expect.iter().cloned());
        Ok(plan)
    }
}

/// Which scenarios to run.
#[derive(Debug, Clone, Default)]
pub struct ScenarioFilter {
    pub suite: Option<String>,
    pub tag: Option<String>,
    /// Substring of the scenario name
    pub grep: Option<String>,
}

impl ScenarioFilter {
    pub fn matches(&self, scenario: &Scenario) -> bool {
        self.suite.as_ref().map_or(true, |s| &scenario.suite == s)
            && self.tag.as_ref().map_or(true, |t| scenario.tags.contains(t))
            && self
                .grep
                .as_ref()
                .map_or(true, |g| scenario.name.contains(g.as_str()))
    }

    pub fn apply(&self, scenarios: Vec<Scenario>) -> Vec<Scenario> {
        scenarios.into_iter().filter(|s| self.matches(s)).collect()
    }
}

/// Enforce focus and skip markers.
///
/// With `forbid_markers` any marker is an error. Otherwise, if any scenario
/// is focused, unfocused ones are marked skipped.
pub fn apply_markers(scenarios: &mut [Scenario], forbid_markers: bool) -> E2eResult<()> {
    if forbid_markers {
        if let Some(s) = scenarios.iter().find(|s| s.only || s.skip) {
            return Err(E2eError::ForbiddenMarker {
                scenario: s.name.clone(),
                marker: if s.only { "only" } else { "skip" }.to_string(),
            });
        }
        return Ok(());
    }

    if scenarios.iter().any(|s| s.only) {
        for s in scenarios.iter_mut().filter(|s| !s.only) {
            s.skip = true;
        }
    }
    Ok(())
}

/// Reject duplicate scenario names.
pub fn check_unique_names(scenarios: &[Scenario]) -> E2eResult<()> {
    let mut seen = std::collections::HashSet::new();
    for s in scenarios {
        if !seen.insert(s.name.as_str()) {
            return Err(E2eError::ScenarioParse(format!("duplicate scenario name: {}", s.name)));
        }
    }
    Ok(())
}
