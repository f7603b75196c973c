//! Harness configuration
//!
//! Values come from three layers, later ones winning: run-mode defaults, the
//! TOML file, then command-line overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::context::ArtifactPolicy;
use crate::error::{E2eError, E2eResult};
use crate::playwright::Browser;
use crate::primitives::Timeouts;
use crate::server::WebServerConfig;

/// Local runs assume the environment is up; CI runs start it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Local,
    Ci,
}

impl RunMode {
    /// CI mode whenever the `CI` variable is set to anything non-empty.
    pub fn detect() -> Self {
        match std::env::var_os("CI") {
            Some(v) if !v.is_empty() => RunMode::Ci,
            _ => RunMode::Local,
        }
    }

    pub fn default_retries(&self) -> u32 {
        match self {
            RunMode::Local => 0,
            RunMode::Ci => 2,
        }
    }

    pub fn default_workers(&self) -> usize {
        match self {
            RunMode::Local => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            RunMode::Ci => 1,
        }
    }

    pub fn default_reporter(&self) -> ReporterKind {
        match self {
            RunMode::Local => ReporterKind::List,
            RunMode::Ci => ReporterKind::Github,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReporterKind {
    List,
    Github,
    Json,
}

/// Card numbers used by checkout scenarios and the decline rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardsConfig {
    pub accepted: String,
    pub declined: String,

    /// Card used for the purchase that seeds order history
    pub history: String,

    /// Cards starting with this prefix are declined by the payment backend
    pub decline_prefix: String,

    /// How long a declined checkout must stay on the checkout page
    pub decline_hold_ms: u64,
}

impl Default for CardsConfig {
    fn default() -> Self {
        Self {
            accepted: "1234567890123456".to_string(),
            declined: "0000123456789012".to_string(),
            history: "1111222233334444".to_string(),
            decline_prefix: "0000".to_string(),
            decline_hold_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub email_domain: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            email_domain: "example.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,

    /// Directory with `node_modules/playwright`
    pub project_dir: PathBuf,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            project_dir: PathBuf::from("."),
        }
    }
}

/// Harness configuration file (`storefront-e2e.toml`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Front end under test
    pub base_url: String,

    pub action_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
    pub poll_interval_ms: u64,

    /// Unset means the run-mode default
    pub workers: Option<usize>,
    pub retries: Option<u32>,
    pub reporter: Option<ReporterKind>,

    pub output_dir: PathBuf,

    /// Extra YAML scenarios loaded alongside the built-in catalog
    pub scenarios_dir: Option<PathBuf>,

    pub browser: BrowserConfig,
    pub artifacts: ArtifactPolicy,
    pub cards: CardsConfig,
    pub identity: IdentityConfig,

    /// Servers started in CI mode, in order
    pub web_servers: Vec<WebServerConfig>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            action_timeout_ms: 5000,
            navigation_timeout_ms: 30_000,
            poll_interval_ms: 50,
            workers: None,
            retries: None,
            reporter: None,
            output_dir: PathBuf::from("test-results"),
            scenarios_dir: None,
            browser: BrowserConfig::default(),
            artifacts: ArtifactPolicy::default(),
            cards: CardsConfig::default(),
            identity: IdentityConfig::default(),
            web_servers: default_web_servers(),
        }
    }
}

fn default_web_servers() -> Vec<WebServerConfig> {
    vec![
        WebServerConfig {
            name: "backend".to_string(),
            command: "cd ../backend && uv sync && cd core && uv run python manage.py migrate && uv run python manage.py runserver".to_string(),
            cwd: None,
            url: "http://localhost:8000/api/products/".to_string(),
            timeout_ms: 120_000,
            reuse_existing_server: false,
        },
        WebServerConfig {
            name: "frontend".to_string(),
            command: "npm run build && npm run preview -- --port 8080".to_string(),
            cwd: None,
            url: "http://localhost:8080".to_string(),
            timeout_ms: 120_000,
            reuse_existing_server: false,
        },
    ]
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub workers: Option<usize>,
    pub retries: Option<u32>,
    pub reporter: Option<ReporterKind>,
    pub output_dir: Option<PathBuf>,
    pub scenarios_dir: Option<PathBuf>,
    pub browser: Option<Browser>,
    pub headed: bool,
}

impl HarnessConfig {
    /// Load configuration from file; a missing file yields defaults.
    ///
    /// Relative paths in the file are taken relative to the file itself.
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let mut config: Self = toml::from_str(&content)?;
            if let Some(base) = path.parent() {
                config.resolve_paths(base);
            }
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.output_dir);
        resolve(&mut self.browser.project_dir);
        if let Some(dir) = self.scenarios_dir.as_mut() {
            resolve(dir);
        }
        for server in &mut self.web_servers {
            if let Some(cwd) = server.cwd.as_mut() {
                resolve(cwd);
            }
        }
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(v) = overrides.base_url {
            self.base_url = v;
        }
        if let Some(v) = overrides.workers {
            self.workers = Some(v);
        }
        if let Some(v) = overrides.retries {
            self.retries = Some(v);
        }
        if let Some(v) = overrides.reporter {
            self.reporter = Some(v);
        }
        if let Some(v) = overrides.output_dir {
            self.output_dir = v;
        }
        if let Some(v) = overrides.scenarios_dir {
            self.scenarios_dir = Some(v);
        }
        if let Some(v) = overrides.browser {
            self.browser.browser = v;
        }
        if overrides.headed {
            self.browser.headless = false;
        }
    }

    pub fn workers(&self, mode: RunMode) -> usize {
        self.workers.unwrap_or_else(|| mode.default_workers())
    }

    pub fn retries(&self, mode: RunMode) -> u32 {
        self.retries.unwrap_or_else(|| mode.default_retries())
    }

    pub fn reporter(&self, mode: RunMode) -> ReporterKind {
        self.reporter.unwrap_or_else(|| mode.default_reporter())
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            action: Duration::from_millis(self.action_timeout_ms),
            navigation: Duration::from_millis(self.navigation_timeout_ms),
            poll: Duration::from_millis(self.poll_interval_ms.max(1)),
        }
    }

    pub fn validate(&self) -> E2eResult<()> {
        if self.workers == Some(0) {
            return Err(E2eError::Config("workers must be at least 1".to_string()));
        }
        reqwest::Url::parse(&self.base_url)
            .map_err(|e| E2eError::Config(format!("base_url {}: {}", self.base_url, e)))?;

        let cards = &self.cards;
        if cards.decline_prefix.is_empty() {
            return Err(E2eError::Config("cards.decline_prefix is empty".to_string()));
        }
        if !cards.declined.starts_with(&cards.decline_prefix) {
            return Err(E2eError::Config(format!(
                "declined card {} does not start with decline prefix {}",
                cards.declined, cards.decline_prefix
            )));
        }
        for card in [&cards.accepted, &cards.history] {
            if card.starts_with(&cards.decline_prefix) {
                return Err(E2eError::Config(format!(
                    "card {} would be declined (prefix {})",
                    card, cards.decline_prefix
                )));
            }
        }
        Ok(())
    }
}
