//! Error types for E2E runs

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Navigation to {url} did not complete within {timeout_ms} ms")]
    NavigationTimeout { url: String, timeout_ms: u64 },

    #[error("No element matches {selector}")]
    ElementNotFound { selector: String },

    #[error("Selector {selector} matched {count} elements, expected exactly one")]
    AmbiguousSelector { selector: String, count: usize },

    #[error("URL never matched {pattern} (last URL: {last_url})")]
    UrlTimeout { pattern: String, last_url: String },

    #[error("Assertion failed on {target}: {reason}")]
    AssertionFailed { target: String, reason: String },

    #[error("Environment not ready: {url} did not respond after {attempts} attempts")]
    EnvironmentStartupTimeout { url: String, attempts: usize },

    #[error("Invalid identity part {suffix:?}: use ASCII letters, digits, '.' and '-'; a suffix may not contain '_' or be all digits")]
    InvalidIdentity { suffix: String },

    #[error("Server failed to start: {0}")]
    ServerStartup(String),

    #[error("{0} is already in use; set reuse_existing_server to attach to it")]
    ServerAlreadyRunning(String),

    #[error("Playwright not found. Install with: npm i playwright && npx playwright install")]
    PlaywrightNotFound,

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("Scenario parse error: {0}")]
    ScenarioParse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Scenario {scenario} is marked `{marker}`, which is not allowed in CI")]
    ForbiddenMarker { scenario: String, marker: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

/// Flat classification of [`E2eError`] used in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NavigationTimeout,
    ElementNotFound,
    AmbiguousSelector,
    UrlTimeout,
    AssertionFailed,
    EnvironmentStartupTimeout,
    InvalidIdentity,
    Environment,
    Driver,
    Config,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::NavigationTimeout => "NavigationTimeout",
            ErrorKind::ElementNotFound => "ElementNotFound",
            ErrorKind::AmbiguousSelector => "AmbiguousSelector",
            ErrorKind::UrlTimeout => "UrlTimeout",
            ErrorKind::AssertionFailed => "AssertionFailed",
            ErrorKind::EnvironmentStartupTimeout => "EnvironmentStartupTimeout",
            ErrorKind::InvalidIdentity => "InvalidIdentity",
            ErrorKind::Environment => "Environment",
            ErrorKind::Driver => "Driver",
            ErrorKind::Config => "Config",
            ErrorKind::Io => "Io",
        };
        f.write_str(s)
    }
}

impl E2eError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            E2eError::NavigationTimeout { .. } => ErrorKind::NavigationTimeout,
            E2eError::ElementNotFound { .. } => ErrorKind::ElementNotFound,
            E2eError::AmbiguousSelector { .. } => ErrorKind::AmbiguousSelector,
            E2eError::UrlTimeout { .. } => ErrorKind::UrlTimeout,
            E2eError::AssertionFailed { .. } => ErrorKind::AssertionFailed,
            E2eError::EnvironmentStartupTimeout { .. } => ErrorKind::EnvironmentStartupTimeout,
            E2eError::InvalidIdentity { .. } => ErrorKind::InvalidIdentity,
            E2eError::ServerStartup(_) | E2eError::ServerAlreadyRunning(_) => {
                ErrorKind::Environment
            }
            E2eError::PlaywrightNotFound | E2eError::Driver(_) | E2eError::Http(_) => {
                ErrorKind::Driver
            }
            E2eError::ScenarioParse(_)
            | E2eError::Config(_)
            | E2eError::ForbiddenMarker { .. }
            | E2eError::Yaml(_)
            | E2eError::Toml(_) => ErrorKind::Config,
            E2eError::Io(_) | E2eError::Json(_) => ErrorKind::Io,
        }
    }

    /// The selector or pattern a primitive failed on, if any.
    pub fn target(&self) -> Option<&str> {
        match self {
            E2eError::NavigationTimeout { url, .. } => Some(url),
            E2eError::ElementNotFound { selector } => Some(selector),
            E2eError::AmbiguousSelector { selector, .. } => Some(selector),
            E2eError::UrlTimeout { pattern, .. } => Some(pattern),
            E2eError::AssertionFailed { target, .. } => Some(target),
            E2eError::EnvironmentStartupTimeout { url, .. } => Some(url),
            _ => None,
        }
    }

    /// Errors that abort the whole run rather than a single scenario attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            E2eError::EnvironmentStartupTimeout { .. }
                | E2eError::ServerStartup(_)
                | E2eError::ServerAlreadyRunning(_)
                | E2eError::PlaywrightNotFound
                | E2eError::Config(_)
                | E2eError::ForbiddenMarker { .. }
        )
    }
}
