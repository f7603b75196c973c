//! Storefront E2E scenario runner
//!
//! This crate drives the storefront through a real browser:
//! - Starts the backend and front end in CI mode, polling their ready URLs
//! - Builds unique identities for every scenario attempt
//! - Runs declarative scenarios (built-in catalog or YAML) on a bounded worker pool
//! - Retries failed scenarios in fresh sessions and keeps failure artifacts
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 storefront-e2e run (binary)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Environment::bootstrap(web_servers)      (CI mode only)    │
//! │  TestRunner                                                 │
//! │    ├── run_scenarios(&[Scenario]) -> TestSuiteResult        │
//! │    ├── run_scenario -> RunResult (retries, state machine)   │
//! │    └── ExecutionContext per attempt (session + artifacts)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Scenario                                                   │
//! │    ├── preconditions, identity fixture                      │
//! │    ├── steps: [Action]                                      │
//! │    │     ├── navigate { path }                              │
//! │    │     ├── fill { target, value }                         │
//! │    │     ├── click { target }                               │
//! │    │     ├── wait_for_url_pattern { pattern }               │
//! │    │     ├── assert_visible { target }                      │
//! │    │     └── hold_url_pattern { pattern, hold_ms }          │
//! │    └── expect: [Action]   (terminal assertions)             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  PageDriver  <-  PlaywrightPage (node bridge, JSON lines)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod action;
pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod page;
pub mod playwright;
pub mod primitives;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod server;
pub mod target;

pub use action::{Action, Bindings};
pub use error::{E2eError, E2eResult, ErrorKind};
pub use identity::{IdentityFixture, IdentitySource, TestIdentity};
pub use page::{BrowserLauncher, PageDriver};
pub use runner::{Outcome, RunResult, RunnerConfig, TestRunner, TestSuiteResult};
pub use scenario::{Precondition, Scenario};
pub use target::{Target, UrlPattern};
