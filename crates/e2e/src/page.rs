//! The page-automation handle contract
//!
//! Everything above this module talks to a browser through [`PageDriver`];
//! [`crate::playwright`] provides the production implementation.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::E2eResult;

/// One isolated browser session (own cookies and storage).
#[async_trait]
pub trait PageDriver: Send {
    /// Load an absolute URL and wait for the load event.
    async fn goto(&mut self, url: &str, timeout: Duration) -> E2eResult<()>;

    /// Number of elements currently matching `selector`.
    async fn count(&mut self, selector: &str) -> E2eResult<usize>;

    /// Whether the single element matching `selector` is visible.
    async fn is_visible(&mut self, selector: &str) -> E2eResult<bool>;

    async fn fill(&mut self, selector: &str, value: &str) -> E2eResult<()>;

    async fn click(&mut self, selector: &str) -> E2eResult<()>;

    async fn current_url(&mut self) -> E2eResult<String>;

    async fn screenshot(&mut self, path: &Path) -> E2eResult<()>;

    /// Tear the session down, persisting recordings to the given paths.
    async fn close(&mut self, keep: &KeepRecordings) -> E2eResult<()>;
}

/// What a new session should record.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub record_video: bool,
    pub record_trace: bool,

    /// Working directory for recordings until they are kept or dropped
    pub scratch_dir: PathBuf,

    /// Timeout the driver applies to element interactions
    pub action_timeout: Duration,
}

/// Destinations for recordings worth keeping; `None` discards.
#[derive(Debug, Clone, Default)]
pub struct KeepRecordings {
    pub video: Option<PathBuf>,
    pub trace: Option<PathBuf>,
}

/// Creates isolated sessions.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &SessionOptions) -> E2eResult<Box<dyn PageDriver>>;
}
