//! Execution contexts and failure artifacts
//!
//! An [`ExecutionContext`] is one browser session owned by exactly one
//! scenario attempt. Recordings go to a scratch directory while the attempt
//! runs and are only moved into the run's artifact tree when the capture
//! policy says to keep them.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::E2eResult;
use crate::identity::TestIdentity;
use crate::page::{BrowserLauncher, KeepRecordings, PageDriver, SessionOptions};
use crate::primitives::Timeouts;

/// When an artifact kind is recorded and kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureMode {
    Off,
    On,
    /// Record every attempt, keep only failing ones
    #[default]
    OnFailure,
    /// Record and keep only the first retry
    OnFirstRetry,
}

impl CaptureMode {
    /// Attempts are 1-based; attempt 2 is the first retry.
    pub fn records(&self, attempt: u32) -> bool {
        match self {
            CaptureMode::Off => false,
            CaptureMode::On | CaptureMode::OnFailure => true,
            CaptureMode::OnFirstRetry => attempt == 2,
        }
    }

    pub fn keeps(&self, attempt: u32, failed: bool) -> bool {
        match self {
            CaptureMode::Off => false,
            CaptureMode::On => true,
            CaptureMode::OnFailure => failed,
            CaptureMode::OnFirstRetry => attempt == 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPolicy {
    #[serde(default)]
    pub screenshot: CaptureMode,
    #[serde(default)]
    pub video: CaptureMode,
    #[serde(default)]
    pub trace: CaptureMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Screenshot,
    Video,
    Trace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub attempt: u32,
}

/// Directory for one scenario attempt: `<root>/<slug>-<hash>/attempt-<n>`.
pub fn attempt_dir(root: &Path, scenario: &str, attempt: u32) -> PathBuf {
    root.join(scenario_key(scenario))
        .join(format!("attempt-{}", attempt))
}

/// Filesystem-safe key for a scenario name.
pub fn scenario_key(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    let digest = Sha256::digest(name.as_bytes());
    format!("{}-{}", slug, &hex::encode(digest)[..8])
}

/// One isolated session plus the sink its artifacts drain into.
pub struct ExecutionContext {
    pub scenario: String,
    pub attempt: u32,
    pub identity: Option<TestIdentity>,
    page: Box<dyn PageDriver>,
    policy: ArtifactPolicy,
    artifact_dir: PathBuf,
    // Removed on drop together with anything not kept.
    _scratch: tempfile::TempDir,
}

impl ExecutionContext {
    pub async fn open(
        launcher: &dyn BrowserLauncher,
        scenario: &str,
        attempt: u32,
        identity: Option<TestIdentity>,
        policy: ArtifactPolicy,
        artifacts_root: &Path,
        timeouts: &Timeouts,
    ) -> E2eResult<Self> {
        let scratch = tempfile::tempdir()?;
        let options = SessionOptions {
            record_video: policy.video.records(attempt),
            record_trace: policy.trace.records(attempt),
            scratch_dir: scratch.path().to_path_buf(),
            action_timeout: timeouts.action,
        };
        let page = launcher.launch(&options).await?;

        Ok(Self {
            scenario: scenario.to_string(),
            attempt,
            identity,
            page,
            policy,
            artifact_dir: attempt_dir(artifacts_root, scenario, attempt),
            _scratch: scratch,
        })
    }

    pub fn page(&mut self) -> &mut dyn PageDriver {
        self.page.as_mut()
    }

    /// Close the session, keeping artifacts the policy asks for.
    pub async fn finish(mut self, failed: bool) -> E2eResult<Vec<ArtifactRef>> {
        let attempt = self.attempt;
        let keep_screenshot = self.policy.screenshot.keeps(attempt, failed);
        let keep_video = self.policy.video.records(attempt) && self.policy.video.keeps(attempt, failed);
        let keep_trace = self.policy.trace.records(attempt) && self.policy.trace.keeps(attempt, failed);

        if keep_screenshot || keep_video || keep_trace {
            std::fs::create_dir_all(&self.artifact_dir)?;
        }

        let mut kept = Vec::new();
        if keep_screenshot {
            let path = self.artifact_dir.join("screenshot.png");
            match self.page.screenshot(&path).await {
                Ok(()) => kept.push(ArtifactRef {
                    kind: ArtifactKind::Screenshot,
                    path,
                    attempt,
                }),
                Err(e) => warn!("Screenshot for {} failed: {}", self.scenario, e),
            }
        }

        let keep = KeepRecordings {
            video: keep_video.then(|| self.artifact_dir.join("video.webm")),
            trace: keep_trace.then(|| self.artifact_dir.join("trace.zip")),
        };
        self.page.close(&keep).await?;

        for (kind, path) in [
            (ArtifactKind::Video, keep.video),
            (ArtifactKind::Trace, keep.trace),
        ] {
            if let Some(path) = path {
                if path.exists() {
                    kept.push(ArtifactRef {
                        kind,
                        path,
                        attempt,
                    });
                }
            }
        }

        debug!(
            "Closed context for {} attempt {} ({} artifacts kept)",
            self.scenario,
            attempt,
            kept.len()
        );
        Ok(kept)
    }
}
