//! Action primitives
//!
//! Each primitive suspends until the browser operation completes or its
//! timeout elapses. Location is strict: zero matches is
//! [`E2eError::ElementNotFound`], more than one is
//! [`E2eError::AmbiguousSelector`].

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

use crate::action::Action;
use crate::error::{E2eError, E2eResult};
use crate::page::PageDriver;
use crate::target::{Target, UrlPattern};

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Element location, URL waits and visibility assertions
    pub action: Duration,

    pub navigation: Duration,

    /// Delay between polls while waiting
    pub poll: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            action: Duration::from_millis(5000),
            navigation: Duration::from_millis(30_000),
            poll: Duration::from_millis(50),
        }
    }
}

/// Primitives bound to one page.
pub struct Primitives<'a> {
    page: &'a mut dyn PageDriver,
    base_url: &'a str,
    timeouts: Timeouts,
}

impl<'a> Primitives<'a> {
    pub fn new(page: &'a mut dyn PageDriver, base_url: &'a str, timeouts: Timeouts) -> Self {
        Self {
            page,
            base_url,
            timeouts,
        }
    }

    /// Run one already-resolved action.
    pub async fn run(&mut self, action: &Action) -> E2eResult<()> {
        debug!("Executing step: {}", action.describe());
        match action {
            Action::Navigate { path } => self.navigate(path).await,
            Action::Fill { target, value } => self.fill(target, value).await,
            Action::Click { target } => self.click(target).await,
            Action::WaitForUrlPattern { pattern } => self.wait_for_url_pattern(pattern).await,
            Action::AssertVisible { target } => self.assert_visible(target).await,
            Action::HoldUrlPattern { pattern, hold_ms } => {
                self.hold_url_pattern(pattern, Duration::from_millis(*hold_ms))
                    .await
            }
        }
    }

    pub async fn navigate(&mut self, path: &str) -> E2eResult<()> {
        let url = join_url(self.base_url, path);
        let limit = self.timeouts.navigation;
        let timed_out = || E2eError::NavigationTimeout {
            url: url.clone(),
            timeout_ms: limit.as_millis() as u64,
        };

        // The driver enforces the same limit; the outer bound only catches a hung driver.
        match timeout(limit + self.timeouts.poll, self.page.goto(&url, limit)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(E2eError::NavigationTimeout { .. })) | Err(_) => Err(timed_out()),
            Ok(Err(e)) => Err(e),
        }
    }

    pub async fn fill(&mut self, target: &Target, value: &str) -> E2eResult<()> {
        let selector = self.locate(target).await?;
        bounded(self.timeouts, &selector, "fill", self.page.fill(&selector, value)).await
    }

    pub async fn click(&mut self, target: &Target) -> E2eResult<()> {
        let selector = self.locate(target).await?;
        bounded(self.timeouts, &selector, "click", self.page.click(&selector)).await
    }

    pub async fn wait_for_url_pattern(&mut self, pattern: &UrlPattern) -> E2eResult<()> {
        let matcher = pattern.compile()?;
        let shown = pattern.to_string();
        let deadline = Instant::now() + self.timeouts.action;
        loop {
            let url = bounded(self.timeouts, &shown, "url read", self.page.current_url()).await?;
            if matcher.matches(&url) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(E2eError::UrlTimeout {
                    pattern: pattern.to_string(),
                    last_url: url,
                });
            }
            sleep(self.timeouts.poll).await;
        }
    }

    pub async fn assert_visible(&mut self, target: &Target) -> E2eResult<()> {
        let selector = target.selector();
        let deadline = Instant::now() + self.timeouts.action;
        let last_count = loop {
            let count = bounded(self.timeouts, &selector, "count", self.page.count(&selector)).await?;
            if count > 1 {
                return Err(E2eError::AmbiguousSelector { selector, count });
            }
            if count == 1
                && bounded(self.timeouts, &selector, "visibility check", self.page.is_visible(&selector))
                    .await?
            {
                return Ok(());
            }
            if Instant::now() >= deadline {
                break count;
            }
            sleep(self.timeouts.poll).await;
        };

        let reason = if last_count == 0 {
            format!(
                "no matching element within {} ms",
                self.timeouts.action.as_millis()
            )
        } else {
            format!("element not visible within {} ms", self.timeouts.action.as_millis())
        };
        Err(E2eError::AssertionFailed {
            target: selector,
            reason,
        })
    }

    /// Fails as soon as the URL stops matching during `hold`.
    pub async fn hold_url_pattern(&mut self, pattern: &UrlPattern, hold: Duration) -> E2eResult<()> {
        let matcher = pattern.compile()?;
        let shown = pattern.to_string();
        let deadline = Instant::now() + hold;
        loop {
            let url = bounded(self.timeouts, &shown, "url read", self.page.current_url()).await?;
            if !matcher.matches(&url) {
                return Err(E2eError::AssertionFailed {
                    target: pattern.to_string(),
                    reason: format!("page navigated to {}", url),
                });
            }
            if Instant::now() >= deadline {
                return Ok(());
            }
            sleep(self.timeouts.poll).await;
        }
    }

    /// Wait until exactly one element matches and return its selector.
    async fn locate(&mut self, target: &Target) -> E2eResult<String> {
        let selector = target.selector();
        let deadline = Instant::now() + self.timeouts.action;
        loop {
            let count = bounded(self.timeouts, &selector, "count", self.page.count(&selector)).await?;
            match count {
                1 => return Ok(selector),
                0 if Instant::now() >= deadline => {
                    return Err(E2eError::ElementNotFound { selector })
                }
                0 => sleep(self.timeouts.poll).await,
                count => return Err(E2eError::AmbiguousSelector { selector, count }),
            }
        }
    }
}

/// Run one driver call under the action timeout.
///
/// A call that stalls, or that the driver reports as timed out, fails as an
/// assertion on `target` so it stays inside the error taxonomy.
async fn bounded<T>(
    timeouts: Timeouts,
    target: &str,
    op: &str,
    call: impl Future<Output = E2eResult<T>>,
) -> E2eResult<T> {
    let limit = timeouts.action;
    let stalled = || E2eError::AssertionFailed {
        target: target.to_string(),
        reason: format!("{} did not complete within {} ms", op, limit.as_millis()),
    };
    match timeout(limit + timeouts.poll, call).await {
        Ok(Err(E2eError::Driver(message))) if message.starts_with("timeout:") => Err(stalled()),
        Ok(result) => result,
        Err(_) => Err(stalled()),
    }
}

/// Join a path onto the base URL; absolute URLs pass through.
pub fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
