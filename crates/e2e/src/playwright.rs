//! Playwright browser automation
//!
//! Each session is a long-lived `node` process running a small bridge
//! script. The bridge owns one browser context and answers JSON-line requests
//! on stdin/stdout, one request in flight at a time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::page::{BrowserLauncher, KeepRecordings, PageDriver, SessionOptions};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for Browser {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chromium" | "chrome" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" => Ok(Browser::Webkit),
            other => Err(E2eError::Config(format!("unknown browser: {}", other))),
        }
    }
}

/// Configuration for Playwright sessions
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,

    /// Directory `require('playwright')` resolves from
    pub project_dir: std::path::PathBuf,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            project_dir: std::path::PathBuf::from("."),
        }
    }
}

const BRIDGE_SCRIPT: &str = r#"
const pw = require('playwright');
const readline = require('readline');

(async () => {
  const opts = JSON.parse(process.argv[1]);
  const send = (msg) => process.stdout.write(JSON.stringify(msg) + '\n');
  const browser = await pw[opts.browser].launch({ headless: opts.headless });
  const contextOptions = { viewport: { width: opts.width, height: opts.height } };
  if (opts.video_dir) {
    contextOptions.recordVideo = { dir: opts.video_dir, size: { width: opts.width, height: opts.height } };
  }
  const context = await browser.newContext(contextOptions);
  context.setDefaultTimeout(opts.action_timeout);
  if (opts.trace) {
    await context.tracing.start({ screenshots: true, snapshots: true });
  }
  const page = await context.newPage();
  send({ ready: true });

  const rl = readline.createInterface({ input: process.stdin });
  for await (const line of rl) {
    let req;
    try { req = JSON.parse(line); } catch (e) { continue; }
    try {
      let value = null;
      switch (req.op) {
        case 'goto':
          await page.goto(req.url, { timeout: req.timeout });
          break;
        case 'count':
          value = await page.locator(req.selector).count();
          break;
        case 'visible':
          value = await page.locator(req.selector).isVisible();
          break;
        case 'fill':
          await page.locator(req.selector).fill(req.value);
          break;
        case 'click':
          await page.locator(req.selector).click();
          break;
        case 'url':
          value = page.url();
          break;
        case 'screenshot':
          await page.screenshot({ path: req.path, fullPage: true });
          break;
        case 'close': {
          if (opts.trace) {
            await context.tracing.stop(req.trace ? { path: req.trace } : {});
          }
          const video = page.video();
          await context.close();
          if (video) {
            if (req.video) await video.saveAs(req.video);
            await video.delete();
          }
          await browser.close();
          send({ id: req.id, ok: true, value: null });
          process.exit(0);
        }
        default:
          throw new Error('unknown op ' + req.op);
      }
      send({ id: req.id, ok: true, value });
    } catch (e) {
      send({ id: req.id, ok: false, error: String(e.message || e), timeout: e.name === 'TimeoutError' });
    }
  }
  await browser.close();
})().catch((e) => {
  process.stderr.write(String(e.stack || e) + '\n');
  process.exit(1);
});
"#;

#[derive(Debug, Serialize)]
struct BridgeOptions<'a> {
    browser: &'a str,
    headless: bool,
    width: u32,
    height: u32,
    video_dir: Option<String>,
    trace: bool,
    action_timeout: u64,
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum BridgeOp<'a> {
    Goto { url: &'a str, timeout: u64 },
    Count { selector: &'a str },
    Visible { selector: &'a str },
    Fill { selector: &'a str, value: &'a str },
    Click { selector: &'a str },
    Url,
    Screenshot { path: String },
    Close { video: Option<String>, trace: Option<String> },
}

#[derive(Debug, Serialize)]
struct BridgeRequest<'a> {
    id: u64,
    #[serde(flatten)]
    op: BridgeOp<'a>,
}

#[derive(Debug, Default, Deserialize)]
struct BridgeReply {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    timeout: bool,
}

/// Launches one bridge process per session.
pub struct PlaywrightLauncher {
    config: PlaywrightConfig,
}

impl PlaywrightLauncher {
    pub fn new(config: PlaywrightConfig) -> E2eResult<Self> {
        Self::check_playwright_installed()?;
        Ok(Self { config })
    }

    /// Check if Playwright is installed
    fn check_playwright_installed() -> E2eResult<()> {
        let output = std::process::Command::new("npx")
            .args(["playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }
}

#[async_trait]
impl BrowserLauncher for PlaywrightLauncher {
    async fn launch(&self, options: &SessionOptions) -> E2eResult<Box<dyn PageDriver>> {
        let bridge = BridgeOptions {
            browser: self.config.browser.as_str(),
            headless: self.config.headless,
            width: self.config.viewport_width,
            height: self.config.viewport_height,
            video_dir: options
                .record_video
                .then(|| options.scratch_dir.join("video").to_string_lossy().to_string()),
            trace: options.record_trace,
            action_timeout: options.action_timeout.as_millis() as u64,
        };

        let mut child = Command::new("node")
            .arg("-e")
            .arg(BRIDGE_SCRIPT)
            .arg(serde_json::to_string(&bridge)?)
            .current_dir(&self.config.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| E2eError::Driver(format!("failed to spawn node: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Driver("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Driver("bridge stdout unavailable".to_string()))?;

        let mut page = PlaywrightPage {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 0,
            closed: false,
        };
        page.wait_ready().await?;
        debug!("Playwright session ready ({})", self.config.browser.as_str());
        Ok(Box::new(page))
    }
}

/// A browser context behind a bridge process.
pub struct PlaywrightPage {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    closed: bool,
}

impl PlaywrightPage {
    async fn read_reply(&mut self) -> E2eResult<BridgeReply> {
        loop {
            let line = self.stdout.next_line().await?.ok_or_else(|| {
                E2eError::Driver("browser bridge exited unexpectedly".to_string())
            })?;
            match serde_json::from_str::<BridgeReply>(&line) {
                Ok(reply) => return Ok(reply),
                Err(_) => debug!("[bridge] {}", line),
            }
        }
    }

    async fn wait_ready(&mut self) -> E2eResult<()> {
        loop {
            if self.read_reply().await?.ready {
                return Ok(());
            }
        }
    }

    async fn request(&mut self, op: BridgeOp<'_>) -> E2eResult<serde_json::Value> {
        if self.closed {
            return Err(E2eError::Driver("session already closed".to_string()));
        }
        self.next_id += 1;
        let id = self.next_id;
        let mut line = serde_json::to_string(&BridgeRequest { id, op })?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        loop {
            let reply = self.read_reply().await?;
            if reply.id != Some(id) {
                continue;
            }
            if reply.ok {
                return Ok(reply.value);
            }
            let message = reply.error.unwrap_or_else(|| "unknown bridge error".to_string());
            return Err(if reply.timeout {
                E2eError::Driver(format!("timeout: {}", message))
            } else {
                E2eError::Driver(message)
            });
        }
    }
}

#[async_trait]
impl PageDriver for PlaywrightPage {
    async fn goto(&mut self, url: &str, timeout: Duration) -> E2eResult<()> {
        let timeout_ms = timeout.as_millis() as u64;
        match self.request(BridgeOp::Goto { url, timeout: timeout_ms }).await {
            Err(E2eError::Driver(message)) if message.starts_with("timeout:") => {
                Err(E2eError::NavigationTimeout {
                    url: url.to_string(),
                    timeout_ms,
                })
            }
            other => other.map(|_| ()),
        }
    }

    async fn count(&mut self, selector: &str) -> E2eResult<usize> {
        let value = self.request(BridgeOp::Count { selector }).await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn is_visible(&mut self, selector: &str) -> E2eResult<bool> {
        let value = self.request(BridgeOp::Visible { selector }).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn fill(&mut self, selector: &str, value: &str) -> E2eResult<()> {
        self.request(BridgeOp::Fill { selector, value }).await.map(|_| ())
    }

    async fn click(&mut self, selector: &str) -> E2eResult<()> {
        self.request(BridgeOp::Click { selector }).await.map(|_| ())
    }

    async fn current_url(&mut self) -> E2eResult<String> {
        let value = self.request(BridgeOp::Url).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn screenshot(&mut self, path: &Path) -> E2eResult<()> {
        let path = path.to_string_lossy().to_string();
        self.request(BridgeOp::Screenshot { path }).await.map(|_| ())
    }

    async fn close(&mut self, keep: &KeepRecordings) -> E2eResult<()> {
        if self.closed {
            return Ok(());
        }
        let op = BridgeOp::Close {
            video: keep.video.as_ref().map(|p| p.to_string_lossy().to_string()),
            trace: keep.trace.as_ref().map(|p| p.to_string_lossy().to_string()),
        };
        let result = self.request(op).await.map(|_| ());
        self.closed = true;

        match tokio::time::timeout(Duration::from_secs(10), self.child.wait()).await {
            Ok(Ok(status)) if !status.success() => {
                warn!("Browser bridge exited with {}", status);
            }
            Ok(_) => {}
            Err(_) => {
                info!("Browser bridge did not exit, killing it");
                let _ = self.child.kill().await;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_are_flat_json_lines() {
        let req = BridgeRequest {
            id: 7,
            op: BridgeOp::Fill {
                selector: "#cardNumber",
                value: "1234567890123456",
            },
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["op"], "fill");
        assert_eq!(json["selector"], "#cardNumber");
    }

    #[test]
    fn replies_tolerate_missing_fields() {
        let ready: BridgeReply = serde_json::from_str(r#"{"ready":true}"#).unwrap();
        assert!(ready.ready);
        assert_eq!(ready.id, None);

        let failed: BridgeReply =
            serde_json::from_str(r#"{"id":3,"ok":false,"error":"boom","timeout":true}"#).unwrap();
        assert!(!failed.ok);
        assert!(failed.timeout);
    }

    #[test]
    fn browser_names_parse() {
        assert_eq!("chromium".parse::<Browser>().unwrap(), Browser::Chromium);
        assert_eq!("webkit".parse::<Browser>().unwrap(), Browser::Webkit);
        assert!("lynx".parse::<Browser>().is_err());
    }
}
