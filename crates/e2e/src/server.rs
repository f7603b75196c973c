//! Environment bootstrap - spawning and ready-checking the backing servers

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::error::{E2eError, E2eResult};

/// A dependency to start before scenarios run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebServerConfig {
    #[serde(default = "default_name")]
    pub name: String,

    /// Shell command, run with `sh -c`
    pub command: String,

    /// Working directory for the command
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// URL polled until it answers with a success status
    pub url: String,

    #[serde(default = "default_startup_timeout_ms")]
    pub timeout_ms: u64,

    /// Attach to a server already answering on `url` instead of failing
    #[serde(default)]
    pub reuse_existing_server: bool,
}

fn default_name() -> String {
    "server".to_string()
}

fn default_startup_timeout_ms() -> u64 {
    120_000
}

/// Handle to a running server process
pub struct ServerHandle {
    name: String,
    child: Option<Child>,
    pub url: String,
}

impl ServerHandle {
    /// Spawn the server and wait until its ready URL answers
    pub async fn spawn(config: &WebServerConfig) -> E2eResult<Self> {
        let client = ready_client()?;

        if probe(&client, &config.url).await {
            if config.reuse_existing_server {
                info!("Reusing {} already running at {}", config.name, config.url);
                return Ok(Self {
                    name: config.name.clone(),
                    child: None,
                    url: config.url.clone(),
                });
            }
            return Err(E2eError::ServerAlreadyRunning(config.url.clone()));
        }

        info!("Starting {}: {}", config.name, config.command);

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&config.command);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdout(Stdio::null()).stderr(Stdio::inherit());

        // Own process group so shutdown reaches everything the shell started.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|e| {
            E2eError::ServerStartup(format!("Failed to spawn {}: {}", config.name, e))
        })?;

        let mut handle = ServerHandle {
            name: config.name.clone(),
            child: Some(child),
            url: config.url.clone(),
        };

        handle
            .wait_for_ready(&client, Duration::from_millis(config.timeout_ms))
            .await?;

        info!("{} is ready at {}", config.name, config.url);
        Ok(handle)
    }

    /// Poll the ready URL until it succeeds, the process dies, or time runs out
    async fn wait_for_ready(
        &mut self,
        client: &reqwest::Client,
        timeout_duration: Duration,
    ) -> E2eResult<()> {
        let start = Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout_duration {
            attempts += 1;

            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    return Err(E2eError::ServerStartup(format!(
                        "{} exited with {} before becoming ready",
                        self.name, status
                    )));
                }
            }

            if probe(client, &self.url).await {
                return Ok(());
            }
            if attempts == 1 {
                info!("Waiting for {} at {}...", self.name, self.url);
            }

            sleep(Duration::from_millis(250)).await;
        }

        Err(E2eError::EnvironmentStartupTimeout {
            url: self.url.clone(),
            attempts,
        })
    }

    /// Stop the server
    pub fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        info!("Stopping {} (pid: {})", self.name, child.id());

        // Try graceful shutdown first
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let pgid = Pid::from_raw(child.id() as i32);
            if killpg(pgid, Signal::SIGTERM).is_ok() {
                std::thread::sleep(Duration::from_millis(500));
            }
        }

        // Force kill if still running
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn ready_client() -> E2eResult<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?)
}

async fn probe(client: &reqwest::Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(resp) if resp.status().is_success() => true,
        Ok(resp) => {
            warn!("Ready check {} returned {}", url, resp.status());
            false
        }
        Err(e) => {
            // Connection refused is expected while the server is starting
            if !e.is_connect() && !e.is_timeout() {
                warn!("Ready check error: {}", e);
            }
            false
        }
    }
}

/// Servers started for a run; stopped in reverse order on drop.
pub struct Environment {
    servers: Vec<ServerHandle>,
}

impl Environment {
    /// An environment someone else is running.
    pub fn external() -> Self {
        Self {
            servers: Vec::new(),
        }
    }

    /// Start each server in order, waiting for one to be ready before the next.
    pub async fn bootstrap(configs: &[WebServerConfig]) -> E2eResult<Self> {
        let mut env = Self::external();
        for config in configs {
            // On error, `env` drops and stops what already started.
            let handle = ServerHandle::spawn(config).await?;
            env.servers.push(handle);
        }
        Ok(env)
    }

    /// Poll every ready URL once per interval without starting anything.
    pub async fn check(configs: &[WebServerConfig], timeout: Duration) -> E2eResult<()> {
        let client = ready_client()?;
        for config in configs {
            let start = Instant::now();
            let mut attempts = 0;
            loop {
                attempts += 1;
                if probe(&client, &config.url).await {
                    info!("{} is ready at {}", config.name, config.url);
                    break;
                }
                if start.elapsed() >= timeout {
                    return Err(E2eError::EnvironmentStartupTimeout {
                        url: config.url.clone(),
                        attempts,
                    });
                }
                sleep(Duration::from_millis(250)).await;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        while let Some(mut server) = self.servers.pop() {
            server.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn config(command: &str, port: u16, timeout_ms: u64) -> WebServerConfig {
        WebServerConfig {
            name: "test".to_string(),
            command: command.to_string(),
            cwd: None,
            url: format!("http://127.0.0.1:{}/", port),
            timeout_ms,
            reuse_existing_server: false,
        }
    }

    #[tokio::test]
    async fn startup_times_out_when_nothing_listens() {
        let port = free_port();
        let err = Environment::bootstrap(&[config("sleep 5", port, 600)])
            .await
            .err()
            .unwrap();
        match err {
            E2eError::EnvironmentStartupTimeout { url, attempts } => {
                assert_eq!(url, format!("http://127.0.0.1:{}/", port));
                assert!(attempts >= 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn command_that_exits_is_a_startup_error() {
        let port = free_port();
        let err = Environment::bootstrap(&[config("exit 3", port, 5_000)])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, E2eError::ServerStartup(_)));
        assert!(err.is_fatal());
    }

    /// Answer every request with an empty 200 until the runtime shuts down.
    async fn answering_server() -> u16 {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                        .await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn answering_url_without_reuse_is_rejected() {
        let port = answering_server().await;
        let err = Environment::bootstrap(&[config("sleep 5", port, 2_000)])
            .await
            .err()
            .unwrap();
        match &err {
            E2eError::ServerAlreadyRunning(url) => {
                assert_eq!(url, &format!("http://127.0.0.1:{}/", port))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn answering_url_is_reused_without_spawning() {
        let port = answering_server().await;
        let mut server = config("exit 7", port, 2_000);
        server.reuse_existing_server = true;

        // `exit 7` would be a startup error if it were spawned.
        let env = Environment::bootstrap(&[server]).await.unwrap();
        assert_eq!(env.len(), 1);
        assert!(env.servers[0].child.is_none());
    }

    #[tokio::test]
    async fn check_fails_fast_for_unreachable_url() {
        let port = free_port();
        let err = Environment::check(&[config("true", port, 0)], Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, E2eError::EnvironmentStartupTimeout { .. }));
    }

    #[test]
    fn config_defaults_from_toml() {
        let config: WebServerConfig =
            toml::from_str("command = \"npm run preview\"\nurl = \"http://localhost:8080\"\n").unwrap();
        assert_eq!(config.timeout_ms, 120_000);
        assert!(!config.reuse_existing_server);
        assert_eq!(config.name, "server");
    }
}
