use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;

use crate::client::ComfyClient;
use crate::error::{ConductorError, Result};

/// Stderr line ComfyUI prints once its HTTP server is listening.
const READY_BANNER: &str = "To see the GUI go to:";

const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Launch configuration for a supervised ComfyUI process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory containing ComfyUI's `main.py` (also the working dir).
    pub install_dir: PathBuf,
    /// Python interpreter; defaults to the install's `.venv`.
    pub python: PathBuf,
    /// Listen address passed to the server.
    pub listen: String,
    /// Listen port passed to the server.
    pub port: u16,
    /// Additional command-line arguments (e.g. `--cpu`).
    pub extra_args: Vec<String>,
    /// Where to tee the server's stderr, for log-based progress scraping.
    pub log_file: Option<PathBuf>,
}

impl ServerConfig {
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        let install_dir = install_dir.into();
        let python = if cfg!(target_os = "windows") {
            install_dir.join(".venv").join("Scripts").join("python.exe")
        } else {
            install_dir.join(".venv").join("bin").join("python3")
        };
        Self {
            install_dir,
            python,
            listen: "127.0.0.1".to_string(),
            port: 8188,
            extra_args: Vec::new(),
            log_file: None,
        }
    }

    /// Use a specific Python interpreter.
    pub fn with_python(mut self, python: impl Into<PathBuf>) -> Self {
        self.python = python.into();
        self
    }

    /// Set the listen address.
    pub fn with_listen(mut self, listen: impl Into<String>) -> Self {
        self.listen = listen.into();
        self
    }

    /// Set the listen port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Append an extra server argument.
    pub fn with_extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Tee server stderr into a log file.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// The HTTP endpoint a client should use for this server.
    pub fn endpoint(&self) -> String {
        let host = if self.listen == "0.0.0.0" {
            "127.0.0.1"
        } else {
            self.listen.as_str()
        };
        format!("http://{host}:{}", self.port)
    }

    fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "main.py".to_string(),
            "--listen".to_string(),
            self.listen.clone(),
            "--port".to_string(),
            self.port.to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.python);
        cmd.current_dir(&self.install_dir);
        cmd.args(self.build_args());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

/// Starts and stops the external ComfyUI process.
///
/// The spawned process's stderr is watched for the readiness banner and
/// optionally teed to a log file that [`crate::ProgressSource::log_file`]
/// can scrape.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    config: ServerConfig,
}

impl ProcessSupervisor {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Spawn the server process. The returned handle owns the child; the
    /// process is killed if the handle is dropped without [`ServerHandle::stop`].
    pub fn spawn(&self) -> Result<ServerHandle> {
        let mut child = self
            .config
            .command()
            .spawn()
            .map_err(ConductorError::Process)?;
        tracing::info!(
            pid = child.id(),
            endpoint = %self.config.endpoint(),
            "spawned ComfyUI process"
        );

        let (banner_tx, banner_rx) = watch::channel(false);
        if let Some(stderr) = child.stderr.take() {
            let log_file = self.config.log_file.clone();
            tokio::spawn(async move {
                let mut sink = match &log_file {
                    Some(path) => tokio::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path)
                        .await
                        .ok(),
                    None => None,
                };
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.contains(READY_BANNER) {
                        tracing::info!("ComfyUI reports ready: {line}");
                        let _ = banner_tx.send(true);
                    }
                    if let Some(file) = sink.as_mut() {
                        if file.write_all(line.as_bytes()).await.is_ok() {
                            let _ = file.write_all(b"\n").await;
                        }
                    }
                }
            });
        }

        Ok(ServerHandle {
            child,
            banner: banner_rx,
        })
    }
}

/// A running, supervised ComfyUI process.
pub struct ServerHandle {
    child: Child,
    banner: watch::Receiver<bool>,
}

impl ServerHandle {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Whether the readiness banner has appeared on stderr.
    pub fn banner_seen(&self) -> bool {
        *self.banner.borrow()
    }

    /// Wait until the server answers HTTP health checks, bounded by
    /// `timeout`. Fails fast if the process exits first.
    pub async fn wait_until_ready(
        &mut self,
        client: &ComfyClient,
        timeout: Duration,
    ) -> Result<()> {
        let start = Instant::now();
        loop {
            if let Some(status) = self.child.try_wait().map_err(ConductorError::Process)? {
                return Err(ConductorError::ProcessExited(status.to_string()));
            }
            if client.health().await.unwrap_or(false) {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(ConductorError::NotReady(timeout));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// Kill the process and reap it.
    pub async fn stop(mut self) -> Result<()> {
        tracing::info!(pid = self.child.id(), "stopping ComfyUI process");
        self.child.kill().await.map_err(ConductorError::Process)?;
        let _ = self.child.wait().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_args() {
        let config = ServerConfig::new("/opt/comfyui")
            .with_listen("0.0.0.0")
            .with_port(8000)
            .with_extra_arg("--cpu");
        assert_eq!(
            config.build_args(),
            vec!["main.py", "--listen", "0.0.0.0", "--port", "8000", "--cpu"]
        );
    }

    #[test]
    fn test_endpoint_maps_wildcard_listen_to_loopback() {
        let config = ServerConfig::new("/opt/comfyui").with_listen("0.0.0.0");
        assert_eq!(config.endpoint(), "http://127.0.0.1:8188");
        let config = ServerConfig::new("/opt/comfyui").with_listen("127.0.0.1");
        assert_eq!(config.endpoint(), "http://127.0.0.1:8188");
    }

    #[cfg(unix)]
    #[test]
    fn test_default_python_is_venv() {
        let config = ServerConfig::new("/opt/comfyui");
        assert_eq!(
            config.python,
            PathBuf::from("/opt/comfyui/.venv/bin/python3")
        );
    }

    #[tokio::test]
    async fn test_spawn_failure_is_surfaced() {
        let config =
            ServerConfig::new("/nonexistent").with_python("/nonexistent/bin/python3");
        let supervisor = ProcessSupervisor::new(config);
        assert!(matches!(
            supervisor.spawn(),
            Err(ConductorError::Process(_))
        ));
    }
}
