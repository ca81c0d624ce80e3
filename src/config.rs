use std::path::PathBuf;
use std::time::Duration;

/// Which advisory progress signal the orchestrator plugs into the poll loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProgressPreference {
    /// Listen to the server's WebSocket (falls back to silent on failure).
    #[default]
    Socket,
    /// Scrape a server log file incrementally.
    LogFile(PathBuf),
    /// No progress signal.
    Disabled,
}

/// Configuration for a [`crate::Orchestrator`].
///
/// Use [`ConductorConfig::builder()`] for ergonomic construction, or
/// [`ConductorConfig::default()`] for a local server on the default port.
#[derive(Debug, Clone)]
pub struct ConductorConfig {
    /// Base URL of the ComfyUI server.
    pub endpoint: String,

    /// Local ComfyUI install directory. When set, checkpoints are verified
    /// on disk before submission.
    pub install_dir: Option<PathBuf>,

    /// Where downloaded outputs land.
    pub output_dir: PathBuf,

    /// Convert outputs to this extension when it differs from the
    /// server-side filename's. `None` keeps files as produced.
    pub output_extension: Option<String>,

    /// Interval between history polls.
    pub poll_interval: Duration,

    /// Deadline for the job-completion phase.
    pub completion_deadline: Duration,

    /// Timeout for the server-became-reachable phase.
    pub ready_timeout: Duration,

    /// Progress signal plugged into the completion wait.
    pub progress: ProgressPreference,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8188".to_string(),
            install_dir: None,
            output_dir: PathBuf::from("output"),
            output_extension: None,
            poll_interval: Duration::from_secs(2),
            completion_deadline: Duration::from_secs(600),
            ready_timeout: Duration::from_secs(60),
            progress: ProgressPreference::Socket,
        }
    }
}

impl ConductorConfig {
    /// Start building a config with the builder pattern.
    pub fn builder() -> ConductorConfigBuilder {
        ConductorConfigBuilder::default()
    }
}

/// Builder for [`ConductorConfig`].
#[derive(Default)]
pub struct ConductorConfigBuilder {
    config: ConductorConfig,
}

impl ConductorConfigBuilder {
    /// Set the ComfyUI server endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// Set the local install directory (enables checkpoint verification).
    pub fn with_install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.install_dir = Some(dir.into());
        self
    }

    /// Set the output directory for downloaded images.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    /// Convert outputs to the given extension (e.g. "jpg").
    pub fn with_output_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.output_extension = Some(ext.into());
        self
    }

    /// Set the interval between history polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the deadline for the job-completion phase.
    pub fn with_completion_deadline(mut self, deadline: Duration) -> Self {
        self.config.completion_deadline = deadline;
        self
    }

    /// Set the timeout for the server-became-reachable phase.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.config.ready_timeout = timeout;
        self
    }

    /// Choose the progress signal.
    pub fn with_progress(mut self, progress: ProgressPreference) -> Self {
        self.config.progress = progress;
        self
    }

    /// Build the final [`ConductorConfig`].
    pub fn build(self) -> ConductorConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConductorConfig::default();
        assert_eq!(config.endpoint, "http://127.0.0.1:8188");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.completion_deadline, Duration::from_secs(600));
        assert!(config.install_dir.is_none());
        assert!(config.output_extension.is_none());
        assert_eq!(config.progress, ProgressPreference::Socket);
    }

    #[test]
    fn test_builder() {
        let config = ConductorConfig::builder()
            .with_endpoint("http://127.0.0.1:8000")
            .with_install_dir("/opt/comfyui")
            .with_output_dir("/tmp/out")
            .with_output_extension("jpg")
            .with_completion_deadline(Duration::from_secs(120))
            .with_progress(ProgressPreference::Disabled)
            .build();
        assert_eq!(config.endpoint, "http://127.0.0.1:8000");
        assert_eq!(config.install_dir.as_deref().unwrap().to_str(), Some("/opt/comfyui"));
        assert_eq!(config.output_extension.as_deref(), Some("jpg"));
        assert_eq!(config.completion_deadline, Duration::from_secs(120));
        assert_eq!(config.progress, ProgressPreference::Disabled);
    }
}
