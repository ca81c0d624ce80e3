use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Local;

use crate::client::ComfyClient;
use crate::config::{ConductorConfig, ProgressPreference};
use crate::convert::convert_image;
use crate::download::ResultDownloader;
use crate::error::{ConductorError, Result};
use crate::models::{ModelCatalog, ModelDescriptor, ModelPathResolver};
use crate::poller::{CancelFlag, CompletionPoller};
use crate::progress::ProgressSource;
use crate::sidecar::write_sidecars;
use crate::types::{GenerationOutcome, ProgressUpdate};
use crate::workflow::{ensure_checkpoint_extension, GenerationRequest};

/// What one completed generation produced.
#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub model: String,
    pub prompt_id: String,
    pub seed: i64,
    pub images: Vec<PathBuf>,
    pub sidecars: Vec<PathBuf>,
    pub duration_ms: u64,
}

/// One model that failed during a multi-model run.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub model: String,
    pub error: String,
}

/// Outcome of a multi-model run: the fold of every per-model `Result`.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub succeeded: Vec<GenerationReport>,
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    fn fold(results: Vec<(String, Result<GenerationReport>)>) -> Self {
        let mut report = Self::default();
        for (model, result) in results {
            match result {
                Ok(r) => report.succeeded.push(r),
                Err(e) => report.failed.push(BatchFailure {
                    model,
                    error: e.to_string(),
                }),
            }
        }
        report
    }
}

/// Top-level generation pipeline over one ComfyUI server.
///
/// Composes checkpoint resolution, workflow building, submission, the
/// bounded completion wait, output download, format conversion, and
/// metadata sidecars. Multi-model runs are resilient: a model's failure is
/// recorded and the run continues.
///
/// # Example
/// ```no_run
/// use comfy_conductor::{ConductorConfig, GenerationRequest, Orchestrator};
///
/// # async fn example() -> comfy_conductor::Result<()> {
/// let orchestrator = Orchestrator::new(ConductorConfig::default());
/// let request = GenerationRequest::new("a sunset over mountains", "dreamshaper_8")
///     .negative("lowres, blurry")
///     .steps(25);
/// let report = orchestrator
///     .generate(&request, |p| println!("{}%", p.percent()))
///     .await?;
/// println!("saved {:?}", report.images);
/// # Ok(())
/// # }
/// ```
pub struct Orchestrator {
    client: ComfyClient,
    config: ConductorConfig,
    catalog: ModelCatalog,
    cancel: CancelFlag,
}

impl Orchestrator {
    pub fn new(config: ConductorConfig) -> Self {
        Self {
            client: ComfyClient::new(config.endpoint.clone()),
            config,
            catalog: ModelCatalog::builtin(),
            cancel: CancelFlag::new(),
        }
    }

    /// Use a pre-built client (e.g. from [`ComfyClient::discover`]).
    pub fn with_client(mut self, client: ComfyClient) -> Self {
        self.client = client;
        self
    }

    /// Use a custom supported-models catalog.
    pub fn with_catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn client(&self) -> &ComfyClient {
        &self.client
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// A handle that cancels any in-flight completion wait.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Wait for the server to answer health checks, bounded by the
    /// configured ready timeout.
    pub async fn wait_until_ready(&self) -> Result<()> {
        self.client.wait_until_ready(self.config.ready_timeout).await
    }

    /// Upload a local source image for image-to-image generation. Returns
    /// the server-side filename to pass to
    /// [`GenerationRequest::source_image`].
    pub async fn upload_source(&self, path: impl AsRef<Path>) -> Result<String> {
        self.client.upload_image_file(path).await
    }

    /// Run one full generation: verify the checkpoint, build the workflow,
    /// submit, wait, download, convert, and write sidecars.
    pub async fn generate<F>(
        &self,
        request: &GenerationRequest,
        on_progress: F,
    ) -> Result<GenerationReport>
    where
        F: FnMut(ProgressUpdate),
    {
        let started = Instant::now();
        let checkpoint = ensure_checkpoint_extension(&request.checkpoint);
        self.verify_checkpoint(&checkpoint)?;

        let model_label = self
            .catalog
            .find(&checkpoint)
            .map(|m| m.name.clone())
            .unwrap_or_else(|| request.checkpoint.clone());

        let workflow = request.build();
        let prompt_id = self.client.queue_prompt(&workflow).await?;
        tracing::info!(prompt_id = %prompt_id, model = %model_label, "queued generation");

        let mut progress = match &self.config.progress {
            ProgressPreference::Socket => {
                ProgressSource::socket(&self.client, prompt_id.as_str()).await
            }
            ProgressPreference::LogFile(path) => ProgressSource::log_file(path),
            ProgressPreference::Disabled => ProgressSource::none(),
        };

        let poller = CompletionPoller::new(self.config.completion_deadline)
            .with_poll_interval(self.config.poll_interval)
            .with_cancel_flag(self.cancel.clone());
        let outcome = poller
            .wait(&self.client, &prompt_id, &mut progress, on_progress)
            .await;

        let record = match outcome {
            GenerationOutcome::Completed { record } => record,
            GenerationOutcome::Failed { error } => {
                return Err(ConductorError::GenerationFailed(error))
            }
            GenerationOutcome::TimedOut => {
                return Err(ConductorError::Timeout(self.config.completion_deadline))
            }
            GenerationOutcome::Cancelled => return Err(ConductorError::Cancelled),
        };

        let downloader = ResultDownloader::new(&self.client);
        let mut images = downloader
            .save_outputs(&record, &self.config.output_dir)
            .await?;

        if let Some(ext) = &self.config.output_extension {
            images = images
                .into_iter()
                .map(|path| match convert_image(&path, ext) {
                    Ok(converted) => converted,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), "keeping original format: {e}");
                        path
                    }
                })
                .collect();
        }

        let generated_at = Local::now();
        let mut sidecars = Vec::new();
        for image in &images {
            match write_sidecars(image, request, &model_label, generated_at) {
                Ok(mut written) => sidecars.append(&mut written),
                Err(e) => {
                    tracing::warn!(image = %image.display(), "skipping sidecars: {e}");
                }
            }
        }

        let report = GenerationReport {
            model: model_label,
            prompt_id,
            seed: request.seed,
            images,
            sidecars,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            model = %report.model,
            images = report.images.len(),
            duration_ms = report.duration_ms,
            "generation complete"
        );
        Ok(report)
    }

    /// Upload a local source image and run an image-to-image generation
    /// with it.
    pub async fn generate_from_image<F>(
        &self,
        request: GenerationRequest,
        source_path: impl AsRef<Path>,
        on_progress: F,
    ) -> Result<GenerationReport>
    where
        F: FnMut(ProgressUpdate),
    {
        let server_name = self.upload_source(source_path).await?;
        let request = request.source_image(server_name);
        self.generate(&request, on_progress).await
    }

    /// Run the base request once per model, sequentially.
    ///
    /// Per-model failures are recorded and the run continues — resilient
    /// batch, not all-or-nothing. A raised cancel flag stops the remaining
    /// models. VRAM is freed between models so checkpoint swaps don't
    /// accumulate.
    pub async fn generate_for_models(
        &self,
        base: &GenerationRequest,
        models: &[&ModelDescriptor],
    ) -> BatchReport {
        let mut results = Vec::with_capacity(models.len());
        for (idx, model) in models.iter().enumerate() {
            let request = base
                .clone()
                .architecture(model.architecture)
                .filename_prefix(model_prefix(&base.filename_prefix, &model.name));
            let request = GenerationRequest {
                checkpoint: model.file_name.clone(),
                ..request
            };

            tracing::info!(model = %model.name, "starting batch generation");
            let result = self
                .generate(&request, |p| {
                    tracing::debug!(model = %model.name, "step {}/{}", p.current_step, p.total_steps);
                })
                .await;

            let cancelled = matches!(&result, Err(ConductorError::Cancelled));
            if let Err(e) = &result {
                tracing::warn!(model = %model.name, "batch item failed: {e}");
            }
            results.push((model.name.clone(), result));
            if cancelled {
                tracing::info!("batch cancelled, skipping remaining models");
                break;
            }

            // Release the loaded checkpoint before the next model swap.
            if idx + 1 < models.len() {
                if let Err(e) = self.client.free_memory(true).await {
                    tracing::debug!("free memory between models failed: {e}");
                }
            }
        }
        BatchReport::fold(results)
    }

    /// Run the base request across every compatible catalog model.
    pub async fn generate_all_compatible(&self, base: &GenerationRequest) -> BatchReport {
        let models = self.catalog.compatible();
        self.generate_for_models(base, &models).await
    }

    fn verify_checkpoint(&self, file_name: &str) -> Result<()> {
        let Some(install_dir) = &self.config.install_dir else {
            return Ok(());
        };
        let resolver = ModelPathResolver::new(install_dir);
        if resolver.find_checkpoint(file_name).is_none() {
            return Err(ConductorError::CheckpointNotFound {
                file_name: file_name.to_string(),
                searched: resolver.candidates("checkpoints"),
            });
        }
        Ok(())
    }
}

/// Batch output prefix: the base prefix plus a filesystem-safe model slug.
fn model_prefix(base: &str, model_name: &str) -> String {
    let slug: String = model_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{base}_{}", slug.trim_matches('_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::ModelArchitecture;
    use std::time::Duration;

    fn unreachable_config() -> ConductorConfig {
        ConductorConfig::builder()
            .with_endpoint("http://127.0.0.1:9")
            .with_completion_deadline(Duration::from_millis(100))
            .with_progress(ProgressPreference::Disabled)
            .build()
    }

    #[test]
    fn test_model_prefix_slug() {
        assert_eq!(model_prefix("comfy", "DreamShaper 8"), "comfy_dreamshaper_8");
        assert_eq!(model_prefix("x", "SDXL Base 1.0"), "x_sdxl_base_1_0");
    }

    #[tokio::test]
    async fn test_missing_checkpoint_fails_before_submission() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ConductorConfig::builder()
            .with_endpoint("http://127.0.0.1:9")
            .with_install_dir(tmp.path())
            .build();
        let orchestrator = Orchestrator::new(config);
        let request = GenerationRequest::new("prompt", "missing_model");
        let err = orchestrator.generate(&request, |_| {}).await.unwrap_err();
        match err {
            ConductorError::CheckpointNotFound { file_name, .. } => {
                assert_eq!(file_name, "missing_model.safetensors");
            }
            other => panic!("expected CheckpointNotFound, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_submission_error_is_surfaced() {
        let orchestrator = Orchestrator::new(unreachable_config());
        let request = GenerationRequest::new("prompt", "dreamshaper_8.safetensors");
        let err = orchestrator.generate(&request, |_| {}).await.unwrap_err();
        assert!(matches!(err, ConductorError::Network { .. }));
    }

    #[tokio::test]
    async fn test_batch_continues_past_failures() {
        let orchestrator = Orchestrator::new(unreachable_config());
        let base = GenerationRequest::new("prompt", "placeholder");
        let catalog = ModelCatalog::builtin();
        let models: Vec<_> = catalog.compatible().into_iter().take(2).collect();
        let report = orchestrator.generate_for_models(&base, &models).await;
        assert_eq!(report.total(), 2);
        assert_eq!(report.failed.len(), 2);
        assert!(report.succeeded.is_empty());
        assert!(!report.all_succeeded());
    }

    #[test]
    fn test_batch_applies_model_architecture() {
        // The request handed to each batch item must carry the model's
        // architecture; verify via the denoise rule on a cloned request.
        let model = ModelDescriptor {
            name: "SDXL Base 1.0".into(),
            file_name: "sd_xl_base_1.0.safetensors".into(),
            download_url: None,
            hugging_face_repo: None,
            architecture: ModelArchitecture::Sdxl,
            compatible: true,
        };
        let base = GenerationRequest::new("p", "ignored")
            .source_image("in.png")
            .strength(0.9);
        let request = base
            .clone()
            .architecture(model.architecture)
            .filename_prefix(model_prefix(&base.filename_prefix, &model.name));
        assert_eq!(request.denoise(), 0.9);
        assert_eq!(request.filename_prefix, "ComfyUI_sdxl_base_1_0");
    }
}
