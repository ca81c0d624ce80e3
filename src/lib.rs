//! # comfy-conductor
//!
//! Orchestration toolkit for a locally-running
//! [ComfyUI](https://github.com/comfyanonymous/ComfyUI) server: process
//! lifecycle, workflow building for the standard node vocabulary, bounded
//! completion polling with pluggable progress signals, and output
//! management (download, format conversion, metadata sidecars).
//!
//! ## Quick Start
//!
//! ```no_run
//! use comfy_conductor::{ConductorConfig, GenerationRequest, Orchestrator};
//!
//! # async fn example() -> comfy_conductor::Result<()> {
//! let orchestrator = Orchestrator::new(
//!     ConductorConfig::builder()
//!         .with_output_dir("generated")
//!         .with_output_extension("jpg")
//!         .build(),
//! );
//! orchestrator.wait_until_ready().await?;
//!
//! let request = GenerationRequest::new("a sunset over mountains", "dreamshaper_8")
//!     .negative("lowres, blurry")
//!     .size(512, 768)
//!     .steps(25);
//!
//! let report = orchestrator
//!     .generate(&request, |p| println!("step {}/{}", p.current_step, p.total_steps))
//!     .await?;
//! println!("saved {} image(s), seed {}", report.images.len(), report.seed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Pieces
//!
//! Every piece composes through explicit values — no process-global server
//! state:
//!
//! - [`ComfyClient`] — HTTP gateway ( `/prompt`, `/history`, `/queue`,
//!   `/upload/image`, `/view`, `/object_info`, control endpoints)
//! - [`GenerationRequest`] — parameter set + workflow graph builder
//! - [`CompletionPoller`] — bounded history polling with cancellation
//! - [`ProgressSource`] — advisory progress (WebSocket, log file, or none)
//! - [`ProcessSupervisor`] — spawn/stop the server process itself
//! - [`Orchestrator`] — the full generate pipeline, single- or multi-model

pub mod client;
pub mod config;
pub mod convert;
pub mod download;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod poller;
pub mod progress;
pub mod sidecar;
pub mod supervisor;
pub mod types;
pub mod workflow;

pub use client::{ComfyClient, DEFAULT_PORTS};
pub use config::{ConductorConfig, ProgressPreference};
pub use convert::convert_image;
pub use download::ResultDownloader;
pub use error::{ConductorError, Result};
pub use models::{ModelCatalog, ModelDescriptor, ModelPathResolver};
pub use orchestrator::{BatchFailure, BatchReport, GenerationReport, Orchestrator};
pub use poller::{CancelFlag, CompletionPoller};
pub use progress::ProgressSource;
pub use sidecar::{sidecar_path, write_sidecars, SIDECAR_STREAMS};
pub use supervisor::{ProcessSupervisor, ServerConfig, ServerHandle};
pub use types::{
    GenerationOutcome, HistoryRecord, ImageRef, NodeOutput, ProgressUpdate, QueueStatus,
};
pub use workflow::{
    ensure_checkpoint_extension, resolve_filename_prefix, GenerationRequest, ModelArchitecture,
    WorkflowGraph, WorkflowNode, CHECKPOINT_EXTENSIONS,
};
