//! Generate a single image from a text prompt.
//!
//! Requires a running ComfyUI instance at http://127.0.0.1:8188
//! with at least one checkpoint installed.
//!
//! ```sh
//! cargo run --example simple_generation
//! ```

use comfy_conductor::{
    resolve_filename_prefix, ComfyClient, ConductorConfig, GenerationRequest, Orchestrator,
};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comfy_conductor=info".into()),
        )
        .init();

    let client = ComfyClient::new("http://127.0.0.1:8188");
    if !client.health().await? {
        eprintln!("ComfyUI is not responding");
        return Ok(());
    }
    println!("ComfyUI is online");

    // Use whatever checkpoint the server has installed
    let checkpoints = client.checkpoints().await?;
    if checkpoints.is_empty() {
        eprintln!("No checkpoints found — install a model first");
        return Ok(());
    }
    println!("Using checkpoint: {}", checkpoints[0]);

    let orchestrator = Orchestrator::new(
        ConductorConfig::builder()
            .with_output_dir("generated")
            .build(),
    )
    .with_client(client);

    // Explicit prefix beats an output filename beats the timestamp.
    let prefix = resolve_filename_prefix(None, std::env::args().nth(1).as_deref(), chrono::Local::now());

    let request = GenerationRequest::new("a beautiful sunset over mountains", &checkpoints[0])
        .negative("lowres, blurry, bad anatomy")
        .steps(25)
        .cfg_scale(7.5)
        .filename_prefix(prefix);
    println!("Seed: {}", request.seed);

    let report = orchestrator
        .generate(&request, |p| {
            println!("step {}/{} ({}%)", p.current_step, p.total_steps, p.percent());
        })
        .await?;

    for image in &report.images {
        println!("Saved: {}", image.display());
    }
    println!("Done in {} ms", report.duration_ms);
    Ok(())
}
