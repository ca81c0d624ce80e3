//! Run the same prompt across every compatible catalog model and report
//! per-model results at the end.
//!
//! ```sh
//! cargo run --example model_sweep
//! ```

use comfy_conductor::{ConductorConfig, GenerationRequest, Orchestrator};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comfy_conductor=info".into()),
        )
        .init();

    let orchestrator = Orchestrator::new(
        ConductorConfig::builder()
            .with_output_dir("sweep")
            .with_output_extension("jpg")
            .build(),
    );
    orchestrator.wait_until_ready().await?;

    let base = GenerationRequest::new("a ceramic teapot in morning light, studio photo", "unused")
        .negative("lowres, blurry")
        .steps(25)
        .seed(42);

    let report = orchestrator.generate_all_compatible(&base).await;

    println!(
        "\n{} of {} models succeeded",
        report.succeeded.len(),
        report.total()
    );
    for success in &report.succeeded {
        println!("  ok   {} — {} image(s), {} ms", success.model, success.images.len(), success.duration_ms);
    }
    for failure in &report.failed {
        println!("  fail {} — {}", failure.model, failure.error);
    }
    Ok(())
}
