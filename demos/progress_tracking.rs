//! Submit a workflow and watch its progress from the completion poller,
//! comparing the WebSocket and log-file progress sources.
//!
//! ```sh
//! cargo run --example progress_tracking [path/to/comfyui.log]
//! ```

use std::time::Duration;

use comfy_conductor::{
    ComfyClient, CompletionPoller, GenerationOutcome, GenerationRequest, ProgressSource,
    DEFAULT_PORTS,
};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let Some(client) = ComfyClient::discover("127.0.0.1", &DEFAULT_PORTS).await else {
        eprintln!("No ComfyUI instance found on ports {DEFAULT_PORTS:?}");
        return Ok(());
    };
    let checkpoints = client.checkpoints().await?;
    if checkpoints.is_empty() {
        eprintln!("No checkpoints found — install a model first");
        return Ok(());
    }

    let request = GenerationRequest::new("a watercolor fox in a forest", &checkpoints[0])
        .steps(30);
    let prompt_id = client.queue_prompt(&request.build()).await?;
    println!("Queued prompt {prompt_id}");

    // Prefer the server socket; fall back to scraping a log file if a path
    // was given on the command line.
    let mut progress = match std::env::args().nth(1) {
        Some(log_path) => ProgressSource::log_file(log_path),
        None => ProgressSource::socket(&client, prompt_id.as_str()).await,
    };

    let poller = CompletionPoller::new(Duration::from_secs(300))
        .with_poll_interval(Duration::from_secs(1));
    let outcome = poller
        .wait(&client, &prompt_id, &mut progress, |p| {
            println!("{:>3}% — step {}/{}", p.percent(), p.current_step, p.total_steps);
        })
        .await;

    match outcome {
        GenerationOutcome::Completed { record } => {
            println!("Completed with {} image(s)", record.images().count());
        }
        GenerationOutcome::Failed { error } => eprintln!("Failed: {error}"),
        GenerationOutcome::TimedOut => eprintln!("Timed out"),
        GenerationOutcome::Cancelled => eprintln!("Cancelled"),
    }
    Ok(())
}
