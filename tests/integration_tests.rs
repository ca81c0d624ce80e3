use comfy_conductor::*;

use chrono::TimeZone;
use std::path::PathBuf;
use std::time::Duration;

fn txt2img_request() -> GenerationRequest {
    GenerationRequest::new("a lighthouse at dusk", "dreamshaper_8.safetensors")
        .negative("lowres, blurry")
        .size(512, 512)
        .steps(20)
        .cfg_scale(7.0)
        .seed(12345)
}

// -- Workflow building --

#[test]
fn test_txt2img_terminal_node_is_save_of_decode() {
    let workflow = txt2img_request().build();
    let (_, save) = workflow
        .nodes()
        .find(|(_, n)| n.class_type == "SaveImage")
        .expect("txt2img graph must end in SaveImage");
    let link = save.inputs.get("images").expect("SaveImage images input");
    let decode_id = link[0].as_str().unwrap();
    assert_eq!(workflow.node(decode_id).unwrap().class_type, "VAEDecode");
    assert!(!workflow.contains_class("LoadImage"));
    assert!(!workflow.contains_class("VAEEncode"));
}

#[test]
fn test_img2img_denoise_per_architecture() {
    let universal = txt2img_request().source_image("src.png").strength(0.9);
    assert_eq!(universal.denoise(), 0.5); // min(0.9 * 0.6, 0.5)

    let sdxl = txt2img_request()
        .architecture(ModelArchitecture::Sdxl)
        .source_image("src.png")
        .strength(0.9);
    assert_eq!(sdxl.denoise(), 0.9);
}

#[test]
fn test_identical_requests_serialize_identically() {
    let request = txt2img_request();
    let first = serde_json::to_vec(&request.build()).unwrap();
    let second = serde_json::to_vec(&request.build()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_graph_links_resolve() {
    assert!(txt2img_request().build().validate_links().is_ok());
    assert!(txt2img_request()
        .source_image("src.png")
        .build()
        .validate_links()
        .is_ok());
}

#[test]
fn test_prefix_resolution_chain() {
    let now = chrono::Local.with_ymd_and_hms(2024, 5, 4, 18, 45, 9).unwrap();
    assert_eq!(
        resolve_filename_prefix(Some("portrait"), Some("out/result.png"), now),
        "portrait"
    );
    assert_eq!(
        resolve_filename_prefix(None, Some("out/result.png"), now),
        "result"
    );
    assert_eq!(resolve_filename_prefix(None, None, now), "comfy_20240504_184509");
}

// -- Model path resolution --

#[test]
fn test_override_file_governs_checkpoint_dir() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(
        tmp.path().join("extra_model_paths.yaml"),
        "custom:\n  base_path: /data/sd\n  checkpoints: ckpt/\n",
    )
    .unwrap();
    let resolver = ModelPathResolver::new(tmp.path());
    // Explicit configuration wins even though the path does not exist.
    assert_eq!(
        resolver.resolve("checkpoints"),
        PathBuf::from("/data/sd/ckpt")
    );
}

#[test]
fn test_resolver_all_candidates_mode() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(
        tmp.path().join("extra_model_paths.yaml"),
        "custom:\n  base_path: /data\n  checkpoints: ckpt\n",
    )
    .unwrap();
    let resolver = ModelPathResolver::new(tmp.path());
    let candidates = resolver.candidates("checkpoints");
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0], PathBuf::from("/data/ckpt"));
    assert_eq!(
        candidates[1],
        tmp.path().join("models").join("checkpoints")
    );
}

// -- Catalog --

#[test]
fn test_catalog_drives_architecture_selection() {
    let catalog = ModelCatalog::builtin();
    let sdxl = catalog.find("SDXL Base 1.0").unwrap();
    assert_eq!(sdxl.architecture, ModelArchitecture::Sdxl);
    let sd15 = catalog.find("DreamShaper 8").unwrap();
    assert_eq!(sd15.architecture, ModelArchitecture::Universal);
}

// -- Completion wait --

#[tokio::test]
async fn test_wait_is_bounded_by_deadline() {
    let client = ComfyClient::new("http://127.0.0.1:9");
    let poller =
        CompletionPoller::new(Duration::from_millis(200)).with_poll_interval(Duration::from_millis(50));
    let mut progress = ProgressSource::none();
    let outcome = poller.wait(&client, "no-such-prompt", &mut progress, |_| {}).await;
    assert!(matches!(outcome, GenerationOutcome::TimedOut));
}

#[tokio::test]
async fn test_wait_honors_cancellation() {
    let client = ComfyClient::new("http://127.0.0.1:9");
    let poller = CompletionPoller::new(Duration::from_secs(60))
        .with_poll_interval(Duration::from_millis(20));
    let cancel = poller.cancel_flag();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
    });
    let mut progress = ProgressSource::none();
    let outcome = poller.wait(&client, "abc", &mut progress, |_| {}).await;
    assert!(matches!(outcome, GenerationOutcome::Cancelled));
}

// -- Output pipeline --

#[tokio::test]
async fn test_downloader_partial_failure_is_not_an_error() {
    let client = ComfyClient::new("http://127.0.0.1:9");
    let downloader = ResultDownloader::new(&client);
    let tmp = tempfile::tempdir().unwrap();
    let record = HistoryRecord {
        status: "success".into(),
        completed: true,
        outputs: vec![NodeOutput {
            node_id: "7".into(),
            images: vec![
                ImageRef {
                    filename: String::new(),
                    subfolder: String::new(),
                    img_type: "output".into(),
                },
                ImageRef {
                    filename: "unreachable.png".into(),
                    subfolder: String::new(),
                    img_type: "output".into(),
                },
            ],
        }],
    };
    let saved = downloader.save_outputs(&record, tmp.path()).await.unwrap();
    assert!(saved.is_empty());
}

#[test]
fn test_convert_then_sidecars() {
    let tmp = tempfile::tempdir().unwrap();
    let image_path = tmp.path().join("comfy_00001_.png");
    image::RgbaImage::from_pixel(8, 8, image::Rgba([10, 20, 30, 255]))
        .save(&image_path)
        .unwrap();

    let converted = convert_image(&image_path, "jpg").unwrap();
    assert_eq!(converted.extension().unwrap(), "jpg");
    assert!(!image_path.exists());

    let request = txt2img_request();
    let when = chrono::Local.with_ymd_and_hms(2024, 5, 4, 18, 45, 9).unwrap();
    let sidecars = write_sidecars(&converted, &request, "DreamShaper 8", when).unwrap();
    assert_eq!(sidecars.len(), SIDECAR_STREAMS.len());
    for stream in SIDECAR_STREAMS {
        assert!(sidecar_path(&converted, stream).is_file());
    }
}

// -- Orchestrated batch --

#[tokio::test]
async fn test_batch_is_resilient_and_reports_failures() {
    let orchestrator = Orchestrator::new(
        ConductorConfig::builder()
            .with_endpoint("http://127.0.0.1:9")
            .with_completion_deadline(Duration::from_millis(100))
            .with_progress(ProgressPreference::Disabled)
            .build(),
    );
    let base = GenerationRequest::new("a lighthouse at dusk", "placeholder").seed(1);
    let report = orchestrator.generate_all_compatible(&base).await;

    // Every compatible model was attempted against a dead server; the run
    // finished anyway, with each failure recorded rather than raised.
    assert_eq!(report.total(), orchestrator.catalog().compatible().len());
    assert!(report.succeeded.is_empty());
    assert!(report.failed.iter().all(|f| !f.error.is_empty()));
}
