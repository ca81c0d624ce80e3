use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::error::Result;
use crate::workflow::GenerationRequest;

/// The four metadata streams written next to every generated image, for
/// consumption by downstream image-search indexers.
pub const SIDECAR_STREAMS: [&str; 4] = ["exif", "description", "people", "objects"];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExifSidecar<'a> {
    software: &'static str,
    model: &'a str,
    positive_prompt: &'a str,
    negative_prompt: &'a str,
    seed: i64,
    steps: u32,
    cfg_scale: f64,
    sampler: &'a str,
    scheduler: &'a str,
    width: u32,
    height: u32,
    generated_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DescriptionSidecar<'a> {
    description: &'a str,
    source: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PeopleSidecar {
    people: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ObjectsSidecar {
    objects: Vec<String>,
}

/// Path of one sidecar stream for an image: `<image>.<stream>.json`.
pub fn sidecar_path(image_path: &Path, stream: &str) -> PathBuf {
    let mut name = image_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push('.');
    name.push_str(stream);
    name.push_str(".json");
    image_path.with_file_name(name)
}

/// Write the four metadata sidecars for a generated image.
///
/// The exif-like document records the full generation parameter set; the
/// description carries the prompt; people and objects start empty and are
/// filled in later by recognition tooling.
pub fn write_sidecars(
    image_path: &Path,
    request: &GenerationRequest,
    model_name: &str,
    generated_at: DateTime<Local>,
) -> Result<Vec<PathBuf>> {
    let exif = ExifSidecar {
        software: "comfy-conductor",
        model: model_name,
        positive_prompt: &request.positive_prompt,
        negative_prompt: &request.negative_prompt,
        seed: request.seed,
        steps: request.steps,
        cfg_scale: request.cfg_scale,
        sampler: &request.sampler,
        scheduler: &request.scheduler,
        width: request.width,
        height: request.height,
        generated_at: generated_at.to_rfc3339(),
    };
    let description = DescriptionSidecar {
        description: &request.positive_prompt,
        source: "generated",
    };
    let people = PeopleSidecar { people: Vec::new() };
    let objects = ObjectsSidecar {
        objects: Vec::new(),
    };

    let mut written = Vec::with_capacity(SIDECAR_STREAMS.len());
    written.push(write_stream(image_path, "exif", &exif)?);
    written.push(write_stream(image_path, "description", &description)?);
    written.push(write_stream(image_path, "people", &people)?);
    written.push(write_stream(image_path, "objects", &objects)?);
    Ok(written)
}

fn write_stream<T: Serialize>(image_path: &Path, stream: &str, doc: &T) -> Result<PathBuf> {
    let path = sidecar_path(image_path, stream);
    let json = serde_json::to_string_pretty(doc)?;
    std::fs::write(&path, json)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sidecar_path_shape() {
        let path = sidecar_path(Path::new("/out/comfy_00001_.png"), "exif");
        assert_eq!(path, PathBuf::from("/out/comfy_00001_.png.exif.json"));
    }

    #[test]
    fn test_writes_all_four_streams() {
        let tmp = tempfile::tempdir().unwrap();
        let image = tmp.path().join("result.png");
        std::fs::write(&image, b"fake").unwrap();

        let request = GenerationRequest::new("a lighthouse at dusk", "dreamshaper_8.safetensors")
            .negative("lowres")
            .seed(42);
        let when = Local.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap();
        let written = write_sidecars(&image, &request, "DreamShaper 8", when).unwrap();

        assert_eq!(written.len(), 4);
        for (path, stream) in written.iter().zip(SIDECAR_STREAMS) {
            assert!(path.is_file(), "missing sidecar for {stream}");
            assert!(path.to_string_lossy().ends_with(&format!("{stream}.json")));
        }
    }

    #[test]
    fn test_exif_sidecar_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let image = tmp.path().join("result.png");
        std::fs::write(&image, b"fake").unwrap();

        let request = GenerationRequest::new("a lighthouse at dusk", "dreamshaper_8.safetensors")
            .seed(42)
            .steps(30);
        let when = Local.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap();
        write_sidecars(&image, &request, "DreamShaper 8", when).unwrap();

        let exif: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(sidecar_path(&image, "exif")).unwrap(),
        )
        .unwrap();
        assert_eq!(exif["model"], "DreamShaper 8");
        assert_eq!(exif["seed"], 42);
        assert_eq!(exif["steps"], 30);
        assert_eq!(exif["positivePrompt"], "a lighthouse at dusk");

        let people: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(sidecar_path(&image, "people")).unwrap(),
        )
        .unwrap();
        assert_eq!(people["people"].as_array().unwrap().len(), 0);
    }
}
