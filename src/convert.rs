use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};

use crate::error::{ConductorError, Result};

/// Re-encode an image file to the requested extension.
///
/// A target matching the current extension (case-insensitive) is a no-op
/// returning the original path. Otherwise the file is decoded, written
/// next to the original with the new extension, and the original removed.
/// JPEG output flattens any alpha channel first.
pub fn convert_image(path: &Path, target_ext: &str) -> Result<PathBuf> {
    let target_ext = target_ext.trim_start_matches('.').to_ascii_lowercase();

    let current_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if current_ext == target_ext {
        return Ok(path.to_path_buf());
    }

    if ImageFormat::from_extension(&target_ext).is_none() {
        return Err(ConductorError::Config(format!(
            "Unsupported output format: {target_ext}"
        )));
    }

    let decoded = image::open(path)?;
    let target = path.with_extension(&target_ext);
    match target_ext.as_str() {
        "jpg" | "jpeg" => DynamicImage::ImageRgb8(decoded.to_rgb8()).save(&target)?,
        _ => decoded.save(&target)?,
    }

    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), "could not remove pre-conversion file: {e}");
    }
    Ok(target)
}
