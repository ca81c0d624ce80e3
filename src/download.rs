use std::path::{Path, PathBuf};

use crate::client::ComfyClient;
use crate::error::Result;
use crate::types::HistoryRecord;

/// Downloads every image referenced by a completed history record.
pub struct ResultDownloader<'a> {
    client: &'a ComfyClient,
}

impl<'a> ResultDownloader<'a> {
    pub fn new(client: &'a ComfyClient) -> Self {
        Self { client }
    }

    /// Fetch each output image into `target_dir` under its original
    /// filename and return the local paths that succeeded.
    ///
    /// Per-image failures (empty filename, network error, write error) are
    /// warned and skipped; partial success is success. Only failure to
    /// create the target directory itself is an error.
    pub async fn save_outputs(
        &self,
        record: &HistoryRecord,
        target_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(target_dir).await?;

        let mut saved = Vec::new();
        for node in &record.outputs {
            for img in &node.images {
                if img.filename.is_empty() {
                    tracing::warn!(
                        node_id = %node.node_id,
                        "skipping output image with empty filename"
                    );
                    continue;
                }
                // Strip any path components the server slipped in.
                let file_name = Path::new(&img.filename)
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(&img.filename));
                let target = target_dir.join(file_name);

                let bytes = match self.client.download_image(img).await {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::warn!(filename = %img.filename, "skipping failed download: {e}");
                        continue;
                    }
                };
                if let Err(e) = tokio::fs::write(&target, &bytes).await {
                    tracing::warn!(target = %target.display(), "skipping failed write: {e}");
                    continue;
                }
                tracing::debug!(target = %target.display(), "saved output image");
                saved.push(target);
            }
        }
        Ok(saved)
    }
}
