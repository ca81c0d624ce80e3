use serde::{Deserialize, Serialize};

/// Advisory progress sample for an in-flight generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub current_step: u32,
    pub total_steps: u32,
}

impl ProgressUpdate {
    /// Completion percentage, clamped to 0–100.
    pub fn percent(&self) -> u32 {
        if self.total_steps == 0 {
            return 0;
        }
        (self.current_step * 100 / self.total_steps).min(100)
    }
}

/// Reference to an image stored in ComfyUI's output directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_img_type")]
    pub img_type: String,
}

fn default_img_type() -> String {
    "output".to_string()
}

/// Images produced by a single node of a completed workflow.
#[derive(Debug, Clone)]
pub struct NodeOutput {
    pub node_id: String,
    pub images: Vec<ImageRef>,
}

/// Parsed `/history/{prompt_id}` entry for a completed prompt.
///
/// Presence of the entry is the completion signal; `status` distinguishes
/// success from an execution failure.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub status: String,
    pub completed: bool,
    pub outputs: Vec<NodeOutput>,
}

impl HistoryRecord {
    /// All image references across every output node.
    pub fn images(&self) -> impl Iterator<Item = &ImageRef> {
        self.outputs.iter().flat_map(|n| n.images.iter())
    }
}

/// Snapshot of ComfyUI's queue state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub running: u32,
    pub pending: u32,
}

/// Terminal state of a completion wait.
#[derive(Debug, Clone)]
pub enum GenerationOutcome {
    /// The prompt appeared in history with its outputs.
    Completed { record: HistoryRecord },
    /// ComfyUI reported an execution-level failure.
    Failed { error: String },
    /// The caller's deadline elapsed before the prompt completed.
    TimedOut,
    /// The caller's cancel flag was raised.
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        let p = ProgressUpdate {
            current_step: 8,
            total_steps: 20,
        };
        assert_eq!(p.percent(), 40);
    }

    #[test]
    fn test_percent_zero_total() {
        let p = ProgressUpdate {
            current_step: 3,
            total_steps: 0,
        };
        assert_eq!(p.percent(), 0);
    }

    #[test]
    fn test_percent_clamped() {
        let p = ProgressUpdate {
            current_step: 25,
            total_steps: 20,
        };
        assert_eq!(p.percent(), 100);
    }

    #[test]
    fn test_image_ref_deserialize_defaults() {
        let img: ImageRef = serde_json::from_str(r#"{"filename": "x.png"}"#).unwrap();
        assert_eq!(img.filename, "x.png");
        assert_eq!(img.subfolder, "");
        assert_eq!(img.img_type, "output");
    }

    #[test]
    fn test_history_images_flattened() {
        let record = HistoryRecord {
            status: "success".into(),
            completed: true,
            outputs: vec![
                NodeOutput {
                    node_id: "9".into(),
                    images: vec![ImageRef {
                        filename: "a.png".into(),
                        subfolder: String::new(),
                        img_type: "output".into(),
                    }],
                },
                NodeOutput {
                    node_id: "12".into(),
                    images: vec![ImageRef {
                        filename: "b.png".into(),
                        subfolder: "batch".into(),
                        img_type: "output".into(),
                    }],
                },
            ],
        };
        let names: Vec<_> = record.images().map(|i| i.filename.as_str()).collect();
        assert_eq!(names, vec!["a.png", "b.png"]);
    }
}
