use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::workflow::ModelArchitecture;

/// One entry of the supported-models list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    /// User-facing model name.
    pub name: String,
    /// Checkpoint filename on disk.
    pub file_name: String,
    /// Direct download URL, if any.
    #[serde(default)]
    pub download_url: Option<String>,
    /// HuggingFace repo the checkpoint comes from.
    #[serde(default)]
    pub hugging_face_repo: Option<String>,
    /// Architecture tag selecting the graph-building strategy.
    #[serde(default)]
    pub architecture: ModelArchitecture,
    /// Whether this model is usable with the generation pipeline.
    #[serde(default = "default_compatible")]
    pub compatible: bool,
}

fn default_compatible() -> bool {
    true
}

/// The static supported-models list.
///
/// Loadable from a JSON file, or use [`ModelCatalog::builtin`] for the
/// known set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self { models }
    }

    /// Load a catalog from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// The built-in supported-models list.
    pub fn builtin() -> Self {
        Self::new(vec![
            ModelDescriptor {
                name: "DreamShaper 8".into(),
                file_name: "dreamshaper_8.safetensors".into(),
                download_url: Some(
                    "https://huggingface.co/Lykon/DreamShaper/resolve/main/DreamShaper_8_pruned.safetensors".into(),
                ),
                hugging_face_repo: Some("Lykon/DreamShaper".into()),
                architecture: ModelArchitecture::Universal,
                compatible: true,
            },
            ModelDescriptor {
                name: "Deliberate v3".into(),
                file_name: "deliberate_v3.safetensors".into(),
                download_url: None,
                hugging_face_repo: Some("XpucT/Deliberate".into()),
                architecture: ModelArchitecture::Universal,
                compatible: true,
            },
            ModelDescriptor {
                name: "SDXL Base 1.0".into(),
                file_name: "sd_xl_base_1.0.safetensors".into(),
                download_url: Some(
                    "https://huggingface.co/stabilityai/stable-diffusion-xl-base-1.0/resolve/main/sd_xl_base_1.0.safetensors".into(),
                ),
                hugging_face_repo: Some("stabilityai/stable-diffusion-xl-base-1.0".into()),
                architecture: ModelArchitecture::Sdxl,
                compatible: true,
            },
            ModelDescriptor {
                name: "Juggernaut XL".into(),
                file_name: "juggernautXL_v9.safetensors".into(),
                download_url: None,
                hugging_face_repo: Some("RunDiffusion/Juggernaut-XL-v9".into()),
                architecture: ModelArchitecture::Sdxl,
                compatible: true,
            },
            ModelDescriptor {
                name: "Stable Diffusion 2.1".into(),
                file_name: "v2-1_768-ema-pruned.safetensors".into(),
                download_url: None,
                hugging_face_repo: Some("stabilityai/stable-diffusion-2-1".into()),
                architecture: ModelArchitecture::Universal,
                compatible: false,
            },
        ])
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    /// Look up a model by user-facing name or checkpoint filename,
    /// case-insensitively.
    pub fn find(&self, name: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| {
            m.name.eq_ignore_ascii_case(name) || m.file_name.eq_ignore_ascii_case(name)
        })
    }

    /// The models usable with the generation pipeline.
    pub fn compatible(&self) -> Vec<&ModelDescriptor> {
        self.models.iter().filter(|m| m.compatible).collect()
    }
}

/// Resolves local model directories for a ComfyUI installation.
///
/// Honors the installation's `extra_model_paths.yaml` override file when
/// present. Resolution never fails: absence of any installation still
/// yields a best-guess path.
#[derive(Debug, Clone)]
pub struct ModelPathResolver {
    install_dir: PathBuf,
    override_file: PathBuf,
}

impl ModelPathResolver {
    /// Create a resolver rooted at the ComfyUI install directory. The
    /// override file defaults to `<install>/extra_model_paths.yaml`.
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        let install_dir = install_dir.into();
        let override_file = install_dir.join("extra_model_paths.yaml");
        Self {
            install_dir,
            override_file,
        }
    }

    /// Use a custom override file location.
    pub fn with_override_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.override_file = path.into();
        self
    }

    /// Best local directory for a model subfolder (e.g. "checkpoints").
    ///
    /// Search order: a named override section carrying both `base_path` and
    /// the subfolder, then a legacy top-level subfolder mapping — either is
    /// returned immediately, existing or not, because it is explicit user
    /// configuration. Otherwise `<install>/models/<subfolder>` when it
    /// exists, or that same path as a last resort.
    pub fn resolve(&self, subfolder: &str) -> PathBuf {
        let overrides = self.override_paths(subfolder);
        if let Some(first) = overrides.into_iter().next() {
            return first;
        }
        self.install_dir.join("models").join(subfolder)
    }

    /// Every candidate directory for a subfolder, explicit configuration
    /// first, with no existence filtering.
    pub fn candidates(&self, subfolder: &str) -> Vec<PathBuf> {
        let mut out = self.override_paths(subfolder);
        out.push(self.install_dir.join("models").join(subfolder));
        out
    }

    /// Search every candidate directory for a checkpoint file.
    pub fn find_checkpoint(&self, file_name: &str) -> Option<PathBuf> {
        self.candidates("checkpoints")
            .into_iter()
            .map(|dir| dir.join(file_name))
            .find(|p| p.is_file())
    }

    /// Candidate directories from the YAML override file. Missing or
    /// malformed files yield an empty list, never an error.
    fn override_paths(&self, subfolder: &str) -> Vec<PathBuf> {
        let text = match std::fs::read_to_string(&self.override_file) {
            Ok(t) => t,
            Err(_) => return Vec::new(),
        };
        let doc: serde_yaml::Value = match serde_yaml::from_str(&text) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(
                    file = %self.override_file.display(),
                    "ignoring unparseable model path override file: {e}"
                );
                return Vec::new();
            }
        };
        let Some(mapping) = doc.as_mapping() else {
            return Vec::new();
        };

        let mut sectioned = Vec::new();
        let mut legacy = Vec::new();
        for (key, value) in mapping {
            if value.is_mapping() {
                let base = value.get("base_path").and_then(|v| v.as_str());
                if let (Some(base), Some(sub)) = (base, value.get(subfolder)) {
                    for rel in yaml_path_list(sub) {
                        sectioned.push(Path::new(base).join(rel));
                    }
                }
            } else if key.as_str() == Some(subfolder) {
                legacy.extend(yaml_path_list(value).into_iter().map(PathBuf::from));
            }
        }
        sectioned.extend(legacy);
        sectioned
    }
}

/// A YAML path value as a list of cleaned path strings. Handles plain
/// strings, multiline strings (one path per line), and sequences.
fn yaml_path_list(value: &serde_yaml::Value) -> Vec<String> {
    let clean = |s: &str| s.trim().trim_end_matches('/').to_string();
    match value {
        serde_yaml::Value::String(s) => s
            .lines()
            .map(clean)
            .filter(|s| !s.is_empty())
            .collect(),
        serde_yaml::Value::Sequence(seq) => seq
            .iter()
            .filter_map(|v| v.as_str())
            .map(clean)
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}
