use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Local};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Model architecture tag, selecting the graph-building strategy.
///
/// `Universal` covers SD1.5-style checkpoints and uses a conservative
/// denoise curve for image-to-image; `Sdxl` passes the caller's strength
/// through unmodified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelArchitecture {
    #[default]
    #[serde(alias = "sd15")]
    Universal,
    Sdxl,
}

/// Checkpoint file extensions ComfyUI will load.
pub const CHECKPOINT_EXTENSIONS: [&str; 3] = ["safetensors", "ckpt", "pt"];

/// One step of a workflow graph: an external node type plus its inputs.
///
/// Inputs are either scalar values or `[node_id, output_slot]` links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub class_type: String,
    pub inputs: BTreeMap<String, Value>,
}

/// A node-id-keyed workflow graph, serialized whole as the `/prompt` body.
///
/// Node ids are small integers as strings, assigned in insertion order.
/// The ordered map makes serialization deterministic: two graphs built from
/// identical requests serialize to byte-identical JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowGraph(BTreeMap<String, WorkflowNode>);

impl WorkflowGraph {
    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.0.get(id)
    }

    /// Iterate over `(id, node)` pairs in id order.
    pub fn nodes(&self) -> impl Iterator<Item = (&String, &WorkflowNode)> {
        self.0.iter()
    }

    /// Whether any node carries the given `class_type`.
    pub fn contains_class(&self, class_type: &str) -> bool {
        self.0.values().any(|n| n.class_type == class_type)
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The graph as a JSON value (the exact `/prompt` request shape).
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Check that every `[node_id, slot]` link names a node in this graph.
    pub fn validate_links(&self) -> std::result::Result<(), String> {
        for (id, node) in &self.0 {
            for (input, value) in &node.inputs {
                if let Some(pair) = value.as_array() {
                    if pair.len() == 2 && pair[0].is_string() && pair[1].is_u64() {
                        let target = pair[0].as_str().unwrap_or_default();
                        if !self.0.contains_key(target) {
                            return Err(format!(
                                "node {id} input {input} links to missing node {target}"
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Builds nodes with sequential string ids.
#[derive(Default)]
struct GraphAssembler {
    nodes: BTreeMap<String, WorkflowNode>,
    next_id: u32,
}

impl GraphAssembler {
    fn add(&mut self, class_type: &str, inputs: Value) -> String {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let inputs = match inputs {
            Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        self.nodes.insert(
            id.clone(),
            WorkflowNode {
                class_type: class_type.to_string(),
                inputs,
            },
        );
        id
    }

    fn finish(self) -> WorkflowGraph {
        WorkflowGraph(self.nodes)
    }
}

/// A `[node_id, output_slot]` link value.
fn link(node: &str, slot: u32) -> Value {
    json!([node, slot])
}

/// Coerce a checkpoint name to carry a known extension.
///
/// Names that already end in one of [`CHECKPOINT_EXTENSIONS`] pass through;
/// anything else gets `.safetensors` appended.
pub fn ensure_checkpoint_extension(name: &str) -> String {
    let has_known = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            CHECKPOINT_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(e))
        })
        .unwrap_or(false);
    if has_known {
        name.to_string()
    } else {
        format!("{name}.safetensors")
    }
}

/// Resolve the output filename prefix.
///
/// Priority: explicit prefix → stem of an explicit output filename →
/// timestamp-derived. The clock is passed in so resolution stays pure.
pub fn resolve_filename_prefix(
    explicit: Option<&str>,
    output_file: Option<&str>,
    now: DateTime<Local>,
) -> String {
    if let Some(prefix) = explicit.filter(|p| !p.is_empty()) {
        return prefix.to_string();
    }
    if let Some(stem) = output_file
        .and_then(|f| Path::new(f).file_stem())
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
    {
        return stem.to_string();
    }
    format!("comfy_{}", now.format("%Y%m%d_%H%M%S"))
}

// Image-to-image prompt adjustments. The preserve instruction anchors the
// sampler to the source content; the suffix counters identity/style drift.
const PRESERVE_CONTENT_PREFIX: &str =
    "Preserve the original composition and all content not being changed. ";
const ANTI_DRIFT_SUFFIX: &str = "deformed anatomy, altered identity, color shift, style drift";

/// Parameter set for one generation, and the workflow builder over it.
///
/// The seed is resolved at construction (random unless overridden with
/// [`seed`](Self::seed)), so [`build`](Self::build) is a pure function:
/// identical requests always produce byte-identical workflow JSON.
///
/// # Example
/// ```
/// use comfy_conductor::GenerationRequest;
///
/// let workflow = GenerationRequest::new("a cat in space", "dreamshaper_8.safetensors")
///     .negative("lowres, blurry")
///     .size(512, 768)
///     .steps(25)
///     .seed(12345)
///     .build();
///
/// assert!(workflow.node("1").is_some()); // CheckpointLoader node
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub checkpoint: String,
    pub architecture: ModelArchitecture,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg_scale: f64,
    pub sampler: String,
    pub scheduler: String,
    pub seed: i64,
    pub batch_size: u32,
    /// Server-side filename of an uploaded source image. `Some` switches
    /// the builder to the image-to-image topology.
    pub source_image: Option<String>,
    /// Image-to-image strength; ignored without a source image.
    pub strength: f64,
    pub filename_prefix: String,
}

impl GenerationRequest {
    /// Create a request with a prompt and checkpoint, a freshly rolled
    /// random seed, and sensible defaults for everything else
    /// (512x768, 25 steps, cfg 7.5, dpmpp_2m/karras).
    pub fn new(prompt: impl Into<String>, checkpoint: impl Into<String>) -> Self {
        Self {
            positive_prompt: prompt.into(),
            negative_prompt: String::new(),
            checkpoint: checkpoint.into(),
            architecture: ModelArchitecture::Universal,
            width: 512,
            height: 768,
            steps: 25,
            cfg_scale: 7.5,
            sampler: "dpmpp_2m".to_string(),
            scheduler: "karras".to_string(),
            seed: rand::rng().random_range(0..i64::MAX),
            batch_size: 1,
            source_image: None,
            strength: 0.75,
            filename_prefix: "ComfyUI".to_string(),
        }
    }

    /// Set the negative prompt.
    pub fn negative(mut self, prompt: impl Into<String>) -> Self {
        self.negative_prompt = prompt.into();
        self
    }

    /// Set output dimensions.
    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the number of sampling steps.
    pub fn steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    /// Set the classifier-free guidance scale.
    pub fn cfg_scale(mut self, cfg: f64) -> Self {
        self.cfg_scale = cfg;
        self
    }

    /// Set the sampler algorithm (e.g. "euler", "dpmpp_2m", "dpmpp_sde").
    pub fn sampler(mut self, sampler: impl Into<String>) -> Self {
        self.sampler = sampler.into();
        self
    }

    /// Set the noise scheduler (e.g. "normal", "karras", "exponential").
    pub fn scheduler(mut self, scheduler: impl Into<String>) -> Self {
        self.scheduler = scheduler.into();
        self
    }

    /// Pin the seed (overriding the random one rolled at construction).
    pub fn seed(mut self, seed: i64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the batch size (number of images per generation).
    pub fn batch_size(mut self, size: u32) -> Self {
        self.batch_size = size;
        self
    }

    /// Select the graph-building strategy for the checkpoint's architecture.
    pub fn architecture(mut self, architecture: ModelArchitecture) -> Self {
        self.architecture = architecture;
        self
    }

    /// Switch to image-to-image on the given server-side source filename.
    pub fn source_image(mut self, filename: impl Into<String>) -> Self {
        self.source_image = Some(filename.into());
        self
    }

    /// Set the image-to-image strength (how far to diverge from the source).
    pub fn strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }

    /// Set the output filename prefix in ComfyUI.
    pub fn filename_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.filename_prefix = prefix.into();
        self
    }

    /// Effective denoise for the sampler node.
    ///
    /// Text-to-image always samples from pure noise. For image-to-image the
    /// universal strategy damps the caller's strength (`strength × 0.6`,
    /// capped at 0.5) to keep the source recognizable; SDXL checkpoints
    /// take the strength unmodified.
    pub fn denoise(&self) -> f64 {
        if self.source_image.is_none() {
            return 1.0;
        }
        match self.architecture {
            ModelArchitecture::Universal => (self.strength * 0.6).min(0.5),
            ModelArchitecture::Sdxl => self.strength,
        }
    }

    /// Build the workflow graph for this request.
    ///
    /// Chooses the image-to-image topology when a source image is set, the
    /// text-to-image topology otherwise. Never fails: range validation of
    /// numeric parameters happens upstream.
    pub fn build(&self) -> WorkflowGraph {
        match self.source_image {
            Some(_) => self.build_img2img(),
            None => self.build_txt2img(),
        }
    }

    fn add_sampler(
        &self,
        g: &mut GraphAssembler,
        ckpt: &str,
        positive: &str,
        negative: &str,
        latent: &str,
    ) -> String {
        g.add(
            "KSampler",
            json!({
                "seed": self.seed,
                "steps": self.steps,
                "cfg": self.cfg_scale,
                "sampler_name": self.sampler,
                "scheduler": self.scheduler,
                "denoise": self.denoise(),
                "model": link(ckpt, 0),
                "positive": link(positive, 0),
                "negative": link(negative, 0),
                "latent_image": link(latent, 0),
            }),
        )
    }

    fn add_tail(&self, g: &mut GraphAssembler, ckpt: &str, sampler: &str) {
        let decode = g.add(
            "VAEDecode",
            json!({
                "samples": link(sampler, 0),
                "vae": link(ckpt, 2),
            }),
        );
        g.add(
            "SaveImage",
            json!({
                "filename_prefix": self.filename_prefix,
                "images": link(&decode, 0),
            }),
        );
    }

    fn build_txt2img(&self) -> WorkflowGraph {
        let mut g = GraphAssembler::default();
        let ckpt = g.add(
            "CheckpointLoaderSimple",
            json!({ "ckpt_name": ensure_checkpoint_extension(&self.checkpoint) }),
        );
        let latent = g.add(
            "EmptyLatentImage",
            json!({
                "width": self.width,
                "height": self.height,
                "batch_size": self.batch_size,
            }),
        );
        let positive = g.add(
            "CLIPTextEncode",
            json!({ "text": self.positive_prompt, "clip": link(&ckpt, 1) }),
        );
        let negative = g.add(
            "CLIPTextEncode",
            json!({ "text": self.negative_prompt, "clip": link(&ckpt, 1) }),
        );
        let sampler = self.add_sampler(&mut g, &ckpt, &positive, &negative, &latent);
        self.add_tail(&mut g, &ckpt, &sampler);
        g.finish()
    }

    fn build_img2img(&self) -> WorkflowGraph {
        let source = self.source_image.as_deref().unwrap_or_default();
        let positive_text = format!("{PRESERVE_CONTENT_PREFIX}{}", self.positive_prompt);
        let negative_text = if self.negative_prompt.is_empty() {
            ANTI_DRIFT_SUFFIX.to_string()
        } else {
            format!("{}, {ANTI_DRIFT_SUFFIX}", self.negative_prompt)
        };

        let mut g = GraphAssembler::default();
        let ckpt = g.add(
            "CheckpointLoaderSimple",
            json!({ "ckpt_name": ensure_checkpoint_extension(&self.checkpoint) }),
        );
        let load = g.add("LoadImage", json!({ "image": source }));
        let latent = g.add(
            "VAEEncode",
            json!({ "pixels": link(&load, 0), "vae": link(&ckpt, 2) }),
        );
        let positive = g.add(
            "CLIPTextEncode",
            json!({ "text": positive_text, "clip": link(&ckpt, 1) }),
        );
        let negative = g.add(
            "CLIPTextEncode",
            json!({ "text": negative_text, "clip": link(&ckpt, 1) }),
        );
        let sampler = self.add_sampler(&mut g, &ckpt, &positive, &negative, &latent);
        self.add_tail(&mut g, &ckpt, &sampler);
        g.finish()
    }
}
