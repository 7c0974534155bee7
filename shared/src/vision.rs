//! On-device mangrove classifier backed by ONNX Runtime.

use async_trait::async_trait;
use ndarray::Array4;
use ort::session::Session;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::capabilities::{InferenceEngine, RawPrediction};
use crate::error::ServiceError;
use crate::image_processing::{self, ImageError, Layout};

// =============================================================================
// Constants
// =============================================================================

/// Used when the model declares a dynamic spatial size.
const DEFAULT_INPUT_SIZE: u32 = 224;
const MAX_INPUT_SIDE: u32 = 1024;
/// Model files beyond this are not a mobile classifier.
const MAX_MODEL_BYTES: u64 = 512 * 1024 * 1024;

#[derive(thiserror::Error, Debug)]
pub enum VisionError {
    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("model file unreadable: {0}")]
    ModelFile(String),

    #[error("model configuration mismatch: {0}")]
    ModelMismatch(String),

    #[error("inference engine error")]
    InferenceEngine(String),

    #[error("invalid model output: {0}")]
    InvalidOutput(String),

    #[error("model not loaded")]
    NotLoaded,
}

// ORT messages can be long and carry file paths; keep them in logs only.
impl From<ort::Error> for VisionError {
    fn from(e: ort::Error) -> Self {
        tracing::error!(error = %e, "ORT error");
        Self::InferenceEngine("internal inference error".into())
    }
}

impl From<VisionError> for ServiceError {
    fn from(e: VisionError) -> Self {
        Self::Inference(e.to_string())
    }
}

// =============================================================================
// Model
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputKind {
    /// One value: mangrove score.
    Single,
    /// Two values: `[non_mangrove, mangrove]`.
    Pair,
}

struct MangroveModel {
    session: Mutex<Session>,
    output_name: String,
    input_width: u32,
    input_height: u32,
    layout: Layout,
    output: OutputKind,
}

impl MangroveModel {
    #[instrument(skip(bytes), fields(model_size = bytes.len()))]
    fn load(bytes: &[u8]) -> Result<Self, VisionError> {
        let session = Session::builder()?.commit_from_memory(bytes)?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| VisionError::ModelMismatch("model has no inputs".into()))?;
        let dims: Vec<i64> = input
            .input_type
            .tensor_dimensions()
            .ok_or_else(|| VisionError::ModelMismatch("input is not a tensor".into()))?
            .iter()
            .copied()
            .collect();
        let (layout, input_height, input_width) = input_geometry(&dims)?;

        let output = session
            .outputs
            .first()
            .ok_or_else(|| VisionError::ModelMismatch("model has no outputs".into()))?;
        let output_name = output.name.clone();
        let out_dims: Vec<i64> = output
            .output_type
            .tensor_dimensions()
            .ok_or_else(|| VisionError::ModelMismatch("output is not a tensor".into()))?
            .iter()
            .copied()
            .collect();
        let output_kind = match out_dims.last().copied() {
            Some(1) => OutputKind::Single,
            Some(2) => OutputKind::Pair,
            other => {
                return Err(VisionError::ModelMismatch(format!(
                    "expected 1 or 2 output values, got {other:?}"
                )))
            }
        };

        debug!(
            input = %format!("{input_width}x{input_height}"),
            ?layout,
            ?output_kind,
            "mangrove model loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            output_name,
            input_width,
            input_height,
            layout,
            output: output_kind,
        })
    }

    fn classify(&self, image: &[u8], threshold: f32) -> Result<RawPrediction, VisionError> {
        let started = Instant::now();
        let tensor = image_processing::to_tensor(image, self.input_width, self.input_height, self.layout)?;
        let array = Array4::from_shape_vec(tensor.shape(), tensor.data)
            .map_err(|e| VisionError::ModelMismatch(e.to_string()))?;
        let input = ort::value::Tensor::from_array(array)?;

        let scores: Vec<f32> = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| VisionError::InferenceEngine("session lock poisoned".into()))?;
            let outputs = session.run(ort::inputs![input])?;
            let value = outputs
                .get(self.output_name.as_str())
                .ok_or_else(|| VisionError::InvalidOutput("missing output node".into()))?;
            let (_shape, data) = value.try_extract_tensor::<f32>()?;
            data.to_vec()
        };

        let probability = mangrove_probability(self.output, &scores)?;
        let is_mangrove = probability >= threshold;
        let confidence = if is_mangrove { probability } else { 1.0 - probability };

        debug!(
            probability,
            is_mangrove,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "local classification"
        );

        Ok(RawPrediction {
            is_mangrove: Some(is_mangrove),
            confidence: Some(f64::from(confidence)),
            mangrove_probability: Some(f64::from(probability)),
            prediction_class: Some(if is_mangrove { "mangrove" } else { "non_mangrove" }.into()),
            message: None,
        })
    }
}

/// `(layout, height, width)` from an `NCHW` or `NHWC` input shape.
fn input_geometry(dims: &[i64]) -> Result<(Layout, u32, u32), VisionError> {
    if dims.len() != 4 {
        return Err(VisionError::ModelMismatch(format!("expected 4D input, got {}D", dims.len())));
    }
    let side = |d: i64| -> Result<u32, VisionError> {
        if d <= 0 {
            return Ok(DEFAULT_INPUT_SIZE);
        }
        u32::try_from(d)
            .ok()
            .filter(|s| *s <= MAX_INPUT_SIDE)
            .ok_or_else(|| VisionError::ModelMismatch(format!("input side {d} too large")))
    };
    match (dims[1], dims[3]) {
        (3, _) => Ok((Layout::Chw, side(dims[2])?, side(dims[3])?)),
        (_, 3) => Ok((Layout::Hwc, side(dims[1])?, side(dims[2])?)),
        _ => Err(VisionError::ModelMismatch(format!("no RGB channel axis in {dims:?}"))),
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Models exported with a final activation already emit probabilities;
/// raw logits are squashed here.
fn mangrove_probability(kind: OutputKind, scores: &[f32]) -> Result<f32, VisionError> {
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(VisionError::InvalidOutput("non-finite score".into()));
    }
    match (kind, scores) {
        (OutputKind::Single, [s]) if (0.0..=1.0).contains(s) => Ok(*s),
        (OutputKind::Single, [s]) => Ok(sigmoid(*s)),
        (OutputKind::Pair, [a, b]) if *a >= 0.0 && *b >= 0.0 && ((a + b) - 1.0).abs() < 1e-3 => Ok(*b),
        (OutputKind::Pair, [a, b]) => {
            let m = a.max(*b);
            let (ea, eb) = ((a - m).exp(), (b - m).exp());
            Ok(eb / (ea + eb))
        }
        _ => Err(VisionError::InvalidOutput(format!(
            "expected {} scores, got {}",
            if kind == OutputKind::Single { 1 } else { 2 },
            scores.len()
        ))),
    }
}

// =============================================================================
// OnnxMangroveClassifier
// =============================================================================

/// [`InferenceEngine`] that loads an ONNX model file on `initialize`.
///
/// Inference runs on the blocking pool; the session itself is serialized.
pub struct OnnxMangroveClassifier {
    model_path: PathBuf,
    threshold: f32,
    model: OnceLock<Arc<MangroveModel>>,
}

impl OnnxMangroveClassifier {
    pub fn new(model_path: impl Into<PathBuf>, threshold: f32) -> Self {
        Self {
            model_path: model_path.into(),
            threshold: threshold.clamp(0.0, 1.0),
            model: OnceLock::new(),
        }
    }

    async fn load(&self) -> Result<MangroveModel, VisionError> {
        let size = tokio::fs::metadata(&self.model_path)
            .await
            .map_err(|e| VisionError::ModelFile(e.to_string()))?
            .len();
        if size > MAX_MODEL_BYTES {
            return Err(VisionError::ModelFile(format!("{size} bytes exceeds {MAX_MODEL_BYTES}")));
        }
        let bytes = tokio::fs::read(&self.model_path)
            .await
            .map_err(|e| VisionError::ModelFile(e.to_string()))?;

        tokio::task::spawn_blocking(move || MangroveModel::load(&bytes))
            .await
            .map_err(|e| VisionError::InferenceEngine(e.to_string()))?
    }
}

#[async_trait]
impl InferenceEngine for OnnxMangroveClassifier {
    #[instrument(skip(self), fields(path = %self.model_path.display()))]
    async fn initialize(&self) -> bool {
        if self.model.get().is_some() {
            return true;
        }
        match self.load().await {
            Ok(model) => {
                let _ = self.model.set(Arc::new(model));
                info!("on-device model ready");
                true
            }
            Err(e) => {
                warn!(error = %e, "on-device model failed to load");
                false
            }
        }
    }

    fn is_model_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    #[instrument(skip_all, fields(image_size = image.len()))]
    async fn predict_mangrove(&self, image: Vec<u8>) -> Result<RawPrediction, ServiceError> {
        let model = self.model.get().cloned().ok_or(VisionError::NotLoaded)?;
        let threshold = self.threshold;

        let prediction = tokio::task::spawn_blocking(move || model.classify(&image, threshold))
            .await
            .map_err(|e| ServiceError::Inference(e.to_string()))??;
        Ok(prediction)
    }
}
