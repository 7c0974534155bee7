use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::capabilities::{LocalEngine, RawPrediction, RemotePredictor};
use crate::container::{Emitter, Machine};
use crate::error::ServiceError;
use crate::event::AnalysisEvent;
use crate::image_processing::MAX_INPUT_BYTES;

pub const ANALYSIS_FAULT_PREFIX: &str = "Failed to analyze image: ";
/// Confidence reported with a degraded result.
pub const DEGRADED_CONFIDENCE: f64 = 0.1;
pub const ERROR_CLASS: &str = "error";
pub const MANGROVE_CLASS: &str = "mangrove";
pub const NON_MANGROVE_CLASS: &str = "non_mangrove";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    Local,
    Remote,
    Error,
}

impl ModelSource {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub is_mangrove: bool,
    /// In `[0, 1]`.
    pub confidence: f64,
    /// In `[0, 1]`.
    pub probability: f64,
    pub predicted_class: String,
    pub model_source: ModelSource,
    pub message: String,
    pub image_path: PathBuf,
}

fn unit(value: Option<f64>) -> Option<f64> {
    value.map(|v| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 })
}

impl AnalysisResult {
    /// Fills gaps in a raw prediction and clamps its scores.
    #[must_use]
    pub fn from_prediction(raw: RawPrediction, source: ModelSource, image_path: &Path) -> Self {
        let probability = unit(raw.mangrove_probability);
        let confidence = unit(raw.confidence);

        let is_mangrove = raw
            .is_mangrove
            .or_else(|| probability.map(|p| p >= 0.5))
            .unwrap_or(false);
        let probability = probability.unwrap_or(if is_mangrove { confidence.unwrap_or(1.0) } else { 0.0 });
        let confidence = confidence.unwrap_or(if is_mangrove { probability } else { 1.0 - probability });

        let predicted_class = raw
            .prediction_class
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| if is_mangrove { MANGROVE_CLASS } else { NON_MANGROVE_CLASS }.to_owned());

        let message = raw.message.filter(|m| !m.trim().is_empty()).unwrap_or_else(|| {
            format!(
                "{} detected with {:.0}% confidence",
                if is_mangrove { "Mangrove" } else { "No mangrove" },
                confidence * 100.0
            )
        });

        Self {
            is_mangrove,
            confidence,
            probability,
            predicted_class,
            model_source: source,
            message,
            image_path: image_path.to_path_buf(),
        }
    }

    /// Result shown when neither engine produced a prediction.
    #[must_use]
    pub fn degraded(reason: &str, image_path: &Path) -> Self {
        Self {
            is_mangrove: false,
            confidence: DEGRADED_CONFIDENCE,
            probability: 0.0,
            predicted_class: ERROR_CLASS.to_owned(),
            model_source: ModelSource::Error,
            message: format!("Analysis unavailable: {reason}"),
            image_path: image_path.to_path_buf(),
        }
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.model_source == ModelSource::Error
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum AnalysisState {
    Initial,
    Loading,
    Success(AnalysisResult),
    Error {
        message: String,
        image_path: Option<PathBuf>,
    },
}

/// Outcome of the on-device step.
#[derive(Debug)]
pub enum LocalAttempt {
    Ok(RawPrediction),
    Failed(ServiceError),
    Unavailable,
}

pub struct AnalysisMachine {
    local: Arc<LocalEngine>,
    remote: Arc<dyn RemotePredictor>,
}

impl AnalysisMachine {
    pub fn new(local: Arc<LocalEngine>, remote: Arc<dyn RemotePredictor>) -> Self {
        Self { local, remote }
    }

    pub async fn attempt_local(&self, image_path: &Path) -> LocalAttempt {
        if !self.local.is_ready() {
            return LocalAttempt::Unavailable;
        }
        match tokio::fs::metadata(image_path).await {
            Ok(meta) if meta.len() > MAX_INPUT_BYTES as u64 => {
                return LocalAttempt::Failed(ServiceError::Invalid(format!(
                    "image of {} bytes exceeds {MAX_INPUT_BYTES}",
                    meta.len()
                )));
            }
            Ok(_) => {}
            Err(e) => return LocalAttempt::Failed(e.into()),
        }
        let bytes = match tokio::fs::read(image_path).await {
            Ok(bytes) => bytes,
            Err(e) => return LocalAttempt::Failed(e.into()),
        };
        match self.local.predict(bytes).await {
            Ok(raw) => LocalAttempt::Ok(raw),
            Err(e) => LocalAttempt::Failed(e),
        }
    }

    async fn remote_or_degraded(&self, image_path: &Path) -> AnalysisResult {
        match self.remote.predict_mangrove_from_image(image_path).await {
            Ok(raw) => AnalysisResult::from_prediction(raw, ModelSource::Remote, image_path),
            Err(e) => {
                warn!(error = %e, "remote prediction failed; reporting degraded result");
                AnalysisResult::degraded(&e.to_string(), image_path)
            }
        }
    }

    pub async fn analyze(&self, image_path: &Path) -> AnalysisResult {
        match self.attempt_local(image_path).await {
            LocalAttempt::Ok(raw) => AnalysisResult::from_prediction(raw, ModelSource::Local, image_path),
            LocalAttempt::Failed(e) => {
                info!(error = %e, "local prediction failed; falling back to remote");
                self.remote_or_degraded(image_path).await
            }
            LocalAttempt::Unavailable => {
                debug!("local engine not ready; using remote");
                self.remote_or_degraded(image_path).await
            }
        }
    }
}

#[async_trait]
impl Machine for AnalysisMachine {
    type Event = AnalysisEvent;
    type State = AnalysisState;
    type Error = ServiceError;

    const NAME: &'static str = "analysis";

    fn initial_state(&self) -> AnalysisState {
        AnalysisState::Initial
    }

    fn fault_state(&self, description: &str) -> AnalysisState {
        AnalysisState::Error {
            message: format!("{ANALYSIS_FAULT_PREFIX}{description}"),
            image_path: None,
        }
    }

    fn on_spawn(&self) {
        let local = Arc::clone(&self.local);
        tokio::spawn(async move {
            local.ensure_initialized().await;
        });
    }

    async fn handle(&self, event: AnalysisEvent, emitter: &Emitter<Self>) -> Result<(), ServiceError> {
        match event {
            AnalysisEvent::AnalysisRequested { image_path } => {
                if image_path.as_os_str().is_empty() {
                    emitter.emit(AnalysisState::Error {
                        message: format!("{ANALYSIS_FAULT_PREFIX}no image selected"),
                        image_path: None,
                    });
                    return Ok(());
                }
                emitter.emit(AnalysisState::Loading);
                let result = self.analyze(&image_path).await;
                emitter.emit(AnalysisState::Success(result));
            }
            AnalysisEvent::Reset => emitter.emit(AnalysisState::Initial),
        }
        Ok(())
    }
}
