use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::{InferenceEngine, RawPrediction};
use crate::error::ServiceError;

/// Shared handle that initializes an [`InferenceEngine`] at most once.
///
/// Readiness is a plain atomic load so the analysis handler never waits on
/// an initialization that is still running.
pub struct LocalEngine {
    engine: Arc<dyn InferenceEngine>,
    init: OnceCell<bool>,
    ready: AtomicBool,
}

impl LocalEngine {
    pub fn new(engine: Arc<dyn InferenceEngine>) -> Self {
        Self {
            engine,
            init: OnceCell::new(),
            ready: AtomicBool::new(false),
        }
    }

    /// Runs `initialize` on first call; later and concurrent calls share
    /// that outcome.
    pub async fn ensure_initialized(&self) -> bool {
        let ok = *self
            .init
            .get_or_init(|| async {
                let ok = self.engine.initialize().await;
                if ok {
                    info!("local inference engine ready");
                } else {
                    warn!("local inference engine unavailable; remote prediction only");
                }
                ok
            })
            .await;
        self.ready.store(ok, Ordering::Release);
        ok
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) && self.engine.is_model_loaded()
    }

    pub async fn predict(&self, image: Vec<u8>) -> Result<RawPrediction, ServiceError> {
        self.engine.predict_mangrove(image).await
    }
}

/// Engine for builds or devices without an on-device model.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLocalEngine;

#[async_trait]
impl InferenceEngine for NoLocalEngine {
    async fn initialize(&self) -> bool {
        false
    }

    fn is_model_loaded(&self) -> bool {
        false
    }

    async fn predict_mangrove(&self, _image: Vec<u8>) -> Result<RawPrediction, ServiceError> {
        Err(ServiceError::Inference("no local model".into()))
    }
}
