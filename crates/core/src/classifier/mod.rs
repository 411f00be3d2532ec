#[cfg(feature = "onnx")]
mod onnx;

use crate::emotion::{DistributionError, EmotionDistribution};
use crate::preprocess::FaceTensor;
use futures::future::BoxFuture;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;

#[cfg(feature = "onnx")]
pub use onnx::{OnnxModelLoader, TractEmotionClassifier};

const LOG_TARGET: &str = "classifier";

#[derive(thiserror::Error, Debug)]
pub enum ModelLoadError {
    #[error("model artifact not found: {0}")]
    Missing(PathBuf),
    #[error("model artifact is malformed: {0}")]
    Malformed(String),
    #[error("model backend failed: {0}")]
    Backend(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("classifier used before a successful load")]
    NotLoaded,
    #[error("input shape {actual:?} does not match model input {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("classifier output rejected: {0}")]
    BadOutput(#[from] DistributionError),
    #[error("inference backend failed: {0}")]
    Backend(String),
}

/// A loaded model. Read-only; safe to share between sessions.
pub trait EmotionClassifier: Send + Sync {
    fn input_shape(&self) -> &[usize];

    fn predict(&self, tensor: FaceTensor) -> BoxFuture<'_, Result<EmotionDistribution, InferenceError>>;
}

pub trait ClassifierLoader: Send + Sync {
    fn load(&self) -> BoxFuture<'_, Result<Arc<dyn EmotionClassifier>, ModelLoadError>>;
}

/// Load-once, read-many handle to the emotion model.
///
/// Clones share one cache. Concurrent `load` calls wait on a single load;
/// a failed load leaves the cache empty so the next call tries again.
#[derive(Clone)]
pub struct ClassifierAdapter {
    loader: Arc<dyn ClassifierLoader>,
    model: Arc<OnceCell<Arc<dyn EmotionClassifier>>>,
}

impl ClassifierAdapter {
    pub fn new<L: ClassifierLoader + 'static>(loader: L) -> Self {
        Self {
            loader: Arc::new(loader),
            model: Arc::new(OnceCell::new()),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    pub async fn load(&self) -> Result<(), ModelLoadError> {
        self.model
            .get_or_try_init(|| async {
                tracing::info!(target: LOG_TARGET, "loading emotion classifier");
                let model = self.loader.load().await.map_err(|e| {
                    tracing::error!(target: LOG_TARGET, error = %e, "classifier load failed");
                    e
                })?;
                tracing::info!(
                    target: LOG_TARGET,
                    input_shape = ?model.input_shape(),
                    "emotion classifier ready"
                );
                Ok::<_, ModelLoadError>(model)
            })
            .await?;
        Ok(())
    }

    pub async fn predict(&self, tensor: FaceTensor) -> Result<EmotionDistribution, InferenceError> {
        let model = self.model.get().ok_or(InferenceError::NotLoaded)?;
        if tensor.shape() != model.input_shape() {
            return Err(InferenceError::ShapeMismatch {
                expected: model.input_shape().to_vec(),
                actual: tensor.shape().to_vec(),
            });
        }
        model.predict(tensor).await
    }
}

impl std::fmt::Debug for ClassifierAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierAdapter")
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
