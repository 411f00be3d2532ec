use crate::classifier::{ClassifierLoader, EmotionClassifier, InferenceError, ModelLoadError, LOG_TARGET};
use crate::emotion::EmotionDistribution;
use crate::preprocess::{FaceTensor, INPUT_SHAPE};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tract_onnx::prelude::*;

type EmotionPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, TypedModel>;

/// Loads an ONNX export of the 48x48 grayscale, 7-class emotion CNN.
#[derive(Clone, Debug)]
pub struct OnnxModelLoader {
    path: PathBuf,
}

impl OnnxModelLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ClassifierLoader for OnnxModelLoader {
    fn load(&self) -> BoxFuture<'_, Result<Arc<dyn EmotionClassifier>, ModelLoadError>> {
        let path = self.path.clone();
        async move {
            if !path.is_file() {
                return Err(ModelLoadError::Missing(path));
            }
            // Graph optimisation is CPU-bound.
            let classifier =
                tokio::task::spawn_blocking(move || TractEmotionClassifier::from_path(&path))
                    .await
                    .map_err(|e| ModelLoadError::Backend(e.to_string()))??;
            Ok(Arc::new(classifier) as Arc<dyn EmotionClassifier>)
        }
        .boxed()
    }
}

pub struct TractEmotionClassifier {
    plan: EmotionPlan,
}

impl TractEmotionClassifier {
    pub fn from_path(path: &Path) -> Result<Self, ModelLoadError> {
        tracing::debug!(target: LOG_TARGET, path = %path.display(), "parsing onnx model");
        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|model| {
                model.with_input_fact(0, InferenceFact::dt_shape(DatumType::F32, INPUT_SHAPE))
            })
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(|e| ModelLoadError::Malformed(format!("{}: {e}", path.display())))?;
        Ok(Self { plan })
    }

    fn run(&self, tensor: &FaceTensor) -> Result<Vec<f32>, InferenceError> {
        let backend = |e: TractError| InferenceError::Backend(e.to_string());

        let input = Tensor::from_shape(tensor.shape(), tensor.as_slice()).map_err(backend)?;
        let outputs = self.plan.run(tvec!(input.into_tvalue())).map_err(backend)?;
        let output = outputs
            .first()
            .ok_or_else(|| InferenceError::Backend("model produced no outputs".to_owned()))?;
        let view = output.to_array_view::<f32>().map_err(backend)?;
        Ok(view.iter().copied().collect())
    }
}

impl EmotionClassifier for TractEmotionClassifier {
    fn input_shape(&self) -> &[usize] {
        &INPUT_SHAPE
    }

    fn predict(&self, tensor: FaceTensor) -> BoxFuture<'_, Result<EmotionDistribution, InferenceError>> {
        async move {
            if tensor.shape() != INPUT_SHAPE {
                return Err(InferenceError::ShapeMismatch {
                    expected: INPUT_SHAPE.to_vec(),
                    actual: tensor.shape().to_vec(),
                });
            }
            let values = self.run(&tensor)?;
            EmotionDistribution::from_slice(&values).map_err(InferenceError::from)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_artifact_is_reported() {
        let loader = OnnxModelLoader::new("/no/such/model.onnx");
        let err = loader.load().await.err().expect("fails");
        assert!(matches!(err, ModelLoadError::Missing(p) if p == Path::new("/no/such/model.onnx")));
    }

    #[tokio::test]
    async fn garbage_artifact_is_malformed() {
        let path = std::env::temp_dir().join(format!(
            "depression-screen-garbage-{}.onnx",
            std::process::id()
        ));
        std::fs::write(&path, b"\x07\x07\x07 definitely not protobuf").expect("write");

        let err = OnnxModelLoader::new(&path).load().await.err().expect("fails");
        assert!(matches!(err, ModelLoadError::Malformed(_)));

        let _ = std::fs::remove_file(&path);
    }
}
