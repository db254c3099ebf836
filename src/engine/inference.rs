use candle_core::Device;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::UploadSource;
use crate::config::ServiceConfig;
use crate::error::{XrayError, XrayResult};
use crate::ml::{select_device, EnsemblePredictor, MemberStatus, ModelLoader, Preprocessor};
use crate::types::PredictionResult;

/// Read-only handle shared by every request: the loaded ensemble (if any),
/// the preprocessing pipeline and the device tensors live on.
pub struct InferenceEngine {
    predictor: Option<EnsemblePredictor>,
    preprocessor: Preprocessor,
    device: Device,
    members: Vec<MemberStatus>,
}

impl InferenceEngine {
    pub fn new(
        predictor: Option<EnsemblePredictor>,
        preprocessor: Preprocessor,
        device: Device,
        members: Vec<MemberStatus>,
    ) -> Self {
        Self {
            predictor,
            preprocessor,
            device,
            members,
        }
    }

    /// Select a device and load the ensemble described by `config`.
    pub fn from_config(config: &ServiceConfig) -> Self {
        let device = select_device();
        let outcome = ModelLoader::new(config.models.clone(), device.clone()).load();
        Self::new(
            outcome.predictor,
            Preprocessor::new(&config.preprocess),
            device,
            outcome.members,
        )
    }

    pub fn is_loaded(&self) -> bool {
        self.predictor.as_ref().map_or(false, |p| p.is_loaded())
    }

    pub fn model_count(&self) -> usize {
        self.predictor.as_ref().map_or(0, |p| p.model_count())
    }

    pub fn model_names(&self) -> Vec<String> {
        self.predictor
            .as_ref()
            .map(|p| p.model_names().into_iter().map(String::from).collect())
            .unwrap_or_default()
    }

    pub fn members(&self) -> &[MemberStatus] {
        &self.members
    }

    /// Classify encoded image bytes. Blocks for the duration of the forward pass.
    pub fn classify(&self, filename: &str, bytes: &[u8]) -> XrayResult<PredictionResult> {
        let predictor = self.predictor.as_ref().ok_or(XrayError::ModelNotLoaded)?;

        let started = Instant::now();
        let input = self.preprocessor.tensor_from_bytes(bytes, &self.device)?;
        let probabilities = predictor.predict_probabilities(&input)?;
        let result = PredictionResult::from_probabilities(filename, probabilities);

        debug!(
            "{} -> {} ({:.2}%) in {:?}",
            filename,
            result.prediction,
            result.confidence,
            started.elapsed()
        );
        Ok(result)
    }

    /// Read the upload and classify it on the blocking pool.
    pub async fn predict(self: &Arc<Self>, upload: &dyn UploadSource) -> XrayResult<PredictionResult> {
        if !self.is_loaded() {
            return Err(XrayError::ModelNotLoaded);
        }

        let filename = upload.filename().to_string();
        let bytes = upload.read().await?;
        info!("Received image: {} ({} bytes)", filename, bytes.len());

        let engine = Arc::clone(self);
        tokio::task::spawn_blocking(move || engine.classify(&filename, &bytes)).await?
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::PreprocessSettings;
    use crate::ml::FixedLogits;

    pub fn engine_with_logits(members: &[Vec<f32>]) -> Arc<InferenceEngine> {
        let mut predictor = EnsemblePredictor::new();
        for (i, logits) in members.iter().enumerate() {
            predictor.add_model(&format!("fixed{}", i), Box::new(FixedLogits(logits.clone())));
        }
        let preprocess = PreprocessSettings {
            resize: 32,
            crop_size: 32,
            ..PreprocessSettings::default()
        };
        Arc::new(InferenceEngine::new(
            predictor.is_loaded().then_some(predictor),
            Preprocessor::new(&preprocess),
            Device::Cpu,
            Vec::new(),
        ))
    }

    pub fn unloaded_engine() -> Arc<InferenceEngine> {
        engine_with_logits(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::engine::MemoryUpload;
    use crate::ml::preprocess::encode_png;
    use crate::types::Label;
    use image::{Rgb, RgbImage};

    fn png() -> Vec<u8> {
        encode_png(&RgbImage::from_pixel(20, 20, Rgb([90, 90, 90])))
    }

    #[tokio::test]
    async fn test_predict_reports_argmax_and_percentages() {
        let engine = engine_with_logits(&[vec![0.0, 2.0], vec![0.0, 1.0]]);
        let upload = MemoryUpload::new("chest.png", png());

        let result = engine.predict(&upload).await.unwrap();
        assert_eq!(result.filename, "chest.png");
        assert_eq!(result.prediction, Label::Pneumonia);
        assert!(result.confidence > 50.0 && result.confidence <= 100.0);
        let total = result.probabilities.normal + result.probabilities.pneumonia;
        assert!((total - 100.0).abs() < 1e-3);
        assert_eq!(result.confidence, result.probabilities.pneumonia);
    }

    #[tokio::test]
    async fn test_unloaded_engine_refuses_to_predict() {
        let engine = unloaded_engine();
        assert!(!engine.is_loaded());
        assert_eq!(engine.model_count(), 0);

        let err = engine
            .predict(&MemoryUpload::new("chest.png", png()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Model not loaded properly");
    }

    #[tokio::test]
    async fn test_undecodable_upload_is_an_error() {
        let engine = engine_with_logits(&[vec![1.0, 0.0]]);
        let err = engine
            .predict(&MemoryUpload::new("notes.txt", b"hello".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, XrayError::InvalidImage(_)));
    }

    #[test]
    fn test_classify_is_deterministic() {
        let engine = engine_with_logits(&[vec![0.3, 0.1], vec![0.2, 0.6]]);
        let bytes = png();
        let first = engine.classify("a.png", &bytes).unwrap();
        let second = engine.classify("a.png", &bytes).unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.model_names(), vec!["fixed0", "fixed1"]);
    }
}
