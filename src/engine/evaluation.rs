use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::{FileUpload, InferenceEngine, UploadSource};
use crate::config::EvaluationSettings;
use crate::error::{XrayError, XrayResult};
use crate::types::{EvaluationItem, EvaluationMetrics, EvaluationReport, Label};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationRequest {
    /// `None` evaluates both classes, `limit / 2` images each.
    pub category: Option<Label>,
    pub limit: usize,
}

impl EvaluationRequest {
    /// Unknown category names select both classes.
    pub fn parse(category: Option<&str>, limit: usize) -> Self {
        Self {
            category: category.and_then(Label::from_category),
            limit,
        }
    }
}

/// A labelled sample image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub path: PathBuf,
    pub label: Label,
}

/// Runs labelled sample images through the inference engine and scores them.
#[derive(Debug, Clone)]
pub struct BatchEvaluator {
    samples_dir: PathBuf,
    extensions: Vec<String>,
}

impl BatchEvaluator {
    pub fn new(settings: &EvaluationSettings) -> Self {
        Self {
            samples_dir: settings.samples_dir.clone(),
            extensions: settings.extensions.clone(),
        }
    }

    /// Pick the sample images for `request`, in file-name order per class.
    pub fn collect_samples(&self, request: &EvaluationRequest) -> XrayResult<Vec<Sample>> {
        if !self.samples_dir.is_dir() {
            return Err(XrayError::SamplesDirMissing(self.samples_dir.clone()));
        }

        let samples = match request.category {
            Some(label) => self.list_class(label, request.limit)?,
            None => {
                let per_class = request.limit / 2;
                let mut samples = self.list_class(Label::Normal, per_class)?;
                samples.extend(self.list_class(Label::Pneumonia, per_class)?);
                samples
            }
        };

        if samples.is_empty() {
            return Err(XrayError::NoSamples);
        }
        Ok(samples)
    }

    fn list_class(&self, label: Label, limit: usize) -> XrayResult<Vec<Sample>> {
        let dir = self.samples_dir.join(label.category_dir());
        if !dir.is_dir() {
            warn!("Sample directory missing: {}", dir.display());
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_file() && self.has_sample_extension(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        Ok(paths
            .into_iter()
            .take(limit)
            .map(|path| Sample { path, label })
            .collect())
    }

    fn has_sample_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }

    /// Classify every selected sample, one at a time. A failing image becomes
    /// an error entry and is left out of the metrics.
    pub async fn run(
        &self,
        engine: &Arc<InferenceEngine>,
        request: &EvaluationRequest,
    ) -> XrayResult<EvaluationReport> {
        let samples = self.collect_samples(request)?;
        info!(
            "Evaluating {} sample image(s) from {}",
            samples.len(),
            self.samples_dir.display()
        );

        let mut metrics = EvaluationMetrics::default();
        let mut results = Vec::with_capacity(samples.len());

        for sample in samples {
            let upload = FileUpload::new(&sample.path);
            let started = Instant::now();
            match engine.predict(&upload).await {
                Ok(result) => {
                    let correct = result.prediction == sample.label;
                    metrics.record(sample.label, correct, started.elapsed());
                    results.push(EvaluationItem::Scored {
                        result,
                        true_label: sample.label,
                        correct,
                    });
                }
                Err(e) => {
                    warn!("Failed to evaluate {}: {}", upload.filename(), e);
                    results.push(EvaluationItem::Failed {
                        filename: upload.filename().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        metrics.finalize();
        let failed = results.iter().filter(|r| !r.is_scored()).count();
        info!(
            "Evaluation finished: {}/{} correct, {} failed",
            metrics.correct, metrics.total, failed
        );
        Ok(EvaluationReport { metrics, results })
    }
}
