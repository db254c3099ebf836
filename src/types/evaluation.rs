use serde::Serialize;
use std::time::Duration;

use super::{Label, PredictionResult};

/// Running accuracy counters for a batch evaluation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationMetrics {
    pub correct: u64,
    pub total: u64,
    pub normal_correct: u64,
    pub normal_total: u64,
    pub pneumonia_correct: u64,
    pub pneumonia_total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normal_accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pneumonia_accuracy: Option<f64>,
    /// Mean seconds per scored image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_processing_time: Option<f64>,
    #[serde(skip)]
    processing_time: Duration,
}

impl EvaluationMetrics {
    pub fn record(&mut self, true_label: Label, correct: bool, elapsed: Duration) {
        self.total += 1;
        self.processing_time += elapsed;
        if correct {
            self.correct += 1;
        }

        match true_label {
            Label::Normal => {
                self.normal_total += 1;
                if correct {
                    self.normal_correct += 1;
                }
            }
            Label::Pneumonia => {
                self.pneumonia_total += 1;
                if correct {
                    self.pneumonia_correct += 1;
                }
            }
        }
    }

    /// Derive the ratio fields. Leaves them unset when nothing was scored.
    pub fn finalize(&mut self) {
        if self.total == 0 {
            return;
        }

        self.accuracy = Some(ratio(self.correct, self.total));
        self.normal_accuracy = Some(ratio(self.normal_correct, self.normal_total));
        self.pneumonia_accuracy = Some(ratio(self.pneumonia_correct, self.pneumonia_total));
        self.avg_processing_time = Some(self.processing_time.as_secs_f64() / self.total as f64);
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Outcome for one sample image.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EvaluationItem {
    Scored {
        #[serde(flatten)]
        result: PredictionResult,
        true_label: Label,
        correct: bool,
    },
    Failed {
        filename: String,
        error: String,
    },
}

impl EvaluationItem {
    pub fn is_scored(&self) -> bool {
        matches!(self, EvaluationItem::Scored { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub metrics: EvaluationMetrics,
    pub results: Vec<EvaluationItem>,
}
