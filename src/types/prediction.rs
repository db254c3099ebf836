use serde::{Serialize, Serializer};

use super::{Label, NUM_CLASSES};

/// Render a percentage the way the API reports it: `"87.32%"`.
pub fn format_percent(value: f32) -> String {
    format!("{:.2}%", value)
}

fn as_percent<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_percent(*value))
}

/// Per-class probabilities, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassProbabilities {
    #[serde(rename = "Normal", serialize_with = "as_percent")]
    pub normal: f32,
    #[serde(rename = "Pneumonia", serialize_with = "as_percent")]
    pub pneumonia: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub filename: String,
    pub prediction: Label,
    /// Probability of the predicted class, in percent.
    #[serde(serialize_with = "as_percent")]
    pub confidence: f32,
    pub probabilities: ClassProbabilities,
}

impl PredictionResult {
    /// Build a result from softmax output (fractions summing to 1).
    ///
    /// Ties go to the lower class index.
    pub fn from_probabilities(filename: impl Into<String>, probabilities: [f32; NUM_CLASSES]) -> Self {
        let mut best = 0;
        for (i, p) in probabilities.iter().enumerate().skip(1) {
            if *p > probabilities[best] {
                best = i;
            }
        }

        let prediction = Label::from_index(best).unwrap_or(Label::Normal);
        let percent = probabilities.map(|p| p * 100.0);

        Self {
            filename: filename.into(),
            prediction,
            confidence: percent[best],
            probabilities: ClassProbabilities {
                normal: percent[Label::Normal.index()],
                pneumonia: percent[Label::Pneumonia.index()],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_argmax_selects_prediction() {
        let result = PredictionResult::from_probabilities("scan.jpeg", [0.12, 0.88]);
        assert_eq!(result.prediction, Label::Pneumonia);
        assert!((result.confidence - 88.0).abs() < 1e-4);
        let total = result.probabilities.normal + result.probabilities.pneumonia;
        assert!((total - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_tie_prefers_first_class() {
        let result = PredictionResult::from_probabilities("scan.jpeg", [0.5, 0.5]);
        assert_eq!(result.prediction, Label::Normal);
    }

    #[test]
    fn test_json_shape() {
        let result = PredictionResult::from_probabilities("person1_virus_6.jpeg", [0.9734, 0.0266]);
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(
            value,
            json!({
                "filename": "person1_virus_6.jpeg",
                "prediction": "Normal",
                "confidence": "97.34%",
                "probabilities": {
                    "Normal": "97.34%",
                    "Pneumonia": "2.66%"
                }
            })
        );
    }

    #[test]
    fn test_format_percent_rounds_to_two_places() {
        assert_eq!(format_percent(99.996), "100.00%");
        assert_eq!(format_percent(0.0), "0.00%");
        assert_eq!(format_percent(12.3456), "12.35%");
    }
}
