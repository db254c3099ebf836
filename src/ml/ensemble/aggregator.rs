use candle_core::{Tensor, D};
use tracing::{debug, info};

use crate::error::{XrayError, XrayResult};
use crate::ml::Classifier;
use crate::types::NUM_CLASSES;

/// Ensemble member with its display name
struct NamedModel {
    name: String,
    model: Box<dyn Classifier>,
}

/// Ensemble predictor averaging the raw logits of its members
pub struct EnsemblePredictor {
    models: Vec<NamedModel>,
}

impl EnsemblePredictor {
    pub fn new() -> Self {
        Self { models: Vec::new() }
    }

    /// Add a member; members are evaluated in insertion order
    pub fn add_model(&mut self, name: &str, model: Box<dyn Classifier>) {
        info!("Ensemble: added model '{}'", name);
        self.models.push(NamedModel {
            name: name.to_string(),
            model,
        });
    }

    /// Raw logits of every member for the same input
    pub fn member_logits(&self, xs: &Tensor) -> XrayResult<Vec<Tensor>> {
        let batch = xs.dim(0)?;
        self.models
            .iter()
            .map(|nm| {
                let logits = nm.model.logits(xs)?;
                if logits.dims() != &[batch, NUM_CLASSES] {
                    return Err(XrayError::OutputShape(format!(
                        "model '{}' returned shape {:?}, expected [{}, {}]",
                        nm.name,
                        logits.dims(),
                        batch,
                        NUM_CLASSES
                    )));
                }
                Ok(logits)
            })
            .collect()
    }

    /// Elementwise mean of the members' logits, shape `[batch, NUM_CLASSES]`
    pub fn forward(&self, xs: &Tensor) -> XrayResult<Tensor> {
        if self.models.is_empty() {
            return Err(XrayError::ModelNotLoaded);
        }

        let outputs = self.member_logits(xs)?;
        let mut sum = outputs[0].clone();
        for logits in &outputs[1..] {
            sum = (sum + logits)?;
        }

        Ok(sum.affine(1.0 / outputs.len() as f64, 0.0)?)
    }

    /// Softmax over the averaged logits of a single image
    pub fn predict_probabilities(&self, xs: &Tensor) -> XrayResult<[f32; NUM_CLASSES]> {
        let averaged = self.forward(xs)?;
        let probabilities = candle_nn::ops::softmax(&averaged, D::Minus1)?
            .get(0)?
            .to_vec1::<f32>()?;

        debug!("Ensemble probabilities: {:?}", probabilities);

        probabilities
            .try_into()
            .map_err(|v: Vec<f32>| XrayError::OutputShape(format!("expected {} probabilities, got {}", NUM_CLASSES, v.len())))
    }

    pub fn is_loaded(&self) -> bool {
        !self.models.is_empty()
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn model_names(&self) -> Vec<&str> {
        self.models.iter().map(|nm| nm.name.as_str()).collect()
    }
}

impl Default for EnsemblePredictor {
    fn default() -> Self {
        Self::new()
    }
}
