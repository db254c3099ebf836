use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::{convnext, efficientnet, resnet};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Anything that maps a `[batch, 3, H, W]` image tensor to raw class logits.
#[cfg_attr(test, mockall::automock)]
pub trait Classifier: Send + Sync {
    fn logits(&self, xs: &Tensor) -> candle_core::Result<Tensor>;
}

/// Pretrained architectures an ensemble member can be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "efficientnet_b0")]
    EfficientNetB0,
    #[serde(rename = "convnext_tiny")]
    ConvNextTiny,
    #[serde(rename = "resnet50")]
    ResNet50,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Architecture::EfficientNetB0 => "efficientnet_b0",
            Architecture::ConvNextTiny => "convnext_tiny",
            Architecture::ResNet50 => "resnet50",
        }
    }

    /// Instantiate the architecture with a `num_classes`-way head, pulling
    /// every parameter from `vb`. The builder is owned so the returned
    /// modules can outlive it.
    pub fn build(&self, num_classes: usize, vb: VarBuilder<'static>) -> candle_core::Result<Backbone> {
        let module: Box<dyn Module + Send + Sync> = match self {
            Architecture::EfficientNetB0 => Box::new(efficientnet::EfficientNet::new(
                vb,
                efficientnet::MBConvConfig::b0(),
                num_classes,
            )?),
            Architecture::ConvNextTiny => {
                Box::new(convnext::convnext(&convnext::Config::tiny(), num_classes, vb)?)
            }
            Architecture::ResNet50 => Box::new(resnet::resnet50(num_classes, vb)?),
        };

        Ok(Backbone { module })
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A built architecture ready for inference.
pub struct Backbone {
    module: Box<dyn Module + Send + Sync>,
}

impl Classifier for Backbone {
    fn logits(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.module.forward(xs)
    }
}

/// Test double that ignores its input and emits the same logits for every row.
#[cfg(test)]
pub struct FixedLogits(pub Vec<f32>);

#[cfg(test)]
impl Classifier for FixedLogits {
    fn logits(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let batch = xs.dim(0)?;
        Tensor::from_slice(&self.0, (1, self.0.len()), xs.device())?.repeat((batch, 1))
    }
}
