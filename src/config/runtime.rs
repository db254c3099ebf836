use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::ml::Architecture;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub server: ServerSettings,
    pub models: ModelSettings,
    pub preprocess: PreprocessSettings,
    pub evaluation: EvaluationSettings,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            models: ModelSettings::default(),
            preprocess: PreprocessSettings::default(),
            evaluation: EvaluationSettings::default(),
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Server validation
        if self.server.max_upload_bytes == 0 {
            errors.push("server.max_upload_bytes must be > 0".to_string());
        }

        // Model validation
        if self.models.members.is_empty() {
            errors.push("models.members must list at least one member".to_string());
        }
        let mut seen = HashSet::new();
        for member in &self.models.members {
            if member.name.is_empty() || member.name.contains('.') {
                errors.push(format!("member name '{}' must be non-empty and contain no '.'", member.name));
            }
            if !seen.insert(member.name.as_str()) {
                errors.push(format!("duplicate member name '{}'", member.name));
            }
            if member.checkpoint.is_empty() {
                errors.push(format!("member '{}' has no checkpoint file", member.name));
            }
        }

        // Preprocessing validation
        if self.preprocess.crop_size == 0 || self.preprocess.crop_size > self.preprocess.resize {
            errors.push("preprocess.crop_size must be between 1 and preprocess.resize".to_string());
        }
        if self.preprocess.std.iter().any(|s| *s <= 0.0) {
            errors.push("preprocess.std must be > 0 for every channel".to_string());
        }

        // Evaluation validation
        if self.evaluation.extensions.is_empty() {
            errors.push("evaluation.extensions must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:8080".to_string(),
            ],
            max_upload_bytes: 20 * 1024 * 1024,
        }
    }
}

/// One ensemble member: which architecture to build and where its weights live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSpec {
    /// Also the parameter prefix inside a merged checkpoint.
    pub name: String,
    pub architecture: Architecture,
    pub checkpoint: String,
    /// Require an exact parameter-name match when loading.
    pub strict: bool,
}

impl MemberSpec {
    pub fn new(name: &str, architecture: Architecture, checkpoint: &str, strict: bool) -> Self {
        Self {
            name: name.to_string(),
            architecture,
            checkpoint: checkpoint.to_string(),
            strict,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    pub dir: PathBuf,
    pub merged_checkpoint: String,
    pub members: Vec<MemberSpec>,
}

impl ModelSettings {
    pub fn merged_path(&self) -> PathBuf {
        self.dir.join(&self.merged_checkpoint)
    }

    pub fn member_path(&self, member: &MemberSpec) -> PathBuf {
        self.dir.join(&member.checkpoint)
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models"),
            merged_checkpoint: "unified_ensemble_model.safetensors".to_string(),
            members: vec![
                MemberSpec::new("efficientnet", Architecture::EfficientNetB0, "efficientnet_pneumonia.pth", true),
                MemberSpec::new("convnext", Architecture::ConvNextTiny, "convnext_best.pth", false),
                MemberSpec::new("resnet", Architecture::ResNet50, "resnet_best.pth", false),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessSettings {
    pub resize: u32,
    pub crop_size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            resize: 256,
            crop_size: 256,
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSettings {
    pub samples_dir: PathBuf,
    pub default_limit: usize,
    pub extensions: Vec<String>,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            samples_dir: PathBuf::from("test_images/test"),
            default_limit: 20,
            extensions: vec!["jpeg".to_string()],
        }
    }
}
