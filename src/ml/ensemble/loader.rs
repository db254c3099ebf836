use candle_core::Device;
use candle_nn::VarBuilder;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::EnsemblePredictor;
use crate::config::{MemberSpec, ModelSettings};
use crate::error::XrayResult;
use crate::ml::{Checkpoint, Classifier, Instantiated, LoadPolicy};
use crate::types::NUM_CLASSES;

/// Builds the classifier for a member from a `VarBuilder`.
pub type ModelFactory = Arc<
    dyn Fn(&MemberSpec, VarBuilder<'static>) -> candle_core::Result<Box<dyn Classifier>> + Send + Sync,
>;

/// Factory backed by the configured pretrained architectures.
pub fn architecture_factory() -> ModelFactory {
    Arc::new(|member: &MemberSpec, vb: VarBuilder<'static>| {
        let backbone = member.architecture.build(NUM_CLASSES, vb)?;
        Ok(Box::new(backbone) as Box<dyn Classifier>)
    })
}

/// Where a member's weights came from and how the load went.
#[derive(Debug, Clone, Serialize)]
pub struct MemberStatus {
    pub name: String,
    pub architecture: String,
    pub source: PathBuf,
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub missing_parameters: usize,
    pub unexpected_parameters: usize,
}

pub struct LoadOutcome {
    /// `None` when no member could be loaded.
    pub predictor: Option<EnsemblePredictor>,
    pub members: Vec<MemberStatus>,
}

impl LoadOutcome {
    pub fn loaded_count(&self) -> usize {
        self.members.iter().filter(|m| m.loaded).count()
    }
}

pub struct ModelLoader {
    settings: ModelSettings,
    device: Device,
    factory: ModelFactory,
}

impl ModelLoader {
    pub fn new(settings: ModelSettings, device: Device) -> Self {
        Self::with_factory(settings, device, architecture_factory())
    }

    pub fn with_factory(settings: ModelSettings, device: Device, factory: ModelFactory) -> Self {
        Self {
            settings,
            device,
            factory,
        }
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn factory(&self) -> ModelFactory {
        Arc::clone(&self.factory)
    }

    /// Reconcile `checkpoint` against the member's architecture and build it.
    pub fn instantiate_member(
        &self,
        member: &MemberSpec,
        checkpoint: &Checkpoint,
    ) -> XrayResult<Instantiated<Box<dyn Classifier>>> {
        checkpoint.instantiate(
            &member.name,
            LoadPolicy::from_strict(member.strict),
            &self.device,
            |vb| (self.factory)(member, vb),
        )
    }

    /// Load every member that can be loaded. Never fails: problems are logged
    /// and reflected in the returned statuses.
    pub fn load(&self) -> LoadOutcome {
        info!("Looking for models in: {}", self.settings.dir.display());

        let merged_path = self.settings.merged_path();
        let outcome = if merged_path.is_file() {
            match Checkpoint::read(&merged_path) {
                Ok(merged) => {
                    info!("Loading unified ensemble checkpoint from {}", merged_path.display());
                    self.load_from_merged(&merged)
                }
                Err(e) => {
                    error!("Error loading unified checkpoint: {}", e);
                    warn!("Falling back to individual checkpoints");
                    self.load_individual()
                }
            }
        } else {
            info!("Unified ensemble checkpoint not found at {}", merged_path.display());
            info!("Falling back to individual checkpoints");
            self.load_individual()
        };

        let loaded = outcome.loaded_count();
        let expected = self.settings.members.len();
        if loaded == 0 {
            error!("No model could be loaded; predictions are unavailable");
        } else if loaded < expected {
            warn!("Running degraded ensemble with {}/{} models", loaded, expected);
        } else {
            info!("Ensemble model created successfully with {} models", loaded);
        }

        outcome
    }

    fn load_from_merged(&self, merged: &Checkpoint) -> LoadOutcome {
        self.assemble(|member| {
            let scoped = merged.scoped(&member.name);
            if scoped.is_empty() {
                warn!("Merged checkpoint has no entries under '{}.'", member.name);
            }
            Ok(scoped)
        })
    }

    fn load_individual(&self) -> LoadOutcome {
        self.assemble(|member| Checkpoint::read(self.settings.member_path(member)))
    }

    fn assemble<F>(&self, checkpoint_for: F) -> LoadOutcome
    where
        F: Fn(&MemberSpec) -> XrayResult<Checkpoint>,
    {
        let mut predictor = EnsemblePredictor::new();
        let mut members = Vec::with_capacity(self.settings.members.len());

        for member in &self.settings.members {
            let mut status = MemberStatus {
                name: member.name.clone(),
                architecture: member.architecture.to_string(),
                source: self.settings.member_path(member),
                loaded: false,
                error: None,
                missing_parameters: 0,
                unexpected_parameters: 0,
            };

            let result = checkpoint_for(member).and_then(|checkpoint| {
                if let Some(source) = checkpoint.source() {
                    status.source = source.to_path_buf();
                }
                self.instantiate_member(member, &checkpoint)
            });

            match result {
                Ok(built) => {
                    info!(
                        "{} model loaded successfully ({} parameters from {})",
                        member.name,
                        built.report.loaded,
                        status.source.display()
                    );
                    status.loaded = true;
                    status.missing_parameters = built.report.missing.len();
                    status.unexpected_parameters = built.report.unexpected.len();
                    predictor.add_model(&member.name, built.model);
                }
                Err(e) => {
                    error!("Failed to load {} model: {}", member.name, e);
                    status.error = Some(e.to_string());
                }
            }

            members.push(status);
        }

        LoadOutcome {
            predictor: predictor.is_loaded().then_some(predictor),
            members,
        }
    }
}

/// Tiny linear classifier used to exercise the loader without building full-size networks.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use candle_core::{Module, Tensor};
    use candle_nn::Linear;

    pub struct PooledLinear(Linear);

    impl Classifier for PooledLinear {
        fn logits(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
            // [b, 3, h, w] -> [b, 3]
            let pooled = xs.mean(3)?.mean(2)?;
            self.0.forward(&pooled)
        }
    }

    pub fn linear_factory() -> ModelFactory {
        Arc::new(|_member: &MemberSpec, vb: VarBuilder<'static>| {
            let head = candle_nn::linear(3, NUM_CLASSES, vb.pp("head"))?;
            Ok(Box::new(PooledLinear(head)) as Box<dyn Classifier>)
        })
    }

    pub fn head_tensors(prefix: &str, scale: f32) -> Vec<(String, Tensor)> {
        let weight = Tensor::full(scale, (NUM_CLASSES, 3), &Device::Cpu).unwrap();
        let bias = Tensor::new(&[0.0f32, scale], &Device::Cpu).unwrap();
        vec![
            (format!("{}head.weight", prefix), weight),
            (format!("{}head.bias", prefix), bias),
        ]
    }

    pub fn write_safetensors(path: &std::path::Path, entries: Vec<(String, Tensor)>) {
        let map: std::collections::HashMap<String, Tensor> = entries.into_iter().collect();
        candle_core::safetensors::save(&map, path).unwrap();
    }

    pub fn settings(dir: &std::path::Path) -> ModelSettings {
        use crate::ml::Architecture;
        ModelSettings {
            dir: dir.to_path_buf(),
            merged_checkpoint: "merged.safetensors".to_string(),
            members: vec![
                MemberSpec::new("alpha", Architecture::EfficientNetB0, "alpha.safetensors", true),
                MemberSpec::new("beta", Architecture::ConvNextTiny, "beta.safetensors", false),
                MemberSpec::new("gamma", Architecture::ResNet50, "gamma.safetensors", false),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn loader(dir: &std::path::Path) -> ModelLoader {
        ModelLoader::with_factory(settings(dir), Device::Cpu, linear_factory())
    }

    #[test]
    fn test_empty_directory_leaves_predictor_unset() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = loader(dir.path()).load();

        assert!(outcome.predictor.is_none());
        assert_eq!(outcome.loaded_count(), 0);
        assert!(outcome.members.iter().all(|m| m.error.as_deref().unwrap_or("").contains("Checkpoint not found")));
    }

    #[test]
    fn test_individual_files_load_all_members() {
        let dir = tempfile::tempdir().unwrap();
        for (name, scale) in [("alpha", 1.0), ("beta", 2.0), ("gamma", 3.0)] {
            write_safetensors(&dir.path().join(format!("{}.safetensors", name)), head_tensors("", scale));
        }

        let outcome = loader(dir.path()).load();
        let predictor = outcome.predictor.unwrap();
        assert_eq!(predictor.model_count(), 3);
        assert_eq!(predictor.model_names(), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_strict_member_mismatch_degrades_ensemble() {
        let dir = tempfile::tempdir().unwrap();
        let mut alpha = head_tensors("", 1.0);
        alpha.push(("extra.weight".to_string(), candle_core::Tensor::new(&[1.0f32], &Device::Cpu).unwrap()));
        write_safetensors(&dir.path().join("alpha.safetensors"), alpha);

        // Lenient members tolerate the same extra entry
        let mut beta = head_tensors("", 2.0);
        beta.push(("extra.weight".to_string(), candle_core::Tensor::new(&[1.0f32], &Device::Cpu).unwrap()));
        write_safetensors(&dir.path().join("beta.safetensors"), beta);
        write_safetensors(&dir.path().join("gamma.safetensors"), head_tensors("", 3.0));

        let outcome = loader(dir.path()).load();
        assert_eq!(outcome.loaded_count(), 2);

        let alpha_status = &outcome.members[0];
        assert!(!alpha_status.loaded);
        assert!(alpha_status.error.as_ref().unwrap().contains("Unexpected key(s)"));
        assert_eq!(outcome.members[1].unexpected_parameters, 1);
        assert_eq!(outcome.predictor.unwrap().model_names(), vec!["beta", "gamma"]);
    }

    #[test]
    fn test_lenient_member_with_foreign_names_is_not_loaded() {
        let dir = tempfile::tempdir().unwrap();
        write_safetensors(&dir.path().join("alpha.safetensors"), head_tensors("", 1.0));
        write_safetensors(
            &dir.path().join("beta.safetensors"),
            vec![(
                "layers.0.blocks.0.attn.qkv.weight".to_string(),
                candle_core::Tensor::new(&[1.0f32, 2.0], &Device::Cpu).unwrap(),
            )],
        );
        write_safetensors(&dir.path().join("gamma.safetensors"), head_tensors("", 3.0));

        let outcome = loader(dir.path()).load();
        let beta = &outcome.members[1];
        assert!(!beta.loaded);
        assert!(beta.error.as_ref().unwrap().contains("no checkpoint entry matches"));
        assert_eq!(outcome.predictor.unwrap().model_names(), vec!["alpha", "gamma"]);
    }

    #[test]
    fn test_merged_checkpoint_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let mut merged = Vec::new();
        for (name, scale) in [("alpha", 1.0), ("beta", 2.0), ("gamma", 3.0)] {
            merged.extend(head_tensors(&format!("{}.", name), scale));
        }
        write_safetensors(&dir.path().join("merged.safetensors"), merged);

        let outcome = loader(dir.path()).load();
        assert_eq!(outcome.loaded_count(), 3);
        assert!(outcome
            .members
            .iter()
            .all(|m| m.source == dir.path().join("merged.safetensors")));
    }

    #[test]
    fn test_unreadable_merged_checkpoint_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("merged.safetensors"), b"garbage").unwrap();
        write_safetensors(&dir.path().join("gamma.safetensors"), head_tensors("", 3.0));

        let outcome = loader(dir.path()).load();
        assert_eq!(outcome.loaded_count(), 1);
        assert_eq!(outcome.predictor.unwrap().model_names(), vec!["gamma"]);
    }
}
