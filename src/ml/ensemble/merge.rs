use candle_core::Tensor;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use super::ModelLoader;
use crate::error::{XrayError, XrayResult};
use crate::ml::Checkpoint;

#[derive(Debug, Clone)]
pub struct MergeSummary {
    pub output: PathBuf,
    pub members: Vec<String>,
    pub tensors: usize,
    pub output_dims: Vec<usize>,
}

/// Combine every member's checkpoint into one file with `<member>.` prefixed
/// parameter names, then load it back and run a random input through it.
pub fn merge_checkpoints(
    loader: &ModelLoader,
    output: &Path,
    input_size: usize,
) -> XrayResult<MergeSummary> {
    let settings = loader.settings();
    let mut merged = HashMap::new();
    let mut members = Vec::with_capacity(settings.members.len());

    for member in &settings.members {
        let path = settings.member_path(member);
        info!("Loading {} checkpoint from {}", member.name, path.display());

        let checkpoint = Checkpoint::read(&path)?;
        let built = loader.instantiate_member(member, &checkpoint)?;
        for (name, tensor) in built.parameters {
            merged.insert(format!("{}.{}", member.name, name), tensor);
        }
        members.push(member.name.clone());
    }

    let tensors = merged.len();
    Checkpoint::from_tensors(merged).save(output)?;
    info!("Unified model saved to {} ({} tensors)", output.display(), tensors);

    // Reload from the file just written, wherever it was placed
    let written = if output.is_absolute() {
        output.to_path_buf()
    } else {
        std::env::current_dir()?.join(output)
    };
    let mut verify_settings = settings.clone();
    verify_settings.merged_checkpoint = written.to_string_lossy().into_owned();
    let verifier = ModelLoader::with_factory(verify_settings, loader.device().clone(), loader.factory());
    let outcome = verifier.load();

    // Every member must come back, and from the merged file rather than a fallback
    if outcome.loaded_count() != settings.members.len() {
        return Err(XrayError::MergeVerification(format!(
            "{}/{} members reloaded",
            outcome.loaded_count(),
            settings.members.len()
        )));
    }
    if let Some(stray) = outcome.members.iter().find(|m| m.source != written) {
        return Err(XrayError::MergeVerification(format!(
            "{} was reloaded from {} instead of {}",
            stray.name,
            stray.source.display(),
            written.display()
        )));
    }
    let predictor = outcome.predictor.ok_or(XrayError::ModelNotLoaded)?;

    let sample = Tensor::randn(0f32, 1.0, (1, 3, input_size, input_size), loader.device())?;
    let output_dims = predictor.forward(&sample)?.dims().to_vec();
    info!("Verification forward pass produced output of shape {:?}", output_dims);

    Ok(MergeSummary {
        output: output.to_path_buf(),
        members,
        tensors,
        output_dims,
    })
}
