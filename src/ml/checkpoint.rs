use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{XrayError, XrayResult};

/// Buffers PyTorch writes into state dicts that never affect inference.
const IGNORED_SUFFIXES: &[&str] = &["num_batches_tracked"];

/// How closely checkpoint names must match an architecture's parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPolicy {
    /// Every declared parameter present and every checkpoint entry consumed.
    Strict,
    /// Missing parameters keep their default initialisation, extra entries are skipped.
    Lenient,
}

impl LoadPolicy {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            LoadPolicy::Strict
        } else {
            LoadPolicy::Lenient
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub loaded: usize,
    pub missing: Vec<String>,
    pub unexpected: Vec<String>,
}

impl LoadReport {
    pub fn is_exact(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

/// A model built from a checkpoint together with the parameters it was built from.
pub struct Instantiated<M> {
    pub model: M,
    pub report: LoadReport,
    pub parameters: HashMap<String, Tensor>,
}

/// Named tensors read from a safetensors file or a PyTorch state dict.
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    source: Option<PathBuf>,
    tensors: HashMap<String, Tensor>,
}

impl Checkpoint {
    /// Read a checkpoint; `.safetensors` files by extension, anything else as a pickled state dict.
    pub fn read(path: impl AsRef<Path>) -> XrayResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(XrayError::CheckpointMissing(path.to_path_buf()));
        }

        let loaded = if is_safetensors(path) {
            candle_core::safetensors::load(path, &Device::Cpu)
        } else {
            candle_core::pickle::read_all(path).map(|entries| entries.into_iter().collect())
        };
        let tensors = loaded.map_err(|source| XrayError::CheckpointUnreadable {
            path: path.to_path_buf(),
            source,
        })?;

        let mut checkpoint = Self::from_tensors(tensors);
        checkpoint.source = Some(path.to_path_buf());
        debug!("Read {} tensors from {}", checkpoint.len(), path.display());
        Ok(checkpoint)
    }

    pub fn from_tensors(tensors: HashMap<String, Tensor>) -> Self {
        let tensors = tensors
            .into_iter()
            .filter(|(name, _)| !IGNORED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)))
            .collect();
        Self {
            source: None,
            tensors,
        }
    }

    /// Entries under `prefix.`, with the prefix stripped.
    pub fn scoped(&self, prefix: &str) -> Checkpoint {
        let prefix = format!("{}.", prefix);
        let tensors = self
            .tensors
            .iter()
            .filter_map(|(name, tensor)| {
                name.strip_prefix(&prefix)
                    .map(|rest| (rest.to_string(), tensor.clone()))
            })
            .collect();
        Self {
            source: self.source.clone(),
            tensors,
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    /// Build a model with `build`, feeding it this checkpoint's tensors.
    ///
    /// `build` runs twice: once against a default-initialised `VarMap` to learn
    /// which parameters the architecture declares, then against the reconciled
    /// tensors. Shape mismatches always fail; name mismatches fail only under
    /// [`LoadPolicy::Strict`], except that a lenient load must still match at
    /// least one parameter.
    pub fn instantiate<M, F>(
        &self,
        model: &str,
        policy: LoadPolicy,
        device: &Device,
        build: F,
    ) -> XrayResult<Instantiated<M>>
    where
        F: Fn(VarBuilder<'static>) -> candle_core::Result<M>,
    {
        let declared = declared_parameters(device, &build)?;
        let declared_names: HashSet<&str> = declared.keys().map(String::as_str).collect();

        let mut report = LoadReport::default();
        let mut size_mismatches = Vec::new();
        let mut parameters = HashMap::with_capacity(declared.len());

        for (name, default) in &declared {
            match self.get(name) {
                Some(saved) if saved.dims() == default.dims() => {
                    let tensor = saved.to_dtype(DType::F32)?.to_device(device)?;
                    parameters.insert(name.clone(), tensor);
                    report.loaded += 1;
                }
                Some(saved) => size_mismatches.push(format!(
                    "size mismatch for {}: copying a param with shape {:?} from checkpoint, the shape in current model is {:?}",
                    name,
                    saved.dims(),
                    default.dims()
                )),
                None => {
                    report.missing.push(name.clone());
                    parameters.insert(name.clone(), default.clone());
                }
            }
        }

        report.unexpected = self
            .tensors
            .keys()
            .filter(|name| !declared_names.contains(name.as_str()))
            .cloned()
            .collect();
        report.missing.sort();
        report.unexpected.sort();

        if !size_mismatches.is_empty() {
            size_mismatches.sort();
            return Err(XrayError::WeightMismatch {
                model: model.to_string(),
                detail: size_mismatches.join("; "),
            });
        }

        if policy == LoadPolicy::Strict && !report.is_exact() {
            return Err(XrayError::WeightMismatch {
                model: model.to_string(),
                detail: describe_key_mismatch(&report),
            });
        }

        if report.loaded == 0 && !declared.is_empty() {
            return Err(XrayError::WeightMismatch {
                model: model.to_string(),
                detail: format!(
                    "no checkpoint entry matches the architecture's parameters. {}",
                    describe_key_mismatch(&report)
                ),
            });
        }

        if !report.is_exact() {
            warn!(
                "{}: lenient load kept {} default parameter(s) and skipped {} unexpected entries",
                model,
                report.missing.len(),
                report.unexpected.len()
            );
        }

        let model = build(VarBuilder::from_tensors(parameters.clone(), DType::F32, device))?;
        Ok(Instantiated {
            model,
            report,
            parameters,
        })
    }

    /// Write the tensors as a safetensors file.
    pub fn save(&self, path: impl AsRef<Path>) -> XrayResult<()> {
        candle_core::safetensors::save(&self.tensors, path.as_ref())?;
        Ok(())
    }
}

fn is_safetensors(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("safetensors"))
        .unwrap_or(false)
}

fn declared_parameters<M, F>(device: &Device, build: &F) -> XrayResult<HashMap<String, Tensor>>
where
    F: Fn(VarBuilder<'static>) -> candle_core::Result<M>,
{
    let varmap = VarMap::new();
    build(VarBuilder::from_backend(
        Box::new(varmap.clone()),
        DType::F32,
        device.clone(),
    ))?;

    let vars = varmap
        .data()
        .lock()
        .map_err(|e| candle_core::Error::Msg(format!("parameter registry poisoned: {}", e)))?;
    Ok(vars
        .iter()
        .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
        .collect())
}

fn describe_key_mismatch(report: &LoadReport) -> String {
    let mut parts = Vec::new();
    if !report.missing.is_empty() {
        parts.push(format!("Missing key(s) in state_dict: {}", preview(&report.missing)));
    }
    if !report.unexpected.is_empty() {
        parts.push(format!("Unexpected key(s) in state_dict: {}", preview(&report.unexpected)));
    }
    parts.join(". ")
}

fn preview(names: &[String]) -> String {
    const SHOWN: usize = 5;
    let head = names
        .iter()
        .take(SHOWN)
        .map(|n| format!("\"{}\"", n))
        .collect::<Vec<_>>()
        .join(", ");
    if names.len() > SHOWN {
        format!("{} (and {} more)", head, names.len() - SHOWN)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Module;
    use candle_nn::Linear;

    fn head(vb: VarBuilder<'static>) -> candle_core::Result<Linear> {
        candle_nn::linear(4, 2, vb.pp("head"))
    }

    fn tensors(entries: &[(&str, Tensor)]) -> HashMap<String, Tensor> {
        entries
            .iter()
            .map(|(name, t)| (name.to_string(), t.clone()))
            .collect()
    }

    fn ones(shape: (usize, usize)) -> Tensor {
        Tensor::ones(shape, DType::F32, &Device::Cpu).unwrap()
    }

    fn bias() -> Tensor {
        Tensor::new(&[0.5f32, -0.5], &Device::Cpu).unwrap()
    }

    #[test]
    fn test_strict_exact_match_uses_saved_weights() {
        let checkpoint = Checkpoint::from_tensors(tensors(&[
            ("head.weight", ones((2, 4))),
            ("head.bias", bias()),
        ]));

        let built = checkpoint
            .instantiate("head", LoadPolicy::Strict, &Device::Cpu, head)
            .unwrap();
        assert_eq!(built.report.loaded, 2);
        assert!(built.report.is_exact());

        let input = Tensor::ones((1, 4), DType::F32, &Device::Cpu).unwrap();
        let out = built.model.forward(&input).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(out, vec![vec![4.5, 3.5]]);
    }

    #[test]
    fn test_strict_rejects_unexpected_and_missing() {
        let checkpoint = Checkpoint::from_tensors(tensors(&[
            ("head.weight", ones((2, 4))),
            ("classifier.bias", bias()),
        ]));

        let err = checkpoint
            .instantiate("head", LoadPolicy::Strict, &Device::Cpu, head)
            .err()
            .unwrap();
        let message = err.to_string();
        assert!(message.contains("Missing key(s) in state_dict: \"head.bias\""));
        assert!(message.contains("Unexpected key(s) in state_dict: \"classifier.bias\""));
    }

    #[test]
    fn test_lenient_keeps_defaults_and_reports() {
        let checkpoint = Checkpoint::from_tensors(tensors(&[
            ("head.weight", ones((2, 4))),
            ("classifier.bias", bias()),
        ]));

        let built = checkpoint
            .instantiate("head", LoadPolicy::Lenient, &Device::Cpu, head)
            .unwrap();
        assert_eq!(built.report.loaded, 1);
        assert_eq!(built.report.missing, vec!["head.bias".to_string()]);
        assert_eq!(built.report.unexpected, vec!["classifier.bias".to_string()]);
        assert!(built.parameters.contains_key("head.bias"));
    }

    #[test]
    fn test_lenient_without_any_matching_name_fails() {
        let checkpoint = Checkpoint::from_tensors(tensors(&[(
            "layers.0.blocks.0.attn.qkv.weight",
            ones((2, 4)),
        )]));

        let err = checkpoint
            .instantiate("head", LoadPolicy::Lenient, &Device::Cpu, head)
            .err()
            .unwrap();
        assert!(matches!(err, XrayError::WeightMismatch { .. }));
        assert!(err.to_string().contains("no checkpoint entry matches"));
    }

    #[test]
    fn test_shape_mismatch_fails_even_when_lenient() {
        let checkpoint = Checkpoint::from_tensors(tensors(&[
            ("head.weight", ones((3, 4))),
            ("head.bias", bias()),
        ]));

        let err = checkpoint
            .instantiate("head", LoadPolicy::Lenient, &Device::Cpu, head)
            .err()
            .unwrap();
        assert!(matches!(err, XrayError::WeightMismatch { .. }));
        assert!(err.to_string().contains("size mismatch for head.weight"));
    }

    #[test]
    fn test_batch_counters_are_ignored() {
        let counter = Tensor::new(&[3i64], &Device::Cpu).unwrap();
        let checkpoint = Checkpoint::from_tensors(tensors(&[
            ("head.weight", ones((2, 4))),
            ("head.bias", bias()),
            ("bn.num_batches_tracked", counter),
        ]));

        assert_eq!(checkpoint.len(), 2);
        assert!(checkpoint
            .instantiate("head", LoadPolicy::Strict, &Device::Cpu, head)
            .is_ok());
    }

    #[test]
    fn test_scoped_strips_member_prefix() {
        let checkpoint = Checkpoint::from_tensors(tensors(&[
            ("resnet.head.weight", ones((2, 4))),
            ("resnet.head.bias", bias()),
            ("efficientnet.head.bias", bias()),
        ]));

        let resnet = checkpoint.scoped("resnet");
        assert_eq!(resnet.len(), 2);
        assert!(resnet.get("head.weight").is_some());
        assert!(checkpoint.scoped("convnext").is_empty());
    }

    #[test]
    fn test_safetensors_save_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("head.safetensors");
        let checkpoint = Checkpoint::from_tensors(tensors(&[
            ("head.weight", ones((2, 4))),
            ("head.bias", bias()),
        ]));
        checkpoint.save(&path).unwrap();

        let reread = Checkpoint::read(&path).unwrap();
        assert_eq!(reread.len(), 2);
        assert_eq!(reread.source(), Some(path.as_path()));
        assert_eq!(
            reread.get("head.bias").unwrap().to_vec1::<f32>().unwrap(),
            vec![0.5, -0.5]
        );
    }

    #[test]
    fn test_missing_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.pth");
        assert!(matches!(
            Checkpoint::read(&missing),
            Err(XrayError::CheckpointMissing(_))
        ));

        let corrupt = dir.path().join("corrupt.safetensors");
        std::fs::write(&corrupt, b"not a tensor archive").unwrap();
        assert!(matches!(
            Checkpoint::read(&corrupt),
            Err(XrayError::CheckpointUnreadable { .. })
        ));
    }
}
