pub mod checkpoint;
pub mod classifier;
pub mod device;
pub mod ensemble;
pub mod preprocess;

pub use checkpoint::{Checkpoint, Instantiated, LoadPolicy};
pub use classifier::{Architecture, Classifier};
pub use device::select_device;
pub use ensemble::{EnsemblePredictor, MemberStatus, ModelLoader};
pub use preprocess::Preprocessor;

#[cfg(test)]
pub use classifier::{FixedLogits, MockClassifier};
