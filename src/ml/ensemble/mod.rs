pub mod aggregator;
pub mod loader;
pub mod merge;

pub use aggregator::EnsemblePredictor;
pub use loader::{MemberStatus, ModelLoader};
pub use merge::merge_checkpoints;
