pub mod evaluation;
pub mod inference;
pub mod upload;

pub use evaluation::*;
pub use inference::InferenceEngine;
pub use upload::*;
