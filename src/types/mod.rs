pub mod label;
pub mod prediction;
pub mod evaluation;

pub use label::*;
pub use prediction::*;
pub use evaluation::*;
