//! Shader programs, define substitution and uniform blocks.

mod defines;
mod program;
pub mod sources;
mod uniform_block;

pub use defines::{add_line_numbers, ensure_version, replace_defines, Define};
pub use program::Program;
pub use uniform_block::UniformBlock;
pub use uniform_block::UniformValue;
