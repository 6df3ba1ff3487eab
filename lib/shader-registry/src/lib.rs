//! The shader object, pack, and registry layer: lazy bytecode loading, the
//! per-name map of compiled configurations, and the process-wide registry
//! that drives compilation and self-validation sweeps.

pub mod configurations;
pub mod manager;
pub mod object;
pub mod pack;

pub use configurations::valid_configurations_for;
pub use manager::{CompileProgress, ShaderManager};
pub use object::{shaders_in_memory_count, ReflectionSource, ShaderObject};
pub use pack::ShaderPack;
