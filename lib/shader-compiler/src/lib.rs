//! Shader compiler backends: each one turns shader source plus a macro
//! configuration into a compiled artifact, a diagnostic, or an internal
//! error, and reflects the result's bindings.

pub mod backends;
pub mod diagnostics;

pub use backends::hlsl::HlslCompilerBackend;
pub use backends::spirv::SpirvCompilerBackend;
