use std::path::Path;

use shader_types::ShaderDescription;

use crate::reflection::ReflectionSummary;

/// Which shading language / backend compiler is in play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendLanguage {
    Hlsl,
    Spirv,
}

/// A successfully compiled shader variant: bytecode plus optional
/// reflection.
#[derive(Debug, Clone)]
pub struct CompiledArtifact {
    pub bytecode: Vec<u8>,
    pub reflection: Option<ReflectionSummary>,
}

/// The three-way outcome of a compile attempt: a successful
/// artifact, a human-directed compiler diagnostic (surfaced verbatim), or
/// an internal error (a bug, logged with a location stack by the caller).
pub enum CompileOutcome {
    Compiled(CompiledArtifact),
    Diagnostic(String),
    Internal(anyhow::Error),
}

/// Backend-specific shader compiler. Implementations live behind this
/// seam so `shader-compiler`'s orchestration logic never depends on HLSL or
/// SPIR-V specifics directly.
pub trait ShaderCompilerBackend: Send + Sync {
    fn language(&self) -> BackendLanguage;

    /// Compiles `description`'s source, writing the artifact (and, for
    /// HLSL, a sibling `.reflection` file) under
    /// `out_directory / base_name + configuration_tag`.
    fn compile(
        &self,
        description: &ShaderDescription,
        out_directory: &Path,
        configuration_tag: &str,
    ) -> CompileOutcome;
}
