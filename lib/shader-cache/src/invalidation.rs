use thiserror::Error;

/// Reasons a per-shader cache entry is rejected. The *first* reason
/// found wins; [`manager::ShaderCacheManager::validate`] checks them in
/// exactly this order.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationReason {
    #[error("entry function changed")]
    EntryFunctionChanged,
    #[error("shader type changed")]
    ShaderTypeChanged,
    #[error("defined macros changed")]
    DefinedMacrosChanged,
    #[error("source file changed")]
    SourceFileChanged,
    #[error("include tree content changed")]
    IncludeTreeContentChanged,
    #[error("compiled binary changed")]
    CompiledBinaryChanged,
    #[error("reflection binary changed")]
    ReflectionBinaryChanged,
}
