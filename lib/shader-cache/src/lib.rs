//! Shader cache manager: owns the on-disk cache directory, its global
//! header, and the per-shader-variant metadata that decides whether a
//! cached artifact is still valid or needs recompiling.

pub mod header;
pub mod invalidation;
pub mod manager;
pub mod metadata;

pub use header::{GlobalCacheHeader, HlslGlobalCacheParams, RendererKind};
pub use invalidation::InvalidationReason;
pub use manager::ShaderCacheManager;
pub use metadata::PerShaderMetadata;
