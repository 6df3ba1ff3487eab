//! Cross-API seam traits: the contracts the shader/GPU-resource core
//! compiles against so that the Vulkan and DirectX 12 backends can be
//! swapped without touching any other layer's logic.

pub mod backend;
pub mod compiler;
pub mod null;
pub mod reflection;

pub use backend::{
    BackendImageFormat, BoundResource, BufferHandle, BufferUsage, DescriptorPoolHandle,
    DescriptorSetHandle, DescriptorSetLayoutHandle, ImageCreateInfo, ImageHandle, PipelineHandle,
    RendererBackend,
};
pub use compiler::{BackendLanguage, CompileOutcome, CompiledArtifact, ShaderCompilerBackend};
pub use reflection::{BindingEntry, BindingKind, PushConstantField, ReflectionSummary, ShaderStageMask};
