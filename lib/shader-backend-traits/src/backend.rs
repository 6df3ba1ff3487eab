use crate::reflection::BindingEntry;

/// Opaque handles into backend-owned GPU objects: plain integer handles
/// rather than typed wrapper objects at the command/backend boundary, so the
/// command-recording path stays backend-agnostic.
macro_rules! opaque_handle {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);
    };
}

opaque_handle!(BufferHandle);
opaque_handle!(ImageHandle);
opaque_handle!(DescriptorSetLayoutHandle);
opaque_handle!(DescriptorPoolHandle);
opaque_handle!(DescriptorSetHandle);
opaque_handle!(PipelineHandle);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    NotUsedInShader,
    ScalarUniform,
    ArrayStorage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendImageFormat {
    Rgba8Unorm,
    D32Float,
    D24UnormS8Uint,
}

#[derive(Debug, Clone)]
pub struct ImageCreateInfo {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
    pub sample_count: u32,
    pub format: BackendImageFormat,
    pub is_render_target: bool,
    pub is_cube: bool,
}

/// A concrete GPU resource resolved for a descriptor write. `array_element`
/// is always `0` for a plain (non-array) image binding.
#[derive(Debug, Clone, Copy)]
pub enum BoundResource {
    Buffer(BufferHandle),
    Image { handle: ImageHandle, array_element: u32 },
}

/// The cross-API seam a renderer backend (Vulkan or DirectX 12) implements.
/// `gpu-resource`, `descriptor-layout`, and `pipeline` hold no API-specific
/// code of their own beyond what's behind this trait; see
/// `pipeline::backends::{vulkan, dx12}` for the two implementations.
pub trait RendererBackend: Send + Sync {
    /// Maximum size (bytes) of a single uniform buffer range the device
    /// supports.
    fn max_uniform_buffer_range(&self) -> u64;

    fn create_cpu_write_buffer(
        &self,
        name: &str,
        element_size: usize,
        element_count: usize,
        usage: BufferUsage,
    ) -> anyhow::Result<BufferHandle>;

    fn write_buffer_element(&self, handle: BufferHandle, element_index: usize, data: &[u8]) -> anyhow::Result<()>;

    fn create_device_local_buffer_with_data(
        &self,
        name: &str,
        data: &[u8],
        element_size: usize,
        element_count: usize,
        usage: BufferUsage,
        shader_writable: bool,
    ) -> anyhow::Result<BufferHandle>;

    fn destroy_buffer(&self, handle: BufferHandle);

    fn create_image(&self, info: &ImageCreateInfo) -> anyhow::Result<ImageHandle>;

    fn destroy_image(&self, handle: ImageHandle);

    fn create_descriptor_set_layout(
        &self,
        bindings: &[BindingEntry],
    ) -> anyhow::Result<DescriptorSetLayoutHandle>;

    fn destroy_descriptor_set_layout(&self, handle: DescriptorSetLayoutHandle);

    fn create_descriptor_pool(
        &self,
        sizes_per_binding_kind: &[(crate::reflection::BindingKind, u32)],
        max_sets: u32,
    ) -> anyhow::Result<DescriptorPoolHandle>;

    fn destroy_descriptor_pool(&self, handle: DescriptorPoolHandle);

    fn allocate_descriptor_sets(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
        count: u32,
    ) -> anyhow::Result<Vec<DescriptorSetHandle>>;

    fn create_graphics_pipeline(
        &self,
        vertex_bytecode: &[u8],
        fragment_bytecode: &[u8],
        layout: DescriptorSetLayoutHandle,
        blend_enabled: bool,
    ) -> anyhow::Result<PipelineHandle>;

    fn destroy_pipeline(&self, handle: PipelineHandle);

    /// Writes `resource` into `set` at `binding_index`. Called once per
    /// resolved binding after a descriptor set is allocated (and again
    /// whenever the underlying resource is reallocated), never before.
    fn write_descriptor(&self, set: DescriptorSetHandle, binding_index: u32, resource: BoundResource);

    /// Blocks until every submitted piece of GPU work has completed.
    /// Called before renderer reconfiguration and resource-manager teardown.
    fn wait_idle(&self);
}
