//! An in-memory, no-GPU fake implementing [`RendererBackend`]. Used by every
//! crate's test suite so none of the layers built on top of the backend
//! trait need an actual GPU device to verify their logic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::backend::{
    BoundResource, BufferHandle, BufferUsage, DescriptorPoolHandle, DescriptorSetHandle,
    DescriptorSetLayoutHandle, ImageCreateInfo, ImageHandle, PipelineHandle, RendererBackend,
};
use crate::reflection::BindingEntry;

#[derive(Default)]
pub struct NullBackend {
    next_id: AtomicU64,
    buffers: Mutex<std::collections::HashMap<u64, Vec<u8>>>,
    written_descriptors: Mutex<std::collections::HashMap<(u64, u32, u32), BoundResource>>,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn buffer_contents(&self, handle: BufferHandle) -> Vec<u8> {
        self.buffers
            .lock()
            .unwrap()
            .get(&handle.0)
            .cloned()
            .unwrap_or_default()
    }

    /// What was last written at `(set, binding_index, array_element)`, if
    /// anything. Lets tests assert a descriptor write actually happened.
    pub fn written_descriptor(
        &self,
        set: DescriptorSetHandle,
        binding_index: u32,
        array_element: u32,
    ) -> Option<BoundResource> {
        self.written_descriptors
            .lock()
            .unwrap()
            .get(&(set.0, binding_index, array_element))
            .copied()
    }
}

impl RendererBackend for NullBackend {
    fn max_uniform_buffer_range(&self) -> u64 {
        65536
    }

    fn create_cpu_write_buffer(
        &self,
        _name: &str,
        element_size: usize,
        element_count: usize,
        _usage: BufferUsage,
    ) -> anyhow::Result<BufferHandle> {
        let id = self.next();
        self.buffers
            .lock()
            .unwrap()
            .insert(id, vec![0u8; element_size * element_count]);
        Ok(BufferHandle(id))
    }

    fn write_buffer_element(
        &self,
        handle: BufferHandle,
        element_index: usize,
        data: &[u8],
    ) -> anyhow::Result<()> {
        let mut buffers = self.buffers.lock().unwrap();
        let buf = buffers
            .get_mut(&handle.0)
            .ok_or_else(|| anyhow::anyhow!("unknown buffer handle"))?;
        let start = element_index * data.len();
        let end = start + data.len();
        if end > buf.len() {
            anyhow::bail!("write out of bounds");
        }
        buf[start..end].copy_from_slice(data);
        Ok(())
    }

    fn create_device_local_buffer_with_data(
        &self,
        _name: &str,
        data: &[u8],
        _element_size: usize,
        _element_count: usize,
        _usage: BufferUsage,
        _shader_writable: bool,
    ) -> anyhow::Result<BufferHandle> {
        let id = self.next();
        self.buffers.lock().unwrap().insert(id, data.to_vec());
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&self, handle: BufferHandle) {
        self.buffers.lock().unwrap().remove(&handle.0);
    }

    fn create_image(&self, _info: &ImageCreateInfo) -> anyhow::Result<ImageHandle> {
        Ok(ImageHandle(self.next()))
    }

    fn destroy_image(&self, _handle: ImageHandle) {}

    fn create_descriptor_set_layout(
        &self,
        _bindings: &[BindingEntry],
    ) -> anyhow::Result<DescriptorSetLayoutHandle> {
        Ok(DescriptorSetLayoutHandle(self.next()))
    }

    fn destroy_descriptor_set_layout(&self, _handle: DescriptorSetLayoutHandle) {}

    fn create_descriptor_pool(
        &self,
        _sizes_per_binding_kind: &[(crate::reflection::BindingKind, u32)],
        _max_sets: u32,
    ) -> anyhow::Result<DescriptorPoolHandle> {
        Ok(DescriptorPoolHandle(self.next()))
    }

    fn destroy_descriptor_pool(&self, _handle: DescriptorPoolHandle) {}

    fn allocate_descriptor_sets(
        &self,
        _pool: DescriptorPoolHandle,
        _layout: DescriptorSetLayoutHandle,
        count: u32,
    ) -> anyhow::Result<Vec<DescriptorSetHandle>> {
        Ok((0..count).map(|_| DescriptorSetHandle(self.next())).collect())
    }

    fn create_graphics_pipeline(
        &self,
        _vertex_bytecode: &[u8],
        _fragment_bytecode: &[u8],
        _layout: DescriptorSetLayoutHandle,
        _blend_enabled: bool,
    ) -> anyhow::Result<PipelineHandle> {
        Ok(PipelineHandle(self.next()))
    }

    fn destroy_pipeline(&self, _handle: PipelineHandle) {}

    fn write_descriptor(&self, set: DescriptorSetHandle, binding_index: u32, resource: BoundResource) {
        let array_element = match resource {
            BoundResource::Buffer(_) => 0,
            BoundResource::Image { array_element, .. } => array_element,
        };
        self.written_descriptors
            .lock()
            .unwrap()
            .insert((set.0, binding_index, array_element), resource);
    }

    fn wait_idle(&self) {}
}
