//! Vulkan implementation of [`RendererBackend`]: opaque ids mapped to owned
//! `ash` handles behind a mutex, with matching create/destroy pairs for
//! every object kind.
//!
//! Simplification: every buffer and image here is
//! allocated from host-visible, host-coherent memory and written directly
//! through a persistent mapping, instead of staged through a device-local
//! heap via a transfer queue. Vertex data for drawable geometry is expected
//! to arrive through a storage-buffer binding (see `shader-array-slot`)
//! rather than a fixed-function vertex-input stage, so the graphics
//! pipelines built here declare an empty vertex-input state.

use std::collections::HashMap;
use std::ffi::CString;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Context};
use ash::vk;
use log::{debug, info, warn};
use parking_lot::Mutex;
use shader_backend_traits::{
    BackendImageFormat, BindingEntry, BindingKind, BoundResource, BufferHandle, BufferUsage,
    DescriptorPoolHandle, DescriptorSetHandle, DescriptorSetLayoutHandle, ImageCreateInfo,
    ImageHandle, PipelineHandle, RendererBackend, ShaderStageMask,
};

fn descriptor_type_for(kind: BindingKind) -> vk::DescriptorType {
    match kind {
        BindingKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        BindingKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        BindingKind::SampledImage => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    }
}

fn stage_flags_for(mask: ShaderStageMask) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if mask.contains(ShaderStageMask::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if mask.contains(ShaderStageMask::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    if mask.contains(ShaderStageMask::COMPUTE) {
        flags |= vk::ShaderStageFlags::COMPUTE;
    }
    flags
}

fn format_for(format: BackendImageFormat) -> vk::Format {
    match format {
        BackendImageFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        BackendImageFormat::D32Float => vk::Format::D32_SFLOAT,
        BackendImageFormat::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
    }
}

struct AllocatedBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    mapped: *mut u8,
    size: vk::DeviceSize,
}
// `mapped` points into memory owned by this struct's own `DeviceMemory` and is
// only ever touched while holding the backend's `buffers` mutex.
unsafe impl Send for AllocatedBuffer {}

struct AllocatedImage {
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
}

/// An `ash`-backed [`RendererBackend`]. Owns a logical device and a single
/// object table per resource kind, keyed by the same opaque `u64` every
/// handle in `shader-backend-traits` wraps.
pub struct VulkanBackend {
    instance: ash::Instance,
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    properties: vk::PhysicalDeviceProperties,
    render_pass: vk::RenderPass,
    next_id: AtomicU64,
    buffers: Mutex<HashMap<u64, AllocatedBuffer>>,
    images: Mutex<HashMap<u64, AllocatedImage>>,
    descriptor_set_layouts: Mutex<HashMap<u64, vk::DescriptorSetLayout>>,
    descriptor_pools: Mutex<HashMap<u64, vk::DescriptorPool>>,
    descriptor_sets: Mutex<HashMap<u64, vk::DescriptorSet>>,
    pipelines: Mutex<HashMap<u64, (vk::Pipeline, vk::PipelineLayout)>>,
}

impl VulkanBackend {
    /// Wraps an already-created device. Device and surface setup (instance,
    /// physical device selection, swapchain) happen one layer up, the same
    /// way the source renderer splits `Vulkan::new` from `Instance`/
    /// `Device`/`Swapchain` construction.
    pub fn new(
        instance: ash::Instance,
        device: ash::Device,
        physical_device: vk::PhysicalDevice,
        render_pass: vk::RenderPass,
    ) -> anyhow::Result<Self> {
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        Ok(Self {
            instance,
            device,
            physical_device,
            memory_properties,
            properties,
            render_pass,
            next_id: AtomicU64::new(1),
            buffers: Mutex::new(HashMap::new()),
            images: Mutex::new(HashMap::new()),
            descriptor_set_layouts: Mutex::new(HashMap::new()),
            descriptor_pools: Mutex::new(HashMap::new()),
            descriptor_sets: Mutex::new(HashMap::new()),
            pipelines: Mutex::new(HashMap::new()),
        })
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn find_memory_type(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> anyhow::Result<u32> {
        for i in 0..self.memory_properties.memory_type_count {
            let matches_type = (type_bits & (1 << i)) != 0;
            let matches_flags =
                self.memory_properties.memory_types[i as usize].property_flags.contains(flags);
            if matches_type && matches_flags {
                return Ok(i);
            }
        }
        Err(anyhow!("no memory type supports flags {flags:?}"))
    }

    fn allocate_host_visible_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> anyhow::Result<AllocatedBuffer> {
        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&create_info, None) }
            .context("failed to create buffer")?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let memory_type_index = self.find_memory_type(
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = match unsafe { self.device.allocate_memory(&allocate_info, None) } {
            Ok(memory) => memory,
            Err(error) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(error).context("failed to allocate buffer memory");
            }
        };

        if let Err(error) = unsafe { self.device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe {
                self.device.destroy_buffer(buffer, None);
                self.device.free_memory(memory, None);
            }
            return Err(error).context("failed to bind buffer memory");
        }

        let mapped = unsafe {
            self.device
                .map_memory(memory, 0, requirements.size, vk::MemoryMapFlags::empty())
        }
        .context("failed to map buffer memory")? as *mut u8;

        Ok(AllocatedBuffer {
            buffer,
            memory,
            mapped,
            size: requirements.size,
        })
    }

    fn destroy_allocated_buffer(&self, buffer: AllocatedBuffer) {
        unsafe {
            self.device.unmap_memory(buffer.memory);
            self.device.destroy_buffer(buffer.buffer, None);
            self.device.free_memory(buffer.memory, None);
        }
    }

    fn create_shader_module(&self, bytecode: &[u8]) -> anyhow::Result<vk::ShaderModule> {
        if bytecode.len() % 4 != 0 {
            return Err(anyhow!("SPIR-V bytecode length must be a multiple of 4"));
        }
        let words: Vec<u32> = bytecode
            .chunks_exact(4)
            .map(|chunk| u32::from_ne_bytes(chunk.try_into().unwrap()))
            .collect();
        let create_info = vk::ShaderModuleCreateInfo::default().code(&words);
        unsafe { self.device.create_shader_module(&create_info, None) }
            .context("failed to create shader module")
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        self.wait_idle();
        let mut pipelines = self.pipelines.lock();
        for (_, (pipeline, layout)) in pipelines.drain() {
            unsafe {
                self.device.destroy_pipeline(pipeline, None);
                self.device.destroy_pipeline_layout(layout, None);
            }
        }
        let mut pools = self.descriptor_pools.lock();
        for (_, pool) in pools.drain() {
            unsafe { self.device.destroy_descriptor_pool(pool, None) };
        }
        let mut layouts = self.descriptor_set_layouts.lock();
        for (_, layout) in layouts.drain() {
            unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
        }
        let mut images = self.images.lock();
        for (_, image) in images.drain() {
            unsafe {
                self.device.destroy_image_view(image.view, None);
                self.device.destroy_image(image.image, None);
                self.device.free_memory(image.memory, None);
            }
        }
        let mut buffers = self.buffers.lock();
        for (_, buffer) in buffers.drain() {
            unsafe {
                self.device.unmap_memory(buffer.memory);
                self.device.destroy_buffer(buffer.buffer, None);
                self.device.free_memory(buffer.memory, None);
            }
        }
        unsafe { self.device.destroy_render_pass(self.render_pass, None) };
    }
}

impl RendererBackend for VulkanBackend {
    fn max_uniform_buffer_range(&self) -> u64 {
        self.properties.limits.max_uniform_buffer_range as u64
    }

    fn create_cpu_write_buffer(
        &self,
        name: &str,
        element_size: usize,
        element_count: usize,
        usage: BufferUsage,
    ) -> anyhow::Result<BufferHandle> {
        let vulkan_usage = match usage {
            BufferUsage::NotUsedInShader => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferUsage::ScalarUniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::ArrayStorage => vk::BufferUsageFlags::STORAGE_BUFFER,
        };
        let size = (element_size * element_count).max(1) as vk::DeviceSize;
        let allocated = self.allocate_host_visible_buffer(size, vulkan_usage)?;
        debug!("allocated cpu-write buffer {name:?} ({size} bytes)");

        let id = self.next_id();
        self.buffers.lock().insert(id, allocated);
        Ok(BufferHandle(id))
    }

    fn write_buffer_element(
        &self,
        handle: BufferHandle,
        element_index: usize,
        data: &[u8],
    ) -> anyhow::Result<()> {
        let buffers = self.buffers.lock();
        let buffer = buffers
            .get(&handle.0)
            .ok_or_else(|| anyhow!("unknown buffer handle {}", handle.0))?;
        let start = element_index * data.len();
        let end = start + data.len();
        if end as vk::DeviceSize > buffer.size {
            return Err(anyhow!("write of {} bytes at offset {start} exceeds buffer size {}", data.len(), buffer.size));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), buffer.mapped.add(start), data.len());
        }
        Ok(())
    }

    fn create_device_local_buffer_with_data(
        &self,
        name: &str,
        data: &[u8],
        element_size: usize,
        element_count: usize,
        usage: BufferUsage,
        shader_writable: bool,
    ) -> anyhow::Result<BufferHandle> {
        let mut vulkan_usage = match usage {
            BufferUsage::NotUsedInShader => vk::BufferUsageFlags::TRANSFER_DST,
            BufferUsage::ScalarUniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::ArrayStorage => vk::BufferUsageFlags::STORAGE_BUFFER,
        };
        if shader_writable {
            vulkan_usage |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        let size = (element_size * element_count).max(data.len()) as vk::DeviceSize;
        let allocated = self.allocate_host_visible_buffer(size, vulkan_usage)?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), allocated.mapped, data.len());
        }
        info!("uploaded {} bytes into buffer {name:?}", data.len());

        let id = self.next_id();
        self.buffers.lock().insert(id, allocated);
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&self, handle: BufferHandle) {
        match self.buffers.lock().remove(&handle.0) {
            Some(buffer) => self.destroy_allocated_buffer(buffer),
            None => warn!("destroy_buffer called on unknown handle {}", handle.0),
        }
    }

    fn create_image(&self, info: &ImageCreateInfo) -> anyhow::Result<ImageHandle> {
        let format = format_for(info.format);
        let is_depth = matches!(
            info.format,
            BackendImageFormat::D32Float | BackendImageFormat::D24UnormS8Uint
        );
        let mut usage = if is_depth {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        } else {
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
        };
        if info.is_render_target {
            usage |= vk::ImageUsageFlags::SAMPLED;
        }

        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: info.width,
                height: info.height,
                depth: 1,
            })
            .mip_levels(info.mip_count.max(1))
            .array_layers(if info.is_cube { 6 } else { 1 })
            .samples(match info.sample_count {
                1 => vk::SampleCountFlags::TYPE_1,
                2 => vk::SampleCountFlags::TYPE_2,
                4 => vk::SampleCountFlags::TYPE_4,
                8 => vk::SampleCountFlags::TYPE_8,
                _ => vk::SampleCountFlags::TYPE_1,
            })
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .flags(if info.is_cube {
                vk::ImageCreateFlags::CUBE_COMPATIBLE
            } else {
                vk::ImageCreateFlags::empty()
            });
        let image =
            unsafe { self.device.create_image(&create_info, None) }.context("failed to create image")?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let memory_type_index =
            self.find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = match unsafe { self.device.allocate_memory(&allocate_info, None) } {
            Ok(memory) => memory,
            Err(error) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(error).context("failed to allocate image memory");
            }
        };
        if let Err(error) = unsafe { self.device.bind_image_memory(image, memory, 0) } {
            unsafe {
                self.device.destroy_image(image, None);
                self.device.free_memory(memory, None);
            }
            return Err(error).context("failed to bind image memory");
        }

        let aspect = if is_depth {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let view_create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(if info.is_cube {
                vk::ImageViewType::CUBE
            } else {
                vk::ImageViewType::TYPE_2D
            })
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: info.mip_count.max(1),
                base_array_layer: 0,
                layer_count: if info.is_cube { 6 } else { 1 },
            });
        let view = match unsafe { self.device.create_image_view(&view_create_info, None) } {
            Ok(view) => view,
            Err(error) => {
                unsafe {
                    self.device.destroy_image(image, None);
                    self.device.free_memory(memory, None);
                }
                return Err(error).context("failed to create image view");
            }
        };

        debug!("created image {:?} ({}x{})", info.name, info.width, info.height);
        let id = self.next_id();
        self.images.lock().insert(id, AllocatedImage { image, memory, view });
        Ok(ImageHandle(id))
    }

    fn destroy_image(&self, handle: ImageHandle) {
        match self.images.lock().remove(&handle.0) {
            Some(image) => unsafe {
                self.device.destroy_image_view(image.view, None);
                self.device.destroy_image(image.image, None);
                self.device.free_memory(image.memory, None);
            },
            None => warn!("destroy_image called on unknown handle {}", handle.0),
        }
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[BindingEntry],
    ) -> anyhow::Result<DescriptorSetLayoutHandle> {
        let vulkan_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding_index)
                    .descriptor_type(descriptor_type_for(binding.kind))
                    .descriptor_count(1)
                    .stage_flags(stage_flags_for(binding.stages))
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vulkan_bindings);
        let layout = unsafe { self.device.create_descriptor_set_layout(&create_info, None) }
            .context("failed to create descriptor set layout")?;

        let id = self.next_id();
        self.descriptor_set_layouts.lock().insert(id, layout);
        Ok(DescriptorSetLayoutHandle(id))
    }

    fn destroy_descriptor_set_layout(&self, handle: DescriptorSetLayoutHandle) {
        match self.descriptor_set_layouts.lock().remove(&handle.0) {
            Some(layout) => unsafe { self.device.destroy_descriptor_set_layout(layout, None) },
            None => warn!("destroy_descriptor_set_layout called on unknown handle {}", handle.0),
        }
    }

    fn create_descriptor_pool(
        &self,
        sizes_per_binding_kind: &[(BindingKind, u32)],
        max_sets: u32,
    ) -> anyhow::Result<DescriptorPoolHandle> {
        let pool_sizes: Vec<vk::DescriptorPoolSize> = sizes_per_binding_kind
            .iter()
            .map(|(kind, count)| {
                vk::DescriptorPoolSize::default()
                    .ty(descriptor_type_for(*kind))
                    .descriptor_count(*count)
            })
            .collect();
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(max_sets);
        let pool = unsafe { self.device.create_descriptor_pool(&create_info, None) }
            .context("failed to create descriptor pool")?;

        let id = self.next_id();
        self.descriptor_pools.lock().insert(id, pool);
        Ok(DescriptorPoolHandle(id))
    }

    fn destroy_descriptor_pool(&self, handle: DescriptorPoolHandle) {
        match self.descriptor_pools.lock().remove(&handle.0) {
            Some(pool) => unsafe { self.device.destroy_descriptor_pool(pool, None) },
            None => warn!("destroy_descriptor_pool called on unknown handle {}", handle.0),
        }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
        count: u32,
    ) -> anyhow::Result<Vec<DescriptorSetHandle>> {
        let pools = self.descriptor_pools.lock();
        let vulkan_pool = *pools
            .get(&pool.0)
            .ok_or_else(|| anyhow!("unknown descriptor pool handle {}", pool.0))?;
        let layouts = self.descriptor_set_layouts.lock();
        let vulkan_layout = *layouts
            .get(&layout.0)
            .ok_or_else(|| anyhow!("unknown descriptor set layout handle {}", layout.0))?;
        let set_layouts = vec![vulkan_layout; count as usize];

        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(vulkan_pool)
            .set_layouts(&set_layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&allocate_info) }
            .context("failed to allocate descriptor sets")?;

        drop(pools);
        drop(layouts);
        let mut descriptor_sets = self.descriptor_sets.lock();
        Ok(sets
            .into_iter()
            .map(|vulkan_set| {
                let id = self.next_id();
                descriptor_sets.insert(id, vulkan_set);
                DescriptorSetHandle(id)
            })
            .collect())
    }

    fn create_graphics_pipeline(
        &self,
        vertex_bytecode: &[u8],
        fragment_bytecode: &[u8],
        layout: DescriptorSetLayoutHandle,
        blend_enabled: bool,
    ) -> anyhow::Result<PipelineHandle> {
        let descriptor_layouts = self.descriptor_set_layouts.lock();
        let vulkan_layout = *descriptor_layouts
            .get(&layout.0)
            .ok_or_else(|| anyhow!("unknown descriptor set layout handle {}", layout.0))?;
        drop(descriptor_layouts);

        let vertex_module = self.create_shader_module(vertex_bytecode)?;
        let fragment_module = match self.create_shader_module(fragment_bytecode) {
            Ok(module) => module,
            Err(error) => {
                unsafe { self.device.destroy_shader_module(vertex_module, None) };
                return Err(error);
            }
        };

        let entry_point = CString::new("main").unwrap();
        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module)
                .name(&entry_point),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module)
                .name(&entry_point),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample =
            vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(blend_enabled)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD);
        let attachments = [color_blend_attachment];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&attachments);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let set_layouts = [vulkan_layout];
        let push_constant_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .offset(0)
            .size(128);
        let push_constant_ranges = [push_constant_range];
        let layout_create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let pipeline_layout = match unsafe { self.device.create_pipeline_layout(&layout_create_info, None) } {
            Ok(layout) => layout,
            Err(error) => {
                unsafe {
                    self.device.destroy_shader_module(vertex_module, None);
                    self.device.destroy_shader_module(fragment_module, None);
                }
                return Err(error).context("failed to create pipeline layout");
            }
        };

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(pipeline_layout)
            .render_pass(self.render_pass)
            .subpass(0);

        let pipeline_result = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        };

        unsafe {
            self.device.destroy_shader_module(vertex_module, None);
            self.device.destroy_shader_module(fragment_module, None);
        }

        let pipeline = match pipeline_result {
            Ok(pipelines) => pipelines[0],
            Err((_, error)) => {
                unsafe { self.device.destroy_pipeline_layout(pipeline_layout, None) };
                return Err(error).context("failed to create graphics pipeline");
            }
        };

        let id = self.next_id();
        self.pipelines.lock().insert(id, (pipeline, pipeline_layout));
        Ok(PipelineHandle(id))
    }

    fn destroy_pipeline(&self, handle: PipelineHandle) {
        match self.pipelines.lock().remove(&handle.0) {
            Some((pipeline, layout)) => unsafe {
                self.device.destroy_pipeline(pipeline, None);
                self.device.destroy_pipeline_layout(layout, None);
            },
            None => warn!("destroy_pipeline called on unknown handle {}", handle.0),
        }
    }

    fn write_descriptor(&self, set: DescriptorSetHandle, binding_index: u32, resource: BoundResource) {
        let descriptor_sets = self.descriptor_sets.lock();
        let Some(&vulkan_set) = descriptor_sets.get(&set.0) else {
            warn!("write_descriptor called on unknown descriptor set handle {}", set.0);
            return;
        };

        match resource {
            BoundResource::Buffer(handle) => {
                let buffers = self.buffers.lock();
                let Some(buffer) = buffers.get(&handle.0) else {
                    warn!("write_descriptor referenced unknown buffer handle {}", handle.0);
                    return;
                };
                let buffer_infos = [vk::DescriptorBufferInfo::default()
                    .buffer(buffer.buffer)
                    .offset(0)
                    .range(buffer.size)];
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(vulkan_set)
                    .dst_binding(binding_index)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&buffer_infos);
                unsafe { self.device.update_descriptor_sets(&[write], &[]) };
            }
            BoundResource::Image { handle, array_element } => {
                let images = self.images.lock();
                let Some(image) = images.get(&handle.0) else {
                    warn!("write_descriptor referenced unknown image handle {}", handle.0);
                    return;
                };
                let image_infos = [vk::DescriptorImageInfo::default()
                    .image_view(image.view)
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(vulkan_set)
                    .dst_binding(binding_index)
                    .dst_array_element(array_element)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(&image_infos);
                unsafe { self.device.update_descriptor_sets(&[write], &[]) };
            }
        }
    }

    fn wait_idle(&self) {
        if let Err(error) = unsafe { self.device.device_wait_idle() } {
            warn!("vkDeviceWaitIdle failed: {error}");
        }
    }
}
