use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use descriptor_layout::DescriptorResourceResolver;
use log::{error, warn};
use parking_lot::Mutex;
use shader_backend_traits::{
    DescriptorPoolHandle, DescriptorSetHandle, DescriptorSetLayoutHandle, ImageHandle,
    PipelineHandle, RendererBackend,
};
use shader_registry::ShaderPack;
use shader_types::MacroConfiguration;

/// Opaque identity of whatever owns pipeline usage (a material, in the
/// source). Materials are out of scope here; callers mint one `MaterialId`
/// per logical user and pass it consistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialId(pub u64);

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("vertex pack {0:?} has no shader variant for the active configuration")]
    MissingVertexVariant(String),
    #[error("fragment pack {0:?} has no shader variant for the active configuration")]
    MissingFragmentVariant(String),
    #[error(transparent)]
    DescriptorLayout(#[from] descriptor_layout::DescriptorLayoutError),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Pipeline identity is the 5-tuple (vertex-shader name, fragment-shader
/// name, pixel-blending flag, extra vertex macros, extra fragment macros).
/// Vertex and fragment macros are threaded through as one shared
/// [`MacroConfiguration`] (each pack filters it down to its own valid
/// macros when resolving its shader variant), so its single
/// `configuration_tag()` already distinguishes every combination the two
/// packs could individually see.
fn pipeline_identifier(
    vertex_shader_name: &str,
    fragment_shader_name: &str,
    blending_enabled: bool,
    configuration_tag: &str,
) -> String {
    format!("{vertex_shader_name} / {fragment_shader_name} / blend={blending_enabled} / cfg={configuration_tag}")
}

struct BackendObjects {
    descriptor_layout: DescriptorSetLayoutHandle,
    descriptor_pool: DescriptorPoolHandle,
    descriptor_sets: Vec<DescriptorSetHandle>,
    resource_bindings: HashMap<String, u32>,
    pipeline: PipelineHandle,
}

/// A materialized graphics pipeline shared across every material that draws
/// with the same (vertex-pack, fragment-pack, blending, macros) tuple.
pub struct Pipeline {
    vertex_pack: Arc<ShaderPack>,
    fragment_pack: Arc<ShaderPack>,
    configuration: MacroConfiguration,
    blending_enabled: bool,
    backend_objects: Mutex<BackendObjects>,
    materials_using: Mutex<HashSet<MaterialId>>,
}

impl Pipeline {
    pub fn identifier(&self) -> String {
        pipeline_identifier(
            self.vertex_pack.name(),
            self.fragment_pack.name(),
            self.blending_enabled,
            &self.configuration.configuration_tag(),
        )
    }

    pub fn is_using_pixel_blending(&self) -> bool {
        self.blending_enabled
    }

    /// Re-writes a descriptor-array binding named `array_name` (e.g. a
    /// shadow-map array) in every frame slot's set, if this pipeline
    /// declares it. Called when the array's live contents change after the
    /// pipeline was already materialized.
    pub fn rebind_array(&self, array_name: &str, images: &[ImageHandle], backend: &dyn RendererBackend) {
        let objects = self.backend_objects.lock();
        let Some(&binding_index) = objects.resource_bindings.get(array_name) else {
            return;
        };
        for set in &objects.descriptor_sets {
            for (array_element, image) in images.iter().enumerate() {
                backend.write_descriptor(
                    *set,
                    binding_index,
                    shader_backend_traits::BoundResource::Image {
                        handle: *image,
                        array_element: array_element as u32,
                    },
                );
            }
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        self.backend_objects.lock().pipeline
    }

    pub fn descriptor_sets(&self) -> Vec<DescriptorSetHandle> {
        self.backend_objects.lock().descriptor_sets.clone()
    }

    /// Logged and ignored if `material` was already registered.
    pub fn on_material_using(&self, material: MaterialId) {
        let mut materials = self.materials_using.lock();
        if !materials.insert(material) {
            error!(
                "material {material:?} notified pipeline {:?} of being used but it was already \
                 registered",
                self.identifier()
            );
        }
    }

    /// Returns `true` if this was the last material using the pipeline.
    pub fn on_material_no_longer_using(&self, material: MaterialId) -> bool {
        let mut materials = self.materials_using.lock();
        if !materials.remove(&material) {
            error!(
                "material {material:?} notified pipeline {:?} of no longer being used but it was \
                 never registered",
                self.identifier()
            );
            return false;
        }
        materials.is_empty()
    }

    fn destroy(&self, backend: &dyn RendererBackend) {
        let objects = self.backend_objects.lock();
        backend.destroy_pipeline(objects.pipeline);
        backend.destroy_descriptor_pool(objects.descriptor_pool);
        backend.destroy_descriptor_set_layout(objects.descriptor_layout);
    }
}

fn materialize(
    vertex_pack: &Arc<ShaderPack>,
    fragment_pack: &Arc<ShaderPack>,
    configuration: &MacroConfiguration,
    blending_enabled: bool,
    backend: &dyn RendererBackend,
    frame_slots: u32,
    resolver: &dyn DescriptorResourceResolver,
) -> Result<Pipeline, PipelineError> {
    let vertex_object = vertex_pack
        .get_shader(configuration)
        .map_err(|_| PipelineError::MissingVertexVariant(vertex_pack.name().to_string()))?;
    let fragment_object = fragment_pack
        .get_shader(configuration)
        .map_err(|_| PipelineError::MissingFragmentVariant(fragment_pack.name().to_string()))?;

    let vertex_bytecode = vertex_object.bytecode()?;
    let fragment_bytecode = fragment_object.bytecode()?;
    let vertex_reflection = vertex_object.reflection()?.unwrap_or_default();
    let fragment_reflection = fragment_object.reflection()?.unwrap_or_default();

    let generated =
        descriptor_layout::generate(&vertex_reflection, &fragment_reflection, backend, frame_slots)?;

    let pipeline_handle = match backend.create_graphics_pipeline(
        &vertex_bytecode,
        &fragment_bytecode,
        generated.layout,
        blending_enabled,
    ) {
        Ok(handle) => handle,
        Err(error) => {
            backend.destroy_descriptor_pool(generated.pool);
            backend.destroy_descriptor_set_layout(generated.layout);
            return Err(error.into());
        }
    };

    descriptor_layout::write_resources(&generated, resolver, backend);
    descriptor_layout::write_array_resources(&generated, resolver, backend);

    Ok(Pipeline {
        vertex_pack: Arc::clone(vertex_pack),
        fragment_pack: Arc::clone(fragment_pack),
        blending_enabled,
        configuration: configuration.clone(),
        backend_objects: Mutex::new(BackendObjects {
            descriptor_layout: generated.layout,
            descriptor_pool: generated.pool,
            descriptor_sets: generated.sets,
            resource_bindings: generated.resource_bindings,
            pipeline: pipeline_handle,
        }),
        materials_using: Mutex::new(HashSet::new()),
    })
}

/// Owns every live pipeline, keyed by [`pipeline_identifier`]'s 5-tuple
/// string. Reconfiguration destroys and recreates every entry under a
/// GPU-idle wait.
pub struct PipelineManager {
    backend: Arc<dyn RendererBackend>,
    frame_slots: u32,
    resolver: Arc<dyn DescriptorResourceResolver>,
    pipelines: Mutex<HashMap<String, Arc<Pipeline>>>,
}

impl PipelineManager {
    pub fn new(
        backend: Arc<dyn RendererBackend>,
        frame_slots: u32,
        resolver: Arc<dyn DescriptorResourceResolver>,
    ) -> Self {
        Self {
            backend,
            frame_slots,
            resolver,
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the existing pipeline for this (vertex-pack, fragment-pack,
    /// blending flag, macro configuration) tuple if one was already
    /// materialized, otherwise builds and registers a new one.
    pub fn get_or_create(
        &self,
        vertex_pack: &Arc<ShaderPack>,
        fragment_pack: &Arc<ShaderPack>,
        configuration: &MacroConfiguration,
        blending_enabled: bool,
    ) -> Result<Arc<Pipeline>, PipelineError> {
        let identifier = pipeline_identifier(
            vertex_pack.name(),
            fragment_pack.name(),
            blending_enabled,
            &configuration.configuration_tag(),
        );

        {
            let pipelines = self.pipelines.lock();
            if let Some(existing) = pipelines.get(&identifier) {
                return Ok(Arc::clone(existing));
            }
        }

        let pipeline = Arc::new(materialize(
            vertex_pack,
            fragment_pack,
            configuration,
            blending_enabled,
            self.backend.as_ref(),
            self.frame_slots,
            self.resolver.as_ref(),
        )?);

        self.pipelines.lock().insert(identifier, Arc::clone(&pipeline));
        Ok(pipeline)
    }

    pub fn get(
        &self,
        vertex_shader_name: &str,
        fragment_shader_name: &str,
        blending_enabled: bool,
        configuration: &MacroConfiguration,
    ) -> Option<Arc<Pipeline>> {
        self.pipelines
            .lock()
            .get(&pipeline_identifier(
                vertex_shader_name,
                fragment_shader_name,
                blending_enabled,
                &configuration.configuration_tag(),
            ))
            .cloned()
    }

    /// Re-writes `array_name`'s descriptor binding in every pipeline that
    /// references it, e.g. after a shadow-map array was reallocated.
    pub fn rebind_array(&self, array_name: &str, images: &[ImageHandle]) {
        for pipeline in self.pipelines.lock().values() {
            pipeline.rebind_array(array_name, images, self.backend.as_ref());
        }
    }

    /// Called by [`Pipeline::on_material_no_longer_using`]'s caller once it
    /// observes the last material released; destroys the backend objects
    /// and drops the registry entry.
    pub fn on_pipeline_no_longer_used(&self, identifier: &str) {
        let removed = self.pipelines.lock().remove(identifier);
        match removed {
            Some(pipeline) => pipeline.destroy(self.backend.as_ref()),
            None => warn!("pipeline {identifier:?} was reported unused but is not registered"),
        }
    }

    /// Destroys and recreates every pipeline. Callers must hold the render-resources lock for the
    /// duration; this method itself waits for the GPU to go idle
    /// first.
    pub fn reconfigure_all(
        &self,
        configuration: &MacroConfiguration,
    ) -> Result<(), PipelineError> {
        self.backend.wait_idle();

        let mut pipelines = self.pipelines.lock();
        let mut rebuilt = HashMap::with_capacity(pipelines.len());
        for (_, pipeline) in pipelines.drain() {
            let blending_enabled = pipeline.is_using_pixel_blending();
            let vertex_pack = Arc::clone(&pipeline.vertex_pack);
            let fragment_pack = Arc::clone(&pipeline.fragment_pack);
            pipeline.destroy(self.backend.as_ref());

            let recreated = materialize(
                &vertex_pack,
                &fragment_pack,
                configuration,
                blending_enabled,
                self.backend.as_ref(),
                self.frame_slots,
                self.resolver.as_ref(),
            )?;
            recreated
                .materials_using
                .lock()
                .extend(pipeline.materials_using.lock().iter().copied());
            rebuilt.insert(recreated.identifier(), Arc::new(recreated));
        }
        *pipelines = rebuilt;
        Ok(())
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shader_backend_traits::null::NullBackend;
    use shader_backend_traits::{BackendLanguage, CompileOutcome, CompiledArtifact, ShaderCompilerBackend};
    use shader_cache::{RendererKind, ShaderCacheManager};
    use shader_types::{ShaderDescription, ShaderKind};
    use std::io::Write;

    struct StubCompiler;
    impl ShaderCompilerBackend for StubCompiler {
        fn language(&self) -> BackendLanguage {
            BackendLanguage::Spirv
        }
        fn compile(
            &self,
            _description: &ShaderDescription,
            out_directory: &std::path::Path,
            configuration_tag: &str,
        ) -> CompileOutcome {
            std::fs::create_dir_all(out_directory).unwrap();
            let bytecode = vec![1u8, 2, 3, 4];
            std::fs::write(out_directory.join(format!("shader{configuration_tag}")), &bytecode).unwrap();
            CompileOutcome::Compiled(CompiledArtifact {
                bytecode,
                reflection: None,
            })
        }
    }

    fn make_source(dir: &std::path::Path, name: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"void main() {}").unwrap();
        path
    }

    fn build_pack(dir: &std::path::Path, name: &str, kind: ShaderKind) -> Arc<ShaderPack> {
        let source = make_source(dir, &format!("{name}.glsl"));
        let description =
            ShaderDescription::new(name, source, kind, "main", MacroConfiguration::default()).unwrap();
        let cache_dir = dir.join("cache");
        let cache = ShaderCacheManager::open(&cache_dir, true, RendererKind::Vulkan, None).unwrap();
        ShaderPack::compile_pack(&description, &StubCompiler, &cache, &dir.join(name)).unwrap()
    }

    struct NoopResolver;
    impl DescriptorResourceResolver for NoopResolver {
        fn resolve(&self, _name: &str, _frame_slot: u32) -> Option<shader_backend_traits::BoundResource> {
            None
        }
    }

    fn make_manager() -> PipelineManager {
        PipelineManager::new(Arc::new(NullBackend::new()), 3, Arc::new(NoopResolver))
    }

    #[test]
    fn get_or_create_returns_the_same_pipeline_for_the_same_pair() {
        let dir = tempfile::tempdir().unwrap();
        let vertex_pack = build_pack(dir.path(), "mesh_vs", ShaderKind::Vertex);
        let fragment_pack = build_pack(dir.path(), "mesh_ps", ShaderKind::Fragment);

        let manager = make_manager();
        let a = manager
            .get_or_create(&vertex_pack, &fragment_pack, &MacroConfiguration::default(), false)
            .unwrap();
        let b = manager
            .get_or_create(&vertex_pack, &fragment_pack, &MacroConfiguration::default(), false)
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.pipeline_count(), 1);
    }

    #[test]
    fn last_material_release_triggers_manager_notification() {
        let dir = tempfile::tempdir().unwrap();
        let vertex_pack = build_pack(dir.path(), "mesh_vs", ShaderKind::Vertex);
        let fragment_pack = build_pack(dir.path(), "mesh_ps", ShaderKind::Fragment);

        let manager = make_manager();
        let pipeline = manager
            .get_or_create(&vertex_pack, &fragment_pack, &MacroConfiguration::default(), false)
            .unwrap();

        let material = MaterialId(1);
        pipeline.on_material_using(material);
        let was_last = pipeline.on_material_no_longer_using(material);
        assert!(was_last);

        manager.on_pipeline_no_longer_used(&pipeline.identifier());
        assert_eq!(manager.pipeline_count(), 0);
    }

    #[test]
    fn blending_and_configuration_are_part_of_pipeline_identity() {
        let dir = tempfile::tempdir().unwrap();
        let vertex_pack = build_pack(dir.path(), "mesh_vs", ShaderKind::Vertex);
        let fragment_pack = build_pack(dir.path(), "mesh_ps", ShaderKind::Fragment);

        let manager = make_manager();
        let no_blend = manager
            .get_or_create(&vertex_pack, &fragment_pack, &MacroConfiguration::default(), false)
            .unwrap();
        let with_blend = manager
            .get_or_create(&vertex_pack, &fragment_pack, &MacroConfiguration::default(), true)
            .unwrap();

        assert!(!Arc::ptr_eq(&no_blend, &with_blend));
        assert_ne!(no_blend.identifier(), with_blend.identifier());
        assert_eq!(manager.pipeline_count(), 2);

        let fetched = manager
            .get(
                vertex_pack.name(),
                fragment_pack.name(),
                false,
                &MacroConfiguration::default(),
            )
            .unwrap();
        assert!(Arc::ptr_eq(&fetched, &no_blend));
    }

    struct StaticResolver {
        frame_buffer: shader_backend_traits::BufferHandle,
    }

    impl DescriptorResourceResolver for StaticResolver {
        fn resolve(&self, name: &str, _frame_slot: u32) -> Option<shader_backend_traits::BoundResource> {
            match name {
                descriptor_layout::FRAME_CONSTANTS_BUFFER_NAME => {
                    Some(shader_backend_traits::BoundResource::Buffer(self.frame_buffer))
                }
                _ => None,
            }
        }
    }

    #[test]
    fn get_or_create_writes_resolved_descriptors_into_every_frame_slot() {
        let dir = tempfile::tempdir().unwrap();
        let vertex_pack = build_pack(dir.path(), "mesh_vs", ShaderKind::Vertex);
        let fragment_pack = build_pack(dir.path(), "mesh_ps", ShaderKind::Fragment);

        let backend = Arc::new(NullBackend::new());
        let frame_buffer = shader_backend_traits::BufferHandle(42);
        let manager = PipelineManager::new(
            Arc::clone(&backend) as Arc<dyn RendererBackend>,
            3,
            Arc::new(StaticResolver { frame_buffer }),
        );

        let pipeline = manager
            .get_or_create(&vertex_pack, &fragment_pack, &MacroConfiguration::default(), false)
            .unwrap();

        for set in pipeline.descriptor_sets() {
            assert!(matches!(
                backend.written_descriptor(set, descriptor_layout::FRAME_CONSTANTS_BINDING_INDEX, 0),
                Some(shader_backend_traits::BoundResource::Buffer(b)) if b == frame_buffer
            ));
        }
    }
}
