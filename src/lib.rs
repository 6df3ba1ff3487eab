//! Wires the shader and GPU-resource subsystem together into its two data
//! flows: the compile path (description → cache check → compile/reuse →
//! registration) and the draw path (frame-slot advance → pipeline
//! resolution → dirty-slot upload). Nothing here owns GPU-API-specific
//! code; that lives behind [`shader_backend_traits::RendererBackend`] in
//! `pipeline::backends`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use config::ShaderManagerConfig;
use descriptor_layout::DescriptorResourceResolver;
use gpu_resource::{FrameResourcesManager, GpuResourceManager};
use pipeline::{Pipeline, PipelineManager};
use shader_backend_traits::{BoundResource, RendererBackend};
use shader_cache::{HlslGlobalCacheParams, RendererKind, ShaderCacheManager};
use shader_registry::{CompileProgress, ShaderManager, ShaderPack};
use shader_types::{MacroConfiguration, ShaderDescription};
use shadow_map::ShadowMapManager;

pub use gpu_resource::{CommandAllocatorHandle, FrameSlot, DEFAULT_FRAME_RESOURCE_COUNT};
pub use pipeline::MaterialId;
pub use shader_array_slot::{ShaderArraySlotManager, SlotHandle};
pub use shadow_map::{ShadowMapHandle, ShadowMapType};

/// What the root crate needs beyond what each subordinate manager already
/// takes on its own: where the on-disk cache lives, and the fixed ring
/// depth and initial shadow-map quality to start up with.
pub struct EngineConfig {
    pub cache_root: PathBuf,
    pub is_release_build: bool,
    pub renderer: RendererKind,
    pub hlsl_params: Option<HlslGlobalCacheParams>,
    pub frame_slots: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no shader named {0:?} is registered")]
    UnknownShader(String),
    #[error(transparent)]
    Cache(#[from] anyhow::Error),
    #[error(transparent)]
    Pipeline(#[from] pipeline::PipelineError),
}

/// Resolves the two kinds of descriptor binding every pipeline can declare:
/// the per-frame-slot constants buffer, and a light kind's shadow-map
/// descriptor array. The only [`DescriptorResourceResolver`] this crate
/// builds; shared by every pipeline through the [`PipelineManager`].
struct EngineDescriptorResolver {
    frame_resources: Arc<FrameResourcesManager>,
    shadow_maps: Arc<ShadowMapManager>,
}

impl DescriptorResourceResolver for EngineDescriptorResolver {
    fn resolve(&self, name: &str, frame_slot: u32) -> Option<BoundResource> {
        if name != descriptor_layout::FRAME_CONSTANTS_BUFFER_NAME {
            return None;
        }
        let buffer = self
            .frame_resources
            .with_slot(frame_slot as usize, |slot| slot.frame_constants_buffer);
        Some(BoundResource::Buffer(buffer))
    }

    fn resolve_array(&self, name: &str) -> Option<Vec<shader_backend_traits::ImageHandle>> {
        for kind in [ShadowMapType::Directional, ShadowMapType::Spot, ShadowMapType::Point] {
            if kind.descriptor_array_name() == name {
                return Some(self.shadow_maps.current_array_contents(kind));
            }
        }
        None
    }
}

/// Owns every subordinate manager and exposes the compile-path and
/// draw-path operations as a single cohesive API, the way a renderer's own
/// "resource manager" facade would.
pub struct ShaderCore {
    backend: Arc<dyn RendererBackend>,
    cache_root: PathBuf,
    cache: Arc<ShaderCacheManager>,
    shaders: Arc<ShaderManager>,
    pipelines: Arc<PipelineManager>,
    gpu_resources: Arc<GpuResourceManager>,
    frame_resources: Arc<FrameResourcesManager>,
    shadow_maps: Arc<ShadowMapManager>,
    self_validation_interval: Duration,
}

impl ShaderCore {
    pub fn new(backend: Arc<dyn RendererBackend>, config: EngineConfig) -> anyhow::Result<Self> {
        let cache = Arc::new(ShaderCacheManager::open(
            config.cache_root.clone(),
            config.is_release_build,
            config.renderer,
            config.hlsl_params,
        )?);
        let manager_config =
            ShaderManagerConfig::load_or_create(&config.cache_root.join("shader_manager.toml"))?;
        let gpu_resources = Arc::new(GpuResourceManager::new(Arc::clone(&backend)));
        let frame_resources = Arc::new(FrameResourcesManager::new(
            backend.as_ref(),
            config.frame_slots as usize,
        )?);
        let shadow_maps = Arc::new(ShadowMapManager::new(Arc::clone(&gpu_resources)));

        let resolver = Arc::new(EngineDescriptorResolver {
            frame_resources: Arc::clone(&frame_resources),
            shadow_maps: Arc::clone(&shadow_maps),
        });
        let pipelines = Arc::new(PipelineManager::new(
            Arc::clone(&backend),
            config.frame_slots,
            resolver,
        ));

        let rebind_pipelines = Arc::clone(&pipelines);
        shadow_maps.on_rebind_needed(Arc::new(move |kind: ShadowMapType, images| {
            rebind_pipelines.rebind_array(kind.descriptor_array_name(), images);
        }));

        Ok(Self {
            pipelines,
            backend,
            cache_root: config.cache_root,
            cache,
            shaders: Arc::new(ShaderManager::new()),
            gpu_resources,
            frame_resources,
            shadow_maps,
            self_validation_interval: manager_config.interval(),
        })
    }

    /// How often the caller should invoke
    /// [`self_validate_shader_registry`](Self::self_validate_shader_registry),
    /// per the `shader_manager.toml` config file under the cache root.
    pub fn self_validation_interval(&self) -> Duration {
        self.self_validation_interval
    }

    /// Compile path: dispatches a batch of shader compiles/cache-reuse
    /// jobs onto the worker pool. Callbacks arrive later, off-thread;
    /// [`drain_deferred_tasks`](Self::drain_deferred_tasks) must be polled
    /// from the render-owning thread to observe them.
    #[allow(clippy::too_many_arguments)]
    pub fn compile_shaders(
        &self,
        descriptions: Vec<ShaderDescription>,
        language: shader_backend_traits::BackendLanguage,
        compiler: Arc<dyn shader_backend_traits::ShaderCompilerBackend>,
        on_progress: Arc<dyn Fn(CompileProgress) + Send + Sync>,
        on_error: Arc<dyn Fn(&str, String) + Send + Sync>,
        on_complete: Arc<dyn Fn() + Send + Sync>,
    ) -> anyhow::Result<()> {
        self.shaders.compile(
            descriptions,
            language,
            compiler,
            Arc::clone(&self.cache),
            self.cache_root.clone(),
            on_progress,
            on_error,
            on_complete,
        )
    }

    /// Runs every deferred compile-path callback queued since the last
    /// call. Must be called from the single thread that owns renderer
    /// state.
    pub fn drain_deferred_tasks(&self) {
        self.shaders.drain_deferred_tasks();
    }

    pub fn shader(&self, name: &str) -> Option<Arc<ShaderPack>> {
        self.shaders.get(name)
    }

    pub fn shaders(&self) -> &Arc<ShaderManager> {
        &self.shaders
    }

    /// Periodic sweep: drops registry entries nothing outside the
    /// registry references any more.
    pub fn self_validate_shader_registry(&self) {
        self.shaders.self_validate();
    }

    /// Draw path: resolves (or first materializes) the baked pipeline
    /// for a (vertex shader, fragment shader) pair under the current
    /// renderer configuration.
    pub fn resolve_pipeline(
        &self,
        vertex_shader_name: &str,
        fragment_shader_name: &str,
        configuration: &MacroConfiguration,
        blending_enabled: bool,
    ) -> Result<Arc<Pipeline>, EngineError> {
        let vertex_pack = self
            .shaders
            .get(vertex_shader_name)
            .ok_or_else(|| EngineError::UnknownShader(vertex_shader_name.to_string()))?;
        let fragment_pack = self
            .shaders
            .get(fragment_shader_name)
            .ok_or_else(|| EngineError::UnknownShader(fragment_shader_name.to_string()))?;

        Ok(self
            .pipelines
            .get_or_create(&vertex_pack, &fragment_pack, configuration, blending_enabled)?)
    }

    pub fn pipelines(&self) -> &PipelineManager {
        &self.pipelines
    }

    pub fn gpu_resources(&self) -> &Arc<GpuResourceManager> {
        &self.gpu_resources
    }

    pub fn frame_resources(&self) -> &FrameResourcesManager {
        &self.frame_resources
    }

    pub fn shadow_maps(&self) -> &ShadowMapManager {
        &self.shadow_maps
    }

    /// Draw path, start of frame: advances the frame-resources ring
    /// and returns the slot index to use this frame.
    pub fn begin_frame(&self, wait_for_fence: impl FnOnce(u64)) -> usize {
        self.frame_resources.begin_frame(wait_for_fence)
    }

    /// Renderer reconfiguration: recreates every baked
    /// pipeline under the new configuration and resizes every live shadow
    /// map to the new quality setting. Blocks the GPU idle first via the
    /// pipeline manager.
    pub fn reconfigure(
        &self,
        configuration: &MacroConfiguration,
        shadow_quality_size: u32,
        directional_world_size: u64,
    ) -> Result<(), EngineError> {
        self.pipelines.reconfigure_all(configuration)?;
        self.shadow_maps
            .reconfigure(shadow_quality_size, directional_world_size)?;
        Ok(())
    }
}

/// The set of shader names a draw-path caller asked for but that aren't
/// registered yet, for diagnostics.
pub fn missing_shaders(shaders: &ShaderManager, names: &[&str]) -> HashSet<String> {
    names
        .iter()
        .filter(|name| shaders.get(name).is_none())
        .map(|name| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shader_backend_traits::null::NullBackend;
    use shader_backend_traits::{BackendLanguage, CompileOutcome, CompiledArtifact};
    use shader_types::ShaderKind;
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubCompiler;
    impl shader_backend_traits::ShaderCompilerBackend for StubCompiler {
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
            let bytecode = vec![0u8; 16];
            std::fs::write(
                out_directory.join(format!("shader{configuration_tag}")),
                &bytecode,
            )
            .unwrap();
            CompileOutcome::Compiled(CompiledArtifact {
                bytecode,
                reflection: None,
            })
        }
    }

    fn make_source(dir: &std::path::Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"void main() {}").unwrap();
        path
    }

    fn test_engine(cache_root: &std::path::Path) -> ShaderCore {
        let backend: Arc<dyn RendererBackend> = Arc::new(NullBackend::new());
        ShaderCore::new(
            backend,
            EngineConfig {
                cache_root: cache_root.to_path_buf(),
                is_release_build: true,
                renderer: RendererKind::Vulkan,
                hlsl_params: None,
                frame_slots: DEFAULT_FRAME_RESOURCE_COUNT as u32,
            },
        )
        .unwrap()
    }

    #[test]
    fn resolve_pipeline_fails_for_unregistered_shader() {
        let cache_dir = tempfile::tempdir().unwrap();
        let engine = test_engine(cache_dir.path());

        let result = engine.resolve_pipeline("vs_missing", "fs_missing", &MacroConfiguration::default(), false);
        assert!(matches!(result, Err(EngineError::UnknownShader(name)) if name == "vs_missing"));
    }

    #[test]
    fn compile_path_registers_shader_then_draw_path_resolves_pipeline() {
        let cache_dir = tempfile::tempdir().unwrap();
        let src_dir = tempfile::tempdir().unwrap();
        let engine = test_engine(cache_dir.path());

        let vertex_source = make_source(src_dir.path(), "triangle.vert");
        let fragment_source = make_source(src_dir.path(), "triangle.frag");

        let vertex = ShaderDescription::new(
            "triangle_vs",
            vertex_source,
            ShaderKind::Vertex,
            "main",
            MacroConfiguration::default(),
        )
        .unwrap();
        let fragment = ShaderDescription::new(
            "triangle_fs",
            fragment_source,
            ShaderKind::Fragment,
            "main",
            MacroConfiguration::default(),
        )
        .unwrap();

        let completed = Arc::new(AtomicBool::new(false));
        let completed_clone = Arc::clone(&completed);
        engine
            .compile_shaders(
                vec![vertex, fragment],
                BackendLanguage::Spirv,
                Arc::new(StubCompiler),
                Arc::new(|_progress| {}),
                Arc::new(|_name, _message| {}),
                Arc::new(move || completed_clone.store(true, Ordering::SeqCst)),
            )
            .unwrap();

        for _ in 0..200 {
            engine.drain_deferred_tasks();
            if completed.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(completed.load(Ordering::SeqCst));

        let pipeline = engine
            .resolve_pipeline("triangle_vs", "triangle_fs", &MacroConfiguration::default(), false)
            .unwrap();
        assert_eq!(pipeline.identifier(), "triangle_vs / triangle_fs / blend=false / cfg=");
        assert_eq!(engine.pipelines().pipeline_count(), 1);

        let same = engine
            .resolve_pipeline("triangle_vs", "triangle_fs", &MacroConfiguration::default(), false)
            .unwrap();
        assert!(Arc::ptr_eq(&pipeline, &same));
    }

    #[test]
    fn self_validation_interval_defaults_to_the_config_minimum() {
        let cache_dir = tempfile::tempdir().unwrap();
        let engine = test_engine(cache_dir.path());
        assert_eq!(
            engine.self_validation_interval(),
            std::time::Duration::from_secs(
                config::shader_manager_config::MIN_SELF_VALIDATION_INTERVAL_MINUTES * 60
            ),
        );
        assert!(cache_dir.path().join("shader_manager.toml").exists());
    }

    #[test]
    fn frame_resources_ring_advances_from_engine() {
        let cache_dir = tempfile::tempdir().unwrap();
        let engine = test_engine(cache_dir.path());
        let first = engine.begin_frame(|_| {});
        let second = engine.begin_frame(|_| {});
        assert_ne!(first, second);
    }
}
