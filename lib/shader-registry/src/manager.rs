use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use base::fatal;
use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{error, info, warn};
use parking_lot::Mutex;
use shader_backend_traits::{BackendLanguage, ShaderCompilerBackend};
use shader_cache::ShaderCacheManager;
use shader_types::{MacroConfiguration, ShaderDescription, ShaderKind};

use crate::pack::{ShaderPackError, ShaderPack};

/// `(compiled, total)` progress for one `compile` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileProgress {
    pub compiled: usize,
    pub total: usize,
}

type DeferredTask = Box<dyn FnOnce() + Send>;

/// Owns the `name -> pack` registry and the pending-removal list.
/// Compile jobs run on the `rayon` global pool; their callbacks are not
/// invoked directly from worker threads but pushed onto a deferred-task
/// queue that the caller drains from its own main thread via
/// [`ShaderManager::drain_deferred_tasks`], mirroring the source's
/// `addDeferredTask` pattern.
pub struct ShaderManager {
    registry: Mutex<HashMap<String, Arc<ShaderPack>>>,
    pending_removal: Mutex<Vec<String>>,
    deferred_tasks: (Sender<DeferredTask>, Receiver<DeferredTask>),
    total_compile_queries: AtomicUsize,
}

impl Default for ShaderManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ShaderManager {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(HashMap::new()),
            pending_removal: Mutex::new(Vec::new()),
            deferred_tasks: unbounded(),
            total_compile_queries: AtomicUsize::new(0),
        }
    }

    fn push_deferred(&self, task: DeferredTask) {
        let _ = self.deferred_tasks.0.send(task);
    }

    /// Runs every deferred callback queued since the last call. Must be
    /// called from the single thread that owns renderer state.
    pub fn drain_deferred_tasks(&self) {
        while let Ok(task) = self.deferred_tasks.1.try_recv() {
            task();
        }
    }

    fn validate_new_names(&self, descriptions: &[ShaderDescription]) -> anyhow::Result<()> {
        if descriptions.is_empty() {
            anyhow::bail!("the specified list of shaders to compile is empty");
        }
        let registry = self.registry.lock();
        let mut seen = std::collections::HashSet::new();
        for description in descriptions {
            if registry.contains_key(&description.name) {
                anyhow::bail!(
                    "a shader with the name {:?} was already added, choose another name",
                    description.name
                );
            }
            if !seen.insert(description.name.clone()) {
                anyhow::bail!(
                    "the specified list of shaders to compile contains a duplicate name {:?}",
                    description.name
                );
            }
        }
        Ok(())
    }

    /// Dispatches one background job per description: each attempts cache
    /// reuse first and falls back to compilation, registers its pack on
    /// success, and fires `on_progress`/`on_error`/`on_complete` through the
    /// deferred-task queue. `on_complete` fires exactly once, invoked
    /// by the job that observes the counter reach `total`.
    #[allow(clippy::too_many_arguments)]
    pub fn compile(
        self: &Arc<Self>,
        descriptions: Vec<ShaderDescription>,
        language: BackendLanguage,
        compiler: Arc<dyn ShaderCompilerBackend>,
        cache: Arc<ShaderCacheManager>,
        cache_root: PathBuf,
        on_progress: Arc<dyn Fn(CompileProgress) + Send + Sync>,
        on_error: Arc<dyn Fn(&str, String) + Send + Sync>,
        on_complete: Arc<dyn Fn() + Send + Sync>,
    ) -> anyhow::Result<()> {
        self.validate_new_names(&descriptions)?;

        let query_id = self.total_compile_queries.fetch_add(1, Ordering::SeqCst);
        let total = descriptions.len();
        let compiled_count = Arc::new(AtomicUsize::new(0));

        for description in descriptions {
            let manager = Arc::clone(self);
            let compiler = Arc::clone(&compiler);
            let cache = Arc::clone(&cache);
            let cache_root = cache_root.clone();
            let compiled_count = Arc::clone(&compiled_count);
            let on_progress = Arc::clone(&on_progress);
            let on_error = Arc::clone(&on_error);
            let on_complete = Arc::clone(&on_complete);

            rayon::spawn(move || {
                manager.compile_job(
                    query_id,
                    description,
                    language,
                    compiler.as_ref(),
                    &cache,
                    &cache_root,
                    &compiled_count,
                    total,
                    &on_progress,
                    &on_error,
                    &on_complete,
                );
            });
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_job(
        self: &Arc<Self>,
        query_id: usize,
        description: ShaderDescription,
        language: BackendLanguage,
        compiler: &dyn ShaderCompilerBackend,
        cache: &ShaderCacheManager,
        cache_root: &std::path::Path,
        compiled_count: &Arc<AtomicUsize>,
        total: usize,
        on_progress: &Arc<dyn Fn(CompileProgress) + Send + Sync>,
        on_error: &Arc<dyn Fn(&str, String) + Send + Sync>,
        on_complete: &Arc<dyn Fn() + Send + Sync>,
    ) {
        let out_directory = cache_root.join(&description.name);

        let pack = match ShaderPack::create_from_cache(&description, language, cache, &out_directory) {
            Ok(pack) => Some(pack),
            Err(ShaderPackError::CacheInvalidated { reason, .. }) => {
                info!(
                    "shader {:?} cache invalidated ({reason}), recompiling",
                    description.name
                );
                None
            }
            Err(error) => {
                info!(
                    "shader {:?} cache files unusable ({error}), recompiling",
                    description.name
                );
                None
            }
        };

        let pack = match pack {
            Some(pack) => Some(pack),
            None => match ShaderPack::compile_pack(&description, compiler, cache, &out_directory) {
                Ok(pack) => Some(pack),
                Err(ShaderPackError::Diagnostic { message, .. }) => {
                    let name = description.name.clone();
                    let on_error = Arc::clone(on_error);
                    self.push_deferred(Box::new(move || on_error(&name, message)));
                    None
                }
                Err(error) => {
                    error!("shader compilation query #{query_id}: internal error: {error}");
                    let name = description.name.clone();
                    let message = error.to_string();
                    let on_error = Arc::clone(on_error);
                    self.push_deferred(Box::new(move || on_error(&name, message)));
                    None
                }
            },
        };

        if let Some(pack) = pack {
            let mut registry = self.registry.lock();
            if registry.contains_key(&description.name) {
                error!(
                    "shader compilation query #{query_id}: shader {:?} already registered",
                    description.name
                );
            } else {
                registry.insert(description.name.clone(), pack);
            }
        }

        let compiled_so_far = compiled_count.fetch_add(1, Ordering::SeqCst) + 1;
        let on_progress = Arc::clone(on_progress);
        self.push_deferred(Box::new(move || {
            on_progress(CompileProgress {
                compiled: compiled_so_far,
                total,
            })
        }));

        if compiled_so_far == total {
            let on_complete = Arc::clone(on_complete);
            self.push_deferred(Box::new(move || on_complete()));
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ShaderPack>> {
        self.registry.lock().get(name).cloned()
    }

    /// Drops a pack's in-memory bytecode if nothing outside the registry
    /// references it (`Arc::strong_count` of 1 means only the registry
    /// holds it).
    pub fn release_if_unused(&self, name: &str) {
        let registry = self.registry.lock();
        let Some(pack) = registry.get(name) else {
            warn!("no shader with the name {name:?} exists");
            return;
        };
        if Arc::strong_count(pack) > 1 {
            return;
        }
        pack.release_data_from_memory_if_loaded();
    }

    /// If still referenced, defers removal to the next `self_validate`;
    /// otherwise removes immediately. Returns `true` if removal was
    /// deferred.
    pub fn mark_to_be_removed(&self, name: &str) -> bool {
        let mut registry = self.registry.lock();
        let Some(pack) = registry.get(name).cloned() else {
            warn!("no shader with the name {name:?} exists");
            return false;
        };

        if Arc::strong_count(&pack) > 1 {
            let mut pending = self.pending_removal.lock();
            if !pending.iter().any(|pending_name| pending_name == name) {
                info!("shader {name:?} is marked to be removed later");
                pending.push(name.to_string());
            }
            return true;
        }

        registry.remove(name);
        false
    }

    /// Periodic sweep: drops registry entries whose external
    /// reference count has fallen to exactly one (the registry's own),
    /// and logs (without failing) any pending name that no longer exists.
    pub fn self_validate(&self) {
        info!("starting shader registry self validation...");
        let start = std::time::Instant::now();

        let mut removed = Vec::new();
        let mut not_found = Vec::new();

        {
            let mut registry = self.registry.lock();
            let mut pending = self.pending_removal.lock();
            pending.retain(|name| match registry.get(name) {
                None => {
                    not_found.push(name.clone());
                    false
                }
                Some(pack) if Arc::strong_count(pack) == 1 => {
                    removed.push(name.clone());
                    true
                }
                Some(_) => true,
            });
            for name in &removed {
                registry.remove(name);
                pending.retain(|pending_name| pending_name != name);
            }
        }

        let elapsed_ms = start.elapsed().as_secs_f32() * 1000.0;
        if removed.is_empty() && not_found.is_empty() {
            info!("finished self validation ({elapsed_ms:.1} ms): everything is OK");
        } else {
            error!(
                "finished self validation ({elapsed_ms:.1} ms), found and fixed inconsistencies: \
                 removed={removed:?} not_found={not_found:?} (this should not happen)"
            );
        }
    }

    /// Selects `configuration` on every registered pack of `kind`.
    pub fn set_renderer_configuration(&self, configuration: &MacroConfiguration, kind: ShaderKind) {
        let registry = self.registry.lock();
        for pack in registry.values() {
            if pack.kind() == kind {
                if let Err(error) = pack.get_shader(configuration) {
                    fatal!(
                        "pack {:?} has no variant for the requested configuration: {error}",
                        pack.name()
                    );
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shader_backend_traits::{CompileOutcome, CompiledArtifact};
    use shader_cache::RendererKind;
    use std::io::Write;
    use std::sync::atomic::AtomicBool;

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

    fn make_source(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("compute.glsl");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"void main() {}").unwrap();
        path
    }

    #[test]
    fn compile_registers_pack_and_fires_callbacks() {
        let src_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let source = make_source(src_dir.path());

        let description = ShaderDescription::new(
            "test_cs",
            source,
            ShaderKind::Compute,
            "main",
            MacroConfiguration::default(),
        )
        .unwrap();

        let manager = Arc::new(ShaderManager::new());
        let compiler: Arc<dyn ShaderCompilerBackend> = Arc::new(StubCompiler);
        let cache = Arc::new(
            ShaderCacheManager::open(cache_dir.path(), true, RendererKind::Vulkan, None).unwrap(),
        );

        let completed = Arc::new(AtomicBool::new(false));
        let completed_clone = Arc::clone(&completed);

        manager
            .compile(
                vec![description],
                BackendLanguage::Spirv,
                compiler,
                cache,
                cache_dir.path().to_path_buf(),
                Arc::new(|_progress| {}),
                Arc::new(|_name, _message| {}),
                Arc::new(move || completed_clone.store(true, Ordering::SeqCst)),
            )
            .unwrap();

        for _ in 0..200 {
            manager.drain_deferred_tasks();
            if completed.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }

        assert!(completed.load(Ordering::SeqCst));
        assert_eq!(manager.len(), 1);
        assert!(manager.get("test_cs").is_some());
    }

    #[test]
    fn rejects_duplicate_name_in_same_call() {
        let src_dir = tempfile::tempdir().unwrap();
        let source = make_source(src_dir.path());
        let description = ShaderDescription::new(
            "dup",
            &source,
            ShaderKind::Compute,
            "main",
            MacroConfiguration::default(),
        )
        .unwrap();
        let description2 = ShaderDescription::new(
            "dup",
            &source,
            ShaderKind::Compute,
            "main",
            MacroConfiguration::default(),
        )
        .unwrap();

        let manager = Arc::new(ShaderManager::new());
        let compiler: Arc<dyn ShaderCompilerBackend> = Arc::new(StubCompiler);
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(
            ShaderCacheManager::open(cache_dir.path(), true, RendererKind::Vulkan, None).unwrap(),
        );

        let result = manager.compile(
            vec![description, description2],
            BackendLanguage::Spirv,
            compiler,
            cache,
            cache_dir.path().to_path_buf(),
            Arc::new(|_| {}),
            Arc::new(|_, _| {}),
            Arc::new(|| {}),
        );
        assert!(result.is_err());
    }
}
