use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use shader_backend_traits::{BackendLanguage, CompileOutcome, ShaderCompilerBackend};
use shader_cache::{InvalidationReason, ShaderCacheManager};
use shader_types::{MacroConfiguration, ShaderDescription, ShaderKind};

use crate::configurations::valid_configurations_for;
use crate::object::{ReflectionSource, ShaderObject};

/// Why a pack-level compile or cache-load failed as a unit.
#[derive(Debug, thiserror::Error)]
pub enum ShaderPackError {
    #[error("shader compilation diagnostic for variant {configuration_tag:?}: {message}")]
    Diagnostic {
        configuration_tag: String,
        message: String,
    },
    #[error("cache invalidated for variant {configuration_tag:?}: {reason}")]
    CacheInvalidated {
        configuration_tag: String,
        reason: InvalidationReason,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

fn reflection_source_for(language: BackendLanguage, reflection_path: PathBuf) -> ReflectionSource {
    match language {
        BackendLanguage::Spirv => ReflectionSource::SpirvBytecode,
        BackendLanguage::Hlsl => ReflectionSource::SidecarFile(reflection_path),
    }
}

/// A named shader compiled across every valid macro configuration for its
/// kind. `get_shader` is the map lookup a renderer uses every frame to
/// resolve "the variant matching the currently active configuration".
pub struct ShaderPack {
    name: String,
    kind: ShaderKind,
    variants: Mutex<std::collections::HashMap<MacroConfiguration, Arc<ShaderObject>>>,
}

impl ShaderPack {
    fn empty(name: impl Into<String>, kind: ShaderKind) -> Self {
        Self {
            name: name.into(),
            kind,
            variants: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ShaderKind {
        self.kind
    }

    /// Compiles one variant per valid macro configuration and assembles a
    /// pack. On any variant failure the whole pack is rejected and the
    /// on-disk cache directory for this shader name is wiped.
    pub fn compile_pack(
        description: &ShaderDescription,
        compiler: &dyn ShaderCompilerBackend,
        cache: &ShaderCacheManager,
        out_directory: &Path,
    ) -> Result<Arc<ShaderPack>, ShaderPackError> {
        let pack = Arc::new(ShaderPack::empty(description.name.clone(), description.kind));
        let configurations = valid_configurations_for(description.kind);

        for configuration in configurations {
            let variant_description = description.with_additional_macros(&configuration);
            let configuration_tag = variant_description.macros.configuration_tag();

            match compiler.compile(&variant_description, out_directory, &configuration_tag) {
                CompileOutcome::Compiled(artifact) => {
                    cache.write(
                        &variant_description,
                        &configuration_tag,
                        &artifact.bytecode,
                        None,
                    )?;

                    let artifact_path =
                        out_directory.join(format!("shader{configuration_tag}"));
                    let reflection_path =
                        out_directory.join(format!("shader{configuration_tag}.reflection"));
                    let object = Arc::new(ShaderObject::new(
                        variant_description.name.clone(),
                        artifact_path,
                        reflection_source_for(compiler.language(), reflection_path),
                    ));
                    pack.variants.lock().insert(configuration, object);
                }
                CompileOutcome::Diagnostic(message) => {
                    let _ = fs::remove_dir_all(out_directory);
                    return Err(ShaderPackError::Diagnostic {
                        configuration_tag,
                        message,
                    });
                }
                CompileOutcome::Internal(error) => {
                    let _ = fs::remove_dir_all(out_directory);
                    return Err(ShaderPackError::Internal(error));
                }
            }
        }

        log::info!("compiled shader pack {:?}", description.name);
        Ok(pack)
    }

    /// Builds a pack purely from cache, one [`ShaderCacheManager::validate`]
    /// per configuration; fails as a unit on any miss or invalidation
    ///.
    pub fn create_from_cache(
        description: &ShaderDescription,
        language: BackendLanguage,
        cache: &ShaderCacheManager,
        out_directory: &Path,
    ) -> Result<Arc<ShaderPack>, ShaderPackError> {
        let pack = Arc::new(ShaderPack::empty(description.name.clone(), description.kind));
        let configurations = valid_configurations_for(description.kind);

        for configuration in configurations {
            let variant_description = description.with_additional_macros(&configuration);
            let configuration_tag = variant_description.macros.configuration_tag();

            match cache.validate(&variant_description, &configuration_tag)? {
                Ok(_) => {
                    let artifact_path =
                        out_directory.join(format!("shader{configuration_tag}"));
                    let reflection_path =
                        out_directory.join(format!("shader{configuration_tag}.reflection"));
                    let object = Arc::new(ShaderObject::new(
                        variant_description.name.clone(),
                        artifact_path,
                        reflection_source_for(language, reflection_path),
                    ));
                    pack.variants.lock().insert(configuration, object);
                }
                Err(reason) => {
                    return Err(ShaderPackError::CacheInvalidated {
                        configuration_tag,
                        reason,
                    });
                }
            }
        }

        log::info!("loaded shader pack {:?} from cache", description.name);
        Ok(pack)
    }

    pub fn get_shader(&self, configuration: &MacroConfiguration) -> anyhow::Result<Arc<ShaderObject>> {
        self.variants
            .lock()
            .get(configuration)
            .cloned()
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "no variant of shader pack {:?} matches the requested configuration",
                    self.name
                )
            })
    }

    /// Releases every variant's bytecode if loaded. Returns `true` if
    /// nothing was loaded to begin with (matches the source's inverted
    /// `releaseShaderPackDataFromMemoryIfLoaded` return convention).
    pub fn release_data_from_memory_if_loaded(&self) -> bool {
        let mut released_any = false;
        for object in self.variants.lock().values() {
            if object.release_if_loaded() {
                released_any = true;
            }
        }
        !released_any
    }

    pub fn variant_count(&self) -> usize {
        self.variants.lock().len()
    }
}
