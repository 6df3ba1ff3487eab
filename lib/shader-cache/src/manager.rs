use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use shader_types::ShaderDescription;

use crate::header::{GlobalCacheHeader, HlslGlobalCacheParams, RendererKind};
use crate::invalidation::InvalidationReason;
use crate::metadata::{HlslPerShaderExtras, PerShaderMetadata, PersistedDescription};

const GLOBAL_HEADER_FILE_NAME: &str = ".shader_cache.toml";

fn hash_file(path: &Path) -> anyhow::Result<String> {
    let bytes = fs::read(path)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

fn hash_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Owns the on-disk shader cache directory: the global header
/// plus one subdirectory per shader name, holding a compiled artifact, its
/// TOML metadata sidecar, and (HLSL only) a reflection blob per variant.
pub struct ShaderCacheManager {
    cache_root: PathBuf,
    current_header: GlobalCacheHeader,
}

impl ShaderCacheManager {
    /// Opens (or initializes) the cache directory. If the persisted global
    /// header disagrees with `current_header`, the whole cache directory is
    /// wiped and recreated.
    pub fn open(
        cache_root: impl Into<PathBuf>,
        is_release_build: bool,
        renderer: RendererKind,
        hlsl_params: Option<HlslGlobalCacheParams>,
    ) -> anyhow::Result<Self> {
        let cache_root = cache_root.into();
        let current_header = GlobalCacheHeader::new(is_release_build, renderer, hlsl_params);

        fs::create_dir_all(&cache_root)?;
        let header_path = cache_root.join(GLOBAL_HEADER_FILE_NAME);

        let needs_rewrite = match Self::read_header(&header_path)? {
            Some(persisted) => match persisted.outdated_reason(&current_header) {
                Some(reason) => {
                    warn!(
                        "global shader cache at {:?} outdated ({reason}), wiping",
                        cache_root
                    );
                    Self::wipe_cache_contents(&cache_root, &header_path)?;
                    true
                }
                None => false,
            },
            None => {
                info!("no global shader cache header at {:?}, creating", cache_root);
                true
            }
        };

        if needs_rewrite {
            Self::write_header(&header_path, &current_header)?;
        }

        Ok(Self {
            cache_root,
            current_header,
        })
    }

    fn read_header(header_path: &Path) -> anyhow::Result<Option<GlobalCacheHeader>> {
        if !header_path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(header_path)?;
        Ok(Some(toml::from_str(&text)?))
    }

    fn write_header(header_path: &Path, header: &GlobalCacheHeader) -> anyhow::Result<()> {
        let text = toml::to_string_pretty(header)?;
        fs::write(header_path, text)?;
        Ok(())
    }

    fn wipe_cache_contents(cache_root: &Path, header_path: &Path) -> anyhow::Result<()> {
        for entry in fs::read_dir(cache_root)? {
            let entry = entry?;
            if entry.path() == header_path {
                continue;
            }
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    fn shader_dir(&self, shader_name: &str) -> PathBuf {
        self.cache_root.join(shader_name)
    }

    fn artifact_path(&self, shader_name: &str, configuration_tag: &str) -> PathBuf {
        self.shader_dir(shader_name)
            .join(format!("shader{configuration_tag}"))
    }

    fn metadata_path(&self, shader_name: &str, configuration_tag: &str) -> PathBuf {
        self.shader_dir(shader_name)
            .join(format!("shader{configuration_tag}.toml"))
    }

    fn reflection_path(&self, shader_name: &str, configuration_tag: &str) -> PathBuf {
        self.shader_dir(shader_name)
            .join(format!("shader{configuration_tag}.reflection"))
    }

    /// Checks whether a previously cached artifact for `description` is
    /// still valid. The checks run in the exact order named by
    /// [`InvalidationReason`]'s variants — the first mismatch found is
    /// returned; later ones are not even evaluated.
    pub fn validate(
        &self,
        description: &ShaderDescription,
        configuration_tag: &str,
    ) -> anyhow::Result<Result<PerShaderMetadata, InvalidationReason>> {
        let metadata_path = self.metadata_path(&description.name, configuration_tag);
        if !metadata_path.is_file() {
            return Err(anyhow::anyhow!(
                "no cache metadata at {:?}",
                metadata_path
            ));
        }
        let metadata = PerShaderMetadata::load(&metadata_path)?;

        if !metadata.description.entry_function_matches(description) {
            return Ok(Err(InvalidationReason::EntryFunctionChanged));
        }
        if !metadata.description.kind_matches(description) {
            return Ok(Err(InvalidationReason::ShaderTypeChanged));
        }
        if !metadata.description.macros_match(description) {
            return Ok(Err(InvalidationReason::DefinedMacrosChanged));
        }

        let current_source_hash = hash_file(description.source_path())?;
        if current_source_hash != metadata.source_file_hash {
            return Ok(Err(InvalidationReason::SourceFileChanged));
        }

        let include_tree = description.compute_include_tree()?;
        if include_tree.digest() != metadata.include_tree_digest {
            return Ok(Err(InvalidationReason::IncludeTreeContentChanged));
        }

        let artifact_path = self.artifact_path(&description.name, configuration_tag);
        if !artifact_path.is_file() {
            return Ok(Err(InvalidationReason::CompiledBinaryChanged));
        }
        let artifact_hash = hash_file(&artifact_path)?;
        if artifact_hash != metadata.compiled_bytecode_hash {
            return Ok(Err(InvalidationReason::CompiledBinaryChanged));
        }

        if let Some(hlsl) = &metadata.hlsl {
            let reflection_path = self.reflection_path(&description.name, configuration_tag);
            if !reflection_path.is_file() {
                return Ok(Err(InvalidationReason::ReflectionBinaryChanged));
            }
            let reflection_hash = hash_file(&reflection_path)?;
            if reflection_hash != hlsl.reflection_file_hash {
                return Ok(Err(InvalidationReason::ReflectionBinaryChanged));
            }
        }

        Ok(Ok(metadata))
    }

    /// On a validation failure the per-shader subdirectory is discarded so a
    /// stale artifact, metadata, and reflection blob can never be reused
    /// under a new configuration tag.
    pub fn discard(&self, shader_name: &str) -> anyhow::Result<()> {
        let dir = self.shader_dir(shader_name);
        if dir.is_dir() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Persists a freshly compiled artifact plus its metadata sidecar, and
    /// (HLSL only) the reflection blob.
    pub fn write(
        &self,
        description: &ShaderDescription,
        configuration_tag: &str,
        bytecode: &[u8],
        reflection_bytes: Option<&[u8]>,
    ) -> anyhow::Result<()> {
        let dir = self.shader_dir(&description.name);
        fs::create_dir_all(&dir)?;

        let artifact_path = self.artifact_path(&description.name, configuration_tag);
        fs::write(&artifact_path, bytecode)?;

        let hlsl = match (self.current_header.hlsl.is_some(), reflection_bytes) {
            (true, Some(bytes)) => {
                let reflection_path = self.reflection_path(&description.name, configuration_tag);
                fs::write(&reflection_path, bytes)?;
                Some(HlslPerShaderExtras {
                    reflection_file_hash: hash_bytes(bytes),
                })
            }
            _ => None,
        };

        let include_tree = description.compute_include_tree()?;
        let metadata = PerShaderMetadata {
            description: PersistedDescription::from_description(description),
            compiled_bytecode_hash: hash_bytes(bytecode),
            source_file_hash: hash_file(description.source_path())?,
            include_tree_digest: include_tree.digest(),
            hlsl,
        };
        metadata.save(&self.metadata_path(&description.name, configuration_tag))?;

        info!(
            "cached shader {:?} (configuration {:?})",
            description.name, configuration_tag
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shader_types::MacroConfiguration;
    use std::io::Write;

    fn make_source(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    fn make_description(dir: &Path) -> ShaderDescription {
        let src = make_source(dir, "mesh.vert", "void main() {}");
        ShaderDescription::new(
            "mesh_vs",
            src,
            shader_types::ShaderKind::Vertex,
            "main",
            MacroConfiguration::default(),
        )
        .unwrap()
    }

    #[test]
    fn write_then_validate_succeeds() {
        let src_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let description = make_description(src_dir.path());

        let manager = ShaderCacheManager::open(cache_dir.path(), true, RendererKind::Vulkan, None)
            .unwrap();
        manager.write(&description, "", b"SPIRV-BYTES", None).unwrap();

        let result = manager.validate(&description, "").unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn source_edit_is_detected_before_include_tree() {
        let src_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let description = make_description(src_dir.path());

        let manager = ShaderCacheManager::open(cache_dir.path(), true, RendererKind::Vulkan, None)
            .unwrap();
        manager.write(&description, "", b"SPIRV-BYTES", None).unwrap();

        make_source(src_dir.path(), "mesh.vert", "void main() { /* edited */ }");

        let result = manager.validate(&description, "").unwrap();
        assert_eq!(result.unwrap_err(), InvalidationReason::SourceFileChanged);
    }

    #[test]
    fn reopening_with_different_build_mode_wipes_cache() {
        let src_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let description = make_description(src_dir.path());

        let manager = ShaderCacheManager::open(cache_dir.path(), true, RendererKind::Vulkan, None)
            .unwrap();
        manager.write(&description, "", b"SPIRV-BYTES", None).unwrap();

        let manager = ShaderCacheManager::open(cache_dir.path(), false, RendererKind::Vulkan, None)
            .unwrap();
        let err = manager.validate(&description, "").unwrap_err();
        assert!(err.to_string().contains("no cache metadata"));
    }

    #[test]
    fn entry_function_change_is_detected_first() {
        let src_dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let description = make_description(src_dir.path());

        let manager = ShaderCacheManager::open(cache_dir.path(), true, RendererKind::Vulkan, None)
            .unwrap();
        manager.write(&description, "", b"SPIRV-BYTES", None).unwrap();

        let mut changed = description.clone();
        changed.entry_function = "vs_main".to_string();

        let result = manager.validate(&changed, "").unwrap();
        assert_eq!(
            result.unwrap_err(),
            InvalidationReason::EntryFunctionChanged
        );
    }
}
