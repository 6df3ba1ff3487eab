use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use base::counter::AtomicCounter;
use parking_lot::Mutex;
use shader_backend_traits::ReflectionSummary;

/// Process-wide count of shader objects with bytecode currently resident
/// in memory, matching the original's `iTotalShaderInMemoryCount` atomic.
static SHADERS_IN_MEMORY: AtomicCounter = AtomicCounter::new();

pub fn shaders_in_memory_count() -> i64 {
    SHADERS_IN_MEMORY.get()
}

/// Scratch buffer pool for artifact reads, shared by every shader object in
/// the process so a burst of reloads doesn't reallocate a fresh `Vec` per
/// file.
static BYTECODE_SCRATCH: OnceLock<pool::BytePool> = OnceLock::new();

fn bytecode_scratch_pool() -> &'static pool::BytePool {
    BYTECODE_SCRATCH.get_or_init(pool::byte_pool)
}

/// How a [`ShaderObject`] recovers reflection data when its bytecode is
/// (re)loaded from disk: either by reflecting the SPIR-V bytecode itself
/// (mirrors `DescriptorSetLayoutGenerator::collectInfoFromBytecode`, which
/// takes raw SPIR-V bytes), or by reading the JSON reflection sidecar the
/// HLSL backend writes alongside the artifact.
pub enum ReflectionSource {
    SpirvBytecode,
    SidecarFile(PathBuf),
}

fn reflect_spirv_bytecode(bytecode: &[u8]) -> anyhow::Result<ReflectionSummary> {
    let module = naga::front::spv::parse_u8_slice(bytecode, &naga::front::spv::Options::default())
        .map_err(|error| anyhow::anyhow!("failed to reflect SPIR-V bytecode: {error}"))?;

    let mut bindings = Vec::new();
    for (_, variable) in module.global_variables.iter() {
        let Some(binding) = &variable.binding else {
            continue;
        };
        let kind = match variable.space {
            naga::AddressSpace::Uniform => shader_backend_traits::BindingKind::UniformBuffer,
            naga::AddressSpace::Storage { .. } => shader_backend_traits::BindingKind::StorageBuffer,
            naga::AddressSpace::Handle => shader_backend_traits::BindingKind::SampledImage,
            _ => continue,
        };
        bindings.push(shader_backend_traits::BindingEntry {
            name: variable
                .name
                .clone()
                .unwrap_or_else(|| format!("binding_{}", binding.binding)),
            binding_index: binding.binding,
            kind,
            stages: shader_backend_traits::ShaderStageMask::all(),
        });
    }

    let compute_workgroup_size = module.entry_points.first().map(|entry| entry.workgroup_size);

    let mut push_constants = Vec::new();
    for (_, variable) in module.global_variables.iter() {
        if variable.space != naga::AddressSpace::PushConstant {
            continue;
        }
        let naga::TypeInner::Struct { members, .. } = &module.types[variable.ty].inner else {
            continue;
        };
        for member in members {
            let naga::TypeInner::Scalar(scalar) = &module.types[member.ty].inner else {
                continue;
            };
            if scalar.kind != naga::ScalarKind::Uint {
                continue;
            }
            let Some(name) = member.name.clone() else {
                continue;
            };
            push_constants.push(shader_backend_traits::PushConstantField {
                name,
                ty: shader_backend_traits::PushConstantFieldType::Uint,
            });
        }
    }

    Ok(ReflectionSummary {
        bindings,
        push_constants,
        compute_workgroup_size,
    })
}

fn derive_reflection(
    source: &ReflectionSource,
    bytecode: &[u8],
) -> anyhow::Result<Option<ReflectionSummary>> {
    match source {
        ReflectionSource::SpirvBytecode => Ok(Some(reflect_spirv_bytecode(bytecode)?)),
        ReflectionSource::SidecarFile(path) => {
            if !path.is_file() {
                return Ok(None);
            }
            let bytes = fs::read(path)?;
            Ok(Some(serde_json::from_slice(&bytes)?))
        }
    }
}

struct LoadedData {
    bytecode: Vec<u8>,
    reflection: Option<ReflectionSummary>,
}

/// A single compiled shader variant: lazily loads its bytecode (and
/// derives reflection) from disk on first access, and can release both to
/// free memory when no longer needed.
pub struct ShaderObject {
    name: String,
    artifact_path: PathBuf,
    reflection_source: ReflectionSource,
    loaded: Mutex<Option<LoadedData>>,
}

impl ShaderObject {
    pub fn new(
        name: impl Into<String>,
        artifact_path: impl Into<PathBuf>,
        reflection_source: ReflectionSource,
    ) -> Self {
        Self {
            name: name.into(),
            artifact_path: artifact_path.into(),
            reflection_source,
            loaded: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.lock().is_some()
    }

    fn ensure_loaded(&self) -> anyhow::Result<()> {
        let mut guard = self.loaded.lock();
        if guard.is_some() {
            return Ok(());
        }
        let mut scratch = bytecode_scratch_pool().take();
        scratch.clear();
        let mut file = fs::File::open(&self.artifact_path)?;
        file.read_to_end(&mut scratch)?;
        let bytecode = scratch.clone();
        let reflection = derive_reflection(&self.reflection_source, &bytecode)?;
        *guard = Some(LoadedData { bytecode, reflection });
        SHADERS_IN_MEMORY.increment();
        Ok(())
    }

    /// Loads the bytecode from disk if not already resident, and returns a
    /// clone of it.
    pub fn bytecode(&self) -> anyhow::Result<Vec<u8>> {
        self.ensure_loaded()?;
        Ok(self.loaded.lock().as_ref().unwrap().bytecode.clone())
    }

    pub fn reflection(&self) -> anyhow::Result<Option<ReflectionSummary>> {
        self.ensure_loaded()?;
        Ok(self.loaded.lock().as_ref().unwrap().reflection.clone())
    }

    /// No-op if not loaded. Otherwise frees the buffer and reflection, and
    /// decrements the in-memory counter. Returns whether anything was
    /// released.
    pub fn release_if_loaded(&self) -> bool {
        let mut guard = self.loaded.lock();
        if guard.take().is_some() {
            SHADERS_IN_MEMORY.decrement();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_once_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shader.bin");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(b"not-really-spirv").unwrap();

        let object = ShaderObject::new(
            "test",
            &path,
            ReflectionSource::SidecarFile(dir.path().join("shader.reflection")),
        );
        assert!(!object.is_loaded());
        let bytecode = object.bytecode().unwrap();
        assert_eq!(bytecode, b"not-really-spirv");
        assert!(object.is_loaded());

        assert!(object.release_if_loaded());
        assert!(!object.is_loaded());
        assert!(!object.release_if_loaded());
    }

    #[test]
    fn missing_sidecar_yields_no_reflection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shader.bin");
        fs::write(&path, b"bytes").unwrap();

        let object = ShaderObject::new(
            "test",
            &path,
            ReflectionSource::SidecarFile(dir.path().join("missing.reflection")),
        );
        assert!(object.reflection().unwrap().is_none());
    }
}
