//! Shadow map manager: allocates the depth (and, for point lights, color
//! cube) textures a shadow-casting light needs, and hands out a move-only
//! handle that frees them when dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gpu_resource::GpuResourceManager;
use log::error;
use parking_lot::Mutex;
use shader_backend_traits::{BackendImageFormat, ImageCreateInfo, ImageHandle};

use crate::array_index::{ArrayIndexManager, ArraySlotId, IndexChangedCallback};

/// Determines shadow-map sizing and, for point lights, whether a second
/// cube color attachment is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowMapType {
    Directional,
    Spot,
    Point,
}

impl ShadowMapType {
    fn index(self) -> usize {
        match self {
            ShadowMapType::Directional => 0,
            ShadowMapType::Spot => 1,
            ShadowMapType::Point => 2,
        }
    }

    /// Descriptor-array binding name the shader side keeps this light kind's
    /// shadow maps under.
    pub fn descriptor_array_name(self) -> &'static str {
        match self {
            ShadowMapType::Directional => "directional-shadow-maps",
            ShadowMapType::Spot => "spot-shadow-maps",
            ShadowMapType::Point => "point-shadow-maps",
        }
    }
}

/// Resolves the pixel size to allocate for a shadow map of `kind`.
pub fn resolve_shadow_map_size(shadow_quality_size: u32, world_size: u64, kind: ShadowMapType) -> anyhow::Result<u32> {
    match kind {
        ShadowMapType::Directional => u32::try_from(world_size)
            .map_err(|_| anyhow::anyhow!("world size ({world_size}) exceeds type limit for shadow map size")),
        ShadowMapType::Spot | ShadowMapType::Point => Ok(shadow_quality_size),
    }
}

struct ShadowMapResources {
    depth_texture: ImageHandle,
    color_texture: Option<ImageHandle>,
    size_pixels: u32,
}

struct RegisteredShadowMap {
    name: String,
    kind: ShadowMapType,
    array_slot: ArraySlotId,
    current_index: Arc<AtomicU32>,
    resources: Arc<Mutex<ShadowMapResources>>,
}

/// Invoked with the dense, index-ordered contents of `kind`'s descriptor
/// array whenever they change: a shadow map is created or destroyed, the
/// array-index manager reshuffles a slot, or `reconfigure` reallocates the
/// textures. Pipelines referencing `kind.descriptor_array_name()` re-bind
/// from this.
pub type RebindListener = Arc<dyn Fn(ShadowMapType, &[ImageHandle]) + Send + Sync>;

struct Shared {
    gpu_resources: Arc<GpuResourceManager>,
    array_index_managers: [ArrayIndexManager; 3],
    registry: Mutex<HashMap<u64, RegisteredShadowMap>>,
    next_registry_id: AtomicU64,
    rebind_listeners: Mutex<Vec<RebindListener>>,
}

impl Shared {
    fn destroy_resource(&self, registry_id: u64) {
        let entry = self.registry.lock().remove(&registry_id);
        let Some(entry) = entry else {
            error!("failed to find the specified shadow map resource to be destroyed");
            return;
        };

        self.array_index_managers[entry.kind.index()].free(entry.array_slot);
        self.notify_rebind(entry.kind);

        let resources = entry.resources.lock();
        self.gpu_resources.destroy_image(resources.depth_texture);
        if let Some(color_texture) = resources.color_texture {
            self.gpu_resources.destroy_image(color_texture);
        }
    }

    /// Rebuilds `kind`'s dense array contents from the registry, ordered by
    /// each entry's last-known array index, and notifies every listener.
    fn notify_rebind(&self, kind: ShadowMapType) {
        let listeners = self.rebind_listeners.lock();
        if listeners.is_empty() {
            return;
        }
        let dense = self.array_contents(kind);
        for listener in listeners.iter() {
            listener(kind, &dense);
        }
    }

    fn array_contents(&self, kind: ShadowMapType) -> Vec<ImageHandle> {
        let registry = self.registry.lock();
        let mut ordered: Vec<(u32, ImageHandle)> = registry
            .values()
            .filter(|entry| entry.kind == kind)
            .map(|entry| {
                (
                    entry.current_index.load(Ordering::SeqCst),
                    entry.resources.lock().depth_texture,
                )
            })
            .collect();
        ordered.sort_by_key(|(index, _)| *index);
        ordered.into_iter().map(|(_, image)| image).collect()
    }
}

/// Owns every live shadow map and, per light kind, its array-index manager
///. Shares its state with every outstanding [`ShadowMapHandle`]
/// through an `Arc`, so `Drop` can detect handles that outlive the manager
/// the same way the source's destructor inspects `mtxShadowMaps` before
/// asserting it's empty.
pub struct ShadowMapManager {
    shared: Arc<Shared>,
}

impl ShadowMapManager {
    pub fn new(gpu_resources: Arc<GpuResourceManager>) -> Self {
        Self {
            shared: Arc::new(Shared {
                gpu_resources,
                array_index_managers: [
                    ArrayIndexManager::new(),
                    ArrayIndexManager::new(),
                    ArrayIndexManager::new(),
                ],
                registry: Mutex::new(HashMap::new()),
                next_registry_id: AtomicU64::new(1),
                rebind_listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Registers a callback fired whenever a shadow-map descriptor array's
    /// live contents change. Every pipeline referencing
    /// `kind.descriptor_array_name()` must re-bind from it.
    pub fn on_rebind_needed(&self, callback: RebindListener) {
        self.shared.rebind_listeners.lock().push(callback);
    }

    /// The current dense, index-ordered contents of `kind`'s descriptor
    /// array. Used to resolve the array binding when a pipeline is first
    /// materialized.
    pub fn current_array_contents(&self, kind: ShadowMapType) -> Vec<ImageHandle> {
        self.shared.array_contents(kind)
    }

    /// Allocates a shadow map of `kind`. `on_array_index_changed` fires
    /// (from inside the array-index manager's lock) whenever this shadow
    /// map's slot in the descriptor array is reassigned.
    pub fn create_shadow_map(
        &self,
        name: &str,
        kind: ShadowMapType,
        shadow_quality_size: u32,
        world_size: u64,
        on_array_index_changed: IndexChangedCallback,
    ) -> anyhow::Result<ShadowMapHandle> {
        let size_pixels = resolve_shadow_map_size(shadow_quality_size, world_size, kind)?;
        let is_cube = kind == ShadowMapType::Point;

        let depth_texture = self
            .shared
            .gpu_resources
            .create_shadow_map_texture(name, size_pixels, is_cube)?;
        let color_texture = if is_cube {
            match self.shared.gpu_resources.create_image(&ImageCreateInfo {
                name: format!("{name} cube color"),
                width: size_pixels,
                height: size_pixels,
                mip_count: 1,
                sample_count: 1,
                format: BackendImageFormat::Rgba8Unorm,
                is_render_target: true,
                is_cube: true,
            }) {
                Ok(handle) => Some(handle),
                Err(error) => {
                    self.shared.gpu_resources.destroy_image(depth_texture);
                    return Err(error.into());
                }
            }
        } else {
            None
        };

        let current_index = Arc::new(AtomicU32::new(0));
        let wrapped_callback: IndexChangedCallback = {
            let current_index = Arc::clone(&current_index);
            let shared = Arc::clone(&self.shared);
            Arc::new(move |new_index| {
                current_index.store(new_index, Ordering::SeqCst);
                on_array_index_changed(new_index);
                shared.notify_rebind(kind);
            })
        };
        let (array_slot, initial_index) = self.shared.array_index_managers[kind.index()].allocate(wrapped_callback);
        current_index.store(initial_index, Ordering::SeqCst);

        let resources = Arc::new(Mutex::new(ShadowMapResources {
            depth_texture,
            color_texture,
            size_pixels,
        }));
        let registry_id = self.shared.next_registry_id.fetch_add(1, Ordering::SeqCst);
        self.shared.registry.lock().insert(
            registry_id,
            RegisteredShadowMap {
                name: name.to_string(),
                kind,
                array_slot,
                current_index,
                resources: Arc::clone(&resources),
            },
        );
        self.shared.notify_rebind(kind);

        Ok(ShadowMapHandle {
            shared: Arc::clone(&self.shared),
            registry_id,
            kind,
            resources,
            array_index: initial_index,
        })
    }

    /// Destroys and recreates every shadow map with the newly current
    /// shadow-quality/world size, mutating each live handle's resources
    /// in-place.
    pub fn reconfigure(&self, shadow_quality_size: u32, world_size: u64) -> anyhow::Result<()> {
        let mut touched_kinds = std::collections::HashSet::new();
        {
            let registry = self.shared.registry.lock();
            for entry in registry.values() {
                let size_pixels = resolve_shadow_map_size(shadow_quality_size, world_size, entry.kind)?;
                let is_cube = entry.kind == ShadowMapType::Point;

                let mut resources = entry.resources.lock();
                self.shared.gpu_resources.destroy_image(resources.depth_texture);
                if let Some(color_texture) = resources.color_texture.take() {
                    self.shared.gpu_resources.destroy_image(color_texture);
                }

                resources.depth_texture = self
                    .shared
                    .gpu_resources
                    .create_shadow_map_texture(&entry.name, size_pixels, is_cube)?;
                resources.color_texture = if is_cube {
                    Some(self.shared.gpu_resources.create_image(&ImageCreateInfo {
                        name: format!("{} cube color", entry.name),
                        width: size_pixels,
                        height: size_pixels,
                        mip_count: 1,
                        sample_count: 1,
                        format: BackendImageFormat::Rgba8Unorm,
                        is_render_target: true,
                        is_cube: true,
                    })?)
                } else {
                    None
                };
                resources.size_pixels = size_pixels;
                touched_kinds.insert(entry.kind);
            }
        }
        for kind in touched_kinds {
            self.shared.notify_rebind(kind);
        }
        Ok(())
    }

    pub fn live_shadow_map_count(&self) -> usize {
        self.shared.registry.lock().len()
    }
}

impl Drop for ShadowMapManager {
    fn drop(&mut self) {
        // More than one strong reference means an outstanding `ShadowMapHandle`
        // is still holding the shared state alive.
        if Arc::strong_count(&self.shared) <= 1 {
            return;
        }

        let registry = self.shared.registry.lock();
        if registry.is_empty() {
            return;
        }

        let mut by_name: HashMap<&str, usize> = HashMap::new();
        for entry in registry.values() {
            *by_name.entry(entry.name.as_str()).or_insert(0) += 1;
        }
        let mut lines: Vec<String> = by_name
            .into_iter()
            .map(|(name, count)| format!("- {name}, left: {count}"))
            .collect();
        lines.sort();
        error!(
            "shadow map manager is being destroyed but there are still {} shadow map(s) alive:\n{}",
            registry.len(),
            lines.join("\n")
        );
    }
}

/// Move-only (no `Clone`) owning reference to a shadow map, mirroring
/// `ShadowMapHandle`/`ShadowMapUniquePtr`'s destructor-notifies-manager
/// pattern. Dropping it frees the GPU textures and the array-index slot.
pub struct ShadowMapHandle {
    shared: Arc<Shared>,
    registry_id: u64,
    kind: ShadowMapType,
    resources: Arc<Mutex<ShadowMapResources>>,
    array_index: u32,
}

impl ShadowMapHandle {
    pub fn kind(&self) -> ShadowMapType {
        self.kind
    }

    pub fn depth_texture(&self) -> ImageHandle {
        self.resources.lock().depth_texture
    }

    pub fn color_texture(&self) -> Option<ImageHandle> {
        self.resources.lock().color_texture
    }

    pub fn size_pixels(&self) -> u32 {
        self.resources.lock().size_pixels
    }

    /// Index last observed through `on_array_index_changed`, i.e. the index
    /// at allocation time until the array-index manager reshuffles slots.
    pub fn array_index(&self) -> u32 {
        self.array_index
    }
}

impl Drop for ShadowMapHandle {
    fn drop(&mut self) {
        self.shared.destroy_resource(self.registry_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shader_backend_traits::null::NullBackend;
    use std::sync::atomic::AtomicU32;

    fn gpu_resources() -> Arc<GpuResourceManager> {
        Arc::new(GpuResourceManager::new(Arc::new(NullBackend::new())))
    }

    fn noop_callback() -> IndexChangedCallback {
        Arc::new(|_| {})
    }

    #[test]
    fn directional_size_uses_world_size() {
        let size = resolve_shadow_map_size(1024, 4096, ShadowMapType::Directional).unwrap();
        assert_eq!(size, 4096);
    }

    #[test]
    fn directional_size_over_u32_max_is_rejected() {
        let err = resolve_shadow_map_size(1024, u64::from(u32::MAX) + 1, ShadowMapType::Directional).unwrap_err();
        assert!(err.to_string().contains("exceeds type limit"));
    }

    #[test]
    fn point_light_allocates_a_color_cube() {
        let manager = ShadowMapManager::new(gpu_resources());
        let handle = manager
            .create_shadow_map("point light 0", ShadowMapType::Point, 512, 0, noop_callback())
            .unwrap();
        assert!(handle.color_texture().is_some());
        assert_eq!(handle.size_pixels(), 512);
    }

    #[test]
    fn spot_light_has_no_color_cube() {
        let manager = ShadowMapManager::new(gpu_resources());
        let handle = manager
            .create_shadow_map("spot light 0", ShadowMapType::Spot, 512, 0, noop_callback())
            .unwrap();
        assert!(handle.color_texture().is_none());
    }

    #[test]
    fn dropping_handle_frees_array_slot() {
        let manager = ShadowMapManager::new(gpu_resources());
        let handle_a = manager
            .create_shadow_map("spot a", ShadowMapType::Spot, 256, 0, noop_callback())
            .unwrap();
        let moved_index = Arc::new(AtomicU32::new(u32::MAX));
        let recorded = Arc::clone(&moved_index);
        let handle_b = manager
            .create_shadow_map(
                "spot b",
                ShadowMapType::Spot,
                256,
                0,
                Arc::new(move |index| recorded.store(index, std::sync::atomic::Ordering::SeqCst)),
            )
            .unwrap();
        assert_eq!(handle_b.array_index(), 1);

        drop(handle_a);
        assert_eq!(moved_index.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(manager.live_shadow_map_count(), 1);
        drop(handle_b);
        assert_eq!(manager.live_shadow_map_count(), 0);
    }

    #[test]
    fn reconfigure_resizes_live_shadow_maps() {
        let manager = ShadowMapManager::new(gpu_resources());
        let handle = manager
            .create_shadow_map("spot a", ShadowMapType::Spot, 256, 0, noop_callback())
            .unwrap();
        manager.reconfigure(1024, 0).unwrap();
        assert_eq!(handle.size_pixels(), 1024);
    }

    #[test]
    fn creating_a_shadow_map_notifies_rebind_listeners() {
        let manager = ShadowMapManager::new(gpu_resources());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&calls);
        manager.on_rebind_needed(Arc::new(move |kind, images| {
            recorded.lock().push((kind, images.to_vec()));
        }));

        let handle = manager
            .create_shadow_map("spot a", ShadowMapType::Spot, 256, 0, noop_callback())
            .unwrap();

        let calls = calls.lock();
        let (kind, images) = calls.last().unwrap();
        assert_eq!(*kind, ShadowMapType::Spot);
        assert_eq!(images, &[handle.depth_texture()]);
    }

    #[test]
    fn freeing_the_tail_slot_notifies_the_shrunk_array() {
        let manager = ShadowMapManager::new(gpu_resources());
        let handle_a = manager
            .create_shadow_map("spot a", ShadowMapType::Spot, 256, 0, noop_callback())
            .unwrap();
        let handle_b = manager
            .create_shadow_map("spot b", ShadowMapType::Spot, 256, 0, noop_callback())
            .unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&calls);
        manager.on_rebind_needed(Arc::new(move |kind, images| {
            recorded.lock().push((kind, images.to_vec()));
        }));

        drop(handle_b);

        let calls = calls.lock();
        let (_, images) = calls.last().unwrap();
        assert_eq!(images, &[handle_a.depth_texture()]);
    }

    #[test]
    fn reconfigure_notifies_rebind_with_the_reallocated_textures() {
        let manager = ShadowMapManager::new(gpu_resources());
        let handle = manager
            .create_shadow_map("spot a", ShadowMapType::Spot, 256, 0, noop_callback())
            .unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&calls);
        manager.on_rebind_needed(Arc::new(move |kind, images| {
            recorded.lock().push((kind, images.to_vec()));
        }));

        manager.reconfigure(1024, 0).unwrap();

        let calls = calls.lock();
        let (kind, images) = calls.last().unwrap();
        assert_eq!(*kind, ShadowMapType::Spot);
        assert_eq!(images, &[handle.depth_texture()]);
    }

    #[test]
    fn current_array_contents_matches_live_registrations() {
        let manager = ShadowMapManager::new(gpu_resources());
        assert!(manager.current_array_contents(ShadowMapType::Spot).is_empty());

        let handle = manager
            .create_shadow_map("spot a", ShadowMapType::Spot, 256, 0, noop_callback())
            .unwrap();
        assert_eq!(
            manager.current_array_contents(ShadowMapType::Spot),
            vec![handle.depth_texture()]
        );
        assert!(manager.current_array_contents(ShadowMapType::Point).is_empty());
    }
}
