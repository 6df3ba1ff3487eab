use std::sync::Arc;

use log::error;
use parking_lot::Mutex;
use shader_backend_traits::{BufferHandle, BufferUsage, RendererBackend};

/// Invoked while the element's slot is dirty, with the manager's internal
/// lock already released. The original `onStartedUpdatingShaderMeshConstants`
/// returns a raw pointer into CPU-owned data for the caller to `memcpy` out
/// of directly; here the callback instead returns an owned copy of the
/// element's bytes, which sidesteps carrying a raw pointer across the lock
/// the owner takes internally to guard that data (deliberate simplification,
/// see the crate-level docs).
pub type StartUpdateCallback = Arc<dyn Fn() -> Vec<u8> + Send + Sync>;

/// Invoked immediately after the bytes returned by [`StartUpdateCallback`]
/// have been copied into the backend buffer, mirroring
/// `onFinishedUpdatingShaderMeshConstants`'s unlock of the owner's data.
pub type UpdateFinishedCallback = Arc<dyn Fn() + Send + Sync>;

/// Invoked whenever the backing buffer is replaced by a larger one (growth),
/// so the caller can rebuild whatever descriptor set binds it.
pub type BufferRecreatedCallback = Arc<dyn Fn(BufferHandle) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ShaderArraySlotError {
    #[error("slot reserved with element size {requested}, manager stride is {stride}")]
    SizeMismatch { requested: usize, stride: usize },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

struct SlotEntry {
    owner: String,
    on_start_update: StartUpdateCallback,
    on_finish_update: UpdateFinishedCallback,
}

struct BufferState {
    handle: BufferHandle,
    capacity: usize,
    slots: Vec<Option<SlotEntry>>,
    free_indices: Vec<u32>,
    dirty: std::collections::HashSet<u32>,
}

struct Shared {
    backend: Arc<dyn RendererBackend>,
    name: String,
    element_stride: usize,
    usage: BufferUsage,
    on_buffer_recreated: Option<BufferRecreatedCallback>,
    state: Mutex<BufferState>,
}

impl Shared {
    fn release_slot(&self, index: u32) {
        let mut state = self.state.lock();
        if state.slots.get(index as usize).map(Option::is_some) != Some(true) {
            error!(
                "shader array slot manager {:?} asked to release an already-freed index {index}",
                self.name
            );
            return;
        }
        state.slots[index as usize] = None;
        state.dirty.remove(&index);
        state.free_indices.push(index);
    }
}

/// Growable fixed-stride storage buffer for per-light and per-mesh-object
/// shader data. One instance backs one named array (e.g. mesh
/// constants); pipelines that need several distinct arrays hold one manager
/// per array.
pub struct ShaderArraySlotManager {
    shared: Arc<Shared>,
}

impl ShaderArraySlotManager {
    const INITIAL_CAPACITY: usize = 16;

    pub fn new(
        backend: Arc<dyn RendererBackend>,
        name: impl Into<String>,
        element_stride: usize,
        usage: BufferUsage,
        on_buffer_recreated: Option<BufferRecreatedCallback>,
    ) -> anyhow::Result<Self> {
        let name = name.into();
        let handle = backend.create_cpu_write_buffer(
            &name,
            element_stride,
            Self::INITIAL_CAPACITY,
            usage,
        )?;
        let state = BufferState {
            handle,
            capacity: Self::INITIAL_CAPACITY,
            slots: (0..Self::INITIAL_CAPACITY).map(|_| None).collect(),
            free_indices: (0..Self::INITIAL_CAPACITY as u32).rev().collect(),
            dirty: std::collections::HashSet::new(),
        };
        Ok(Self {
            shared: Arc::new(Shared {
                backend,
                name,
                element_stride,
                usage,
                on_buffer_recreated,
                state: Mutex::new(state),
            }),
        })
    }

    pub fn buffer_handle(&self) -> BufferHandle {
        self.shared.state.lock().handle
    }

    pub fn capacity(&self) -> usize {
        self.shared.state.lock().capacity
    }

    /// Reserves a slot for `owner`, growing the backing buffer (doubling its
    /// element count) if every existing element is occupied. Indices already
    /// handed out never change across a growth.
    pub fn reserve_slot(
        &self,
        owner: impl Into<String>,
        element_size: usize,
        on_start_update: StartUpdateCallback,
        on_finish_update: UpdateFinishedCallback,
    ) -> Result<SlotHandle, ShaderArraySlotError> {
        if element_size != self.shared.element_stride {
            return Err(ShaderArraySlotError::SizeMismatch {
                requested: element_size,
                stride: self.shared.element_stride,
            });
        }

        let mut state = self.shared.state.lock();
        let index = match state.free_indices.pop() {
            Some(index) => index,
            None => {
                self.grow(&mut state)?;
                state
                    .free_indices
                    .pop()
                    .expect("growth always frees at least one index")
            }
        };

        state.slots[index as usize] = Some(SlotEntry {
            owner: owner.into(),
            on_start_update,
            on_finish_update,
        });
        state.dirty.insert(index);

        Ok(SlotHandle {
            shared: Arc::clone(&self.shared),
            index,
        })
    }

    /// Marks `slot` dirty for the next [`process_dirty_slots`] call.
    /// Mirrors `markShaderCpuWriteResourceAsNeedsUpdate`: a stale or unknown
    /// slot is silently ignored rather than logged, matching the original's
    /// own documented intent (simpler for the caller, who need not track
    /// whether the owning node is currently spawned).
    ///
    /// [`process_dirty_slots`]: ShaderArraySlotManager::process_dirty_slots
    pub fn mark_slot_needs_update(&self, slot: &SlotHandle) {
        let mut state = self.shared.state.lock();
        if state.slots.get(slot.index as usize).map(Option::is_some) == Some(true) {
            state.dirty.insert(slot.index);
        }
    }

    /// Drains the dirty set and uploads every affected slot's bytes,
    /// invoking each slot's start/finish callbacks around the copy. Called
    /// once per frame resource.
    pub fn process_dirty_slots(&self) {
        let (handle, stride, entries): (BufferHandle, usize, Vec<_>) = {
            let mut state = self.shared.state.lock();
            let dirty: Vec<u32> = state.dirty.drain().collect();
            let entries = dirty
                .into_iter()
                .filter_map(|index| {
                    state.slots[index as usize].as_ref().map(|entry| {
                        (
                            index,
                            Arc::clone(&entry.on_start_update),
                            Arc::clone(&entry.on_finish_update),
                        )
                    })
                })
                .collect();
            (state.handle, self.shared.element_stride, entries)
        };

        for (index, on_start_update, on_finish_update) in entries {
            let bytes = on_start_update();
            if bytes.len() != stride {
                error!(
                    "shader array slot manager {:?} slot {index} produced {} bytes, expected {stride}",
                    self.shared.name,
                    bytes.len()
                );
            } else if let Err(error) = self.shared.backend.write_buffer_element(handle, index as usize, &bytes) {
                error!(
                    "shader array slot manager {:?} failed to write slot {index}: {error:#}",
                    self.shared.name
                );
            }
            on_finish_update();
        }
    }

    pub fn slot_owner(&self, slot: &SlotHandle) -> Option<String> {
        self.shared
            .state
            .lock()
            .slots
            .get(slot.index as usize)
            .and_then(|entry| entry.as_ref().map(|entry| entry.owner.clone()))
    }

    fn grow(&self, state: &mut BufferState) -> anyhow::Result<()> {
        let new_capacity = state.capacity * 2;
        let new_handle = self.shared.backend.create_cpu_write_buffer(
            &self.shared.name,
            self.shared.element_stride,
            new_capacity,
            self.shared.usage,
        )?;
        self.shared.backend.destroy_buffer(state.handle);
        state.handle = new_handle;

        state.slots.resize_with(new_capacity, || None);
        state
            .free_indices
            .extend((state.capacity as u32..new_capacity as u32).rev());
        // The new buffer starts empty; re-upload every occupied slot so its
        // data isn't lost.
        for (index, slot) in state.slots.iter().enumerate() {
            if slot.is_some() {
                state.dirty.insert(index as u32);
            }
        }
        state.capacity = new_capacity;

        if let Some(on_buffer_recreated) = &self.shared.on_buffer_recreated {
            on_buffer_recreated(new_handle);
        }
        Ok(())
    }
}

impl Drop for ShaderArraySlotManager {
    fn drop(&mut self) {
        let outstanding = Arc::strong_count(&self.shared) - 1;
        if outstanding > 0 {
            error!(
                "shader array slot manager {:?} dropped with {outstanding} outstanding slot handle(s)",
                self.shared.name
            );
        }
    }
}

/// Move-only handle to a reserved slot. Dropping it frees the slot's index
/// back to the manager for reuse by a later `reserve_slot` call.
pub struct SlotHandle {
    shared: Arc<Shared>,
    index: u32,
}

impl SlotHandle {
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl Drop for SlotHandle {
    fn drop(&mut self) {
        self.shared.release_slot(self.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shader_backend_traits::null::NullBackend;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn recording_slot_data(value: u32) -> (StartUpdateCallback, UpdateFinishedCallback, Arc<AtomicU32>) {
        let finished = Arc::new(AtomicU32::new(0));
        let finished_flag = Arc::clone(&finished);
        let on_start: StartUpdateCallback = Arc::new(move || value.to_le_bytes().to_vec());
        let on_finish: UpdateFinishedCallback = Arc::new(move || {
            finished_flag.fetch_add(1, Ordering::SeqCst);
        });
        (on_start, on_finish, finished)
    }

    #[test]
    fn reserve_rejects_mismatched_element_size() {
        let backend = Arc::new(NullBackend::new());
        let manager =
            ShaderArraySlotManager::new(backend, "mesh-constants", 4, BufferUsage::ArrayStorage, None)
                .unwrap();
        let (on_start, on_finish, _) = recording_slot_data(1);
        let result = manager.reserve_slot("mesh-a", 8, on_start, on_finish);
        assert!(matches!(result, Err(ShaderArraySlotError::SizeMismatch { requested: 8, stride: 4 })));
    }

    #[test]
    fn process_dirty_slots_writes_bytes_and_invokes_finish() {
        let backend = Arc::new(NullBackend::new());
        let manager =
            ShaderArraySlotManager::new(Arc::clone(&backend) as Arc<dyn RendererBackend>, "mesh-constants", 4, BufferUsage::ArrayStorage, None)
                .unwrap();
        let (on_start, on_finish, finished) = recording_slot_data(42);
        let slot = manager.reserve_slot("mesh-a", 4, on_start, on_finish).unwrap();

        manager.process_dirty_slots();

        assert_eq!(finished.load(Ordering::SeqCst), 1);
        let handle = manager.buffer_handle();
        let bytes = backend.buffer_contents(handle);
        let start = slot.index() as usize * 4;
        assert_eq!(&bytes[start..start + 4], &42u32.to_le_bytes());
    }

    #[test]
    fn mark_needs_update_on_unknown_slot_is_a_silent_no_op() {
        let backend = Arc::new(NullBackend::new());
        let manager =
            ShaderArraySlotManager::new(backend, "mesh-constants", 4, BufferUsage::ArrayStorage, None)
                .unwrap();
        let (on_start, on_finish, _) = recording_slot_data(7);
        let slot = manager.reserve_slot("mesh-a", 4, on_start, on_finish).unwrap();
        manager.process_dirty_slots();
        drop(slot);

        // slot has been released; marking it again must not panic or log an error path.
        let dangling = SlotHandle {
            shared: Arc::clone(&manager.shared),
            index: 0,
        };
        manager.mark_slot_needs_update(&dangling);
        std::mem::forget(dangling);
    }

    #[test]
    fn growth_preserves_indices_and_rewrites_existing_slots() {
        let backend = Arc::new(NullBackend::new());
        let recreated = Arc::new(AtomicU32::new(0));
        let recreated_flag = Arc::clone(&recreated);
        let on_buffer_recreated: BufferRecreatedCallback = Arc::new(move |_handle| {
            recreated_flag.fetch_add(1, Ordering::SeqCst);
        });
        let manager = ShaderArraySlotManager::new(
            Arc::clone(&backend) as Arc<dyn RendererBackend>,
            "mesh-constants",
            4,
            BufferUsage::ArrayStorage,
            Some(on_buffer_recreated),
        )
        .unwrap();

        let mut slots = Vec::new();
        for i in 0..ShaderArraySlotManager::INITIAL_CAPACITY as u32 {
            let (on_start, on_finish, _) = recording_slot_data(i);
            slots.push(manager.reserve_slot(format!("mesh-{i}"), 4, on_start, on_finish).unwrap());
        }
        assert_eq!(manager.capacity(), ShaderArraySlotManager::INITIAL_CAPACITY);

        let (on_start, on_finish, _) = recording_slot_data(999);
        let grown_slot = manager.reserve_slot("mesh-overflow", 4, on_start, on_finish).unwrap();

        assert_eq!(manager.capacity(), ShaderArraySlotManager::INITIAL_CAPACITY * 2);
        assert_eq!(recreated.load(Ordering::SeqCst), 1);
        for (i, slot) in slots.iter().enumerate() {
            assert_eq!(slot.index(), i as u32);
        }
        assert_eq!(grown_slot.index(), ShaderArraySlotManager::INITIAL_CAPACITY as u32);

        manager.process_dirty_slots();
        let handle = manager.buffer_handle();
        let bytes = backend.buffer_contents(handle);
        let start = 3 * 4;
        assert_eq!(&bytes[start..start + 4], &3u32.to_le_bytes());
    }
}
