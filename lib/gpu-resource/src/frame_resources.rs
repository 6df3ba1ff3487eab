use base::fatal;
use log::debug;
use parking_lot::Mutex;
use shader_backend_traits::{BufferHandle, RendererBackend};

/// Default ring depth: enough slots that the CPU never waits on a fence the
/// GPU hasn't had a chance to signal yet under typical double/triple
/// buffering.
pub const DEFAULT_FRAME_RESOURCE_COUNT: usize = 3;

/// A command allocator handle, opaque beyond the backend boundary — reuses
/// the same `u64` handle convention as every other backend object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandAllocatorHandle(pub u64);

/// One slot in the frame-resources ring: its command allocator, its
/// frame-constants buffer, and the fence value that must be observed as
/// signaled before the slot's contents may be touched again.
pub struct FrameSlot {
    pub command_allocator: CommandAllocatorHandle,
    pub frame_constants_buffer: BufferHandle,
    fence_value: u64,
    in_flight: bool,
}

impl FrameSlot {
    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }
}

/// Owns the ring of frame slots and centralizes the fence wait so no caller
/// can read or write a slot still in flight on the GPU.
pub struct FrameResourcesManager {
    slots: Mutex<Vec<FrameSlot>>,
    current: Mutex<usize>,
    upload_scratch: pool::BytePool,
}

impl FrameResourcesManager {
    pub fn new(
        backend: &dyn RendererBackend,
        frame_count: usize,
    ) -> anyhow::Result<Self> {
        if frame_count == 0 {
            fatal!("frame resources manager requires at least one frame slot");
        }

        let mut slots = Vec::with_capacity(frame_count);
        for i in 0..frame_count {
            let frame_constants_buffer = backend.create_cpu_write_buffer(
                &format!("frame constants #{i}"),
                256,
                1,
                shader_backend_traits::BufferUsage::ScalarUniform,
            )?;
            slots.push(FrameSlot {
                command_allocator: CommandAllocatorHandle(i as u64 + 1),
                frame_constants_buffer,
                fence_value: 0,
                in_flight: false,
            });
        }

        Ok(Self {
            slots: Mutex::new(slots),
            current: Mutex::new(0),
            upload_scratch: pool::byte_pool(),
        })
    }

    pub fn frame_resources_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Checks out a reusable byte buffer for building this frame's upload
    /// payload without allocating a fresh `Vec` every frame. Cleared before
    /// use; returned to the pool on drop.
    pub fn upload_scratch_buffer(&self) -> pool::Pooled<Vec<u8>> {
        let mut buffer = self.upload_scratch.take();
        buffer.clear();
        buffer
    }

    /// Advances the ring strictly round-robin and blocks (via the supplied
    /// fence-wait closure) until the incoming slot's prior submission has
    /// signaled. Returns the index of the slot to use this frame.
    pub fn begin_frame(&self, wait_for_fence: impl FnOnce(u64)) -> usize {
        let mut current = self.current.lock();
        let next = (*current + 1) % self.slots.lock().len();
        *current = next;

        let mut slots = self.slots.lock();
        let slot = &mut slots[next];
        if slot.in_flight {
            debug!("waiting on frame slot {next}'s fence (value {})", slot.fence_value);
            wait_for_fence(slot.fence_value);
            slot.in_flight = false;
        }

        next
    }

    /// Marks `slot_index` as submitted with `fence_value`; it stays "in
    /// flight" until the next `begin_frame` call observes its fence.
    pub fn mark_submitted(&self, slot_index: usize, fence_value: u64) {
        let mut slots = self.slots.lock();
        let slot = &mut slots[slot_index];
        slot.fence_value = fence_value;
        slot.in_flight = true;
    }

    pub fn with_slot<R>(&self, slot_index: usize, f: impl FnOnce(&FrameSlot) -> R) -> R {
        let slots = self.slots.lock();
        f(&slots[slot_index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shader_backend_traits::null::NullBackend;

    #[test]
    fn advances_round_robin() {
        let backend = NullBackend::new();
        let manager = FrameResourcesManager::new(&backend, 3).unwrap();
        let first = manager.begin_frame(|_| {});
        let second = manager.begin_frame(|_| {});
        let third = manager.begin_frame(|_| {});
        let fourth = manager.begin_frame(|_| {});
        assert_eq!([first, second, third, fourth], [1, 2, 0, 1]);
    }

    #[test]
    fn waits_on_reentering_an_in_flight_slot() {
        let backend = NullBackend::new();
        let manager = FrameResourcesManager::new(&backend, 1).unwrap();
        let slot = manager.begin_frame(|_| {});
        manager.mark_submitted(slot, 42);

        let waited_value = std::cell::Cell::new(None);
        manager.begin_frame(|fence| waited_value.set(Some(fence)));
        assert_eq!(waited_value.get(), Some(42));
    }

    #[test]
    fn upload_scratch_buffer_is_recycled_and_cleared() {
        let backend = NullBackend::new();
        let manager = FrameResourcesManager::new(&backend, 2).unwrap();

        {
            let mut scratch = manager.upload_scratch_buffer();
            scratch.extend_from_slice(&[1, 2, 3, 4]);
        }

        let scratch = manager.upload_scratch_buffer();
        assert!(scratch.is_empty());
    }
}
