//! Shadow-map array-index manager: assigns each live shadow map a dense
//! index into its descriptor array, one manager per light kind, so the
//! shader side can always index `[0, live_count)` without gaps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::error;
use parking_lot::Mutex;

pub type IndexChangedCallback = Arc<dyn Fn(u32) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArraySlotId(u64);

struct Slot {
    id: ArraySlotId,
    on_index_changed: IndexChangedCallback,
}

/// Dense, compact index assignment for one light kind's shadow-map
/// descriptor array. The assigned index for a live slot is always
/// its position in `slots`, so the live set is always exactly
/// `{0, ..., live_count - 1}`.
#[derive(Default)]
pub struct ArrayIndexManager {
    slots: Mutex<Vec<Slot>>,
    next_id: AtomicU64,
}

impl ArrayIndexManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next dense index for a newly created shadow map.
    pub fn allocate(&self, on_index_changed: IndexChangedCallback) -> (ArraySlotId, u32) {
        let mut slots = self.slots.lock();
        let index = slots.len() as u32;
        let id = ArraySlotId(self.next_id.fetch_add(1, Ordering::SeqCst));
        slots.push(Slot { id, on_index_changed });
        (id, index)
    }

    /// Frees `id`'s slot. If it wasn't already the tail, the tail slot is
    /// moved into the freed position and its callback fires with the new
    /// (lower) index, keeping the assignment dense.
    pub fn free(&self, id: ArraySlotId) {
        let mut slots = self.slots.lock();
        let Some(position) = slots.iter().position(|slot| slot.id == id) else {
            error!("array-index manager asked to free a slot it never allocated");
            return;
        };

        let last = slots.len() - 1;
        if position != last {
            slots.swap(position, last);
            (slots[position].on_index_changed)(position as u32);
        }
        slots.pop();
    }

    pub fn live_count(&self) -> usize {
        self.slots.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn recording_callback() -> (IndexChangedCallback, Arc<AtomicU32>) {
        let observed = Arc::new(AtomicU32::new(u32::MAX));
        let recorded = Arc::clone(&observed);
        let callback: IndexChangedCallback = Arc::new(move |index| {
            recorded.store(index, Ordering::SeqCst);
        });
        (callback, observed)
    }

    #[test]
    fn density_invariant_after_allocations_and_frees() {
        let manager = ArrayIndexManager::new();
        let (cb_a, _) = recording_callback();
        let (cb_b, _) = recording_callback();
        let (cb_c, _) = recording_callback();

        let (id_a, index_a) = manager.allocate(cb_a);
        let (id_b, _index_b) = manager.allocate(cb_b);
        let (_id_c, _index_c) = manager.allocate(cb_c);
        assert_eq!(index_a, 0);
        assert_eq!(manager.live_count(), 3);

        manager.free(id_b);
        assert_eq!(manager.live_count(), 2);

        manager.free(id_a);
        assert_eq!(manager.live_count(), 1);
    }

    #[test]
    fn freeing_non_tail_slot_notifies_moved_tail() {
        let manager = ArrayIndexManager::new();
        let (cb_a, observed_a) = recording_callback();
        let (cb_b, observed_b) = recording_callback();

        let (id_a, _) = manager.allocate(cb_a);
        let (_id_b, index_b) = manager.allocate(cb_b);
        assert_eq!(index_b, 1);

        manager.free(id_a);
        assert_eq!(observed_b.load(Ordering::SeqCst), 0);
        assert_eq!(observed_a.load(Ordering::SeqCst), u32::MAX);
        assert_eq!(manager.live_count(), 1);
    }
}
