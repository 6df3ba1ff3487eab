//! A small reusable-buffer pool, used to avoid reallocating scratch
//! `Vec<u8>`s every time one is needed.
//!
//! Here it recycles byte buffers for bytecode loads (`shader-registry`'s
//! `ShaderObject::ensure_loaded`) and per-frame upload scratch
//! (`gpu-resource`'s `FrameResourcesManager::upload_scratch_buffer`).

use parking_lot::Mutex;
use std::sync::Arc;

struct Inner<T> {
    free: Mutex<Vec<T>>,
    new_item: Box<dyn Fn() -> T + Send + Sync>,
}

/// A pool of reusable `T` values. Checked-out values are returned to the
/// pool on drop via [`PoolVec`]'s `Drop` impl.
#[derive(Clone)]
pub struct Pool<T>(Arc<Inner<T>>);

impl<T: Send + 'static> Pool<T> {
    pub fn with_capacity(cap: usize, new_item: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self(Arc::new(Inner {
            free: Mutex::new(Vec::with_capacity(cap)),
            new_item: Box::new(new_item),
        }))
    }

    /// Takes an item from the pool, constructing a fresh one if empty.
    pub fn take(&self) -> Pooled<T> {
        let item = self.0.free.lock().pop().unwrap_or_else(|| (self.0.new_item)());
        Pooled {
            item: Some(item),
            pool: self.clone(),
        }
    }

    fn recycle(&self, item: T) {
        self.0.free.lock().push(item);
    }

    pub fn len_free(&self) -> usize {
        self.0.free.lock().len()
    }
}

/// An item checked out from a [`Pool`]. Returns itself to the pool on drop.
pub struct Pooled<T: Send + 'static> {
    item: Option<T>,
    pool: Pool<T>,
}

impl<T: Send + 'static> std::ops::Deref for Pooled<T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.item.as_ref().expect("item taken twice")
    }
}

impl<T: Send + 'static> std::ops::DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("item taken twice")
    }
}

impl<T: Send + 'static> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.recycle(item);
        }
    }
}

/// A byte-buffer pool specialised for bytecode/upload scratch reuse.
pub type BytePool = Pool<Vec<u8>>;

pub fn byte_pool() -> BytePool {
    Pool::with_capacity(8, Vec::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recycles_buffers() {
        let pool = byte_pool();
        {
            let mut buf = pool.take();
            buf.extend_from_slice(b"hello");
        }
        assert_eq!(pool.len_free(), 1);
        let buf2 = pool.take();
        // recycled buffer is handed back as-is (caller is responsible for clearing)
        assert_eq!(buf2.as_slice(), b"hello");
    }
}
