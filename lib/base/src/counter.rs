use std::sync::atomic::{AtomicI64, Ordering};

/// Process-wide counter with a checked decrement. Used for the
/// "shaders in memory" counter and the "alive GPU resources"
/// counter, both of which must never go negative.
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicI64);

impl AtomicCounter {
    pub const fn new() -> Self {
        Self(AtomicI64::new(0))
    }

    pub fn increment(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrements the counter. A mismatch between increments and decrements
    /// (counter going negative) is a fatal logic error.
    pub fn decrement(&self) -> i64 {
        let prev = self.0.fetch_sub(1, Ordering::SeqCst);
        if prev <= 0 {
            crate::fatal!(
                "counter decremented past zero (prev={prev}): load/release counts mismatched"
            );
        }
        prev - 1
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_and_decrements() {
        let c = AtomicCounter::new();
        assert_eq!(c.increment(), 1);
        assert_eq!(c.increment(), 2);
        assert_eq!(c.decrement(), 1);
        assert_eq!(c.get(), 1);
    }

    #[test]
    #[should_panic]
    fn decrement_past_zero_is_fatal() {
        let c = AtomicCounter::new();
        c.decrement();
    }
}
