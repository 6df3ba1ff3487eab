pub mod counter;

/// Logs at `error!` and then panics the current thread.
///
/// Used for violated preconditions: null/unknown-configuration errors are
/// programmer mistakes, not recoverable conditions, so they are never
/// silently corrected.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        panic!($($arg)*);
    }};
}
