//! Scoped depth counters
//!
//! Used for message-policy nesting (IP regions print with a different
//! threshold) and console indentation. Depth only changes through
//! [`ScopedDepth::enter`], and the returned guard restores it on drop, so
//! early returns can never leave the counter unbalanced.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A shared depth counter. Clones observe the same depth.
#[derive(Debug, Clone, Default)]
pub struct ScopedDepth(Arc<AtomicUsize>);

impl ScopedDepth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the depth until the returned guard is dropped
    #[must_use = "the depth is restored as soon as the guard is dropped"]
    pub fn enter(&self) -> DepthGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        DepthGuard {
            depth: Arc::clone(&self.0),
        }
    }

    /// Current depth
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn is_nested(&self) -> bool {
        self.get() > 0
    }
}

/// Guard returned by [`ScopedDepth::enter`]
#[derive(Debug)]
pub struct DepthGuard {
    depth: Arc<AtomicUsize>,
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        let _ = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| {
                Some(d.saturating_sub(1))
            });
    }
}
