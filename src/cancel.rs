//! Cooperative cancellation
//!
//! Long-running validation and planning passes check the token between
//! per-instance validations and before each ordering step. A cancelled
//! pass returns an error; partial results are discarded, never returned.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cheap clonable cancellation flag shared between a caller and a running
/// plan computation
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent; there is no un-cancel.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_observe_cancellation() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }
}
