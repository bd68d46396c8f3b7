//! Cooperative cancellation.
//!
//! A [`CancelSignal`] is a cloneable flag shared between the caller (a CLI
//! Ctrl-C handler, a UI "stop" button) and the running preparation. Work is
//! never interrupted mid-step: the pipeline, the matcher and the inventory
//! scan poll the flag at well-defined checkpoints and return
//! [`PrepError::Cancelled`] once it is set.

use crate::error::{PrepError, PrepResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Checkpoint: `Err(PrepError::Cancelled)` once cancellation was requested.
    pub fn check(&self) -> PrepResult<()> {
        if self.is_cancelled() {
            Err(PrepError::Cancelled)
        } else {
            Ok(())
        }
    }
}
