//! Run-level interrupt flag.
//!
//! Ctrl-C flips the flag; the pipeline and the fetcher poll it before starting
//! each source, attempt or article so a run winds down between units of work
//! and still reaches the (atomic) store write.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Trigger the flag on the first Ctrl-C.
    pub fn listen_for_ctrl_c(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; finishing the current unit of work");
                this.trigger();
            }
        });
    }
}
