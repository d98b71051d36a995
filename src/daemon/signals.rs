//! Cooperative stop flag shared by the ingest task, the render task and the
//! OS signal hooks.
//!
//! Tasks poll [`StopSignal::is_stop_requested`] once per cycle rather than
//! blocking on signals. SIGINT/SIGTERM set the same flag through `signal-hook`.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// ──────────────────── stop signal ────────────────────

/// Thread-safe, one-way stop flag. Clones observe the same state.
///
/// `Ordering::Relaxed` is enough: every loop re-reads the flag each cycle and
/// nothing else is published through it.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Idempotent; there is no way to clear the flag.
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Route SIGINT and SIGTERM into this flag.
    ///
    /// Registration is best-effort; failures are logged to stderr but not fatal.
    #[cfg(feature = "daemon")]
    pub fn register_os_signals(&self) -> usize {
        use signal_hook::consts::{SIGINT, SIGTERM};

        let mut registered = 0;
        for (name, signal) in [("SIGINT", SIGINT), ("SIGTERM", SIGTERM)] {
            match signal_hook::flag::register(signal, Arc::clone(&self.flag)) {
                Ok(_) => registered += 1,
                Err(e) => eprintln!("[LHM-SIGNAL] failed to register {name}: {e}"),
            }
        }
        registered
    }
}

// ──────────────────── tests ────────────────────
