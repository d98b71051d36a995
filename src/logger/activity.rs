//! Activity logger thread: capture events in, JSONL lines out.
//!
//! A dedicated thread owns the `JsonlWriter`. Other threads send
//! `ActivityEvent`s through a bounded crossbeam channel with non-blocking
//! `try_send()`, so ingestion never waits on log I/O.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{LhmError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

/// Default bounded channel capacity for log events.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Events recorded in the activity log.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    CaptureStarted {
        source: String,
        output: String,
        config_hash: String,
    },
    CaptureStopped {
        reason: String,
        accepted: u64,
        duration_ms: u64,
    },
    SinkOpened {
        path: String,
    },
    MalformedRecord {
        reason: String,
    },
    DecodeFailure {
        consecutive: u64,
    },
    StaleConnection {
        failures: u64,
        stalled_ms: u64,
    },
    SinkError {
        sample_ts: u64,
        code: String,
        message: String,
    },
    ArchiveWritten {
        path: String,
        lines_in: u64,
        lines_out: u64,
    },
    ConfigLoaded {
        path: String,
        config_hash: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

/// Cheaply cloneable sender side of the activity log.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// A handle whose events go nowhere. Used by headless tools and tests.
    pub fn disabled() -> Self {
        let (tx, _rx) = bounded(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Send an event without blocking. A full channel drops the event and
    /// bumps the dropped counter.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks until queued.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

/// Spawn the logger thread.
///
/// The thread runs until `handle.shutdown()` is called or every sender is dropped.
pub fn spawn_logger(
    config: JsonlConfig,
    channel_capacity: usize,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("lhm-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config, &dropped_clone))
        .map_err(|e| LhmError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(config);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }

        jsonl.write_entry(&event_to_log_entry(&event));
        // Capture sessions are interactive; keep the file tail-able.
        jsonl.flush();
    }

    jsonl.fsync();
}

fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::CaptureStarted {
            source,
            output,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::CaptureStart, Severity::Info);
            e.path = Some(output.clone());
            e.details = Some(format!("source={source} config_hash={config_hash}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::CaptureStopped {
            reason,
            accepted,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::CaptureStop, Severity::Info);
            e.details = Some(format!("reason={reason}"));
            e.count = Some(*accepted);
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e
        }
        ActivityEvent::SinkOpened { path } => {
            let mut e = LogEntry::new(EventType::SinkOpened, Severity::Info);
            e.path = Some(path.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::MalformedRecord { reason } => {
            let mut e = LogEntry::new(EventType::MalformedRecord, Severity::Info);
            e.details = Some(reason.clone());
            e
        }
        ActivityEvent::DecodeFailure { consecutive } => {
            let mut e = LogEntry::new(EventType::DecodeFailure, Severity::Warning);
            e.count = Some(*consecutive);
            e
        }
        ActivityEvent::StaleConnection {
            failures,
            stalled_ms,
        } => {
            let mut e = LogEntry::new(EventType::StaleConnection, Severity::Critical);
            e.count = Some(*failures);
            e.duration_ms = Some(*stalled_ms);
            e.ok = Some(false);
            e
        }
        ActivityEvent::SinkError {
            sample_ts,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::SinkError, Severity::Critical);
            e.sample_ts = Some(*sample_ts);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::ArchiveWritten {
            path,
            lines_in,
            lines_out,
        } => {
            let mut e = LogEntry::new(EventType::ArchiveWritten, Severity::Info);
            e.path = Some(path.clone());
            e.count = Some(*lines_out);
            e.details = Some(format!("lines_in={lines_in}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::ConfigLoaded { path, config_hash } => {
            let mut e = LogEntry::new(EventType::ConfigLoaded, Severity::Info);
            e.path = Some(path.clone());
            e.details = Some(format!("config_hash={config_hash}"));
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        // Handled by the thread loop before conversion.
        ActivityEvent::Shutdown => LogEntry::new(EventType::CaptureStop, Severity::Info),
    }
}
