//! Ingest loop: read, decode, parse, dedupe, then append to history and sink.
//!
//! Cycle: `Reading → Parsing → (Accepted | Rejected) → Reading`. The stop
//! signal is checked at the top of every cycle. Undecodable bytes feed the
//! stale-connection timer; once it expires the loop requests a stop and ends
//! with [`IngestOutcome::StaleConnection`]. Every other rejection is local:
//! count it, optionally log it, read the next line.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::capture::connection::{ConnectionState, LinkHealth};
use crate::capture::history::SharedHistory;
use crate::capture::record::{LineParser, MalformedRecord};
use crate::capture::sink::SampleSink;
use crate::capture::transport::{ReadOutcome, Transport};
use crate::daemon::signals::StopSignal;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};

/// What happened to one raw line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineDisposition {
    Accepted,
    /// Same timestamp as the previous accepted sample.
    Duplicate,
    Malformed(MalformedRecord),
    /// Bytes were not valid UTF-8; the stale timer is running.
    DecodeFailed,
    /// Decode failures outlasted the timeout.
    Stale,
}

/// Why the ingest loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// External stop request observed.
    Stopped,
    StaleConnection,
    /// The transport reached end of stream.
    TransportClosed,
}

impl IngestOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::StaleConnection => "stale_connection",
            Self::TransportClosed => "transport_closed",
        }
    }
}

/// Monotonic counters shared with the renderer and the CLI summary.
#[derive(Debug, Default)]
pub struct IngestStats {
    lines_read: AtomicU64,
    accepted: AtomicU64,
    duplicates: AtomicU64,
    malformed: AtomicU64,
    decode_failures: AtomicU64,
    sink_errors: AtomicU64,
}

/// Plain copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestCounters {
    pub lines_read: u64,
    pub accepted: u64,
    pub duplicates: u64,
    pub malformed: u64,
    pub decode_failures: u64,
    pub sink_errors: u64,
}

impl IngestStats {
    pub fn counters(&self) -> IngestCounters {
        IngestCounters {
            lines_read: self.lines_read.load(Ordering::Relaxed),
            accepted: self.accepted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// The ingest task. Owns the sink; writes the shared history.
pub struct IngestLoop {
    parser: LineParser,
    history: SharedHistory,
    sink: SampleSink,
    connection: ConnectionState,
    last_timestamp: Option<u64>,
    stop: StopSignal,
    stats: Arc<IngestStats>,
    activity: ActivityLoggerHandle,
}

impl IngestLoop {
    pub fn new(
        parser: LineParser,
        history: SharedHistory,
        sink: SampleSink,
        stop: StopSignal,
        conn_timeout: Duration,
    ) -> Self {
        Self {
            parser,
            history,
            sink,
            connection: ConnectionState::new(conn_timeout),
            last_timestamp: None,
            stop,
            stats: Arc::new(IngestStats::default()),
            activity: ActivityLoggerHandle::disabled(),
        }
    }

    #[must_use]
    pub fn with_activity(mut self, activity: ActivityLoggerHandle) -> Self {
        self.activity = activity;
        self
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    pub fn sink(&self) -> &SampleSink {
        &self.sink
    }

    /// Run until stopped, stale, or the transport closes. Closes the sink on return.
    pub fn run(mut self, transport: &mut dyn Transport) -> IngestOutcome {
        let outcome = loop {
            if self.stop.is_stop_requested() {
                break IngestOutcome::Stopped;
            }

            match transport.read_line() {
                Ok(ReadOutcome::Line(bytes)) => {
                    IngestStats::bump(&self.stats.lines_read);
                    if self.process_line(&bytes, Instant::now()) == LineDisposition::Stale {
                        break IngestOutcome::StaleConnection;
                    }
                }
                Ok(ReadOutcome::Idle) => {}
                Ok(ReadOutcome::Closed) => {
                    eprintln!("[LHM-INGEST] {} closed", transport.describe());
                    self.stop.request_stop();
                    break IngestOutcome::TransportClosed;
                }
                Err(e) => {
                    // A failing link is treated like one producing garbage.
                    eprintln!("[LHM-INGEST] read failed on {}: {e}", transport.describe());
                    if self.on_decode_failure(Instant::now()) == LineDisposition::Stale {
                        break IngestOutcome::StaleConnection;
                    }
                }
            }
        };

        if let Err(e) = self.sink.close() {
            eprintln!("[LHM-SINK] close failed: {e}");
        }
        outcome
    }

    /// Handle one raw line observed at `now`.
    pub fn process_line(&mut self, bytes: &[u8], now: Instant) -> LineDisposition {
        let Ok(text) = std::str::from_utf8(bytes) else {
            return self.on_decode_failure(now);
        };

        let sample = match self.parser.parse(text.trim()) {
            Ok(sample) => sample,
            Err(reason) => {
                IngestStats::bump(&self.stats.malformed);
                self.activity.send(ActivityEvent::MalformedRecord {
                    reason: reason.to_string(),
                });
                return LineDisposition::Malformed(reason);
            }
        };
        self.connection.record_success();

        if self.last_timestamp == Some(sample.timestamp) {
            IngestStats::bump(&self.stats.duplicates);
            return LineDisposition::Duplicate;
        }
        self.last_timestamp = Some(sample.timestamp);

        let was_open = self.sink.is_open();
        match self.sink.write(&sample) {
            Ok(()) => {
                if !was_open {
                    self.activity.send(ActivityEvent::SinkOpened {
                        path: self.sink.path().display().to_string(),
                    });
                }
            }
            Err(e) => {
                if IngestStats::bump(&self.stats.sink_errors) == 1 {
                    eprintln!("[LHM-SINK] write failed: {e}");
                }
                self.activity.send(ActivityEvent::SinkError {
                    sample_ts: sample.timestamp,
                    code: e.code().to_string(),
                    message: e.to_string(),
                });
            }
        }

        self.history.append(sample);
        IngestStats::bump(&self.stats.accepted);
        LineDisposition::Accepted
    }

    fn on_decode_failure(&mut self, now: Instant) -> LineDisposition {
        IngestStats::bump(&self.stats.decode_failures);
        match self.connection.record_decode_failure(now) {
            LinkHealth::Degraded => {
                if self.connection.consecutive_failures() == 1 {
                    self.activity
                        .send(ActivityEvent::DecodeFailure { consecutive: 1 });
                }
                LineDisposition::DecodeFailed
            }
            LinkHealth::Stale => {
                let stalled_ms = self
                    .connection
                    .first_failure_at()
                    .map_or(0, |first| {
                        u64::try_from(now.saturating_duration_since(first).as_millis())
                            .unwrap_or(u64::MAX)
                    });
                eprintln!(
                    "[LHM-INGEST] no decodable data for {stalled_ms} ms, connection is stale"
                );
                self.activity.send(ActivityEvent::StaleConnection {
                    failures: self.connection.consecutive_failures(),
                    stalled_ms,
                });
                self.stop.request_stop();
                LineDisposition::Stale
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::record::RecordLayout;
    use crate::capture::sink::read_log;
    use crate::capture::transport::ScriptedTransport;
    use std::path::Path;

    const LINE_1: &str = "1\t0.1\t0.2\t0.3\t0.4\t10\t20\t30";
    const LINE_2: &str = "2\t0.5\t0.6\t0.7\t0.8\t11\t21\t31";

    fn ingest(dir: &Path, capacity: usize, timeout: Duration) -> (IngestLoop, SharedHistory) {
        let history = SharedHistory::new(capacity);
        let sink = SampleSink::new(dir.join("capture.csv"), RecordLayout::default());
        let lp = IngestLoop::new(
            LineParser::new(RecordLayout::default()),
            history.clone(),
            sink,
            StopSignal::new(),
            timeout,
        );
        (lp, history)
    }

    #[test]
    fn scenario_dedupes_and_skips_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let (lp, history) = ingest(dir.path(), 100, Duration::from_secs(5));
        let stats = lp.stats();
        let mut transport = ScriptedTransport::from_lines([LINE_1, LINE_1, "bad\tline", LINE_2]);

        let outcome = lp.run(&mut transport);

        assert_eq!(outcome, IngestOutcome::TransportClosed);
        assert_eq!(history.snapshot().timestamps(), vec![1, 2]);
        let counters = stats.counters();
        assert_eq!(counters.lines_read, 4);
        assert_eq!(counters.accepted, 2);
        assert_eq!(counters.duplicates, 1);
        assert_eq!(counters.malformed, 1);
        let persisted: Vec<u64> = read_log(&dir.path().join("capture.csv"))
            .unwrap()
            .iter()
            .map(|s| s.timestamp)
            .collect();
        assert_eq!(persisted, vec![1, 2]);
    }

    #[test]
    fn malformed_line_mutates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut lp, history) = ingest(dir.path(), 10, Duration::from_secs(5));
        let now = Instant::now();

        for line in ["1\t2\t3", "1\t0.1\t0.2\t0.3\t0.4\t10\t20\t30\t99", "1\t0.1\tx\t0.3\t0.4\t10\t20\t30"] {
            assert!(matches!(
                lp.process_line(line.as_bytes(), now),
                LineDisposition::Malformed(_)
            ));
        }
        assert!(history.is_empty());
        assert!(!lp.sink().is_open());
        assert!(!dir.path().join("capture.csv").exists());
    }

    #[test]
    fn malformed_lines_do_not_touch_the_stale_timer() {
        let dir = tempfile::tempdir().unwrap();
        let (mut lp, _history) = ingest(dir.path(), 10, Duration::from_millis(100));
        let t0 = Instant::now();
        assert_eq!(lp.process_line(&[0xff, 0xfe], t0), LineDisposition::DecodeFailed);
        // A malformed but decodable line neither resets nor advances the timer.
        assert!(matches!(
            lp.process_line(b"junk", t0 + Duration::from_millis(50)),
            LineDisposition::Malformed(_)
        ));
        assert_eq!(
            lp.process_line(&[0xff], t0 + Duration::from_millis(150)),
            LineDisposition::Stale
        );
    }

    #[test]
    fn successful_parse_resets_the_stale_timer() {
        let dir = tempfile::tempdir().unwrap();
        let (mut lp, _history) = ingest(dir.path(), 10, Duration::from_millis(100));
        let t0 = Instant::now();
        lp.process_line(&[0xc3, 0x28], t0);
        assert_eq!(
            lp.process_line(LINE_1.as_bytes(), t0 + Duration::from_millis(60)),
            LineDisposition::Accepted
        );
        assert_eq!(
            lp.process_line(&[0xc3, 0x28], t0 + Duration::from_millis(150)),
            LineDisposition::DecodeFailed
        );
    }

    #[test]
    fn duplicate_still_counts_as_link_success() {
        let dir = tempfile::tempdir().unwrap();
        let (mut lp, history) = ingest(dir.path(), 10, Duration::from_millis(100));
        let t0 = Instant::now();
        lp.process_line(LINE_1.as_bytes(), t0);
        lp.process_line(&[0x80], t0);
        assert_eq!(
            lp.process_line(LINE_1.as_bytes(), t0 + Duration::from_millis(50)),
            LineDisposition::Duplicate
        );
        assert_eq!(
            lp.process_line(&[0x80], t0 + Duration::from_millis(170)),
            LineDisposition::DecodeFailed
        );
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn decreasing_timestamps_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let (mut lp, history) = ingest(dir.path(), 10, Duration::from_secs(5));
        let now = Instant::now();
        assert_eq!(lp.process_line(LINE_2.as_bytes(), now), LineDisposition::Accepted);
        assert_eq!(lp.process_line(LINE_1.as_bytes(), now), LineDisposition::Accepted);
        // Only equality with the immediately preceding sample is a duplicate.
        assert_eq!(lp.process_line(LINE_2.as_bytes(), now), LineDisposition::Accepted);
        assert_eq!(history.snapshot().timestamps(), vec![2, 1, 2]);
    }

    #[test]
    fn first_sample_with_timestamp_zero_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let (mut lp, history) = ingest(dir.path(), 10, Duration::from_secs(5));
        let line = "0\t0.1\t0.2\t0.3\t0.4\t10\t20\t30";
        assert_eq!(lp.process_line(line.as_bytes(), Instant::now()), LineDisposition::Accepted);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn trailing_whitespace_and_crlf_are_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let (mut lp, _history) = ingest(dir.path(), 10, Duration::from_secs(5));
        let line = format!("  {LINE_1}\t\r\n");
        assert_eq!(lp.process_line(line.as_bytes(), Instant::now()), LineDisposition::Accepted);
    }

    #[test]
    fn stale_connection_requests_stop_and_ends_loop() {
        let dir = tempfile::tempdir().unwrap();
        let (lp, history) = ingest(dir.path(), 10, Duration::from_millis(30));
        let stop = lp.stop.clone();

        struct Garbage;
        impl Transport for Garbage {
            fn read_line(&mut self) -> crate::core::errors::Result<ReadOutcome> {
                std::thread::sleep(Duration::from_millis(5));
                Ok(ReadOutcome::Line(vec![0xff, 0xfe, b'\n']))
            }
        }

        let outcome = lp.run(&mut Garbage);
        assert_eq!(outcome, IngestOutcome::StaleConnection);
        assert!(stop.is_stop_requested());
        assert!(history.is_empty());
    }

    #[test]
    fn stop_signal_is_checked_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let (lp, history) = ingest(dir.path(), 10, Duration::from_secs(5));
        lp.stop.request_stop();
        let mut transport = ScriptedTransport::from_lines([LINE_1]);
        assert_eq!(lp.run(&mut transport), IngestOutcome::Stopped);
        assert_eq!(transport.remaining(), 1);
        assert!(history.is_empty());
    }

    #[test]
    fn sink_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let history = SharedHistory::new(10);
        let lp = IngestLoop::new(
            LineParser::new(RecordLayout::default()),
            history.clone(),
            SampleSink::new(blocker.join("capture.csv"), RecordLayout::default()),
            StopSignal::new(),
            Duration::from_secs(5),
        );
        let stats = lp.stats();
        let mut transport = ScriptedTransport::from_lines([LINE_1, LINE_2]);

        assert_eq!(lp.run(&mut transport), IngestOutcome::TransportClosed);
        assert_eq!(history.len(), 2);
        assert_eq!(stats.counters().sink_errors, 2);
    }
}
