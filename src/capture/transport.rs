//! Line transports: the byte source the ingest loop reads from.
//!
//! Concrete serial and BLE drivers live outside this crate. Anything that
//! implements [`std::io::Read`] (a tty device node, a FIFO, stdin, a replayed
//! capture file) becomes a transport through [`ReaderTransport`], which pumps
//! lines on a helper thread so each read is bounded by a timeout. A run of
//! bytes with no newline is cut into [`MAX_LINE_BYTES`] chunks so a link
//! spewing noise still reaches the ingest loop.

#![allow(missing_docs)]

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};

use crate::core::errors::{LhmError, Result};

/// Lines buffered between the pump thread and the ingest loop.
const PUMP_CHANNEL_CAP: usize = 256;

/// Longest line delivered in one piece. Records are well under 200 bytes.
pub const MAX_LINE_BYTES: usize = 4096;

/// Outcome of one bounded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Raw bytes of one line, terminator included when present.
    Line(Vec<u8>),
    /// Read timeout elapsed without a complete line.
    Idle,
    /// The source reached end of stream or failed permanently.
    Closed,
}

/// A source of raw record lines.
pub trait Transport: Send {
    /// Read one line, blocking no longer than the transport's read timeout.
    fn read_line(&mut self) -> Result<ReadOutcome>;

    /// Human-readable description for logs.
    fn describe(&self) -> String {
        "transport".to_string()
    }
}

/// Turns any blocking reader into a [`Transport`] with a read timeout.
///
/// The pump thread exits on end of stream, on a read error, or once the
/// transport is dropped and its next line cannot be delivered.
pub struct ReaderTransport {
    rx: Receiver<Result<Vec<u8>>>,
    read_timeout: Duration,
    label: String,
}

impl ReaderTransport {
    pub fn spawn<R>(reader: R, read_timeout: Duration, label: impl Into<String>) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let label = label.into();
        let (tx, rx) = bounded::<Result<Vec<u8>>>(PUMP_CHANNEL_CAP);
        let thread_label = label.clone();

        thread::Builder::new()
            .name("lhm-transport".to_string())
            .spawn(move || {
                let mut reader = BufReader::new(reader);
                loop {
                    match read_capped_line(&mut reader) {
                        Ok(None) => break,
                        Ok(Some(buf)) => {
                            if tx.send(Ok(buf)).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            let _ = tx.send(Err(LhmError::Transport {
                                details: format!("read error on {thread_label}: {e}"),
                            }));
                            break;
                        }
                    }
                }
            })
            .map_err(|e| LhmError::Runtime {
                details: format!("failed to spawn transport thread: {e}"),
            })?;

        Ok(Self {
            rx,
            read_timeout,
            label,
        })
    }

    /// Open a device node or file path. `-` reads standard input.
    pub fn open(path: &Path, read_timeout: Duration) -> Result<Self> {
        if path == Path::new("-") {
            return Self::spawn(io::stdin(), read_timeout, "stdin");
        }
        let file = File::open(path).map_err(|source| LhmError::io(path, source))?;
        Self::spawn(file, read_timeout, path.display().to_string())
    }
}

impl Transport for ReaderTransport {
    fn read_line(&mut self) -> Result<ReadOutcome> {
        match self.rx.recv_timeout(self.read_timeout) {
            Ok(Ok(bytes)) => Ok(ReadOutcome::Line(bytes)),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(ReadOutcome::Idle),
            Err(RecvTimeoutError::Disconnected) => Ok(ReadOutcome::Closed),
        }
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Read up to and including the next newline, or at most [`MAX_LINE_BYTES`].
/// `None` at end of stream.
fn read_capped_line<R: BufRead>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut buf = Vec::with_capacity(128);
    let limit = MAX_LINE_BYTES as u64;
    match reader.take(limit).read_until(b'\n', &mut buf)? {
        0 => Ok(None),
        _ => Ok(Some(buf)),
    }
}

/// In-memory transport for deterministic playback and tests.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    queue: VecDeque<ReadOutcome>,
    idle_when_exhausted: bool,
    idle_delay: Duration,
}

impl ScriptedTransport {
    pub fn new(outcomes: impl IntoIterator<Item = ReadOutcome>) -> Self {
        Self {
            queue: outcomes.into_iter().collect(),
            idle_when_exhausted: false,
            idle_delay: Duration::ZERO,
        }
    }

    /// Script of text lines, each delivered with a trailing `\r\n` like the firmware sends.
    pub fn from_lines<S: AsRef<str>>(lines: impl IntoIterator<Item = S>) -> Self {
        Self::new(
            lines
                .into_iter()
                .map(|l| ReadOutcome::Line(format!("{}\r\n", l.as_ref()).into_bytes())),
        )
    }

    /// Report `Idle` (after `delay`) instead of `Closed` once the script runs out.
    #[must_use]
    pub fn idle_when_exhausted(mut self, delay: Duration) -> Self {
        self.idle_when_exhausted = true;
        self.idle_delay = delay;
        self
    }

    pub fn push(&mut self, outcome: ReadOutcome) {
        self.queue.push_back(outcome);
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl Transport for ScriptedTransport {
    fn read_line(&mut self) -> Result<ReadOutcome> {
        if let Some(next) = self.queue.pop_front() {
            return Ok(next);
        }
        if self.idle_when_exhausted {
            thread::sleep(self.idle_delay);
            Ok(ReadOutcome::Idle)
        } else {
            Ok(ReadOutcome::Closed)
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reader_transport_yields_lines_then_closed() {
        let data = Cursor::new(b"1\ta\n2\tb\n".to_vec());
        let mut transport =
            ReaderTransport::spawn(data, Duration::from_millis(500), "cursor").unwrap();
        assert_eq!(
            transport.read_line().unwrap(),
            ReadOutcome::Line(b"1\ta\n".to_vec())
        );
        assert_eq!(
            transport.read_line().unwrap(),
            ReadOutcome::Line(b"2\tb\n".to_vec())
        );
        assert_eq!(transport.read_line().unwrap(), ReadOutcome::Closed);
    }

    #[test]
    fn reader_transport_delivers_unterminated_tail() {
        let data = Cursor::new(b"tail-without-newline".to_vec());
        let mut transport =
            ReaderTransport::spawn(data, Duration::from_millis(500), "cursor").unwrap();
        assert_eq!(
            transport.read_line().unwrap(),
            ReadOutcome::Line(b"tail-without-newline".to_vec())
        );
    }

    #[test]
    fn reader_transport_times_out_when_source_is_silent() {
        struct Silent;
        impl Read for Silent {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                thread::sleep(Duration::from_millis(200));
                Err(io::Error::new(io::ErrorKind::Interrupted, "nothing yet"))
            }
        }
        let mut transport =
            ReaderTransport::spawn(Silent, Duration::from_millis(20), "silent").unwrap();
        assert_eq!(transport.read_line().unwrap(), ReadOutcome::Idle);
    }

    /// Endless 0xFF noise without a single newline.
    struct NoiseWithoutNewline;
    impl Read for NoiseWithoutNewline {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            buf.fill(0xff);
            Ok(buf.len())
        }
    }

    #[test]
    fn newline_free_noise_is_cut_into_capped_lines() {
        let mut transport =
            ReaderTransport::spawn(NoiseWithoutNewline, Duration::from_millis(500), "noise")
                .unwrap();
        for _ in 0..3 {
            match transport.read_line().unwrap() {
                ReadOutcome::Line(bytes) => {
                    assert_eq!(bytes.len(), MAX_LINE_BYTES);
                    assert!(bytes.iter().all(|b| *b == 0xff));
                }
                other => panic!("expected a capped line, got {other:?}"),
            }
        }
    }

    #[test]
    fn long_line_is_split_then_newline_resumes_framing() {
        let mut data = vec![b'x'; MAX_LINE_BYTES + 10];
        data.extend_from_slice(b"\n1\tb\n");
        let mut transport =
            ReaderTransport::spawn(Cursor::new(data), Duration::from_millis(500), "long").unwrap();
        assert_eq!(
            transport.read_line().unwrap(),
            ReadOutcome::Line(vec![b'x'; MAX_LINE_BYTES])
        );
        let mut rest = vec![b'x'; 10];
        rest.push(b'\n');
        assert_eq!(transport.read_line().unwrap(), ReadOutcome::Line(rest));
        assert_eq!(
            transport.read_line().unwrap(),
            ReadOutcome::Line(b"1\tb\n".to_vec())
        );
        assert_eq!(transport.read_line().unwrap(), ReadOutcome::Closed);
    }

    #[test]
    fn read_error_surfaces_as_transport_error_then_closes() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
            }
        }
        let mut transport =
            ReaderTransport::spawn(Broken, Duration::from_millis(500), "broken").unwrap();
        let err = transport.read_line().unwrap_err();
        assert_eq!(err.code(), "LHM-2001");
        assert!(err.to_string().contains("broken"));
        assert_eq!(transport.read_line().unwrap(), ReadOutcome::Closed);
    }

    #[test]
    fn open_missing_path_is_io_error() {
        let err = ReaderTransport::open(Path::new("/nonexistent/ttyLHM0"), Duration::from_millis(10))
            .err()
            .expect("missing device should fail");
        assert_eq!(err.code(), "LHM-3002");
    }

    #[test]
    fn scripted_transport_closes_or_idles_when_exhausted() {
        let mut closing = ScriptedTransport::from_lines(["a"]);
        assert!(matches!(closing.read_line().unwrap(), ReadOutcome::Line(_)));
        assert_eq!(closing.read_line().unwrap(), ReadOutcome::Closed);

        let mut idling = ScriptedTransport::default().idle_when_exhausted(Duration::ZERO);
        assert_eq!(idling.read_line().unwrap(), ReadOutcome::Idle);
        idling.push(ReadOutcome::Closed);
        assert_eq!(idling.remaining(), 1);
        assert_eq!(idling.read_line().unwrap(), ReadOutcome::Closed);
    }
}
