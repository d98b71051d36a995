//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use lahmo_daq::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{LhmError, Result};

// Capture
pub use crate::capture::history::{BoundedHistory, HistorySnapshot, SharedHistory};
pub use crate::capture::ingest::{IngestCounters, IngestLoop, IngestOutcome, LineDisposition};
pub use crate::capture::record::{ChannelSpec, LineParser, MalformedRecord, RecordLayout, Sample};
pub use crate::capture::sink::SampleSink;
pub use crate::capture::transport::{ReadOutcome, ReaderTransport, ScriptedTransport, Transport};

// Lifecycle
pub use crate::daemon::controller::{CaptureSummary, Controller, ControllerState};
pub use crate::daemon::signals::StopSignal;

// Rendering
pub use crate::render::frame::{ChannelTrace, HeadlessSurface, PlotFrame, PlotSurface, Renderer};

// Archive
pub use crate::archive::{ArchiveReport, compress, dataset_paths, decompress_lines};
