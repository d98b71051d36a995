#![forbid(unsafe_code)]

//! LaHMo data acquisition: bounded streaming ingestion for a wearable
//! photovoltage + IMU sensor rig.
//!
//! A transport yields tab-separated records; the ingest task parses them,
//! drops consecutive duplicate timestamps, keeps the most recent N samples in
//! a shared ring buffer, and appends every accepted sample to a CSV log. A
//! render task periodically snapshots the ring buffer and draws it. A stream of
//! undecodable bytes that outlasts the connection timeout stops the pipeline.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use lahmo_daq::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use lahmo_daq::capture::record::{LineParser, RecordLayout};
//! use lahmo_daq::daemon::controller::Controller;
//! ```

pub mod prelude;

pub mod archive;
pub mod capture;
pub mod core;
pub mod daemon;
pub mod logger;
pub mod render;
