//! Sensor stream ingestion: parsing, bounded history, persistence, transports.

pub mod connection;
pub mod history;
pub mod ingest;
pub mod record;
pub mod sink;
pub mod transport;
