//! Live plotting: snapshot-to-frame conversion and drawing surfaces.

pub mod frame;
#[cfg(feature = "tui")]
pub mod terminal;
