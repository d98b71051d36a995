//! Capture lifecycle: controller threads and the cooperative stop signal.

pub mod controller;
pub mod signals;
