//! Activity logging: JSONL writer with rotation and fallback, fed by a
//! dedicated logger thread.

pub mod activity;
pub mod jsonl;
