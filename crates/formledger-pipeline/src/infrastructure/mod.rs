//! Output sinks and per-processor locks.

pub mod file_sink;
pub mod locks;
