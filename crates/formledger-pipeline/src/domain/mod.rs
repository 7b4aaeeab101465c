//! Processor capability and run reports.

pub mod processor;
pub mod report;
