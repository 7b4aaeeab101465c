//! Entry points: event submission, consumption runs and operator skips.

pub mod pipeline;
pub mod submit;
