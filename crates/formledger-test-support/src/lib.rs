//! Shared test doubles and utilities for Formledger.

mod clock;
mod sink;
mod store;

pub use clock::{FixedClock, StepClock};
pub use sink::{RecordingSink, SlowSink};
pub use store::{CrashingOffsetStore, FailingEventStore};
