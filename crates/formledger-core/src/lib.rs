//! Formledger Core — shared domain types and storage abstractions.
//!
//! This crate defines the event, schema and offset records that every other
//! crate exchanges, the error taxonomy, and the storage and output traits
//! implemented elsewhere. It contains no infrastructure code.

pub mod clock;
pub mod error;
pub mod event;
pub mod offset;
pub mod repository;
pub mod schema;
pub mod sink;
