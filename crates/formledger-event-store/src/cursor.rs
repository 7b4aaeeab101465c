//! Cursor rules shared by every offset store.

use formledger_core::error::LedgerError;
use formledger_core::event::EventId;
use formledger_core::offset::{AdvanceOutcome, OffsetOverride};

/// Decides what moving a cursor from `current` to `to` means.
///
/// # Errors
///
/// `StaleOffset` if `to` is before `current`.
pub fn check_advance(
    processor_id: &str,
    current: Option<EventId>,
    to: EventId,
) -> Result<AdvanceOutcome, LedgerError> {
    match current {
        Some(current) if to == current => Ok(AdvanceOutcome::Unchanged),
        Some(current) if to < current => Err(LedgerError::StaleOffset {
            processor_id: processor_id.to_owned(),
            current,
            requested: to,
        }),
        _ => Ok(AdvanceOutcome::Advanced),
    }
}

/// A skip is only valid from the exact cursor the operator saw, and only
/// forward.
///
/// # Errors
///
/// `StaleOffset` if the cursor moved or the skip points backward.
pub fn check_skip(current: Option<EventId>, record: &OffsetOverride) -> Result<(), LedgerError> {
    let floor = current.unwrap_or(EventId::new(0));
    if current != record.previous_event_id || record.skipped_event_id <= floor {
        return Err(LedgerError::StaleOffset {
            processor_id: record.processor_id.clone(),
            current: floor,
            requested: record.skipped_event_id,
        });
    }
    Ok(())
}
