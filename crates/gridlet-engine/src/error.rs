use std::collections::TryReserveError;

use thiserror::Error;

/// Errors surfaced by kernel mutations.
///
/// Allocation exhaustion is the only failure on the kernel data path; every
/// public operation that returns it has rolled its partial effects back, so
/// the sheet is exactly as it was before the call.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum SheetError {
    #[error("out of memory")]
    OutOfMemory,
}

impl From<TryReserveError> for SheetError {
    fn from(_: TryReserveError) -> Self {
        SheetError::OutOfMemory
    }
}

impl From<smallvec::CollectionAllocErr> for SheetError {
    fn from(_: smallvec::CollectionAllocErr) -> Self {
        SheetError::OutOfMemory
    }
}
