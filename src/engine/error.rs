use thiserror::Error;
use ulid::Ulid;

use crate::model::Day;

/// Why a request cannot be satisfied: the first day on which the item runs short.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub item_id: Ulid,
    pub item_name: String,
    pub day: Day,
    pub requested: u32,
    /// `total - reserved`; never negative while the ledger is consistent.
    pub available: i64,
    pub reserved: u32,
    pub total: u32,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("an item named {0:?} already exists")]
    DuplicateName(String),
    #[error("invalid range: end {end} is before start {start}")]
    InvalidRange { start: Day, end: Day },
    #[error(
        "{} unavailable on {}: requested {}, available {} ({} of {} reserved)",
        .0.item_name, .0.day, .0.requested, .0.available, .0.reserved, .0.total
    )]
    Unavailable(Box<Violation>),
    #[error("concurrent write detected on {0}, retry the request")]
    ConcurrentWriteConflict(Ulid),
    #[error("item {0} is referenced by reservations")]
    ItemInUse(Ulid),
    #[error("cannot reduce stock of {item_id} to {requested}: {peak} reserved on {day}")]
    StockBelowReserved {
        item_id: Ulid,
        requested: u32,
        peak: u32,
        day: Day,
    },
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    /// Whether re-running the whole validate-and-write sequence may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrentWriteConflict(_))
    }

    pub fn violation(&self) -> Option<&Violation> {
        match self {
            EngineError::Unavailable(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Violation> for EngineError {
    fn from(v: Violation) -> Self {
        EngineError::Unavailable(Box::new(v))
    }
}
