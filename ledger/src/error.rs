// ledger/src/error.rs
use std::fmt;

#[derive(Debug)]
pub enum LedgerError {
    InvalidAmount,
    InsufficientPoints { held: i64, required: i64 },
    EntryNotFound,
    /// The key was already used; carries the id of the entry that owns it.
    DuplicateIdempotencyKey(uuid::Uuid),
    Storage(String),
    Conflict(String),
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidAmount => write!(f, "Invalid amount"),
            Self::InsufficientPoints { held, required } => write!(
                f,
                "Insufficient points: have {}, need {}",
                held, required
            ),
            Self::EntryNotFound => write!(f, "Ledger entry not found"),
            Self::DuplicateIdempotencyKey(id) => {
                write!(f, "Duplicate idempotency key: {}", id)
            }
            Self::Storage(msg) => write!(f, "Storage error: {}", msg),
            Self::Conflict(msg) => write!(f, "Conflict: {}", msg),
        }
    }
}

impl std::error::Error for LedgerError {}
