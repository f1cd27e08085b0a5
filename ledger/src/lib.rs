// ledger/src/lib.rs
//! Append-only points ledger.
//!
//! Every movement of points is one immutable [`LedgerEntry`] carrying the
//! running balance right after it. The current balance of a profile is the
//! `balance_after` of its newest entry; it is never cached anywhere else.
//!
//! ```rust,ignore
//! let ctx = LedgerContext::new(adapter);
//! let draft = EntryDraft::new(child, family, 15, TransactionType::Earned, "Read 20 pages")
//!     .with_reference(EntryReference::Completion(completion_id))
//!     .with_idempotency_key(&format!("completion:{}:earned", completion_id));
//! let entry = Points::append_transaction(&ctx, draft).await?;
//! assert_eq!(Points::current_balance(&ctx, child, None).await?, entry.balance_after);
//! ```
pub mod adapters;
pub mod error;
pub mod points;
pub mod transaction;

pub use error::LedgerError;
pub use points::{LedgerContext, Points};
pub use transaction::{EntryDraft, EntryReference, LedgerEntry, TransactionType};

use async_trait::async_trait;
use uuid::Uuid;

pub fn hash_idempotency_key(key: &str) -> String {
    blake3::hash(key.as_bytes()).to_hex().to_string()
}

/// Storage contract for the ledger.
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    /// Append one entry.
    /// Implementors MUST, with appends for `draft.profile_id` serialized:
    /// 1. Return `DuplicateIdempotencyKey` if the draft's key is already used
    /// 2. Read the newest entry of the profile (previous balance, 0 if none)
    /// 3. Apply `EntryDraft::check_floor` against that balance
    /// 4. Insert the entry with `balance_after = previous + points_change`
    async fn append_entry(&self, draft: EntryDraft) -> Result<LedgerEntry, LedgerError>;

    // READ OPERATIONS
    /// Newest entry by `(created_at, sequence)` descending.
    async fn latest_entry(
        &self,
        profile: Uuid,
        family: Option<Uuid>,
    ) -> Result<Option<LedgerEntry>, LedgerError>;
    async fn get_entry(&self, id: Uuid) -> Result<LedgerEntry, LedgerError>;
    /// Newest first.
    async fn entries_for_profile(
        &self,
        profile: Uuid,
        limit: Option<u32>,
    ) -> Result<Vec<LedgerEntry>, LedgerError>;
    /// `key` is the hashed form stored on the entry.
    async fn get_entry_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<LedgerEntry>, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_is_hashed_and_stable() {
        let a = hash_idempotency_key("completion:1:earned");
        let b = hash_idempotency_key("completion:1:earned");
        let c = hash_idempotency_key("completion:2:earned");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(!a.contains("completion"));
    }

    #[test]
    fn test_transaction_type_names() {
        for t in [
            TransactionType::Earned,
            TransactionType::Spent,
            TransactionType::Adjusted,
            TransactionType::Bonus,
        ] {
            assert_eq!(TransactionType::parse(t.as_str()), Some(t));
        }
        assert_eq!(TransactionType::parse("refund"), None);
    }
}
