// ledger/src/transaction.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Earned,
    Spent,
    Adjusted,
    Bonus,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earned => "earned",
            Self::Spent => "spent",
            Self::Adjusted => "adjusted",
            Self::Bonus => "bonus",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "earned" => Some(Self::Earned),
            "spent" => Some(Self::Spent),
            "adjusted" => Some(Self::Adjusted),
            "bonus" => Some(Self::Bonus),
            _ => None,
        }
    }

    /// Whether a points change of this sign is acceptable for the type.
    /// `adjusted` may move either way.
    pub fn accepts(&self, points_change: i64) -> bool {
        match self {
            Self::Earned | Self::Bonus => points_change > 0,
            Self::Spent => points_change < 0,
            Self::Adjusted => points_change != 0,
        }
    }
}

/// The event that caused an entry. At most one is recorded per entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntryReference {
    Activity(Uuid),
    Completion(Uuid),
    Reward(Uuid),
}

impl EntryReference {
    pub fn activity_id(&self) -> Option<Uuid> {
        match self {
            Self::Activity(id) => Some(*id),
            _ => None,
        }
    }

    pub fn completion_id(&self) -> Option<Uuid> {
        match self {
            Self::Completion(id) => Some(*id),
            _ => None,
        }
    }

    pub fn reward_id(&self) -> Option<Uuid> {
        match self {
            Self::Reward(id) => Some(*id),
            _ => None,
        }
    }

    /// Rebuild from the three nullable storage columns.
    pub fn from_columns(
        activity_id: Option<Uuid>,
        completion_id: Option<Uuid>,
        reward_id: Option<Uuid>,
    ) -> Option<Self> {
        completion_id
            .map(Self::Completion)
            .or(activity_id.map(Self::Activity))
            .or(reward_id.map(Self::Reward))
    }
}

/// Immutable ledger row.
///
/// Invariant: for one profile, ordered by `(created_at, sequence)`,
/// `balance_after[n] == balance_after[n-1] + points_change[n]` with an
/// implicit starting balance of 0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub family_id: Uuid,
    pub reference: Option<EntryReference>,
    pub points_change: i64,
    pub balance_after: i64,
    pub transaction_type: TransactionType,
    pub notes: String,
    /// Hashed idempotency key, if the entry was written with one.
    pub idempotency_key: Option<String>,
    /// Tie-breaker for entries sharing a `created_at`.
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn balance_before(&self) -> i64 {
        self.balance_after - self.points_change
    }
}

/// A not-yet-persisted entry. The adapter assigns `balance_after`,
/// `sequence` and `created_at` when it appends.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub family_id: Uuid,
    pub reference: Option<EntryReference>,
    pub points_change: i64,
    pub transaction_type: TransactionType,
    pub notes: String,
    pub idempotency_key: Option<String>,
    /// Reject the append with `InsufficientPoints` if the resulting balance
    /// would drop below this value.
    pub floor: Option<i64>,
}

impl EntryDraft {
    pub fn new(
        profile_id: Uuid,
        family_id: Uuid,
        points_change: i64,
        transaction_type: TransactionType,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            profile_id,
            family_id,
            reference: None,
            points_change,
            transaction_type,
            notes: notes.into(),
            idempotency_key: None,
            floor: None,
        }
    }

    pub fn with_reference(mut self, reference: EntryReference) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Store the key hashed; the raw key never reaches storage.
    pub fn with_idempotency_key(mut self, key: &str) -> Self {
        self.idempotency_key = Some(crate::hash_idempotency_key(key));
        self
    }

    pub fn with_floor(mut self, floor: i64) -> Self {
        self.floor = Some(floor);
        self
    }

    /// `previous_balance + points_change`, or `InvalidAmount` if that leaves
    /// the i64 range.
    pub fn balance_after(&self, previous_balance: i64) -> Result<i64, crate::LedgerError> {
        previous_balance
            .checked_add(self.points_change)
            .ok_or(crate::LedgerError::InvalidAmount)
    }

    pub fn into_entry(
        self,
        previous_balance: i64,
        sequence: i64,
    ) -> Result<LedgerEntry, crate::LedgerError> {
        let balance_after = self.balance_after(previous_balance)?;
        Ok(LedgerEntry {
            id: self.id,
            profile_id: self.profile_id,
            family_id: self.family_id,
            reference: self.reference,
            points_change: self.points_change,
            balance_after,
            transaction_type: self.transaction_type,
            notes: self.notes,
            idempotency_key: self.idempotency_key,
            sequence,
            created_at: Utc::now(),
        })
    }

    /// Floor check against the balance read under the adapter's lock.
    /// Also rejects a change that would overflow the balance.
    pub fn check_floor(&self, previous_balance: i64) -> Result<(), crate::LedgerError> {
        let next = self.balance_after(previous_balance)?;
        if let Some(floor) = self.floor {
            if next < floor {
                return Err(crate::LedgerError::InsufficientPoints {
                    held: previous_balance,
                    required: floor.saturating_sub(self.points_change),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_type_sign_rules() {
        assert!(TransactionType::Earned.accepts(15));
        assert!(!TransactionType::Earned.accepts(-15));
        assert!(TransactionType::Spent.accepts(-30));
        assert!(!TransactionType::Spent.accepts(30));
        assert!(TransactionType::Adjusted.accepts(-5));
        assert!(TransactionType::Adjusted.accepts(5));
        assert!(!TransactionType::Adjusted.accepts(0));
    }

    #[test]
    fn test_floor_reports_held_and_required() {
        let draft = EntryDraft::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            -50,
            TransactionType::Spent,
            "reward",
        )
        .with_floor(0);

        match draft.check_floor(30) {
            Err(crate::LedgerError::InsufficientPoints { held, required }) => {
                assert_eq!(held, 30);
                assert_eq!(required, 50);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(draft.check_floor(50).is_ok());
    }

    #[test]
    fn test_overflowing_change_is_rejected() {
        let draft = EntryDraft::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            i64::MAX,
            TransactionType::Earned,
            "chore",
        );
        assert!(matches!(
            draft.check_floor(1),
            Err(crate::LedgerError::InvalidAmount)
        ));
        assert!(matches!(
            draft.clone().into_entry(1, 2),
            Err(crate::LedgerError::InvalidAmount)
        ));
        assert_eq!(draft.into_entry(0, 1).unwrap().balance_after, i64::MAX);
    }

    #[test]
    fn test_reference_columns_roundtrip() {
        let id = Uuid::now_v7();
        let r = EntryReference::Completion(id);
        assert_eq!(
            EntryReference::from_columns(r.activity_id(), r.completion_id(), r.reward_id()),
            Some(r)
        );
        assert_eq!(EntryReference::from_columns(None, None, None), None);
    }
}
