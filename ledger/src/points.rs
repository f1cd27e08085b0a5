// ledger/src/points.rs
use super::{EntryDraft, LedgerAdapter, LedgerEntry, LedgerError};
use metrics::{counter, histogram};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct LedgerContext {
    adapter: Arc<dyn LedgerAdapter>,
}

impl LedgerContext {
    pub fn new(adapter: Arc<dyn LedgerAdapter>) -> Self {
        Self { adapter }
    }

    pub fn adapter(&self) -> &dyn LedgerAdapter {
        self.adapter.as_ref()
    }
}

/// Entry points for reading and moving points.
pub struct Points;

impl Points {
    /// `balance_after` of the profile's newest entry, or 0.
    /// Recomputed on every call.
    pub async fn current_balance(
        ctx: &LedgerContext,
        profile: Uuid,
        family: Option<Uuid>,
    ) -> Result<i64, LedgerError> {
        let latest = ctx.adapter().latest_entry(profile, family).await?;
        Ok(latest.map(|e| e.balance_after).unwrap_or(0))
    }

    /// Append a transaction for a profile.
    ///
    /// The balance this entry builds on is read by the adapter right before
    /// it inserts. Adapters shipped with this crate serialize that
    /// read-then-write per profile; a custom adapter that does not will let
    /// two concurrent appends for the same profile compute the same
    /// `balance_after`.
    pub async fn append_transaction(
        ctx: &LedgerContext,
        draft: EntryDraft,
    ) -> Result<LedgerEntry, LedgerError> {
        if !draft.transaction_type.accepts(draft.points_change) {
            return Err(LedgerError::InvalidAmount);
        }

        let kind = draft.transaction_type.as_str();
        histogram!("ledger.entry.points", "type" => kind)
            .record(draft.points_change.unsigned_abs() as f64);

        let result = ctx.adapter().append_entry(draft).await;

        counter!("ledger.entries.total",
            "type" => kind,
            "status" => if result.is_ok() { "success" } else { "failed" }
        )
        .increment(1);

        result
    }

    /// Look up the entry written with a raw (unhashed) idempotency key.
    pub async fn find_by_key(
        ctx: &LedgerContext,
        key: &str,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        ctx.adapter()
            .get_entry_by_idempotency_key(&crate::hash_idempotency_key(key))
            .await
    }

    pub async fn history(
        ctx: &LedgerContext,
        profile: Uuid,
        limit: Option<u32>,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        ctx.adapter().entries_for_profile(profile, limit).await
    }
}
