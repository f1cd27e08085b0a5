use crate::{
    EntryDraft, EntryReference, LedgerAdapter, LedgerEntry, LedgerError, TransactionType,
};
use chrono::{DateTime, Utc};
use sqlx::{Row, postgres::PgRow};
use uuid::Uuid;

pub trait PostgresLedgerAdapter {
    fn get_pool(&self) -> sqlx::PgPool;
}

#[async_trait::async_trait]
pub trait PostgresSchemaLedgerAdapter {
    /// Initialize the schema for the points ledger.
    /// This function should only be called for a standalone ledger.
    /// If using hearth, call init_schema() on the adapter.
    async fn init_ledger_schema(&self) -> Result<(), LedgerError>;
}

#[async_trait::async_trait]
impl<T> PostgresSchemaLedgerAdapter for T
where
    T: PostgresLedgerAdapter + Send + Sync,
{
    async fn init_ledger_schema(&self) -> Result<(), LedgerError> {
        let mut tx = self
            .get_pool()
            .begin()
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        // `seq` breaks ties between entries sharing a created_at
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS points_ledger (
                id UUID PRIMARY KEY,
                seq BIGSERIAL NOT NULL UNIQUE,
                profile_id UUID NOT NULL,
                family_id UUID NOT NULL,
                activity_id UUID,
                completion_id UUID,
                reward_id UUID,
                points_change BIGINT NOT NULL,
                balance_after BIGINT NOT NULL,
                transaction_type TEXT NOT NULL
                    CHECK (transaction_type IN ('earned', 'spent', 'adjusted', 'bonus')),
                notes TEXT NOT NULL,
                idempotency_key TEXT UNIQUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                CHECK (num_nonnulls(activity_id, completion_id, reward_id) <= 1)
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_points_ledger_profile_recent
            ON points_ledger(profile_id, created_at DESC, seq DESC)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_points_ledger_family
            ON points_ledger(family_id)
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        Ok(())
    }
}

const ENTRY_COLUMNS: &str = r#"
    id, seq, profile_id, family_id, activity_id, completion_id, reward_id,
    points_change, balance_after, transaction_type, notes, idempotency_key, created_at
"#;

fn map_row_to_entry(row: PgRow) -> Result<LedgerEntry, LedgerError> {
    let kind: String = row
        .try_get("transaction_type")
        .map_err(|e| LedgerError::Storage(e.to_string()))?;
    let transaction_type = TransactionType::parse(&kind)
        .ok_or_else(|| LedgerError::Storage(format!("unknown transaction type: {}", kind)))?;

    let reference = EntryReference::from_columns(
        row.try_get("activity_id")
            .map_err(|e| LedgerError::Storage(e.to_string()))?,
        row.try_get("completion_id")
            .map_err(|e| LedgerError::Storage(e.to_string()))?,
        row.try_get("reward_id")
            .map_err(|e| LedgerError::Storage(e.to_string()))?,
    );

    Ok(LedgerEntry {
        id: row
            .try_get("id")
            .map_err(|e| LedgerError::Storage(e.to_string()))?,
        profile_id: row
            .try_get("profile_id")
            .map_err(|e| LedgerError::Storage(e.to_string()))?,
        family_id: row
            .try_get("family_id")
            .map_err(|e| LedgerError::Storage(e.to_string()))?,
        reference,
        points_change: row
            .try_get("points_change")
            .map_err(|e| LedgerError::Storage(e.to_string()))?,
        balance_after: row
            .try_get("balance_after")
            .map_err(|e| LedgerError::Storage(e.to_string()))?,
        transaction_type,
        notes: row
            .try_get("notes")
            .map_err(|e| LedgerError::Storage(e.to_string()))?,
        idempotency_key: row
            .try_get("idempotency_key")
            .map_err(|e| LedgerError::Storage(e.to_string()))?,
        sequence: row
            .try_get("seq")
            .map_err(|e| LedgerError::Storage(e.to_string()))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| LedgerError::Storage(e.to_string()))?,
    })
}

#[async_trait::async_trait]
impl<T> LedgerAdapter for T
where
    T: PostgresLedgerAdapter + Send + Sync,
{
    async fn append_entry(&self, draft: EntryDraft) -> Result<LedgerEntry, LedgerError> {
        let mut tx = self
            .get_pool()
            .begin()
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        // Serializes appends per profile until COMMIT/ROLLBACK
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(draft.profile_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        if let Some(key) = &draft.idempotency_key {
            let existing: Option<Uuid> =
                sqlx::query_scalar("SELECT id FROM points_ledger WHERE idempotency_key = $1")
                    .bind(key)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| LedgerError::Storage(e.to_string()))?;
            if let Some(id) = existing {
                tx.rollback().await.ok();
                return Err(LedgerError::DuplicateIdempotencyKey(id));
            }
        }

        let previous: i64 = sqlx::query_scalar(
            r#"
            SELECT balance_after
            FROM points_ledger
            WHERE profile_id = $1
            ORDER BY created_at DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(draft.profile_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| LedgerError::Storage(e.to_string()))?
        .unwrap_or(0);

        // Checked INSIDE the lock
        let balance_after = match draft.check_floor(previous) {
            Ok(()) => draft.balance_after(previous)?,
            Err(err) => {
                tx.rollback().await.ok();
                return Err(err);
            }
        };

        let reference = draft.reference;
        let row = sqlx::query(
            r#"
            INSERT INTO points_ledger (
                id, profile_id, family_id, activity_id, completion_id, reward_id,
                points_change, balance_after, transaction_type, notes, idempotency_key, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, clock_timestamp())
            RETURNING seq, created_at
            "#,
        )
        .bind(draft.id)
        .bind(draft.profile_id)
        .bind(draft.family_id)
        .bind(reference.and_then(|r| r.activity_id()))
        .bind(reference.and_then(|r| r.completion_id()))
        .bind(reference.and_then(|r| r.reward_id()))
        .bind(draft.points_change)
        .bind(balance_after)
        .bind(draft.transaction_type.as_str())
        .bind(&draft.notes)
        .bind(&draft.idempotency_key)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| {
            if err.to_string().contains("unique") {
                LedgerError::Conflict(err.to_string())
            } else {
                LedgerError::Storage(err.to_string())
            }
        })?;

        let sequence: i64 = row
            .try_get("seq")
            .map_err(|e| LedgerError::Storage(e.to_string()))?;
        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        let mut entry = draft.into_entry(previous, sequence)?;
        entry.created_at = created_at;
        Ok(entry)
    }

    async fn latest_entry(
        &self,
        profile: Uuid,
        family: Option<Uuid>,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM points_ledger
            WHERE profile_id = $1 AND ($2::uuid IS NULL OR family_id = $2)
            ORDER BY created_at DESC, seq DESC
            LIMIT 1
            "#,
            ENTRY_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(profile)
            .bind(family)
            .fetch_optional(&self.get_pool())
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        row.map(map_row_to_entry).transpose()
    }

    async fn get_entry(&self, id: Uuid) -> Result<LedgerEntry, LedgerError> {
        let sql = format!("SELECT {} FROM points_ledger WHERE id = $1", ENTRY_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.get_pool())
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?
            .ok_or(LedgerError::EntryNotFound)?;

        map_row_to_entry(row)
    }

    async fn entries_for_profile(
        &self,
        profile: Uuid,
        limit: Option<u32>,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut sql = format!(
            r#"
            SELECT {}
            FROM points_ledger
            WHERE profile_id = $1
            ORDER BY created_at DESC, seq DESC
            "#,
            ENTRY_COLUMNS
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let rows = sqlx::query(&sql)
            .bind(profile)
            .fetch_all(&self.get_pool())
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        rows.into_iter().map(map_row_to_entry).collect()
    }

    async fn get_entry_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM points_ledger WHERE idempotency_key = $1",
            ENTRY_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.get_pool())
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        row.map(map_row_to_entry).transpose()
    }
}
