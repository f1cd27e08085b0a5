// ledger/src/adapters/memory.rs
use crate::{EntryDraft, LedgerAdapter, LedgerEntry, LedgerError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct LedgerTables {
    /// `sequence` is the append order; wall-clock `created_at` is not trusted
    /// for ordering in memory.
    entries: Vec<LedgerEntry>,
    keys: HashMap<String, Uuid>,
    next_sequence: i64,
}

impl LedgerTables {
    fn latest_for(&self, profile: Uuid, family: Option<Uuid>) -> Option<&LedgerEntry> {
        self.entries
            .iter()
            .filter(|e| e.profile_id == profile && family.is_none_or(|f| e.family_id == f))
            .max_by_key(|e| e.sequence)
    }
}

#[derive(Clone, Default)]
struct MemoryStore {
    tables: Arc<Mutex<LedgerTables>>,
}

impl MemoryStore {
    fn lock(&self) -> Result<MutexGuard<'_, LedgerTables>, LedgerError> {
        self.tables
            .lock()
            .map_err(|_| LedgerError::Storage("memory ledger lock poisoned".to_string()))
    }
}

/// In-process ledger. One lock covers the whole append, so appends for
/// the same profile never interleave.
#[derive(Clone, Default)]
pub struct MemoryAdapter {
    store: MemoryStore,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerAdapter for MemoryAdapter {
    async fn append_entry(&self, draft: EntryDraft) -> Result<LedgerEntry, LedgerError> {
        let mut tables = self.store.lock()?;

        if let Some(key) = &draft.idempotency_key {
            if let Some(existing) = tables.keys.get(key) {
                return Err(LedgerError::DuplicateIdempotencyKey(*existing));
            }
        }

        let previous = tables
            .latest_for(draft.profile_id, None)
            .map(|e| e.balance_after)
            .unwrap_or(0);
        draft.check_floor(previous)?;

        let entry = draft.into_entry(previous, tables.next_sequence + 1)?;
        tables.next_sequence = entry.sequence;

        if let Some(key) = &entry.idempotency_key {
            tables.keys.insert(key.clone(), entry.id);
        }
        tables.entries.push(entry.clone());

        Ok(entry)
    }

    async fn latest_entry(
        &self,
        profile: Uuid,
        family: Option<Uuid>,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        let tables = self.store.lock()?;
        Ok(tables.latest_for(profile, family).cloned())
    }

    async fn get_entry(&self, id: Uuid) -> Result<LedgerEntry, LedgerError> {
        let tables = self.store.lock()?;
        tables
            .entries
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or(LedgerError::EntryNotFound)
    }

    async fn entries_for_profile(
        &self,
        profile: Uuid,
        limit: Option<u32>,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let tables = self.store.lock()?;
        let mut entries: Vec<LedgerEntry> = tables
            .entries
            .iter()
            .filter(|e| e.profile_id == profile)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        if let Some(limit) = limit {
            entries.truncate(limit as usize);
        }
        Ok(entries)
    }

    async fn get_entry_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        let tables = self.store.lock()?;
        let Some(id) = tables.keys.get(key) else {
            return Ok(None);
        };
        Ok(tables.entries.iter().find(|e| e.id == *id).cloned())
    }
}
