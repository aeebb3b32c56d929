//! Entity repository traits and the per-event unit of work.
//!
//! The store itself is an external collaborator: it only needs keyed
//! reads, one secondary lookup and an all-or-nothing `commit`. Handlers never
//! write to it directly; they stage writes in a [`UnitOfWork`] which the
//! processor commits once the handler has returned successfully.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::error::ProcessingError;

/// A persisted, keyed entity.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Table / collection name.
    const KIND: &'static str;

    /// Primary key.
    fn id(&self) -> String;
}

/// A single staged write.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Upsert { kind: String, id: String, body: Value },
    Remove { kind: String, id: String },
}

/// Storage backend for derived entities.
///
/// Implementations include [`MemoryStore`] and the SQLite store in
/// `stakeindex-storage`.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Load a single record.
    async fn get(&self, kind: &str, id: &str) -> Result<Option<Value>, ProcessingError>;

    /// All records of `kind` whose top-level `field` equals `value`, in a
    /// stable order (ascending id).
    async fn find_by(
        &self,
        kind: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Value>, ProcessingError>;

    /// Apply all changes atomically, in order.
    async fn commit(&self, changes: Vec<Change>) -> Result<(), ProcessingError>;
}

// ─── UnitOfWork ───────────────────────────────────────────────────────────────

/// Staged writes for one event, overlaid on the store's contents.
///
/// Reads see the unit's own pending writes first, so a handler observes
/// everything it has already saved or removed.
pub struct UnitOfWork<'a> {
    store: &'a dyn EntityStore,
    /// Latest staged state per `(kind, id)`; `None` = removed.
    pending: HashMap<(String, String), Option<Value>>,
    /// Writes in the order they were staged.
    log: Vec<Change>,
}

impl<'a> UnitOfWork<'a> {
    pub fn new(store: &'a dyn EntityStore) -> Self {
        Self {
            store,
            pending: HashMap::new(),
            log: Vec::new(),
        }
    }

    pub async fn get<T: Entity>(&self, id: &str) -> Result<Option<T>, ProcessingError> {
        let key = (T::KIND.to_string(), id.to_string());
        let raw = match self.pending.get(&key) {
            Some(staged) => staged.clone(),
            None => self.store.get(T::KIND, id).await?,
        };
        raw.map(serde_json::from_value::<T>)
            .transpose()
            .map_err(ProcessingError::from)
    }

    /// Stage an upsert of `entity`.
    pub fn save<T: Entity>(&mut self, entity: &T) -> Result<(), ProcessingError> {
        let id = entity.id();
        let body = serde_json::to_value(entity)?;
        self.pending
            .insert((T::KIND.to_string(), id.clone()), Some(body.clone()));
        self.log.push(Change::Upsert {
            kind: T::KIND.to_string(),
            id,
            body,
        });
        Ok(())
    }

    /// Stage removal of the record with `id` (a no-op if it does not exist).
    pub fn remove<T: Entity>(&mut self, id: &str) {
        self.pending
            .insert((T::KIND.to_string(), id.to_string()), None);
        self.log.push(Change::Remove {
            kind: T::KIND.to_string(),
            id: id.to_string(),
        });
    }

    /// Secondary-index lookup, merged with staged writes.
    pub async fn find_by<T: Entity>(
        &self,
        field: &str,
        value: &Value,
    ) -> Result<Vec<T>, ProcessingError> {
        let mut merged: BTreeMap<String, Value> = BTreeMap::new();
        for body in self.store.find_by(T::KIND, field, value).await? {
            let entity: T = serde_json::from_value(body.clone())?;
            merged.insert(entity.id(), body);
        }
        for ((kind, id), staged) in &self.pending {
            if kind != T::KIND {
                continue;
            }
            match staged {
                Some(body) if body.get(field) == Some(value) => {
                    merged.insert(id.clone(), body.clone());
                }
                _ => {
                    merged.remove(id);
                }
            }
        }
        merged
            .into_values()
            .map(|body| serde_json::from_value::<T>(body).map_err(ProcessingError::from))
            .collect()
    }

    /// Number of staged writes.
    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Consume the unit, returning its writes in staging order.
    pub fn into_changes(self) -> Vec<Change> {
        self.log
    }
}

// ─── In-memory store ──────────────────────────────────────────────────────────

/// In-memory entity store for tests and ephemeral replays.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<(String, String), Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records of `kind`.
    pub fn count(&self, kind: &str) -> usize {
        self.lock().keys().filter(|(k, _)| k == kind).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<(String, String), Value>> {
        // Nothing inside a commit can panic midway, so a poisoned lock still
        // holds whole commits only.
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get(&self, kind: &str, id: &str) -> Result<Option<Value>, ProcessingError> {
        Ok(self.lock().get(&(kind.to_string(), id.to_string())).cloned())
    }

    async fn find_by(
        &self,
        kind: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Value>, ProcessingError> {
        Ok(self
            .lock()
            .iter()
            .filter(|((k, _), body)| k == kind && body.get(field) == Some(value))
            .map(|(_, body)| body.clone())
            .collect())
    }

    async fn commit(&self, changes: Vec<Change>) -> Result<(), ProcessingError> {
        let mut data = self.lock();
        for change in changes {
            match change {
                Change::Upsert { kind, id, body } => {
                    data.insert((kind, id), body);
                }
                Change::Remove { kind, id } => {
                    data.remove(&(kind, id));
                }
            }
        }
        Ok(())
    }
}
