//! StateStore — redb-backed state persistence for simulated compute.
//!
//! Provides typed CRUD operations over instances and launch templates.
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.open_table(LAUNCH_TEMPLATES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Insert or update a batch of instance records in one transaction.
    pub fn put_instances(&self, records: &[InstanceRecord]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            for record in records {
                let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
                table
                    .insert(record.table_key(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count = records.len(), "instances stored");
        Ok(())
    }

    /// Get an instance by id.
    pub fn get_instance(&self, id: &str) -> StateResult<Option<InstanceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: InstanceRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all instances in launch order.
    pub fn list_instances(&self) -> StateResult<Vec<InstanceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: InstanceRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        results.sort_by_key(|r| r.launch_index);
        Ok(results)
    }

    /// Highest launch index handed out so far, if any instance exists.
    pub fn max_launch_index(&self) -> StateResult<Option<u64>> {
        Ok(self.list_instances()?.last().map(|r| r.launch_index))
    }

    /// Mark the given instances terminated in a single transaction.
    ///
    /// Returns the records that were running and are now terminated.
    /// Unknown ids and instances that were already terminated are skipped.
    pub fn terminate_instances(
        &self,
        ids: &[String],
        terminated_at: u64,
    ) -> StateResult<Vec<InstanceRecord>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut terminated = Vec::new();
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            for id in ids {
                let existing: Option<InstanceRecord> = match table.get(id.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => Some(
                        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?,
                    ),
                    None => None,
                };
                let Some(mut record) = existing else {
                    debug!(instance_id = %id, "terminate skipped, unknown instance");
                    continue;
                };
                if !record.is_running() {
                    continue;
                }
                record.status = InstanceStatus::Terminated;
                record.terminated_at = Some(terminated_at);
                let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
                table
                    .insert(id.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                terminated.push(record);
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count = terminated.len(), "instances terminated");
        Ok(terminated)
    }

    // ── Launch templates ───────────────────────────────────────────

    /// Insert a new launch template, rejecting duplicate names.
    pub fn insert_launch_template(&self, template: &LaunchTemplate) -> StateResult<()> {
        let value = serde_json::to_vec(template).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(LAUNCH_TEMPLATES).map_err(map_err!(Table))?;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, existing) = entry.map_err(map_err!(Read))?;
                let existing: LaunchTemplate =
                    serde_json::from_slice(existing.value()).map_err(map_err!(Deserialize))?;
                if existing.name == template.name {
                    return Err(StateError::AlreadyExists(template.name.clone()));
                }
            }
            table
                .insert(template.table_key(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %template.id, name = %template.name, "launch template stored");
        Ok(())
    }

    /// Overwrite an existing launch template (e.g. after adding a version).
    pub fn put_launch_template(&self, template: &LaunchTemplate) -> StateResult<()> {
        let value = serde_json::to_vec(template).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(LAUNCH_TEMPLATES).map_err(map_err!(Table))?;
            table
                .insert(template.table_key(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a launch template by id.
    pub fn get_launch_template(&self, id: &str) -> StateResult<Option<LaunchTemplate>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LAUNCH_TEMPLATES).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let template: LaunchTemplate =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(template))
            }
            None => Ok(None),
        }
    }

    /// Find a launch template by its unique name.
    pub fn find_launch_template_by_name(&self, name: &str) -> StateResult<Option<LaunchTemplate>> {
        Ok(self
            .list_launch_templates()?
            .into_iter()
            .find(|t| t.name == name))
    }

    /// List all launch templates in creation order.
    pub fn list_launch_templates(&self) -> StateResult<Vec<LaunchTemplate>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LAUNCH_TEMPLATES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let template: LaunchTemplate =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(template);
        }
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(results)
    }
}
