// SPDX-License-Identifier: MIT OR Apache-2.0

//! Full-store snapshots.
//!
//! ## Overview
//!
//! A [`StoreSnapshot`] is a bincode-serialized copy of every entity the
//! engine persists. [`SnapshotStore`] abstracts where the bytes go; the
//! in-memory store backs tests, [`FileSnapshotStore`] writes one
//! `<revision>.snapshot` file per call. [`SnapshotService`] ties a store to a
//! [`PersistenceHandle`] and restores the newest revision on demand.
//!
//! Revisions are sortable UTC timestamps, so "latest" is the lexicographic
//! maximum and needs no extra index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::core::entity::{
    Campaign, ConfirmedRegistration, Event, PriorityList, Procedure, User,
};
use crate::core::error::{EngineError, EngineResult};
use crate::core::persistence::PersistenceHandle;
use crate::core::rule::RegistrationRuleSet;

const SNAPSHOT_SUFFIX: &str = ".snapshot";
const REVISION_FORMAT: &str = "%Y%m%dT%H%M%S%3f";

/// Serialized image of the whole store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub taken_at: DateTime<Utc>,
    pub users: Vec<User>,
    pub campaigns: Vec<Campaign>,
    pub events: Vec<Event>,
    pub procedures: Vec<Procedure>,
    pub priority_lists: Vec<PriorityList>,
    pub registrations: Vec<ConfirmedRegistration>,
    pub rule_sets: Vec<RegistrationRuleSet>,
}

impl StoreSnapshot {
    /// Capture the current contents of `store`.
    pub fn capture(store: &PersistenceHandle) -> EngineResult<Self> {
        Ok(Self {
            taken_at: Utc::now(),
            users: store.users.all()?,
            campaigns: store.campaigns.all()?,
            events: store.events.all()?,
            procedures: store.procedures.all()?,
            priority_lists: store.priority_lists.all()?,
            registrations: store.registrations.all()?,
            rule_sets: store.rule_sets.all()?,
        })
    }

    /// Write every entity back into `store`, ids preserved.
    pub fn apply(&self, store: &PersistenceHandle) -> EngineResult<()> {
        for user in &self.users {
            store.users.save(user.clone())?;
        }
        for campaign in &self.campaigns {
            store.campaigns.save(campaign.clone())?;
        }
        for event in &self.events {
            store.events.save(event.clone())?;
        }
        for procedure in &self.procedures {
            store.procedures.save(procedure.clone())?;
        }
        for list in &self.priority_lists {
            store.priority_lists.restore(list.clone())?;
        }
        for registration in &self.registrations {
            store.registrations.restore(registration.clone())?;
        }
        for rule_set in &self.rule_sets {
            store.rule_sets.save(rule_set.clone())?;
        }
        Ok(())
    }
}

/// Backend holding snapshot bytes keyed by revision.
pub trait SnapshotStore: fmt::Debug + Send + Sync {
    fn save(&self, revision: &str, bytes: &[u8]) -> EngineResult<()>;
    fn load(&self, revision: &str) -> EngineResult<Option<Vec<u8>>>;
    /// Newest revision, by lexicographic order.
    fn last_revision(&self) -> EngineResult<Option<String>>;
    fn revisions(&self) -> EngineResult<Vec<String>>;
}

/// Keeps snapshots in process memory.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    slots: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn save(&self, revision: &str, bytes: &[u8]) -> EngineResult<()> {
        self.slots
            .lock()
            .unwrap()
            .insert(revision.to_string(), bytes.to_vec());
        Ok(())
    }

    fn load(&self, revision: &str) -> EngineResult<Option<Vec<u8>>> {
        Ok(self.slots.lock().unwrap().get(revision).cloned())
    }

    fn last_revision(&self) -> EngineResult<Option<String>> {
        Ok(self.slots.lock().unwrap().keys().next_back().cloned())
    }

    fn revisions(&self) -> EngineResult<Vec<String>> {
        Ok(self.slots.lock().unwrap().keys().cloned().collect())
    }
}

/// Writes each snapshot to `<dir>/<revision>.snapshot`.
#[derive(Debug)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> EngineResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, revision: &str) -> PathBuf {
        self.dir.join(format!("{revision}{SNAPSHOT_SUFFIX}"))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn save(&self, revision: &str, bytes: &[u8]) -> EngineResult<()> {
        std::fs::write(self.path_for(revision), bytes)?;
        Ok(())
    }

    fn load(&self, revision: &str) -> EngineResult<Option<Vec<u8>>> {
        match std::fs::read(self.path_for(revision)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn last_revision(&self) -> EngineResult<Option<String>> {
        Ok(self.revisions()?.into_iter().next_back())
    }

    fn revisions(&self) -> EngineResult<Vec<String>> {
        let mut revisions = Vec::new();
        for dir_entry in std::fs::read_dir(&self.dir)? {
            let name = dir_entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(revision) = name.strip_suffix(SNAPSHOT_SUFFIX) {
                revisions.push(revision.to_string());
            }
        }
        revisions.sort_unstable();
        Ok(revisions)
    }
}

/// Persists and restores store snapshots through a [`SnapshotStore`].
#[derive(Debug)]
pub struct SnapshotService {
    store: PersistenceHandle,
    snapshots: Arc<dyn SnapshotStore>,
}

impl SnapshotService {
    pub fn new(store: PersistenceHandle, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self { store, snapshots }
    }

    /// Capture the store and persist it under a fresh revision, which is
    /// returned.
    pub fn persist(&self) -> EngineResult<String> {
        let snapshot = StoreSnapshot::capture(&self.store)?;
        let revision = snapshot.taken_at.format(REVISION_FORMAT).to_string();
        let bytes = bincode::serialize(&snapshot)
            .map_err(|e| EngineError::persistence_with("snapshot encoding failed", e))?;
        self.snapshots.save(&revision, &bytes)?;
        log::info!(
            "persisted snapshot revision {revision} ({} bytes)",
            bytes.len()
        );
        Ok(revision)
    }

    /// Restore the newest revision. Returns `false` when none exists.
    pub fn restore_last(&self) -> EngineResult<bool> {
        match self.snapshots.last_revision()? {
            Some(revision) => {
                self.restore_revision(&revision)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Restore one specific revision.
    pub fn restore_revision(&self, revision: &str) -> EngineResult<()> {
        let bytes = self.snapshots.load(revision)?.ok_or_else(|| {
            EngineError::persistence(format!("snapshot revision {revision} not found"))
        })?;
        let snapshot: StoreSnapshot = bincode::deserialize(&bytes)
            .map_err(|e| EngineError::persistence_with("snapshot decoding failed", e))?;
        snapshot.apply(&self.store)?;
        log::info!("restored snapshot revision {revision}");
        Ok(())
    }

    pub fn revisions(&self) -> EngineResult<Vec<String>> {
        self.snapshots.revisions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::{EventId, StudyCourseId, TenantId, UserId};

    fn seeded_store() -> PersistenceHandle {
        let store = PersistenceHandle::in_memory();
        store
            .users
            .save(User::new(
                UserId::new(1),
                TenantId::new(1),
                "ada",
                4,
                StudyCourseId::new(10),
            ))
            .unwrap();
        store
            .events
            .save(Event::new(EventId::new(7), TenantId::new(1), "algorithms", 30))
            .unwrap();
        store
    }

    #[test]
    fn capture_and_apply_round_trip() {
        let store = seeded_store();
        let snapshot = StoreSnapshot::capture(&store).unwrap();
        assert_eq!(snapshot.users.len(), 1);
        assert_eq!(snapshot.events.len(), 1);

        let fresh = PersistenceHandle::in_memory();
        snapshot.apply(&fresh).unwrap();
        assert!(fresh.users.find(UserId::new(1)).unwrap().is_some());
        assert_eq!(
            fresh.events.find(EventId::new(7)).unwrap().unwrap().title,
            "algorithms"
        );
    }

    #[test]
    fn service_persists_and_restores_latest() {
        let backend: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new());
        let service = SnapshotService::new(seeded_store(), Arc::clone(&backend));
        let revision = service.persist().unwrap();
        assert_eq!(service.revisions().unwrap(), vec![revision]);

        let fresh = PersistenceHandle::in_memory();
        let restoring = SnapshotService::new(fresh.clone(), backend);
        assert!(restoring.restore_last().unwrap());
        assert!(fresh.users.find(UserId::new(1)).unwrap().is_some());
        assert!(fresh.events.find(EventId::new(7)).unwrap().is_some());
    }

    #[test]
    fn restore_last_on_empty_backend_reports_nothing_restored() {
        let store = PersistenceHandle::in_memory();
        let service = SnapshotService::new(store, Arc::new(InMemorySnapshotStore::new()));
        assert!(!service.restore_last().unwrap());
    }

    #[test]
    fn restore_last_picks_newest_revision() {
        let snapshots = InMemorySnapshotStore::new();
        snapshots.save("20250101T000000000", b"old").unwrap();
        snapshots.save("20250201T000000000", b"new").unwrap();
        assert_eq!(
            snapshots.last_revision().unwrap().as_deref(),
            Some("20250201T000000000")
        );
    }

    #[test]
    fn missing_revision_is_an_error() {
        let store = PersistenceHandle::in_memory();
        let service = SnapshotService::new(store, Arc::new(InMemorySnapshotStore::new()));
        assert!(service.restore_revision("nope").is_err());
    }
}
