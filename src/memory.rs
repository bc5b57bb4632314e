//! In-process key/collection memory, snapshotted through the storage
//! adapter.
//!
//! Collections `users` and `rooms` are reserved for identity tracking;
//! `private` is the default collection for everything else.

use crate::adapter::StorageAdapter;
use crate::error::{MemoryError, Result};
use crate::message::{Room, User};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const USERS: &str = "users";
pub const ROOMS: &str = "rooms";
pub const PRIVATE: &str = "private";

type Collections = HashMap<String, HashMap<String, serde_json::Value>>;

/// The process-lifetime memory store.
pub struct Memory {
    collections: Mutex<Collections>,
    save_interval_ms: Mutex<Option<u64>>,
    save_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

fn reserved_collections() -> Collections {
    HashMap::from([
        (USERS.to_string(), HashMap::new()),
        (ROOMS.to_string(), HashMap::new()),
        (PRIVATE.to_string(), HashMap::new()),
    ])
}

impl Memory {
    pub fn new() -> Self {
        Self {
            collections: Mutex::new(reserved_collections()),
            save_interval_ms: Mutex::new(None),
            save_task: Mutex::new(None),
        }
    }

    /// Store a value in the default collection.
    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.set_in(PRIVATE, key, value);
    }

    /// Store a value in a named collection, creating the collection on
    /// first use. The stored value is owned outright, so later mutation of
    /// the caller's data cannot alias it.
    pub fn set_in(&self, collection: &str, key: impl Into<String>, value: serde_json::Value) {
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.get_from(PRIVATE, key)
    }

    pub fn get_from(&self, collection: &str, key: &str) -> Option<serde_json::Value> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .and_then(|entries| entries.get(key))
            .cloned()
    }

    pub fn unset(&self, key: &str) {
        self.unset_from(PRIVATE, key);
    }

    pub fn unset_from(&self, collection: &str, key: &str) {
        if let Some(entries) = self.collections.lock().unwrap().get_mut(collection) {
            entries.remove(key);
        }
    }

    /// Wipe this instance back to the reserved collections.
    pub fn clear(&self) {
        *self.collections.lock().unwrap() = reserved_collections();
    }

    /// The full memory as a serialisable object.
    pub fn to_object(&self) -> serde_json::Value {
        let collections = self.collections.lock().unwrap();
        serde_json::to_value(&*collections).unwrap_or_else(|_| serde_json::json!({}))
    }

    /// Merge a loaded snapshot into current memory, collection by
    /// collection; loaded entries overwrite current ones with the same key.
    fn merge_object(&self, snapshot: serde_json::Value) {
        let Ok(loaded) = serde_json::from_value::<Collections>(snapshot) else {
            tracing::warn!("ignoring malformed memory snapshot");
            return;
        };
        let mut collections = self.collections.lock().unwrap();
        for (name, entries) in loaded {
            collections.entry(name).or_default().extend(entries);
        }
    }

    /// Upsert a user into the reserved `users` collection.
    pub fn remember_user(&self, user: &User) {
        if let Ok(value) = serde_json::to_value(user) {
            self.set_in(USERS, user.id.clone(), value);
        }
    }

    /// Upsert a room into the reserved `rooms` collection.
    pub fn remember_room(&self, room: &Room) {
        if let Ok(value) = serde_json::to_value(room) {
            self.set_in(ROOMS, room.id.clone(), value);
        }
    }

    pub fn users(&self) -> HashMap<String, serde_json::Value> {
        self.collections
            .lock()
            .unwrap()
            .get(USERS)
            .cloned()
            .unwrap_or_default()
    }

    pub fn rooms(&self) -> HashMap<String, serde_json::Value> {
        self.collections
            .lock()
            .unwrap()
            .get(ROOMS)
            .cloned()
            .unwrap_or_default()
    }

    /// Serialise the whole memory through the storage adapter. Cancels any
    /// pending autosave tick before writing and re-arms it after, so writes
    /// never overlap.
    pub async fn save(self: &Arc<Self>, storage: &Arc<dyn StorageAdapter>) -> Result<()> {
        self.stop_save_task();
        let snapshot = self.to_object();
        storage
            .save_memory(snapshot)
            .await
            .map_err(|e| MemoryError::SaveFailed(e.to_string()))?;
        let interval = *self.save_interval_ms.lock().unwrap();
        if let Some(ms) = interval {
            self.arm(storage.clone(), ms);
        }
        tracing::debug!("memory saved");
        Ok(())
    }

    /// Load the last snapshot and merge it in. Called once during startup.
    pub async fn load(&self, storage: &Arc<dyn StorageAdapter>) -> Result<()> {
        let snapshot = storage
            .load_memory()
            .await
            .map_err(|e| MemoryError::LoadFailed(e.to_string()))?;
        self.merge_object(snapshot);
        tracing::debug!("memory loaded");
        Ok(())
    }

    /// Start periodic snapshotting every `ms` milliseconds.
    pub fn set_save_interval(self: &Arc<Self>, storage: Arc<dyn StorageAdapter>, ms: u64) {
        *self.save_interval_ms.lock().unwrap() = Some(ms);
        self.stop_save_task();
        self.arm(storage, ms);
    }

    /// Stop periodic snapshotting.
    pub fn cancel_save_interval(&self) {
        *self.save_interval_ms.lock().unwrap() = None;
        self.stop_save_task();
    }

    fn stop_save_task(&self) {
        if let Some(task) = self.save_task.lock().unwrap().take() {
            task.abort();
        }
    }

    fn arm(self: &Arc<Self>, storage: Arc<dyn StorageAdapter>, ms: u64) {
        let memory = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let period = Duration::from_millis(ms.max(1));
            let mut interval = tokio::time::interval(period);
            // The first tick resolves immediately; skip it so saves start
            // one full period from now.
            interval.tick().await;
            loop {
                interval.tick().await;
                let snapshot = memory.to_object();
                if let Err(error) = storage.save_memory(snapshot).await {
                    tracing::error!(%error, "periodic memory save failed");
                }
            }
        });
        *self.save_task.lock().unwrap() = Some(handle);
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}
