//! Cache contract the session engine depends on.
//!
//! Concrete backends (redis and friends) live outside this crate; the
//! engine only needs the capability surface below. "Entry absent" is
//! always expressed as `Ok(None)` or `Ok(false)`, never as an error, so
//! callers can distinguish a miss from a backend failure.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use ussdflow_core::{Result, UssdError};

/// Minimum cache capability required by the session engine.
///
/// All operations may block on a backend round trip and are expected to
/// honor the caller's cancellation (dropping the future aborts the call).
#[async_trait]
pub trait Cache: Send + Sync {
    /// Set a scalar key. `ttl` of `None` means no expiration.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Get a scalar key. `Ok(None)` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remove a scalar key.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Set multiple map fields under one key in a single write.
    async fn set_map(&self, key: &str, fields: HashMap<String, String>) -> Result<()>;

    /// Get all fields of a map. `Ok(None)` when the map is absent.
    async fn get_map(&self, key: &str) -> Result<Option<HashMap<String, String>>>;

    /// Remove a map key and all its fields.
    async fn delete_map(&self, key: &str) -> Result<()>;

    /// Set a single map field.
    async fn set_map_field(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Get a single map field. `Ok(None)` when the map or field is absent.
    async fn get_map_field(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Remove the named fields from a map.
    async fn delete_map_fields(&self, key: &str, fields: &[&str]) -> Result<()>;

    /// Atomically add a member to a set. Returns `true` when the member
    /// was newly inserted, `false` when it was already present.
    async fn add_set_member(&self, key: &str, member: &str) -> Result<bool>;

    /// Check set membership.
    async fn set_contains(&self, key: &str, member: &str) -> Result<bool>;

    /// Remove a set member.
    async fn remove_set_member(&self, key: &str, member: &str) -> Result<()>;

    /// Apply a TTL to an existing key of any kind.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
}

/// In-process reference implementation of [`Cache`].
///
/// Backed by hash maps behind a mutex, with deadline-based expiry checked
/// on access. Suitable for tests and single-process demos; production
/// deployments supply a shared backend.
#[derive(Default)]
pub struct MemoryCache {
    inner: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    scalars: HashMap<String, String>,
    maps: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, HashSet<String>>,
    deadlines: HashMap<String, Instant>,
}

impl MemoryState {
    /// Drop every structure stored under `key` if its deadline has passed.
    fn purge_expired(&mut self, key: &str) {
        if let Some(deadline) = self.deadlines.get(key) {
            if Instant::now() >= *deadline {
                self.deadlines.remove(key);
                self.scalars.remove(key);
                self.maps.remove(key);
                self.sets.remove(key);
            }
        }
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.inner
            .lock()
            .map_err(|_| UssdError::Cache("memory cache lock poisoned".to_string()))
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut state = self.lock()?;
        state.scalars.insert(key.to_string(), value.to_string());
        match ttl {
            Some(dur) => {
                state.deadlines.insert(key.to_string(), Instant::now() + dur);
            }
            None => {
                state.deadlines.remove(key);
            }
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.lock()?;
        state.purge_expired(key);
        Ok(state.scalars.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.scalars.remove(key);
        Ok(())
    }

    async fn set_map(&self, key: &str, fields: HashMap<String, String>) -> Result<()> {
        let mut state = self.lock()?;
        state.purge_expired(key);
        state.maps.entry(key.to_string()).or_default().extend(fields);
        Ok(())
    }

    async fn get_map(&self, key: &str) -> Result<Option<HashMap<String, String>>> {
        let mut state = self.lock()?;
        state.purge_expired(key);
        Ok(state.maps.get(key).cloned())
    }

    async fn delete_map(&self, key: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.maps.remove(key);
        Ok(())
    }

    async fn set_map_field(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.purge_expired(key);
        state
            .maps
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn get_map_field(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut state = self.lock()?;
        state.purge_expired(key);
        Ok(state.maps.get(key).and_then(|m| m.get(field)).cloned())
    }

    async fn delete_map_fields(&self, key: &str, fields: &[&str]) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(map) = state.maps.get_mut(key) {
            for field in fields {
                map.remove(*field);
            }
        }
        Ok(())
    }

    async fn add_set_member(&self, key: &str, member: &str) -> Result<bool> {
        let mut state = self.lock()?;
        state.purge_expired(key);
        Ok(state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool> {
        let mut state = self.lock()?;
        state.purge_expired(key);
        Ok(state.sets.get(key).is_some_and(|s| s.contains(member)))
    }

    async fn remove_set_member(&self, key: &str, member: &str) -> Result<()> {
        let mut state = self.lock()?;
        if let Some(set) = state.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut state = self.lock()?;
        state.deadlines.insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }
}
