//! In-memory implementations of the store contracts.
//!
//! Used by tests and demos, and by hosts that keep tool state in process:
//! - [`InMemoryToolStateStore`]: staged and persisted maps per route
//! - [`InMemoryFileStore`]: `HashMap`-based blob store

use crate::error::StateStoreError;
use crate::payload::StoredFile;
use crate::state_store::{FileStore, StoreFuture, ToolState, ToolStateStore, merge_state};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Default)]
struct StateInner {
    current: HashMap<String, ToolState>,
    persisted: HashMap<String, ToolState>,
    dirty: HashSet<String>,
    writes: HashMap<String, usize>,
    failing: HashSet<String>,
}

/// In-memory tool state store.
///
/// Keeps the staged (current) state apart from the persisted state so tests
/// can check what actually reached "disk".
///
/// # Example
///
/// ```
/// use tool_exchange::memory::InMemoryToolStateStore;
/// use tool_exchange::state_store::{ToolState, ToolStateStore};
/// use serde_json::json;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryToolStateStore::new();
/// let mut partial = ToolState::new();
/// partial.insert("outputValue".into(), json!("HELLO"));
///
/// store.stage("case-converter-tool", partial);
/// assert!(store.persisted("case-converter-tool").is_none());
///
/// store.flush("case-converter-tool").await?;
/// assert_eq!(store.persisted("case-converter-tool").unwrap()["outputValue"], "HELLO");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryToolStateStore {
    inner: Arc<RwLock<StateInner>>,
}

impl InMemoryToolStateStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Persisted state for `route`, if anything was ever flushed
    #[must_use]
    pub fn persisted(&self, route: &str) -> Option<ToolState> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .persisted
            .get(route)
            .cloned()
    }

    /// Number of persisting writes (`flush` with staged changes, `save_now`) for `route`
    #[must_use]
    pub fn write_count(&self, route: &str) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .writes
            .get(route)
            .copied()
            .unwrap_or(0)
    }

    /// Make every read and write of `route` fail
    pub fn fail_route(&self, route: &str) {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .failing
            .insert(route.to_string());
    }

    fn check(inner: &StateInner, route: &str, write: bool) -> Result<(), StateStoreError> {
        if !inner.failing.contains(route) {
            return Ok(());
        }
        let route = route.to_string();
        let reason = "storage unavailable".to_string();
        Err(if write {
            StateStoreError::Write { route, reason }
        } else {
            StateStoreError::Read { route, reason }
        })
    }
}

impl ToolStateStore for InMemoryToolStateStore {
    fn get<'a>(&'a self, route: &'a str) -> StoreFuture<'a, ToolState> {
        Box::pin(async move {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            Self::check(&inner, route, false)?;
            Ok(inner
                .current
                .get(route)
                .or_else(|| inner.persisted.get(route))
                .cloned()
                .unwrap_or_default())
        })
    }

    fn stage(&self, route: &str, partial: ToolState) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let base = inner.persisted.get(route).cloned().unwrap_or_default();
        let current = inner.current.entry(route.to_string()).or_insert(base);
        merge_state(current, partial);
        inner.dirty.insert(route.to_string());
    }

    fn flush<'a>(&'a self, route: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            Self::check(&inner, route, true)?;
            if !inner.dirty.remove(route) {
                return Ok(());
            }
            let state = inner.current.get(route).cloned().unwrap_or_default();
            inner.persisted.insert(route.to_string(), state);
            *inner.writes.entry(route.to_string()).or_default() += 1;
            Ok(())
        })
    }

    fn save_now<'a>(&'a self, route: &'a str, state: ToolState) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            Self::check(&inner, route, true)?;
            inner.dirty.remove(route);
            inner.current.insert(route.to_string(), state.clone());
            inner.persisted.insert(route.to_string(), state);
            *inner.writes.entry(route.to_string()).or_default() += 1;
            Ok(())
        })
    }
}

impl std::fmt::Debug for InMemoryToolStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("InMemoryToolStateStore")
            .field("routes", &inner.current.len().max(inner.persisted.len()))
            .field("dirty", &inner.dirty.len())
            .finish()
    }
}

/// In-memory blob store.
#[derive(Clone, Debug, Default)]
pub struct InMemoryFileStore {
    files: Arc<RwLock<HashMap<String, StoredFile>>>,
}

impl InMemoryFileStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file
    pub fn insert(&self, file: StoredFile) {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(file.id.clone(), file);
    }

    /// Delete a file, as expiry or a user action would
    pub fn remove(&self, id: &str) -> Option<StoredFile> {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Number of stored files
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FileStore for InMemoryFileStore {
    fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<StoredFile>> {
        Box::pin(async move {
            Ok(self
                .files
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(id)
                .cloned())
        })
    }
}
