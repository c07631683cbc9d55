//! Contracts for the stores the exchange consumes but does not own.
//!
//! # Dyn Compatibility
//!
//! Both traits return `Pin<Box<dyn Future>>` instead of using `async fn` so
//! they can be shared as `Arc<dyn ToolStateStore>` / `Arc<dyn FileStore>`
//! inside effects.

use crate::error::StateStoreError;
use crate::payload::StoredFile;
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;

/// A tool's persisted state: a JSON object of fields.
pub type ToolState = Map<String, Value>;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StateStoreError>> + Send + 'a>>;

/// Per-tool key-value state, keyed by route (the tool's directive).
///
/// Writes are two-step: [`stage`](Self::stage) merges in memory without I/O,
/// [`flush`](Self::flush) persists what was staged. A source tool calls
/// [`save_now`](Self::save_now) (or `flush`) before announcing, so the
/// resolver reads fresh data.
///
/// Only the owning tool writes its route; the resolver only reads.
pub trait ToolStateStore: Send + Sync {
    /// Current state for `route`, or an empty object when nothing is stored
    fn get<'a>(&'a self, route: &'a str) -> StoreFuture<'a, ToolState>;

    /// Shallow-merge `partial` into the in-memory state for `route`
    fn stage(&self, route: &str, partial: ToolState);

    /// Persist whatever is staged for `route`
    fn flush<'a>(&'a self, route: &'a str) -> StoreFuture<'a, ()>;

    /// Replace the state for `route` and persist it immediately
    fn save_now<'a>(&'a self, route: &'a str, state: ToolState) -> StoreFuture<'a, ()>;
}

/// Shared blob store holding files produced by tools.
pub trait FileStore: Send + Sync {
    /// Look up a file by id; `Ok(None)` when it was deleted or expired
    fn get<'a>(&'a self, id: &'a str) -> StoreFuture<'a, Option<StoredFile>>;
}

/// Shallow-merge `partial` into `state`, field by field.
pub fn merge_state(state: &mut ToolState, partial: ToolState) {
    for (key, value) in partial {
        state.insert(key, value);
    }
}
