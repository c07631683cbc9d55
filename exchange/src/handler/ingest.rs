//! Ingestion: how a target tool merges an accepted payload into its own state.

use crate::directive::Directive;
use crate::error::StateStoreError;
use crate::payload::ResolvedPayload;
use crate::signal::Signal;
use crate::state_store::{ToolState, ToolStateStore};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Boxed future returned by [`SignalIngestor::ingest`].
pub type IngestFuture<'a> = Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send + 'a>>;

/// Failure raised by a target tool's merge logic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    /// The target cannot take this kind of payload
    #[error("unsupported payload: {0}")]
    Unsupported(String),

    /// Writing the target's state failed
    #[error(transparent)]
    Store(#[from] StateStoreError),

    /// The target rejected the data
    #[error("{0}")]
    Rejected(String),
}

/// The target tool's ingestion callback.
///
/// Only called with `Text` or `FileReference` payloads. The implementation
/// writes the target's own state and nothing else.
pub trait SignalIngestor: Send + Sync {
    /// Merge `payload`, resolved from `signal`, into the target's state
    fn ingest<'a>(&'a self, signal: &'a Signal, payload: &'a ResolvedPayload) -> IngestFuture<'a>;
}

/// Adapter returned by [`ingest_fn`].
pub struct FnIngestor<F> {
    f: F,
}

impl<F, Fut> SignalIngestor for FnIngestor<F>
where
    F: Fn(Signal, ResolvedPayload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), IngestError>> + Send + 'static,
{
    fn ingest<'a>(&'a self, signal: &'a Signal, payload: &'a ResolvedPayload) -> IngestFuture<'a> {
        Box::pin((self.f)(signal.clone(), payload.clone()))
    }
}

impl<F> std::fmt::Debug for FnIngestor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnIngestor").finish_non_exhaustive()
    }
}

/// Wrap an async closure as a [`SignalIngestor`]
///
/// ```
/// use tool_exchange::handler::{IngestError, ingest_fn};
///
/// let ingestor = ingest_fn(|signal, payload| async move {
///     println!("{} sent {}", signal.source, payload.kind_label());
///     Ok::<(), IngestError>(())
/// });
/// # let _ = ingestor;
/// ```
pub const fn ingest_fn<F, Fut>(f: F) -> FnIngestor<F>
where
    F: Fn(Signal, ResolvedPayload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), IngestError>> + Send + 'static,
{
    FnIngestor { f }
}

/// Ingestor that stages the payload into fields of the target's state, then flushes.
///
/// Text goes to `text_field` (items joined by newlines). File references go
/// to `file_field` as a single id, or an array of ids when there are several.
#[derive(Clone)]
pub struct StateMergeIngestor {
    route: Directive,
    states: Arc<dyn ToolStateStore>,
    text_field: String,
    file_field: String,
}

impl StateMergeIngestor {
    /// Merge into `route`'s state using the `inputValue` and `inputFileId` fields
    #[must_use]
    pub fn new(route: Directive, states: Arc<dyn ToolStateStore>) -> Self {
        Self {
            route,
            states,
            text_field: "inputValue".to_string(),
            file_field: "inputFileId".to_string(),
        }
    }

    /// Use a different field for text
    #[must_use]
    pub fn with_text_field(mut self, field: impl Into<String>) -> Self {
        self.text_field = field.into();
        self
    }

    /// Use a different field for file ids
    #[must_use]
    pub fn with_file_field(mut self, field: impl Into<String>) -> Self {
        self.file_field = field.into();
        self
    }

    fn partial(&self, payload: &ResolvedPayload) -> Result<ToolState, IngestError> {
        let mut partial = ToolState::new();
        match payload {
            ResolvedPayload::Text { items } => {
                let text: Vec<&str> = items.iter().filter_map(|item| item.as_text()).collect();
                partial.insert(self.text_field.clone(), Value::String(text.join("\n")));
            },
            ResolvedPayload::FileReference { items } => {
                let mut ids: Vec<Value> = items
                    .iter()
                    .filter_map(|item| item.as_file())
                    .map(|file| Value::String(file.id.clone()))
                    .collect();
                let value = if ids.len() == 1 {
                    ids.remove(0)
                } else {
                    Value::Array(ids)
                };
                partial.insert(self.file_field.clone(), value);
            },
            other => {
                return Err(IngestError::Unsupported(other.kind_label().to_string()));
            },
        }
        Ok(partial)
    }
}

impl SignalIngestor for StateMergeIngestor {
    fn ingest<'a>(&'a self, _signal: &'a Signal, payload: &'a ResolvedPayload) -> IngestFuture<'a> {
        Box::pin(async move {
            let partial = self.partial(payload)?;
            self.states.stage(self.route.as_str(), partial);
            self.states.flush(self.route.as_str()).await?;
            Ok(())
        })
    }
}

impl std::fmt::Debug for StateMergeIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMergeIngestor")
            .field("route", &self.route)
            .field("text_field", &self.text_field)
            .field("file_field", &self.file_field)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::InMemoryToolStateStore;
    use crate::payload::{PayloadItem, StoredFile};
    use chrono::Utc;
    use serde_json::json;

    fn dir(value: &str) -> Directive {
        Directive::new(value).unwrap()
    }

    fn signal() -> Signal {
        Signal {
            source: dir("base64-tool"),
            target: dir("case-converter-tool"),
            source_title: "Base64".into(),
            timestamp: Utc::now(),
            sequence: 0,
        }
    }

    #[tokio::test]
    async fn test_text_is_staged_and_flushed() {
        let states = InMemoryToolStateStore::new();
        let ingestor = StateMergeIngestor::new(dir("case-converter-tool"), Arc::new(states.clone()));
        let payload = ResolvedPayload::Text {
            items: vec![PayloadItem::text("text/plain", "HELLO")],
        };

        ingestor.ingest(&signal(), &payload).await.unwrap();

        let persisted = states.persisted("case-converter-tool").unwrap();
        assert_eq!(persisted["inputValue"], "HELLO");
    }

    #[tokio::test]
    async fn test_files_go_to_file_field() {
        let states = InMemoryToolStateStore::new();
        let ingestor = StateMergeIngestor::new(dir("zip-tool"), Arc::new(states.clone()))
            .with_file_field("inputFileIds");
        let payload = ResolvedPayload::FileReference {
            items: vec![
                PayloadItem::file(StoredFile::new("f1", "a.png", "image/png", vec![1u8])),
                PayloadItem::file(StoredFile::new("f2", "b.png", "image/png", vec![2u8])),
            ],
        };

        ingestor.ingest(&signal(), &payload).await.unwrap();
        assert_eq!(
            states.persisted("zip-tool").unwrap()["inputFileIds"],
            json!(["f1", "f2"])
        );
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let states = InMemoryToolStateStore::new();
        states.fail_route("case-converter-tool");
        let ingestor = StateMergeIngestor::new(dir("case-converter-tool"), Arc::new(states));
        let payload = ResolvedPayload::Text {
            items: vec![PayloadItem::text("text/plain", "x")],
        };

        let err = ingestor.ingest(&signal(), &payload).await.unwrap_err();
        assert!(matches!(err, IngestError::Store(StateStoreError::Write { .. })));
    }

    #[tokio::test]
    async fn test_closure_adapter() {
        let ingestor = ingest_fn(|_signal, payload| async move {
            match payload {
                ResolvedPayload::Text { .. } => Ok(()),
                _ => Err(IngestError::Rejected("text only".into())),
            }
        });

        let err = ingestor
            .ingest(&signal(), &ResolvedPayload::FileReference { items: vec![] })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "text only");
    }
}
