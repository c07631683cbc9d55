//! Payload resolution.
//!
//! A signal carries no data. When the target accepts it, the resolver reads
//! the source's *current* output according to the source's descriptor. The
//! source may have changed or cleared its output since announcing; the
//! resolver reports whatever is there now and never caches.

use crate::descriptor::{OutputDescriptor, OutputKind, ToolCatalog};
use crate::directive::Directive;
use crate::error::ExchangeError;
use crate::payload::{PayloadItem, ResolvedPayload};
use crate::signal::Signal;
use crate::state_store::{FileStore, ToolStateStore};
use serde_json::Value;
use std::sync::Arc;
use tool_exchange_runtime::metrics::RESOLVE_TOTAL;

/// Message for a file id that no longer resolves
pub const MISSING_FILE_MESSAGE: &str = "referenced file no longer available";

const DEFAULT_TEXT_MIME: &str = "text/plain";

/// Turns a source directive plus its descriptor into a [`ResolvedPayload`].
///
/// Read-only with respect to the source, so it is safe to retry.
#[derive(Clone)]
pub struct PayloadResolver {
    states: Arc<dyn ToolStateStore>,
    files: Arc<dyn FileStore>,
}

impl PayloadResolver {
    /// Create a resolver over the shared state and file stores
    #[must_use]
    pub fn new(states: Arc<dyn ToolStateStore>, files: Arc<dyn FileStore>) -> Self {
        Self { states, files }
    }

    /// Resolve the source's current output
    #[tracing::instrument(skip_all, fields(from = %source, kind = ?descriptor.kind))]
    pub async fn resolve(&self, source: &Directive, descriptor: &OutputDescriptor) -> ResolvedPayload {
        let payload = match descriptor.kind {
            OutputKind::None => ResolvedPayload::None,
            OutputKind::Text => self.resolve_text(source, descriptor).await,
            OutputKind::FileReference => self.resolve_files(source, descriptor).await,
        };

        if let ResolvedPayload::Error { message } = &payload {
            tracing::warn!(%message, "Resolution failed");
        }
        metrics::counter!(RESOLVE_TOTAL, "kind" => payload.kind_label()).increment(1);
        payload
    }

    /// Resolve a signal, looking the source's descriptor up in `catalog`
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::NoSourceMetadata`] when the catalog has no
    /// entry for the signal's source.
    pub async fn resolve_signal(
        &self,
        signal: &Signal,
        catalog: &ToolCatalog,
    ) -> Result<ResolvedPayload, ExchangeError> {
        let metadata = catalog
            .get(&signal.source)
            .ok_or_else(|| ExchangeError::NoSourceMetadata {
                tool: signal.source.clone(),
            })?;
        Ok(self.resolve(&signal.source, &metadata.output).await)
    }

    async fn resolve_text(&self, source: &Directive, descriptor: &OutputDescriptor) -> ResolvedPayload {
        let mime = match descriptor.subtype.as_deref() {
            None => DEFAULT_TEXT_MIME,
            Some(subtype) if is_text_mime(subtype) && !subtype.contains('*') => subtype,
            Some(subtype) if is_text_mime(subtype) => DEFAULT_TEXT_MIME,
            Some(subtype) => return unhandled(subtype),
        };

        let state = match self.states.get(source.as_str()).await {
            Ok(state) => state,
            Err(error) => return ResolvedPayload::error(error.to_string()),
        };

        match state.get(descriptor.field()) {
            Some(Value::String(content)) if !content.is_empty() => ResolvedPayload::Text {
                items: vec![PayloadItem::text(mime, content.clone())],
            },
            _ => ResolvedPayload::None,
        }
    }

    async fn resolve_files(&self, source: &Directive, descriptor: &OutputDescriptor) -> ResolvedPayload {
        if let Some(subtype) = descriptor.subtype.as_deref() {
            if !is_mime_pattern(subtype) {
                return unhandled(subtype);
            }
        }

        let state = match self.states.get(source.as_str()).await {
            Ok(state) => state,
            Err(error) => return ResolvedPayload::error(error.to_string()),
        };

        let ids = file_ids(state.get(descriptor.field()));
        if ids.is_empty() {
            return ResolvedPayload::None;
        }

        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            match self.files.get(&id).await {
                Ok(Some(file)) => items.push(PayloadItem::file(file)),
                Ok(None) => {
                    tracing::debug!(file_id = %id, "Referenced file is gone");
                    return ResolvedPayload::error(MISSING_FILE_MESSAGE);
                },
                Err(error) => return ResolvedPayload::error(error.to_string()),
            }
        }
        ResolvedPayload::FileReference { items }
    }
}

impl std::fmt::Debug for PayloadResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadResolver").finish_non_exhaustive()
    }
}

fn unhandled(subtype: &str) -> ResolvedPayload {
    ResolvedPayload::error(format!("unhandled data type '{subtype}'"))
}

fn is_text_mime(subtype: &str) -> bool {
    is_mime_pattern(subtype) && subtype.starts_with("text/")
}

/// `major/minor`, either part may be `*`
fn is_mime_pattern(subtype: &str) -> bool {
    let mut parts = subtype.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(major), Some(minor), None) => [major, minor]
            .iter()
            .all(|part| !part.is_empty() && !part.chars().any(char::is_whitespace)),
        _ => false,
    }
}

/// A single id string or an array of id strings; blanks are skipped
fn file_ids(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(id)) if !id.trim().is_empty() => vec![id.clone()],
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(Value::as_str)
            .filter(|id| !id.trim().is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::descriptor::ToolMetadata;
    use crate::payload::StoredFile;
    use crate::state_store::ToolState;
    use serde_json::json;
    use crate::memory::{InMemoryFileStore, InMemoryToolStateStore};

    fn dir(value: &str) -> Directive {
        Directive::new(value).unwrap()
    }

    fn state(value: Value) -> ToolState {
        value.as_object().cloned().unwrap()
    }

    struct Fixture {
        states: InMemoryToolStateStore,
        files: InMemoryFileStore,
        resolver: PayloadResolver,
    }

    fn fixture() -> Fixture {
        let states = InMemoryToolStateStore::new();
        let files = InMemoryFileStore::new();
        let resolver = PayloadResolver::new(Arc::new(states.clone()), Arc::new(files.clone()));
        Fixture {
            states,
            files,
            resolver,
        }
    }

    #[tokio::test]
    async fn test_none_descriptor() {
        let f = fixture();
        let payload = f.resolver.resolve(&dir("a"), &OutputDescriptor::none()).await;
        assert_eq!(payload, ResolvedPayload::None);
    }

    #[tokio::test]
    async fn test_text_output() {
        let f = fixture();
        f.states
            .save_now("base64-tool", state(json!({"outputValue": "HELLO"})))
            .await
            .unwrap();

        let payload = f
            .resolver
            .resolve(&dir("base64-tool"), &OutputDescriptor::text().with_subtype("text/plain"))
            .await;
        assert_eq!(
            payload,
            ResolvedPayload::Text {
                items: vec![PayloadItem::text("text/plain", "HELLO")]
            }
        );
    }

    #[tokio::test]
    async fn test_wildcard_text_subtype_yields_plain_text() {
        let f = fixture();
        f.states
            .save_now("case-converter-tool", state(json!({"outputValue": "hello"})))
            .await
            .unwrap();

        let payload = f
            .resolver
            .resolve(&dir("case-converter-tool"), &OutputDescriptor::text().with_subtype("text/*"))
            .await;
        assert_eq!(
            payload,
            ResolvedPayload::Text {
                items: vec![PayloadItem::text("text/plain", "hello")]
            }
        );
    }

    #[tokio::test]
    async fn test_empty_text_is_none() {
        let f = fixture();
        f.states
            .save_now("base64-tool", state(json!({"outputValue": ""})))
            .await
            .unwrap();
        let payload = f.resolver.resolve(&dir("base64-tool"), &OutputDescriptor::text()).await;
        assert_eq!(payload, ResolvedPayload::None);

        let missing = f.resolver.resolve(&dir("never-saved"), &OutputDescriptor::text()).await;
        assert_eq!(missing, ResolvedPayload::None);
    }

    #[tokio::test]
    async fn test_text_with_non_text_subtype_is_unhandled() {
        let f = fixture();
        let payload = f
            .resolver
            .resolve(&dir("a"), &OutputDescriptor::text().with_subtype("image/png"))
            .await;
        assert_eq!(payload, ResolvedPayload::error("unhandled data type 'image/png'"));
    }

    #[tokio::test]
    async fn test_file_reference_in_id_order() {
        let f = fixture();
        f.files.insert(StoredFile::new("f2", "b.png", "image/png", vec![2u8]));
        f.files.insert(StoredFile::new("f1", "a.png", "image/png", vec![1u8, 1]));
        f.states
            .save_now("image-flip", state(json!({"processedFileIds": ["f2", "f1"]})))
            .await
            .unwrap();

        let descriptor = OutputDescriptor::file_reference()
            .with_subtype("image/*")
            .with_field("processedFileIds");
        let payload = f.resolver.resolve(&dir("image-flip"), &descriptor).await;

        let ids: Vec<&str> = payload
            .items()
            .iter()
            .map(|item| item.as_file().unwrap().id.as_str())
            .collect();
        assert_eq!(payload.kind_label(), "file_reference");
        assert_eq!(ids, ["f2", "f1"]);
    }

    #[tokio::test]
    async fn test_deleted_file_is_error() {
        let f = fixture();
        f.files.insert(StoredFile::new("f1", "a.png", "image/png", vec![1u8]));
        f.states
            .save_now("image-flip", state(json!({"processedFileId": "f1"})))
            .await
            .unwrap();
        f.files.remove("f1");

        let payload = f
            .resolver
            .resolve(&dir("image-flip"), &OutputDescriptor::file_reference())
            .await;
        assert_eq!(payload, ResolvedPayload::error(MISSING_FILE_MESSAGE));
    }

    #[tokio::test]
    async fn test_malformed_file_subtype() {
        let f = fixture();
        let payload = f
            .resolver
            .resolve(&dir("image-flip"), &OutputDescriptor::file_reference().with_subtype("image"))
            .await;
        assert_eq!(payload, ResolvedPayload::error("unhandled data type 'image'"));
    }

    #[tokio::test]
    async fn test_resolution_is_repeatable_and_read_only() {
        let f = fixture();
        f.states
            .save_now("base64-tool", state(json!({"outputValue": "SGVsbG8="})))
            .await
            .unwrap();
        let descriptor = OutputDescriptor::text();

        let first = f.resolver.resolve(&dir("base64-tool"), &descriptor).await;
        let second = f.resolver.resolve(&dir("base64-tool"), &descriptor).await;
        assert_eq!(first, second);
        assert_eq!(f.states.write_count("base64-tool"), 1);
    }

    #[tokio::test]
    async fn test_resolve_signal_without_metadata() {
        let f = fixture();
        let signal = Signal {
            source: dir("unknown"),
            target: dir("t"),
            source_title: "Unknown".into(),
            timestamp: chrono::Utc::now(),
            sequence: 0,
        };

        let err = f.resolver.resolve_signal(&signal, &ToolCatalog::new()).await.unwrap_err();
        assert_eq!(err, ExchangeError::NoSourceMetadata { tool: dir("unknown") });

        let catalog = ToolCatalog::new().with_tool(ToolMetadata::new(
            dir("unknown"),
            "Unknown",
            OutputDescriptor::none(),
        ));
        let payload = f.resolver.resolve_signal(&signal, &catalog).await.unwrap();
        assert_eq!(payload, ResolvedPayload::None);
    }

    #[test]
    fn test_mime_patterns() {
        assert!(is_mime_pattern("image/*"));
        assert!(is_mime_pattern("*/*"));
        assert!(!is_mime_pattern("image"));
        assert!(!is_mime_pattern("image/png/x"));
        assert!(!is_mime_pattern("image/ png"));
        assert!(is_text_mime("text/*"));
        assert!(!is_text_mime("textual/plain"));
    }
}
