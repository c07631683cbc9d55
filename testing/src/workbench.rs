//! A registry, in-memory stores and a catalog wired together for tests.

#![allow(clippy::expect_used)] // Test fixture: setup failures should abort the test

use crate::mocks::{SteppingClock, test_clock};
use serde_json::{Value, json};
use std::sync::Arc;
use tool_exchange::config::ExchangeConfig;
use tool_exchange::handler::{SignalIngestor, TargetEnvironment, TargetHandler};
use tool_exchange::memory::{InMemoryFileStore, InMemoryToolStateStore};
use tool_exchange::{
    Directive, OutputDescriptor, PayloadResolver, Signal, SignalRegistry, StoredFile, ToolCatalog,
    ToolMetadata, ToolState, ToolStateStore,
};
use tool_exchange_core::environment::Clock;

/// Everything a handoff test needs, sharing one registry.
///
/// Timestamps come from a [`SteppingClock`], so announcements are strictly
/// ordered.
#[derive(Debug, Clone)]
pub struct Workbench {
    /// Shared signal registry
    pub registry: SignalRegistry,
    /// Tool state for every route
    pub states: InMemoryToolStateStore,
    /// Shared blob store
    pub files: InMemoryFileStore,
    /// Declared outputs
    pub catalog: ToolCatalog,
    /// Handler configuration
    pub config: ExchangeConfig,
}

impl Default for Workbench {
    fn default() -> Self {
        Self::new()
    }
}

impl Workbench {
    /// Empty workbench with default configuration
    #[must_use]
    pub fn new() -> Self {
        let clock = SteppingClock::starting_at(test_clock().now());
        Self {
            registry: SignalRegistry::new(Arc::new(clock)),
            states: InMemoryToolStateStore::new(),
            files: InMemoryFileStore::new(),
            catalog: ToolCatalog::new(),
            config: ExchangeConfig::default(),
        }
    }

    /// Parse a directive
    ///
    /// # Panics
    ///
    /// Panics on a blank directive.
    #[must_use]
    pub fn dir(&self, value: &str) -> Directive {
        Directive::new(value).expect("test directive should be valid")
    }

    /// Declare a tool's output
    #[must_use]
    pub fn with_tool(mut self, directive: &str, title: &str, output: OutputDescriptor) -> Self {
        let directive = self.dir(directive);
        self.catalog.register(ToolMetadata::new(directive, title, output));
        self
    }

    /// Declare a tool with `text/plain` output
    #[must_use]
    pub fn with_text_tool(self, directive: &str, title: &str) -> Self {
        self.with_tool(directive, title, OutputDescriptor::text().with_subtype("text/plain"))
    }

    /// Declare a tool whose output is a single stored file
    #[must_use]
    pub fn with_file_tool(self, directive: &str, title: &str) -> Self {
        self.with_tool(directive, title, OutputDescriptor::file_reference())
    }

    /// Replace the handler configuration
    #[must_use]
    pub fn with_config(mut self, config: ExchangeConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolver over this workbench's stores
    #[must_use]
    pub fn resolver(&self) -> PayloadResolver {
        PayloadResolver::new(Arc::new(self.states.clone()), Arc::new(self.files.clone()))
    }

    /// Handler environment for `target`
    #[must_use]
    pub fn environment(&self, target: &str, ingestor: impl SignalIngestor + 'static) -> TargetEnvironment {
        TargetEnvironment::new(
            self.dir(target),
            self.registry.clone(),
            Arc::new(self.catalog.clone()),
            self.resolver(),
            Arc::new(ingestor),
        )
    }

    /// A ready handler for `target`
    ///
    /// # Panics
    ///
    /// Panics if the handler cannot be created.
    pub async fn handler(&self, target: &str, ingestor: impl SignalIngestor + 'static) -> TargetHandler {
        TargetHandler::new(&self.config, self.environment(target, ingestor))
            .await
            .expect("handler should start")
    }

    /// Save `text` as `source`'s current output and persist it
    ///
    /// # Panics
    ///
    /// Panics if the state store rejects the write.
    pub async fn publish_text(&self, source: &str, text: &str) {
        self.save(source, "outputValue", json!(text)).await;
    }

    /// Save file ids as `source`'s current output and persist them
    ///
    /// # Panics
    ///
    /// Panics if the state store rejects the write.
    pub async fn publish_files(&self, source: &str, field: &str, ids: &[&str]) {
        let value = match ids {
            [id] => json!(id),
            ids => json!(ids),
        };
        self.save(source, field, value).await;
    }

    /// Put a blob into the file store
    pub fn add_file(&self, id: &str, mime: &str, bytes: &[u8]) {
        self.files
            .insert(StoredFile::new(id, format!("{id}.bin"), mime, bytes.to_vec()));
    }

    /// Announce `source` → `target`, titled from the catalog
    pub fn announce(&self, source: &str, target: &str) -> Signal {
        let source = self.dir(source);
        let title = self
            .catalog
            .get(&source)
            .map_or_else(|| source.to_string(), |tool| tool.title.clone());
        self.registry.announce(&source, &self.dir(target), &title)
    }

    async fn save(&self, route: &str, field: &str, value: Value) {
        let mut state = self.states.get(route).await.expect("state should be readable");
        state.insert(field.to_string(), value);
        self.states
            .save_now(route, state)
            .await
            .expect("state should be writable");
    }

    /// Persisted state of `route`, empty when never written
    #[must_use]
    pub fn persisted(&self, route: &str) -> ToolState {
        self.states.persisted(route).unwrap_or_default()
    }
}
