//! # Tool Exchange
//!
//! Inter-tool data exchange: one tool announces that its output is ready for
//! another, and the target tool reviews, resolves and imports it.
//!
//! ```text
//!  source tool                          target tool
//!  ───────────                          ───────────
//!  save_now(state)
//!  registry.announce(src, tgt) ──────▶  TargetHandler (watch_registry)
//!                                         │ accept_signal(src)
//!                                         ▼
//!                                       PayloadResolver::resolve_signal
//!                                         │  reads src state / file store
//!                                         ▼
//!                                       SignalIngestor::ingest → stage + flush
//!                                         │
//!                                       registry.remove(src, tgt)
//! ```
//!
//! ## Modules
//!
//! - [`registry`]: the shared [`SignalRegistry`]
//! - [`descriptor`]: per-tool [`OutputDescriptor`]s and the [`ToolCatalog`]
//! - [`resolver`]: accept-time [`PayloadResolver`]
//! - [`handler`]: the per-target lifecycle ([`TargetHandler`])
//! - [`state_store`]: contracts for tool state and file storage
//! - [`memory`]: in-memory store implementations
//! - [`config`]: [`ExchangeConfig`]

pub mod config;
pub mod descriptor;
pub mod directive;
pub mod error;
pub mod handler;
pub mod memory;
pub mod payload;
pub mod registry;
pub mod resolver;
pub mod signal;
pub mod state_store;

pub use config::ExchangeConfig;
pub use descriptor::{OutputDescriptor, OutputKind, ToolCatalog, ToolMetadata};
pub use directive::Directive;
pub use error::{CodecError, ExchangeError, StateStoreError};
pub use handler::{ExchangeNotice, HandlerPhase, SignalIngestor, TargetEnvironment, TargetHandler};
pub use payload::{PayloadBody, PayloadItem, ResolvedPayload, StoredFile};
pub use registry::{RegistryEvent, RegistrySnapshot, SignalRegistry};
pub use resolver::PayloadResolver;
pub use signal::Signal;
pub use state_store::{FileStore, ToolState, ToolStateStore};
