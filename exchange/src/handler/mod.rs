//! Target handler: the per-target review lifecycle.
//!
//! ```text
//!             announce                 open_modal / auto-open
//!   Idle ───────────────▶ PendingUnreviewed ─────────────────▶ ReviewOpen
//!    ▲                        ▲                                 │   │
//!    │  pending set empty     │ new signal                      │   │ accept / ignore
//!    │                        │            close_modal          │   ▼
//!    └──────────────────── Deferred ◀───────────────────────────┘ ReviewOpen
//! ```
//!
//! The lifecycle is a [`TargetReducer`] run by the runtime store;
//! [`TargetHandler`] is the facade a tool holds.

mod facade;
mod ingest;
mod reducer;
mod types;

pub use facade::TargetHandler;
pub use ingest::{FnIngestor, IngestError, IngestFuture, SignalIngestor, StateMergeIngestor, ingest_fn};
pub use reducer::{TargetEnvironment, TargetReducer};
pub use types::{ExchangeNotice, HandlerPhase, TargetAction, TargetState};
