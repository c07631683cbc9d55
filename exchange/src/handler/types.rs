//! State, actions and outcomes of the target handler.

use crate::directive::Directive;
use crate::error::ExchangeError;
use crate::signal::Signal;
use std::collections::HashSet;

/// Where a target tool is in the review lifecycle.
///
/// Derived from [`TargetState`]; never stored on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandlerPhase {
    /// No pending signals
    Idle,
    /// Signals are pending but the review has not been shown
    PendingUnreviewed,
    /// The review is showing the pending set
    ReviewOpen,
    /// The user dismissed the review; auto-open is suppressed until the set changes
    Deferred,
}

/// Per-target handler state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargetState {
    /// Live signals addressed to this target, oldest first
    pub pending: Vec<Signal>,
    /// Whether the review is open
    pub review_open: bool,
    /// Whether the user deferred the review for the current pending set
    pub deferred: bool,
    /// Sources whose accept is running
    pub in_flight: HashSet<Directive>,
    /// Outcome of the most recent accept, until dismissed
    pub last_notice: Option<ExchangeNotice>,
}

impl TargetState {
    /// Current lifecycle phase
    #[must_use]
    pub fn phase(&self) -> HandlerPhase {
        if self.pending.is_empty() {
            HandlerPhase::Idle
        } else if self.review_open {
            HandlerPhase::ReviewOpen
        } else if self.deferred {
            HandlerPhase::Deferred
        } else {
            HandlerPhase::PendingUnreviewed
        }
    }

    /// The pending signal from `source`, if any
    #[must_use]
    pub fn pending_from(&self, source: &Directive) -> Option<&Signal> {
        self.pending.iter().find(|signal| &signal.source == source)
    }
}

/// Inputs to the target reducer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetAction {
    /// The registry changed for this target; re-read the pending set
    SignalsChanged,
    /// Open the review if anything is pending
    OpenReview,
    /// Close the review and suppress auto-open for the current set
    DeferAll,
    /// Resolve and import the signal from `source`
    AcceptSignal {
        /// Source of the signal to accept
        source: Directive,
    },
    /// An accept attempt completed
    AcceptFinished {
        /// Source of the accepted signal
        source: Directive,
        /// What happened
        notice: ExchangeNotice,
    },
    /// Drop the signal from `source` without importing
    IgnoreSignal {
        /// Source of the signal to drop
        source: Directive,
    },
    /// Drop every signal addressed to this target
    IgnoreAll,
    /// Forget the last notice
    DismissNotice,
}

/// User-facing outcome of one accept attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExchangeNotice {
    /// The payload was handed to the target's ingestor
    Imported {
        /// Source tool
        source: Directive,
        /// Source tool title
        source_title: String,
        /// Number of payload items imported
        items: usize,
    },
    /// The source had nothing to transfer
    NoTransferableData {
        /// Source tool
        source: Directive,
        /// Source tool title
        source_title: String,
    },
    /// Resolution or ingestion failed
    Failed {
        /// Source tool title
        source_title: String,
        /// The failure
        error: ExchangeError,
    },
}

impl ExchangeNotice {
    /// Message to show the user
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Imported { source_title, .. } => format!("Imported data from {source_title}"),
            Self::NoTransferableData { source_title, .. } => {
                format!("{source_title} has no transferable data")
            },
            Self::Failed {
                source_title,
                error,
            } => match error {
                ExchangeError::Resolution { message, .. }
                | ExchangeError::Ingestion { message, .. } => {
                    format!("Could not import from {source_title}: {message}")
                },
                other => format!("Could not import from {source_title}: {other}"),
            },
        }
    }

    /// The source tool the notice is about, when known
    #[must_use]
    pub const fn source(&self) -> Option<&Directive> {
        match self {
            Self::Imported { source, .. } | Self::NoTransferableData { source, .. } => Some(source),
            Self::Failed { error, .. } => match error {
                ExchangeError::NoSourceMetadata { tool }
                | ExchangeError::Resolution { tool, .. }
                | ExchangeError::Ingestion { tool, .. } => Some(tool),
                ExchangeError::InvalidDirective { .. } => None,
            },
        }
    }

    /// Whether this notice reports a failure
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Label for metrics
    #[must_use]
    pub const fn outcome_label(&self) -> &'static str {
        match self {
            Self::Imported { .. } => "imported",
            Self::NoTransferableData { .. } => "empty",
            Self::Failed {
                error: ExchangeError::NoSourceMetadata { .. },
                ..
            } => "no_metadata",
            Self::Failed {
                error: ExchangeError::Ingestion { .. },
                ..
            } => "ingestion_error",
            Self::Failed { .. } => "resolution_error",
        }
    }
}
