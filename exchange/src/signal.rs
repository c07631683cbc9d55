//! Signals: "tool A has output ready for tool B".

use crate::directive::Directive;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One live announcement from a source tool to a target tool.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    /// The emitting tool
    pub source: Directive,
    /// The tool the output is offered to
    pub target: Directive,
    /// Human-readable label of the source, for UI and messages
    pub source_title: String,
    /// When the announcement was made
    pub timestamp: DateTime<Utc>,
    /// Registry-assigned sequence number, strictly increasing
    pub sequence: u64,
}

impl Signal {
    /// Ordering key: oldest first, ties broken by announcement order
    #[must_use]
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.sequence)
    }

    /// Whether this signal is the same announcement as `other`
    ///
    /// A re-announcement from the same source replaces the signal with a new
    /// sequence number, so it is a different announcement.
    #[must_use]
    pub fn same_announcement(&self, other: &Self) -> bool {
        self.source == other.source && self.target == other.target && self.sequence == other.sequence
    }
}
