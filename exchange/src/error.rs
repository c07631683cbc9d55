//! Error types for the exchange protocol.

use crate::directive::Directive;
use thiserror::Error;

/// Errors surfaced by the exchange protocol.
///
/// Every accept failure ends up as one of these inside an
/// [`ExchangeNotice::Failed`](crate::handler::ExchangeNotice::Failed); none of
/// them is fatal to the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// A tool identifier was empty or blank
    #[error("invalid tool directive '{value}'")]
    InvalidDirective {
        /// The rejected value
        value: String,
    },

    /// The source tool has no entry in the catalog
    #[error("no output metadata registered for tool '{tool}'")]
    NoSourceMetadata {
        /// The source tool
        tool: Directive,
    },

    /// The resolver could not produce data for the source
    #[error("could not resolve data from '{tool}': {message}")]
    Resolution {
        /// The source tool
        tool: Directive,
        /// Resolver message
        message: String,
    },

    /// The target tool's ingestion callback failed
    #[error("could not import data from '{tool}': {message}")]
    Ingestion {
        /// The source tool
        tool: Directive,
        /// Ingestion message
        message: String,
    },
}

/// Errors from the collaborating tool-state and file stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateStoreError {
    /// The backing store could not be read
    #[error("state store read failed for '{route}': {reason}")]
    Read {
        /// Route (tool directive) being read
        route: String,
        /// Underlying reason
        reason: String,
    },

    /// The backing store could not be written
    #[error("state store write failed for '{route}': {reason}")]
    Write {
        /// Route (tool directive) being written
        route: String,
        /// Underlying reason
        reason: String,
    },

    /// The file store failed while looking up a blob
    #[error("file store lookup failed for '{id}': {reason}")]
    File {
        /// File id
        id: String,
        /// Underlying reason
        reason: String,
    },
}

/// Errors while encoding or decoding JSON documents (registry snapshots,
/// tool catalogs).
#[derive(Error, Debug)]
pub enum CodecError {
    /// JSON could not be parsed or produced
    #[error("invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),

    /// The document parsed but is not supported
    #[error("unsupported document: {0}")]
    Unsupported(String),
}
