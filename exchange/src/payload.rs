//! Resolved payloads.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A blob held by the shared file store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    /// File-store id
    pub id: String,
    /// Original file name
    pub name: String,
    /// MIME type
    pub mime: String,
    /// Blob handle, shared rather than copied between tools
    #[serde(skip)]
    pub bytes: Arc<[u8]>,
}

impl StoredFile {
    /// Create a stored file record
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        mime: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            mime: mime.into(),
            bytes: bytes.into(),
        }
    }

    /// Size of the blob in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Content of a single payload item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayloadBody {
    /// Inline text
    Text(String),
    /// Reference to a stored blob
    File(StoredFile),
}

/// One item of a resolved payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayloadItem {
    /// MIME-like type of the item
    pub mime: String,
    /// The content
    pub body: PayloadBody,
}

impl PayloadItem {
    /// An inline text item
    #[must_use]
    pub fn text(mime: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            mime: mime.into(),
            body: PayloadBody::Text(content.into()),
        }
    }

    /// A stored-file item; the MIME type is taken from the file
    #[must_use]
    pub fn file(file: StoredFile) -> Self {
        Self {
            mime: file.mime.clone(),
            body: PayloadBody::File(file),
        }
    }

    /// The inline text, if this is a text item
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match &self.body {
            PayloadBody::Text(text) => Some(text),
            PayloadBody::File(_) => None,
        }
    }

    /// The stored file, if this is a file item
    #[must_use]
    pub const fn as_file(&self) -> Option<&StoredFile> {
        match &self.body {
            PayloadBody::File(file) => Some(file),
            PayloadBody::Text(_) => None,
        }
    }
}

/// Result of resolving a signal against its source's current output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedPayload {
    /// Nothing to transfer
    None,
    /// Inline text items
    Text {
        /// The items, in order
        items: Vec<PayloadItem>,
    },
    /// Stored-file items
    FileReference {
        /// The items, in order
        items: Vec<PayloadItem>,
    },
    /// The resolver could not produce data
    Error {
        /// User-facing reason
        message: String,
    },
}

impl ResolvedPayload {
    /// Build an error payload
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Short label for logs and metrics
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Text { .. } => "text",
            Self::FileReference { .. } => "file_reference",
            Self::Error { .. } => "error",
        }
    }

    /// The payload items; empty for `None` and `Error`
    #[must_use]
    pub fn items(&self) -> &[PayloadItem] {
        match self {
            Self::Text { items } | Self::FileReference { items } => items,
            Self::None | Self::Error { .. } => &[],
        }
    }
}
