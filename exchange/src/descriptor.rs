//! Output descriptors and the tool catalog.
//!
//! Every tool statically declares the shape of its current output. The
//! declaration is the only "wire format" that crosses tool boundaries besides
//! the resolved payload itself:
//!
//! ```json
//! {"type": "text", "subtype": "text/plain"}
//! {"type": "fileReference", "subtype": "image/*", "field": "processedFileIds"}
//! ```

use crate::directive::Directive;
use crate::error::CodecError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// State field holding textual output when a descriptor names none
pub const DEFAULT_TEXT_FIELD: &str = "outputValue";

/// State field holding file ids when a descriptor names none
pub const DEFAULT_FILE_FIELD: &str = "processedFileId";

/// Shape of a tool's output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputKind {
    /// The tool produces nothing transferable
    None,
    /// Inline text
    Text,
    /// One or more stored files
    FileReference,
}

/// A tool's declaration of the shape of its current output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDescriptor {
    /// Output shape
    #[serde(rename = "type")]
    pub kind: OutputKind,
    /// MIME-like hint such as `text/plain` or `image/*`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// State field holding the output, when it differs from the default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl OutputDescriptor {
    /// A tool with no transferable output
    #[must_use]
    pub const fn none() -> Self {
        Self {
            kind: OutputKind::None,
            subtype: None,
            field: None,
        }
    }

    /// A tool producing inline text
    #[must_use]
    pub const fn text() -> Self {
        Self {
            kind: OutputKind::Text,
            subtype: None,
            field: None,
        }
    }

    /// A tool producing stored files
    #[must_use]
    pub const fn file_reference() -> Self {
        Self {
            kind: OutputKind::FileReference,
            subtype: None,
            field: None,
        }
    }

    /// Set the MIME-like subtype hint
    #[must_use]
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    /// Set the state field holding the output
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// The state field the resolver reads
    #[must_use]
    pub fn field(&self) -> &str {
        match (&self.field, self.kind) {
            (Some(field), _) => field,
            (None, OutputKind::FileReference) => DEFAULT_FILE_FIELD,
            (None, _) => DEFAULT_TEXT_FIELD,
        }
    }
}

/// Static metadata one tool publishes about itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMetadata {
    /// The tool's directive, also its state-store route
    pub directive: Directive,
    /// Human-readable title
    pub title: String,
    /// Declared output shape
    pub output: OutputDescriptor,
}

impl ToolMetadata {
    /// Create metadata for a tool
    #[must_use]
    pub fn new(directive: Directive, title: impl Into<String>, output: OutputDescriptor) -> Self {
        Self {
            directive,
            title: title.into(),
            output,
        }
    }
}

/// Lookup table of every tool's metadata, built once at application start.
#[derive(Clone, Debug, Default)]
pub struct ToolCatalog {
    tools: HashMap<Directive, ToolMetadata>,
}

impl ToolCatalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a tool's metadata
    #[must_use]
    pub fn with_tool(mut self, metadata: ToolMetadata) -> Self {
        self.register(metadata);
        self
    }

    /// Add or replace a tool's metadata
    pub fn register(&mut self, metadata: ToolMetadata) {
        self.tools.insert(metadata.directive.clone(), metadata);
    }

    /// Metadata for a tool
    #[must_use]
    pub fn get(&self, directive: &Directive) -> Option<&ToolMetadata> {
        self.tools.get(directive)
    }

    /// Number of registered tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tool is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Load a catalog from a JSON array of [`ToolMetadata`]
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if the document is malformed or a
    /// directive is blank.
    pub fn from_json(json: &str) -> Result<Self, CodecError> {
        let tools: Vec<ToolMetadata> = serde_json::from_str(json)?;
        Ok(tools.into_iter().fold(Self::new(), Self::with_tool))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_json_shape() {
        let descriptor = OutputDescriptor::text().with_subtype("text/plain");
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json, serde_json::json!({"type": "text", "subtype": "text/plain"}));

        let parsed: OutputDescriptor =
            serde_json::from_str(r#"{"type":"fileReference","subtype":"image/*"}"#).unwrap();
        assert_eq!(parsed.kind, OutputKind::FileReference);
        assert_eq!(parsed.field(), DEFAULT_FILE_FIELD);
    }

    #[test]
    fn test_default_fields() {
        assert_eq!(OutputDescriptor::text().field(), "outputValue");
        assert_eq!(OutputDescriptor::none().field(), "outputValue");
        assert_eq!(
            OutputDescriptor::file_reference().with_field("processedFileIds").field(),
            "processedFileIds"
        );
    }

    #[test]
    fn test_catalog_from_json() {
        let catalog = ToolCatalog::from_json(
            r#"[
                {"directive": "base64-tool", "title": "Base64", "output": {"type": "text"}},
                {"directive": "image-flip", "title": "Image Flip", "output": {"type": "fileReference", "subtype": "image/*"}}
            ]"#,
        )
        .unwrap();

        assert_eq!(catalog.len(), 2);
        let flip = catalog.get(&Directive::new("image-flip").unwrap()).unwrap();
        assert_eq!(flip.output.subtype.as_deref(), Some("image/*"));
    }

    #[test]
    fn test_catalog_rejects_blank_directive() {
        let result = ToolCatalog::from_json(
            r#"[{"directive": " ", "title": "Blank", "output": {"type": "none"}}]"#,
        );
        assert!(matches!(result, Err(CodecError::Json(_))));
    }
}
