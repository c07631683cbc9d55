//! Tool identifiers.

use crate::error::ExchangeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable unique identifier for a tool.
///
/// Used as the routing key, the registry key and the state-store route.
/// Always non-empty and trimmed.
///
/// # Example
///
/// ```
/// use tool_exchange::Directive;
///
/// let id = Directive::new(" base64-tool ").unwrap();
/// assert_eq!(id.as_str(), "base64-tool");
/// assert!(Directive::new("   ").is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Directive(String);

impl Directive {
    /// Creates a directive from a tool identifier
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::InvalidDirective`] if the identifier is blank.
    pub fn new(value: impl Into<String>) -> Result<Self, ExchangeError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ExchangeError::InvalidDirective { value });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Directive {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Directive {
    type Error = ExchangeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for Directive {
    type Error = ExchangeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Directive> for String {
    fn from(value: Directive) -> Self {
        value.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_blank() {
        let err = Directive::new("\t ").unwrap_err();
        assert!(matches!(err, ExchangeError::InvalidDirective { .. }));
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Directive = serde_json::from_str("\"case-converter-tool\"").unwrap();
        assert_eq!(ok.to_string(), "case-converter-tool");
        assert!(serde_json::from_str::<Directive>("\"\"").is_err());
    }
}
