//! Configuration types for the Modifier agent.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main configuration for the Modifier agent.
///
/// Every stage is optional; an absent or empty field turns that stage into
/// a no-op.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModifierConfig {
    /// Global settings
    pub settings: Settings,
    /// Request body template
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    /// Response body templates keyed by status code
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub response: HashMap<u16, String>,
    /// Request header templates keyed by header name
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Query parameter templates
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<QueryConfig>,
}

impl ModifierConfig {
    /// The request template, treating an empty string as absent.
    pub fn request_template(&self) -> Option<&str> {
        self.request.as_deref().filter(|s| !s.is_empty())
    }

    /// Query templates keyed by target parameter.
    pub fn query_templates(&self) -> Option<&HashMap<String, String>> {
        self.query
            .as_ref()
            .map(|q| &q.transform)
            .filter(|t| !t.is_empty())
    }
}

/// Global settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum request body size to buffer (bytes)
    pub max_body_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Query transform configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Templates keyed by target parameter
    #[serde(default)]
    pub transform: HashMap<String, String>,
}
