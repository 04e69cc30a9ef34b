//! Secondary requests carried in a SQL comment envelope
//!
//! The UI asks for canned SQL by submitting a comment such as
//! `/*--{"analysis": "field_stat", "data": {...}}--*/` (or the `/*@ ... @*/`
//! form). The body is YAML, which also covers JSON.

use dbnet_core::{DbnetError, Result, TemplateCatalog};
use serde::Deserialize;
use serde_json::{Map, Value};

const ENVELOPES: &[(&str, &str)] = &[("/*--", "--*/"), ("/*@", "@*/")];

/// Analyses whose result rows are column profiling counters
const FIELD_ANALYSES: &[&str] = &["field_stat", "field_stat_deep"];

#[derive(Debug, Clone, PartialEq)]
pub enum SecondaryRequest {
    Analysis { name: String, data: Map<String, Value> },
    Metadata { name: String, data: Map<String, Value> },
}

#[derive(Deserialize)]
struct RawRequest {
    #[serde(default)]
    analysis: Option<String>,
    #[serde(default)]
    metadata: Option<String>,
    #[serde(default)]
    data: Map<String, Value>,
}

impl SecondaryRequest {
    /// Parse the envelope wrapping `text`. Returns `Ok(None)` for ordinary SQL.
    pub fn parse(text: &str) -> Result<Option<Self>> {
        let text = text.trim();
        let Some(body) = ENVELOPES.iter().find_map(|(open, close)| {
            text.strip_prefix(open)
                .and_then(|rest| rest.strip_suffix(close))
        }) else {
            return Ok(None);
        };

        let raw: RawRequest = serde_yaml::from_str(body)
            .map_err(|e| DbnetError::Config(format!("could not parse yaml/json request: {}", e)))?;

        let request = match (raw.analysis, raw.metadata) {
            (Some(name), None) if !name.is_empty() => SecondaryRequest::Analysis {
                name,
                data: raw.data,
            },
            (None, Some(name)) if !name.is_empty() => SecondaryRequest::Metadata {
                name,
                data: raw.data,
            },
            (Some(_), Some(_)) => {
                return Err(DbnetError::Config(
                    "request names both an analysis and a metadata template".into(),
                ));
            }
            _ => {
                return Err(DbnetError::Config(
                    "request names neither an analysis nor a metadata template".into(),
                ));
            }
        };
        Ok(Some(request))
    }

    /// Render the named template from the connection's catalog
    pub fn resolve(&self, templates: &TemplateCatalog) -> Result<String> {
        match self {
            SecondaryRequest::Analysis { name, data } => templates.analysis_sql(name, data),
            SecondaryRequest::Metadata { name, data } => templates.metadata_sql(name, data),
        }
    }

    /// Whether the results should be kept as column statistics
    pub fn is_field_analysis(&self) -> bool {
        matches!(self, SecondaryRequest::Analysis { name, .. } if FIELD_ANALYSES.contains(&name.as_str()))
    }
}
