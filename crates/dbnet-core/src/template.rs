//! Template catalog: dialect-specific SQL snippets keyed by purpose
//!
//! Drivers ship two families of templates. `metadata` templates answer
//! structural questions (`databases`, `schemas`, `ddl_table`, ...) and
//! `analysis` templates produce canned diagnostic queries (`field_stat`,
//! `field_distro`, ...). Placeholders are written `{name}` and filled from
//! a JSON data map.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::{DbnetError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateCatalog {
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub analysis: HashMap<String, String>,
}

impl TemplateCatalog {
    pub fn with_metadata(mut self, key: &str, sql: &str) -> Self {
        self.metadata.insert(key.to_string(), sql.to_string());
        self
    }

    pub fn with_analysis(mut self, key: &str, sql: &str) -> Self {
        self.analysis.insert(key.to_string(), sql.to_string());
        self
    }

    /// Render a metadata template, or fail with a configuration error
    pub fn metadata_sql(&self, key: &str, data: &serde_json::Map<String, serde_json::Value>) -> Result<String> {
        self.metadata
            .get(key)
            .map(|t| render_template(t, data))
            .ok_or_else(|| DbnetError::Config(format!("metadata key '{}' not found", key)))
    }

    /// Render an analysis template, or fail with a configuration error.
    ///
    /// Templates that reference `{field}` are rendered once per entry of
    /// the `fields` array and the parts joined with `union all`.
    pub fn analysis_sql(&self, key: &str, data: &serde_json::Map<String, serde_json::Value>) -> Result<String> {
        let template = self
            .analysis
            .get(key)
            .ok_or_else(|| DbnetError::Config(format!("did not find Analysis: {}", key)))?;

        if !template.contains("{field}") {
            return Ok(render_template(template, data));
        }

        let fields = match data.get("fields") {
            Some(serde_json::Value::Array(items)) if !items.is_empty() => items.clone(),
            _ => {
                return Err(DbnetError::Config(format!(
                    "analysis '{}' requires a non-empty fields list",
                    key
                )));
            }
        };

        let parts: Vec<String> = fields
            .into_iter()
            .map(|field| {
                let mut per_field = data.clone();
                per_field.insert("field".to_string(), field);
                render_template(template, &per_field)
            })
            .collect();
        Ok(parts.join("\nunion all\n"))
    }
}

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// Substitute `{key}` placeholders. Unknown keys are left verbatim.
pub fn render_template(template: &str, data: &serde_json::Map<String, serde_json::Value>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match data.get(&caps[1]) {
            Some(value) => render_value(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}
