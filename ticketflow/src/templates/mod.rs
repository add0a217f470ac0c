//! Message templates.
//!
//! Templates use `{{ path }}` placeholders, HTML-escaped, and `{{{ path }}}`
//! placeholders, inserted verbatim. Paths are dot-separated keys into the
//! record's JSON view; absent values render as an empty string.

use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

use crate::errors::TemplateError;

static PLACEHOLDER: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"\{\{\{\s*([A-Za-z0-9_.]+)\s*\}\}\}|\{\{\s*([A-Za-z0-9_.]+)\s*\}\}")
});

/// File extensions recognised by [`Templates::load_dir`].
const TEMPLATE_EXTENSIONS: &[&str] = &["hbs", "html", "txt"];

/// Renders named templates against a JSON value.
pub trait TemplateRenderer: Send + Sync {
    /// Returns true if a template is registered under `name`.
    fn has_template(&self, name: &str) -> bool;

    /// Renders template `name` with `data`.
    fn render(&self, name: &str, data: &serde_json::Value) -> Result<String, TemplateError>;
}

/// A set of named placeholder templates.
#[derive(Debug, Clone, Default)]
pub struct Templates {
    sources: HashMap<String, String>,
}

impl Templates {
    /// Creates an empty template set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a template, checking its placeholders are well formed.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<(), TemplateError> {
        let name = name.into();
        let source = source.into();
        let pattern = placeholder(&name)?;

        let stripped = pattern.replace_all(&source, "");
        if stripped.contains("{{") || stripped.contains("}}") {
            return Err(TemplateError::Malformed {
                name,
                reason: "unbalanced or invalid placeholder".to_string(),
            });
        }

        self.sources.insert(name, source);
        Ok(())
    }

    /// Registers a template and returns the set, for chaining.
    pub fn with(
        mut self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<Self, TemplateError> {
        self.insert(name, source)?;
        Ok(self)
    }

    /// Loads every template file in `dir`, named by file stem.
    pub async fn load_dir(dir: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let dir = dir.as_ref();
        let mut templates = Self::new();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| TemplateError::Io(format!("{}: {e}", dir.display())))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| TemplateError::Io(e.to_string()))?
        {
            let path = entry.path();
            let known = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| TEMPLATE_EXTENSIONS.contains(&e));
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !known {
                continue;
            }

            let source = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| TemplateError::Io(format!("{}: {e}", path.display())))?;
            debug!(template = %stem, path = %path.display(), "Loaded template");
            templates.insert(stem, source)?;
        }

        Ok(templates)
    }

    /// Returns the number of registered templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns true if no templates are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl TemplateRenderer for Templates {
    fn has_template(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    fn render(&self, name: &str, data: &serde_json::Value) -> Result<String, TemplateError> {
        let source = self
            .sources
            .get(name)
            .ok_or_else(|| TemplateError::Missing(name.to_string()))?;
        let pattern = placeholder(name)?;

        let rendered = pattern.replace_all(source, |caps: &regex::Captures<'_>| {
            if let Some(raw) = caps.get(1) {
                lookup(data, raw.as_str())
            } else {
                caps.get(2)
                    .map(|path| escape_html(&lookup(data, path.as_str())))
                    .unwrap_or_default()
            }
        });
        Ok(rendered.into_owned())
    }
}

fn placeholder(name: &str) -> Result<&'static Regex, TemplateError> {
    PLACEHOLDER.as_ref().map_err(|e| TemplateError::Malformed {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn lookup(data: &serde_json::Value, path: &str) -> String {
    let value = path
        .split('.')
        .try_fold(data, |current, key| current.get(key));

    match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_substitutes_and_escapes() {
        let templates = Templates::new()
            .with("greet", "<p>Hi {{ display_name }}, ticket #{{ticket.sequence}}</p>{{{ footer }}}")
            .unwrap();
        let data = serde_json::json!({
            "display_name": "Ada <3",
            "ticket": {"state": "assigned", "sequence": 4},
            "footer": "<hr>"
        });

        let out = templates.render("greet", &data).unwrap();
        assert_eq!(out, "<p>Hi Ada &lt;3, ticket #4</p><hr>");
    }

    #[test]
    fn test_missing_field_renders_empty() {
        let templates = Templates::new().with("t", "[{{ nope.deeper }}]").unwrap();
        assert_eq!(templates.render("t", &serde_json::json!({})).unwrap(), "[]");
    }

    #[test]
    fn test_unknown_template() {
        let err = Templates::new().render("absent", &serde_json::json!({})).unwrap_err();
        assert_eq!(err, TemplateError::Missing("absent".to_string()));
    }

    #[test]
    fn test_malformed_placeholder_rejected() {
        let err = Templates::new().with("bad", "Hello {{ name").unwrap_err();
        assert!(matches!(err, TemplateError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_load_dir_uses_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("upload-cv-reminder.hbs"), "Hi {{ first_names }}")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("notes.md"), "ignored").await.unwrap();

        let templates = Templates::load_dir(dir.path()).await.unwrap();
        assert_eq!(templates.len(), 1);
        assert!(templates.has_template("upload-cv-reminder"));
    }
}
