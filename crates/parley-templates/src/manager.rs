use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parley_core::types::Channel;
use parley_store::Store;
use tracing::instrument;

use crate::error::{Result, TemplateError};
use crate::types::Template;

/// Extract unique `{word}` placeholders, preserving first-occurrence order.
/// A "word" is alphanumerics and underscores; anything else in braces is
/// left alone.
pub fn extract_variables(content: &str) -> Vec<String> {
    let mut variables = Vec::new();
    let bytes = content.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(close) = content[i + 1..].find('}') {
                let candidate = &content[i + 1..i + 1 + close];
                let is_word = !candidate.is_empty()
                    && candidate
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_');
                if is_word {
                    if !variables.iter().any(|v| v == candidate) {
                        variables.push(candidate.to_string());
                    }
                    i += close + 2;
                    continue;
                }
            }
        }
        i += 1;
    }

    variables
}

/// Substitute every declared `{var}` globally; a missing value renders as
/// the empty string. Non-placeholder text is never touched.
pub fn render_content(
    content: &str,
    variables: &[String],
    values: &HashMap<String, String>,
) -> String {
    let mut rendered = content.to_string();
    for variable in variables {
        let placeholder = format!("{{{variable}}}");
        let value = values.get(variable).map(String::as_str).unwrap_or("");
        rendered = rendered.replace(&placeholder, value);
    }
    rendered
}

/// Owns [`Template`] records.
pub struct TemplateManager {
    store: Arc<dyn Store<Template>>,
}

impl TemplateManager {
    pub fn new(store: Arc<dyn Store<Template>>) -> Self {
        Self { store }
    }

    /// Create a template. When `variables` is omitted they are derived from
    /// the content.
    #[instrument(skip(self, content))]
    pub async fn create(
        &self,
        name: &str,
        content: &str,
        variables: Option<Vec<String>>,
        channel: Option<Channel>,
    ) -> Result<Template> {
        if name.is_empty() {
            return Err(TemplateError::InvalidInput("name must not be empty".into()));
        }
        let variables = variables.unwrap_or_else(|| extract_variables(content));
        let template = Template::new(name, content, variables, channel);
        Ok(self.store.create(template).await?)
    }

    /// Look up by id first, then by name.
    pub async fn get(&self, name_or_id: &str) -> Result<Template> {
        if let Some(template) = self.store.get(name_or_id).await? {
            return Ok(template);
        }
        let name = name_or_id.to_string();
        self.store
            .find(&move |t: &Template| t.name == name)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TemplateError::NotFound(name_or_id.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<Template>> {
        Ok(self.store.get_all().await?)
    }

    /// Apply a patch. A content change re-extracts the variable list.
    pub async fn update(&self, id: &str, mut patch: serde_json::Value) -> Result<Template> {
        let map = patch
            .as_object_mut()
            .ok_or_else(|| TemplateError::InvalidInput("patch must be a JSON object".into()))?;

        if let Some(content) = map.get("content").and_then(|v| v.as_str()) {
            if !map.contains_key("variables") {
                map.insert(
                    "variables".to_string(),
                    serde_json::json!(extract_variables(content)),
                );
            }
        }
        map.insert("updatedAt".to_string(), serde_json::json!(Utc::now()));

        match self.store.update(id, patch).await {
            Ok(t) => Ok(t),
            Err(parley_store::StoreError::NotFound(_)) => {
                Err(TemplateError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.store.delete(id).await?)
    }

    /// Render a template by name or id against a value mapping.
    pub async fn render(
        &self,
        name_or_id: &str,
        values: &HashMap<String, String>,
    ) -> Result<String> {
        let template = self.get(name_or_id).await?;
        Ok(render_content(&template.content, &template.variables, values))
    }
}
