use std::collections::BTreeMap;

use serde::Serialize;

use crate::forms::Form;

/// Data bag handed to the renderer alongside a view name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TemplateData {
    pub string_map: BTreeMap<String, String>,
    pub data: BTreeMap<String, serde_json::Value>,
    pub form: Option<Form>,
    pub flash: Option<String>,
    pub warning: Option<String>,
    pub error: Option<String>,
}

impl TemplateData {
    pub fn with_form(form: Form) -> Self {
        Self {
            form: Some(form),
            ..Self::default()
        }
    }

    pub fn string(mut self, key: &str, value: impl Into<String>) -> Self {
        self.string_map.insert(key.to_string(), value.into());
        self
    }

    /// Attach any serializable value. Serialization failures are dropped
    /// with a warning so a page still renders.
    pub fn value(mut self, key: &str, value: &impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(v) => {
                self.data.insert(key.to_string(), v);
            }
            Err(e) => tracing::warn!(key, "template value not serializable: {e}"),
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

#[derive(Debug)]
pub struct RenderError(pub String);

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "render failed: {}", self.0)
    }
}

impl std::error::Error for RenderError {}

/// Turns a view name and its data bag into response bytes.
pub trait Renderer: Send + Sync {
    fn render(&self, view: &str, data: &TemplateData) -> Result<Page, RenderError>;
}

/// Renders `{"view": .., "data": ..}` so the service works without templates.
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, view: &str, data: &TemplateData) -> Result<Page, RenderError> {
        let body = serde_json::to_vec(&serde_json::json!({ "view": view, "data": data }))
            .map_err(|e| RenderError(e.to_string()))?;
        Ok(Page {
            content_type: "application/json",
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_renderer_carries_view_and_notices() {
        let mut data = TemplateData::default()
            .string("start_date", "2021-07-18")
            .value("nights", &2);
        data.error = Some("No availability".into());

        let page = JsonRenderer.render("search-availability.page.html", &data).unwrap();
        assert_eq!(page.content_type, "application/json");
        let json: serde_json::Value = serde_json::from_slice(&page.body).unwrap();
        assert_eq!(json["view"], "search-availability.page.html");
        assert_eq!(json["data"]["string_map"]["start_date"], "2021-07-18");
        assert_eq!(json["data"]["data"]["nights"], 2);
        assert_eq!(json["data"]["error"], "No availability");
        assert!(json["data"]["form"].is_null());
    }
}
