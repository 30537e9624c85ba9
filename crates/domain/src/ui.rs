//! The UI component contract.
//!
//! Nodes describe result panels with a `ui_schema` object; the
//! controller relays it to the browser as a `ui_render` frame. The
//! component vocabulary is closed — anything else is degraded to a
//! generic card so clients never receive an uncategorised payload.

use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: u32 = 1;

/// Closed set of renderable component types.
pub const KNOWN_COMPONENTS: &[&str] = &[
    "smart_table",
    "document_preview",
    "chart_report",
    "image_preview",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    Replace,
    Append,
    Patch,
}

/// A validated `ui_render` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiRender {
    pub schema_version: u32,
    /// Addresses which panel the client updates.
    pub ui_id: String,
    pub render_mode: RenderMode,
    pub component: String,
    pub title: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub actions: Vec<UiAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiAction {
    pub id: String,
    pub label: String,
    /// Event pushed to the session when the user clicks the action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

impl UiRender {
    /// Normalize a raw node `ui_schema` into a valid frame payload.
    ///
    /// Missing fields get defaults (fresh `ui_id`, `replace` mode);
    /// an unknown `component` is rewritten as a generic card carrying
    /// the original data plus a download action.
    pub fn normalize(raw: &serde_json::Value, default_ui_id: &str) -> Self {
        let obj = raw.as_object();

        let component = obj
            .and_then(|o| o.get("component"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_owned();

        let ui_id = obj
            .and_then(|o| o.get("ui_id"))
            .and_then(|v| v.as_str())
            .unwrap_or(default_ui_id)
            .to_owned();

        let render_mode = obj
            .and_then(|o| o.get("render_mode"))
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(RenderMode::Replace);

        let title = obj
            .and_then(|o| o.get("title"))
            .and_then(|v| v.as_str())
            .unwrap_or("Result")
            .to_owned();

        let data = obj
            .and_then(|o| o.get("data"))
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let actions: Vec<UiAction> = obj
            .and_then(|o| o.get("actions"))
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        if KNOWN_COMPONENTS.contains(&component.as_str()) {
            return Self {
                schema_version: SCHEMA_VERSION,
                ui_id,
                render_mode,
                component,
                title,
                data,
                actions,
            };
        }

        // Unknown component: generic card with the raw payload intact.
        Self {
            schema_version: SCHEMA_VERSION,
            ui_id,
            render_mode: RenderMode::Replace,
            component: "generic_card".into(),
            title,
            data: raw.clone(),
            actions: vec![UiAction {
                id: "download".into(),
                label: "Download".into(),
                event: None,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_component_passes_through() {
        let raw = serde_json::json!({
            "component": "smart_table",
            "title": "Price comparison",
            "render_mode": "replace",
            "data": {"columns": ["sku", "price"], "rows": [["a", 1]]},
            "actions": [{"id": "confirm", "label": "Confirm", "event": "USER_CONFIRM"}],
        });
        let ui = UiRender::normalize(&raw, "panel-1");
        assert_eq!(ui.component, "smart_table");
        assert_eq!(ui.schema_version, SCHEMA_VERSION);
        assert_eq!(ui.ui_id, "panel-1");
        assert_eq!(ui.actions.len(), 1);
        assert_eq!(ui.actions[0].event.as_deref(), Some("USER_CONFIRM"));
    }

    #[test]
    fn unknown_component_degrades_to_generic_card() {
        let raw = serde_json::json!({
            "component": "hologram",
            "title": "Mystery",
            "data": {"x": 1},
        });
        let ui = UiRender::normalize(&raw, "panel-2");
        assert_eq!(ui.component, "generic_card");
        assert_eq!(ui.title, "Mystery");
        // Raw payload survives so the client can still offer a download.
        assert_eq!(ui.data["data"]["x"], 1);
        assert_eq!(ui.actions[0].id, "download");
    }

    #[test]
    fn empty_schema_is_still_renderable() {
        let ui = UiRender::normalize(&serde_json::json!({}), "panel-3");
        assert_eq!(ui.component, "generic_card");
        assert_eq!(ui.title, "Result");
        assert_eq!(ui.ui_id, "panel-3");
    }

    #[test]
    fn explicit_ui_id_wins_over_default() {
        let raw = serde_json::json!({"component": "chart_report", "ui_id": "finance"});
        let ui = UiRender::normalize(&raw, "fallback");
        assert_eq!(ui.ui_id, "finance");
    }
}
