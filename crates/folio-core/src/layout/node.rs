//! Layout snapshot node as received from the renderer.
//!
//! The shape is untrusted: unknown fields are ignored, missing fields fall back
//! to defaults, and scalar style values are stringified.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One node of a layout snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LayoutNode {
    /// Element type (`"document"`, `"page"`, `"view"`, `"text"`, …).
    #[serde(rename = "type", default)]
    pub node_type: String,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_style"
    )]
    pub style: Option<BTreeMap<String, String>>,

    #[serde(rename = "box", default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<BoxGeometry>,

    /// Stable identifier, assigned by the indexer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, deserialize_with = "deserialize_children")]
    pub children: Vec<LayoutNode>,
}

impl LayoutNode {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            ..Self::default()
        }
    }

    pub fn with_child(mut self, child: LayoutNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_style(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.style
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// `key: value` lines, as shown by the style inspector.
    pub fn style_lines(&self) -> Vec<String> {
        self.style
            .iter()
            .flatten()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect()
    }
}

/// Computed box of a node, in points.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BoxGeometry {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
    pub margin_top: f64,
    pub margin_right: f64,
    pub margin_bottom: f64,
    pub margin_left: f64,
    pub padding_top: f64,
    pub padding_right: f64,
    pub padding_bottom: f64,
    pub padding_left: f64,
    pub border_top_width: f64,
    pub border_right_width: f64,
    pub border_bottom_width: f64,
    pub border_left_width: f64,
}

impl BoxGeometry {
    /// Width of the content area (inside padding and borders).
    pub fn content_width(&self) -> f64 {
        self.width
            - self.padding_left
            - self.padding_right
            - self.border_left_width
            - self.border_right_width
    }

    /// Height of the content area (inside padding and borders).
    pub fn content_height(&self) -> f64 {
        self.height
            - self.padding_top
            - self.padding_bottom
            - self.border_top_width
            - self.border_bottom_width
    }
}

fn deserialize_style<'de, D>(deserializer: D) -> Result<Option<BTreeMap<String, String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?;
    Ok(raw.map(|map| {
        map.into_iter()
            .filter_map(|(key, value)| {
                let text = match value {
                    Value::Null => return None,
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                Some((key, text))
            })
            .collect()
    }))
}

fn deserialize_children<'de, D>(deserializer: D) -> Result<Vec<LayoutNode>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<LayoutNode>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerates_unknown_fields_and_scalar_styles() {
        let json = serde_json::json!({
            "type": "view",
            "style": { "padding": 10, "flexGrow": 1, "color": "red", "display": null },
            "box": { "top": 1.5, "left": 2, "width": 100, "height": 50, "paddingTop": 4 },
            "props": { "wrap": false },
            "children": null
        });
        let node: LayoutNode = serde_json::from_value(json).unwrap();
        assert_eq!(node.node_type, "view");
        let style = node.style.as_ref().unwrap();
        assert_eq!(style["padding"], "10");
        assert_eq!(style["color"], "red");
        assert!(!style.contains_key("display"));
        let geometry = node.geometry.unwrap();
        assert_eq!(geometry.left, 2.0);
        assert_eq!(geometry.padding_top, 4.0);
        assert_eq!(geometry.margin_left, 0.0);
        assert!(node.children.is_empty());
    }

    #[test]
    fn test_missing_type_defaults_to_empty() {
        let node: LayoutNode = serde_json::from_str("{}").unwrap();
        assert_eq!(node.node_type, "");
        assert!(node.style.is_none());
        assert!(node.geometry.is_none());
    }

    #[test]
    fn test_content_box() {
        let g = BoxGeometry {
            width: 100.0,
            height: 40.0,
            padding_left: 5.0,
            padding_right: 5.0,
            border_left_width: 1.0,
            border_right_width: 1.0,
            padding_top: 2.0,
            ..BoxGeometry::default()
        };
        assert_eq!(g.content_width(), 88.0);
        assert_eq!(g.content_height(), 38.0);
    }

    #[test]
    fn test_style_lines() {
        let node = LayoutNode::new("text")
            .with_style("fontSize", "12")
            .with_style("color", "blue");
        assert_eq!(node.style_lines(), vec!["color: blue", "fontSize: 12"]);
    }
}
