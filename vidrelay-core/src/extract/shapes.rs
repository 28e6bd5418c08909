use serde_json::Value;

/// One known nesting of the item object inside an embedded data block.
///
/// `marker` is searched in the raw block text before any structural access;
/// `resolve` returns the item object or `None` when the structure is off.
pub struct ItemShape {
    pub name: &'static str,
    pub marker: &'static str,
    pub resolve: fn(&Value, &str) -> Option<Value>,
}

/// Shapes in the order they are attempted.
pub const ITEM_SHAPES: &[ItemShape] = &[
    ItemShape {
        name: "video_detail",
        marker: "webapp.video-detail",
        resolve: resolve_video_detail,
    },
    ItemShape {
        name: "item_module",
        marker: "ItemModule",
        resolve: resolve_item_module,
    },
];

fn resolve_video_detail(root: &Value, _canonical_id: &str) -> Option<Value> {
    root.pointer("/__DEFAULT_SCOPE__/webapp.video-detail/itemInfo/itemStruct")
        .filter(|item| item.is_object())
        .cloned()
}

// Keyed lookup first; otherwise the first entry of the map.
fn resolve_item_module(root: &Value, canonical_id: &str) -> Option<Value> {
    let module = root.get("ItemModule")?.as_object()?;
    module
        .get(canonical_id)
        .or_else(|| module.values().next())
        .filter(|item| item.is_object())
        .cloned()
}

/// Item id rendered as a string, whether the block stores it as text or number.
pub fn item_id(item: &Value) -> Option<String> {
    match item.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn video_detail_shape_resolves_item_struct() {
        let root = json!({
            "__DEFAULT_SCOPE__": {
                "webapp.video-detail": {"itemInfo": {"itemStruct": {"id": "42"}}}
            }
        });
        let item = (ITEM_SHAPES[0].resolve)(&root, "42").unwrap();
        assert_eq!(item_id(&item).as_deref(), Some("42"));
    }

    #[test]
    fn item_module_prefers_the_canonical_key() {
        let root = json!({
            "ItemModule": {
                "1": {"id": "1"},
                "2": {"id": 2}
            }
        });
        let keyed = (ITEM_SHAPES[1].resolve)(&root, "2").unwrap();
        assert_eq!(item_id(&keyed).as_deref(), Some("2"));
        let first = (ITEM_SHAPES[1].resolve)(&root, "9").unwrap();
        assert_eq!(item_id(&first).as_deref(), Some("1"));
    }

    #[test]
    fn broken_structure_yields_none() {
        let root = json!({"ItemModule": []});
        assert!((ITEM_SHAPES[1].resolve)(&root, "1").is_none());
        assert!((ITEM_SHAPES[0].resolve)(&root, "1").is_none());
    }
}
