//! Recovers a [`VideoDescriptor`] from the JSON blocks a video page embeds.

mod canonical;
mod shapes;

use std::collections::HashSet;

use scraper::{Html, Selector};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::fetch::{FetchError, FetchResult};

pub use canonical::canonical_id;
pub use shapes::{item_id, ItemShape, ITEM_SHAPES};

const CANDIDATE_SELECTORS: [&str; 3] = [
    "script#__UNIVERSAL_DATA_FOR_REHYDRATION__",
    "script#SIGI_STATE",
    r#"script[type="application/json"]"#,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoDescriptor {
    pub id: String,
    pub playable_url: String,
    pub caption: Option<String>,
}

impl VideoDescriptor {
    /// Maps a resolved item object. `None` when it carries no media address.
    pub fn from_item(id: String, item: &Value) -> Option<Self> {
        let video = item.get("video")?;
        let playable_url = ["playAddr", "downloadAddr"]
            .iter()
            .filter_map(|key| video.get(*key).and_then(Value::as_str))
            .find(|url| !url.trim().is_empty())?
            .to_string();
        let caption = item
            .get("desc")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|desc| !desc.is_empty())
            .map(str::to_string);
        Some(Self {
            id,
            playable_url,
            caption,
        })
    }
}

/// Script bodies in priority order, each element at most once.
pub fn candidate_blocks(body: &str) -> Vec<String> {
    let document = Html::parse_document(body);
    let mut seen = HashSet::new();
    let mut blocks = Vec::new();
    for css in CANDIDATE_SELECTORS {
        let selector = Selector::parse(css).expect("static candidate selector");
        for element in document.select(&selector) {
            if seen.insert(element.id()) {
                blocks.push(element.text().collect::<String>());
            }
        }
    }
    blocks
}

/// Finds the first embedded item whose id equals `canonical_id`.
pub fn extract(body: &str, canonical_id: &str) -> FetchResult<VideoDescriptor> {
    let blocks = candidate_blocks(body);
    for (index, text) in blocks.iter().enumerate() {
        let Some(shape) = ITEM_SHAPES.iter().find(|shape| text.contains(shape.marker)) else {
            trace!(index, "candidate matches no known shape");
            continue;
        };
        let root: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                debug!(index, shape = shape.name, error = %err, "skipping malformed candidate");
                continue;
            }
        };
        let Some(item) = (shape.resolve)(&root, canonical_id) else {
            debug!(index, shape = shape.name, "candidate structure did not resolve");
            continue;
        };
        let Some(id) = item_id(&item) else {
            continue;
        };
        if id != canonical_id {
            debug!(index, shape = shape.name, found = %id, expected = canonical_id, "rejecting mismatched item");
            continue;
        }
        if let Some(descriptor) = VideoDescriptor::from_item(id, &item) {
            debug!(index, shape = shape.name, id = %descriptor.id, "descriptor extracted");
            return Ok(descriptor);
        }
    }
    Err(FetchError::NoData(format!(
        "no embedded item matched id {canonical_id} across {} candidates",
        blocks.len()
    )))
}
