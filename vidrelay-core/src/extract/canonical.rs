use url::Url;

use crate::fetch::{FetchError, FetchResult};

const SHARE_ITEM_PARAM: &str = "share_item_id";

/// Recovers the item id a page must describe from the post-redirect URL.
///
/// The last path segment wins when it is all digits; share links fall back
/// to the `share_item_id` query parameter.
pub fn canonical_id(url: &Url) -> FetchResult<String> {
    let last_segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last());
    if let Some(segment) = last_segment {
        if segment.chars().all(|c| c.is_ascii_digit()) {
            return Ok(segment.to_string());
        }
    }
    url.query_pairs()
        .find(|(key, value)| key == SHARE_ITEM_PARAM && !value.is_empty())
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: "no video id in path or share_item_id".into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> FetchResult<String> {
        canonical_id(&Url::parse(raw).unwrap())
    }

    #[test]
    fn numeric_path_segment_is_used() {
        assert_eq!(
            id("https://www.tiktok.com/@user/video/7123456789").unwrap(),
            "7123456789"
        );
        assert_eq!(
            id("https://www.tiktok.com/@user/video/7123456789/?lang=en").unwrap(),
            "7123456789"
        );
    }

    #[test]
    fn share_item_query_is_the_fallback() {
        assert_eq!(
            id("https://m.tiktok.com/v/share?share_item_id=7000000000000000001&u=1").unwrap(),
            "7000000000000000001"
        );
    }

    #[test]
    fn missing_id_is_an_invalid_url() {
        assert!(matches!(
            id("https://www.tiktok.com/@user"),
            Err(FetchError::InvalidUrl { .. })
        ));
    }
}
