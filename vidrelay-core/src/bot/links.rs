use super::TextEntity;
use crate::source::Platform;

/// Entity substrings that mention `platform`, made absolute with `https://`.
pub fn harvest_links(text: &str, entities: &[TextEntity], platform: Platform) -> Vec<String> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let mut links: Vec<String> = Vec::new();
    for entity in entities {
        let start = entity.offset.min(units.len());
        let end = entity.offset.saturating_add(entity.length).min(units.len());
        let candidate = String::from_utf16_lossy(&units[start..end]);
        let candidate = candidate.trim();
        if !candidate.to_ascii_lowercase().contains(platform.domain()) {
            continue;
        }
        let link = if candidate.starts_with("http") {
            candidate.to_string()
        } else {
            format!("https://{candidate}")
        };
        if !links.contains(&link) {
            links.push(link);
        }
    }
    links
}
