// src/id.rs

//! Notion object id handling
//!
//! Every id is normalized by stripping dash separators before comparison or
//! storage. Notion URLs embed the id as the trailing 32 hex characters of the
//! last path segment.

/// Normalize an id by removing dash separators. Idempotent.
pub fn normalize(id: &str) -> String {
    id.chars().filter(|c| *c != '-').collect()
}

/// First four characters of a normalized id, used as a collision suffix.
pub fn short(id: &str) -> String {
    let norm = normalize(id);
    norm.chars().take(4).collect()
}

/// Extract the normalized page id from a Notion URL.
///
/// Accepts `https://www.notion.so/My-Page-abc123...`, bare ids, and dashed
/// UUIDs. Returns None when no 32-hex-char id can be found.
pub fn from_url(url: &str) -> Option<String> {
    let candidate = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
        .split('?')
        .next()
        .unwrap_or(url);

    let norm = normalize(candidate);
    if !norm.is_ascii() || norm.len() < 32 {
        return None;
    }
    let tail = &norm[norm.len() - 32..];
    if tail.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(tail.to_lowercase())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_dashes() {
        assert_eq!(
            normalize("668d797c-76fa-4934-9b05-ad288df2d136"),
            "668d797c76fa49349b05ad288df2d136"
        );
    }

    #[test]
    fn test_normalize_idempotent() {
        let once = normalize("668d797c-76fa-4934-9b05-ad288df2d136");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn test_short() {
        assert_eq!(short("668d797c-76fa-4934-9b05-ad288df2d136"), "668d");
    }

    #[test]
    fn test_from_url_with_slug() {
        assert_eq!(
            from_url("https://www.notion.so/My-Page-668d797c76fa49349b05ad288df2d136"),
            Some("668d797c76fa49349b05ad288df2d136".to_string())
        );
    }

    #[test]
    fn test_from_url_dashed_uuid() {
        assert_eq!(
            from_url("https://www.notion.so/668d797c-76fa-4934-9b05-ad288df2d136"),
            Some("668d797c76fa49349b05ad288df2d136".to_string())
        );
    }

    #[test]
    fn test_from_url_query_string() {
        assert_eq!(
            from_url("https://www.notion.so/Page-668d797c76fa49349b05ad288df2d136?pvs=4"),
            Some("668d797c76fa49349b05ad288df2d136".to_string())
        );
    }

    #[test]
    fn test_from_url_rejects_non_id() {
        assert_eq!(from_url("https://example.com/not-an-id"), None);
    }
}
