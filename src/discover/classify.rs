use crate::constants::MEDIA_URL_PATTERNS;

/// Heuristic check for video resources: true when `candidate` contains any of
/// the known patterns, ignoring case.
pub fn is_media_url(candidate: &str) -> bool {
    if candidate.is_empty() {
        return false;
    }
    let lowered = candidate.to_ascii_lowercase();
    MEDIA_URL_PATTERNS
        .iter()
        .any(|pattern| lowered.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_extension_in_any_case() {
        assert!(is_media_url("https://img.cdn/x/clip.mp4"));
        assert!(is_media_url("https://img.cdn/x/CLIP.MP4?sig=1"));
        assert!(is_media_url("//img.cdn/x/clip.Mp4"));
    }

    #[test]
    fn matches_known_path_tokens() {
        for url in [
            "https://goods-vod.kwcdn.com/goods-video/abc",
            "https://site/api/video/123",
            "https://host/videoplayback?id=1",
            "https://host/VIDEO_CONTENT/xyz",
            "https://host/media/video/xyz",
        ] {
            assert!(is_media_url(url), "{url}");
        }
    }

    #[test]
    fn rejects_unrelated_strings() {
        for value in [
            "",
            "https://img.cdn/x/photo.jpg",
            "https://host/videos",
            "mp4",
            "plain text",
        ] {
            assert!(!is_media_url(value), "{value}");
        }
    }

    #[test]
    fn is_deterministic() {
        let url = "https://host/a/Video/b";
        assert_eq!(is_media_url(url), is_media_url(url));
    }
}
