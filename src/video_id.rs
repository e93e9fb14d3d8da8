use url::Url;

/// Length of a YouTube video identifier.
const ID_LEN: usize = 11;

fn is_valid_id(s: &str) -> bool {
    s.len() == ID_LEN
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn is_youtube_host(host: &str) -> bool {
    let h = host.to_ascii_lowercase();
    h == "youtube.com" || h == "youtu.be" || h.ends_with(".youtube.com")
}

/// Resolve a raw URL or bare 11-character ID to a validated video ID.
///
/// Recognized URL shapes: `watch?v=<id>`, `youtu.be/<id>`, `/embed/<id>`,
/// `/shorts/<id>`. Anything else returns `None` so the caller can reject the
/// request before any external call is attempted.
pub fn parse(input: &str) -> Option<String> {
    let input = input.trim();

    if is_valid_id(input) {
        return Some(input.to_string());
    }

    let url = Url::parse(input).ok()?;
    let host = url.host_str()?;
    if !is_youtube_host(host) {
        return None;
    }

    // youtu.be/<id>
    if host.eq_ignore_ascii_case("youtu.be") {
        let seg = url.path_segments()?.next()?.trim();
        if is_valid_id(seg) {
            return Some(seg.to_string());
        }
        return None;
    }

    // youtube.com/watch?v=<id>
    if url.path().starts_with("/watch") {
        for (k, v) in url.query_pairs() {
            if k == "v" && is_valid_id(v.trim()) {
                return Some(v.trim().to_string());
            }
        }
        return None;
    }

    // youtube.com/embed/<id>, /shorts/<id>
    if let Some(mut segs) = url.path_segments() {
        let a = segs.next().unwrap_or("");
        let b = segs.next().unwrap_or("").trim();
        if (a == "embed" || a == "shorts") && is_valid_id(b) {
            return Some(b.to_string());
        }
    }

    None
}

/// Canonical watch-page URL for a video ID.
pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_id() {
        assert_eq!(parse("dQw4w9WgXcQ").as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(parse("  dQw4w9WgXcQ  ").as_deref(), Some("dQw4w9WgXcQ"));
    }

    #[test]
    fn test_url_variants() {
        for input in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?v=dQw4w9WgXcQ&t=42",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ",
        ] {
            assert_eq!(parse(input).as_deref(), Some("dQw4w9WgXcQ"), "{}", input);
        }
    }

    #[test]
    fn test_rejects_invalid_input() {
        assert!(parse("").is_none());
        assert!(parse("not a url").is_none());
        assert!(parse("https://vimeo.com/12345").is_none());
        assert!(parse("https://www.youtube.com/watch?list=PLx").is_none());
        // Wrong ID length
        assert!(parse("https://youtu.be/short").is_none());
        assert!(parse("abc").is_none());
    }

    #[test]
    fn test_rejects_bad_charset() {
        assert!(parse("dQw4w9WgXc!").is_none());
    }

    #[test]
    fn test_watch_url() {
        assert_eq!(
            watch_url("dQw4w9WgXcQ"),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
    }
}
