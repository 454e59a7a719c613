//! Inband metadata normalization.
//!
//! Some broadcasters emit a structured record instead of a plain
//! "Artist - Title" string, e.g.
//!
//!   `Some Artist - text="Song Title" song_spot="M" mediaBaseId="123"`
//!
//! The display title is the quoted `text` value; anything preceding the
//! literal ` - text="` separator is the artist.

const TOKEN: &str = "text=\"";
const SEPARATOR: &str = " - text=\"";

/// Normalize a raw inband title into a display string.  Total: malformed
/// input falls back to the raw string unchanged.
pub fn clean_title(raw: &str) -> String {
    let Some(tok) = raw.find(TOKEN) else {
        return raw.to_string();
    };
    let start = tok + TOKEN.len();
    let Some(len) = raw[start..].find('"') else {
        // unterminated quote, keep the raw string
        return raw.to_string();
    };
    let title = &raw[start..start + len];

    if let Some(sep) = raw.find(SEPARATOR) {
        let artist = raw[..sep].trim();
        if !artist.is_empty() {
            return format!("{} - {}", artist, title);
        }
    }
    title.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_title_unchanged() {
        assert_eq!(clean_title("The Beatles - Hey Jude"), "The Beatles - Hey Jude");
        assert_eq!(clean_title(""), "");
    }

    #[test]
    fn test_structured_with_artist() {
        let raw = r#"The Beatles - text="Hey Jude" song_spot="M" spotId="42""#;
        assert_eq!(clean_title(raw), "The Beatles - Hey Jude");
    }

    #[test]
    fn test_structured_without_artist() {
        let raw = r#"text="Hey Jude" song_spot="M""#;
        assert_eq!(clean_title(raw), "Hey Jude");
    }

    #[test]
    fn test_empty_artist_prefix_drops_separator() {
        // whitespace before the separator is not an artist
        let raw = r#" - text="Hey Jude""#;
        assert_eq!(clean_title(raw), "Hey Jude");
    }

    #[test]
    fn test_unterminated_quote_falls_back() {
        let raw = r#"The Beatles - text="Hey Jude"#;
        assert_eq!(clean_title(raw), raw);
    }

    #[test]
    fn test_idempotent() {
        for raw in [
            r#"The Beatles - text="Hey Jude" song_spot="M""#,
            r#"text="Hey Jude""#,
            "The Beatles - Hey Jude",
            "plain title",
        ] {
            let once = clean_title(raw);
            assert_eq!(clean_title(&once), once);
        }
    }
}
