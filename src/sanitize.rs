//! pixvault - Text Sanitizing
//!
//! Names and icons coming from backup archives are untrusted.

/// Longest photo or album name kept on import
pub const MAX_NAME_CHARS: usize = 255;

/// Longest album icon kept on import
pub const MAX_ICON_CHARS: usize = 16;

/// Strip markup tags, drop control characters, trim and cap to `max_chars`
pub fn sanitize_text(input: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(input.len().min(max_chars * 4));
    let mut in_tag = false;

    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if in_tag => {}
            c if c.is_control() => {}
            c => out.push(c),
        }
    }

    out.trim().chars().take(max_chars).collect::<String>().trim_end().to_string()
}

/// Sanitized display name, with a fallback for names that end up empty
pub fn sanitize_name(input: &str, fallback: &str) -> String {
    let cleaned = sanitize_text(input, MAX_NAME_CHARS);
    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned
    }
}

pub fn sanitize_icon(input: &str) -> String {
    sanitize_text(input, MAX_ICON_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_markup_and_controls() {
        assert_eq!(
            sanitize_text("<script>alert(1)</script>Beach\u{0007} day", 100),
            "alert(1)Beach day"
        );
        assert_eq!(sanitize_text("line\nbreak\ttab", 100), "linebreaktab");
        assert_eq!(sanitize_text("  padded  ", 100), "padded");
    }

    #[test]
    fn test_caps_length_by_chars() {
        let long = "ż".repeat(300);
        let cleaned = sanitize_text(&long, MAX_NAME_CHARS);
        assert_eq!(cleaned.chars().count(), MAX_NAME_CHARS);
    }

    #[test]
    fn test_name_fallback() {
        assert_eq!(sanitize_name("<b></b>", "photo.jpg"), "photo.jpg");
        assert_eq!(sanitize_name("Holidays", "x"), "Holidays");
        assert_eq!(sanitize_icon("🏖️"), "🏖️");
    }
}
