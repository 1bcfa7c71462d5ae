/// Safely returns a prefix of the string with at most `max_chars` characters.
/// This respects UTF-8 character boundaries.
pub fn prefix_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Safely returns a suffix of the string with at most `max_chars` characters.
/// This respects UTF-8 character boundaries.
pub fn suffix_chars(s: &str, max_chars: usize) -> &str {
    let char_count = s.chars().count();
    if char_count <= max_chars {
        return s;
    }
    match s.char_indices().nth(char_count - max_chars) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Log-friendly preview: at most `max_chars` characters, with an ellipsis
/// when the input was cut.
pub fn snippet(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        format!("{}…", prefix_chars(s, max_chars))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_chars_respects_boundaries() {
        assert_eq!(prefix_chars("héllo", 2), "hé");
        assert_eq!(prefix_chars("short", 10), "short");
    }

    #[test]
    fn test_suffix_chars_respects_boundaries() {
        assert_eq!(suffix_chars("héllo", 3), "llo");
        assert_eq!(suffix_chars("hé", 5), "hé");
    }

    #[test]
    fn test_snippet_marks_truncation() {
        assert_eq!(snippet("abcdef", 3), "abc…");
        assert_eq!(snippet("abc", 3), "abc");
    }
}
