//! Small string helpers.

/// Collapses every run of whitespace into a single space and trims the ends.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncates `s` to at most `max_chars` characters, ending with `...` when cut.
///
/// Cuts on character boundaries, so multi-byte text is never split.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    const ELLIPSIS: &str = "...";

    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    if max_chars <= ELLIPSIS.len() {
        return s.chars().take(max_chars).collect();
    }

    let mut out: String = s.chars().take(max_chars - ELLIPSIS.len()).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Number of whitespace-separated words.
pub fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a \n\t b   c "), "a b c");
    }

    #[test]
    fn test_truncate_short_input_untouched() {
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_truncate_multibyte() {
        let s = "오류가 발생했습니다 다시 시도하세요";
        let cut = truncate_chars(s, 8);
        assert_eq!(cut.chars().count(), 8);
        assert!(cut.ends_with("..."));
        assert!(cut.starts_with("오류가 발"));
    }

    #[test]
    fn test_word_count() {
        assert_eq!(word_count("I  will be back"), 4);
        assert_eq!(word_count(""), 0);
    }
}
