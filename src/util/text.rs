//! Text helpers.

/// Cut `s` to at most `max_chars` characters.
///
/// Returns the (possibly shortened) text and whether anything was removed.
pub fn truncate_chars(s: &str, max_chars: usize) -> (String, bool) {
    match s.char_indices().nth(max_chars) {
        Some((cutoff, _)) => (s[..cutoff].to_string(), true),
        None => (s.to_string(), false),
    }
}

/// Cut `s` to at most `max_bytes` bytes on a UTF-8 boundary.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }

    let mut cutoff = max_bytes;
    while cutoff > 0 && !s.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    s[..cutoff].to_string()
}
