//! UTF-8-safe truncation for previews and tool output limits.

/// Longest prefix of `text` that fits in `max_bytes` without splitting a
/// character.
pub fn prefix_within_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let end = (0..=max_bytes)
        .rev()
        .find(|i| text.is_char_boundary(*i))
        .unwrap_or(0);
    &text[..end]
}

/// Cut `text` to `max_bytes` and append `marker` if anything was removed.
pub fn clip_bytes(text: &str, max_bytes: usize, marker: &str) -> String {
    let prefix = prefix_within_bytes(text, max_bytes);
    if prefix.len() == text.len() {
        text.to_string()
    } else {
        format!("{prefix}{marker}")
    }
}

/// Cut `text` to `max_chars` characters and append `marker` if anything was
/// removed.
pub fn clip_chars(text: &str, max_chars: usize, marker: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{marker}", &text[..cut]),
        None => text.to_string(),
    }
}
