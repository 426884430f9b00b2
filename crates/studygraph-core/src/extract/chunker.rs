//! Sliding-window text chunking

/// Split text into overlapping windows of `window` chars.
///
/// The next window starts at `max(end - overlap, idx + 1)` so progress is
/// guaranteed even when the overlap exceeds the window. Parts are trimmed
/// and blank parts dropped.
pub fn split_chunks(text: &str, window: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() || window == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut idx = 0;
    while idx < chars.len() {
        let end = (idx + window).min(chars.len());
        let part: String = chars[idx..end].iter().collect();
        let trimmed = part.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        if end >= chars.len() {
            break;
        }
        idx = end.saturating_sub(overlap).max(idx + 1);
    }
    chunks
}
