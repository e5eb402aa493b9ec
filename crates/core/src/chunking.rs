/// Splits `text` into consecutive windows of `max_chars` characters.
///
/// Cuts are made on character offsets with no regard for sentence or word
/// boundaries. Every window except possibly the last holds exactly
/// `max_chars` characters, and concatenating the windows yields `text`.
/// A `max_chars` of zero is treated as one.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (offset, _) in text.char_indices() {
        if count == max_chars {
            chunks.push(&text[start..offset]);
            start = offset;
            count = 0;
        }
        count += 1;
    }

    if start < text.len() {
        chunks.push(&text[start..]);
    }

    chunks
}
