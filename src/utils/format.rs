// === UTF-8 safe string slicing utilities ===

/// Telegram message length limit (bytes)
pub const TELEGRAM_MSG_LIMIT: usize = 4096;

/// Round a byte index down to the nearest char boundary
pub fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Shorten to `max_chars` characters for log lines, adding an ellipsis
pub fn preview(s: &str, max_chars: usize) -> String {
    let mut chars = s.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}

/// Normalize consecutive empty lines to maximum of one
pub fn normalize_empty_lines(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut prev_was_empty = false;

    for line in s.lines() {
        let is_empty = line.trim().is_empty();
        if is_empty {
            if !prev_was_empty && !result.is_empty() {
                result.push('\n');
            }
            prev_was_empty = true;
        } else {
            if !result.is_empty() {
                result.push('\n');
            }
            result.push_str(line);
            prev_was_empty = false;
        }
    }

    result
}

/// Split text into chunks of at most `limit` bytes, preferring line breaks
/// and never cutting a UTF-8 character
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= limit {
            chunks.push(remaining.to_string());
            break;
        }
        let safe_end = floor_char_boundary(remaining, limit);
        let split_at = match remaining[..safe_end].rfind('\n') {
            Some(pos) if pos > 0 => pos,
            _ => safe_end,
        };
        // A limit smaller than the first char would never advance
        let split_at = if split_at == 0 {
            remaining.chars().next().map_or(remaining.len(), char::len_utf8)
        } else {
            split_at
        };
        let (chunk, rest) = remaining.split_at(split_at);
        chunks.push(chunk.to_string());
        // Skip the newline character at the split point
        remaining = rest.strip_prefix('\n').unwrap_or(rest);
    }

    chunks
}
