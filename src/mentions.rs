//! `@username` extraction from announcement text.
//!
//! A mention is `@` followed by one or more word characters (ASCII letters,
//! digits, underscore). Extraction is case-preserving; matching names
//! against the user directory is the caller's job and is case-insensitive
//! there. A mistyped mention never fails anything downstream.

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Scan `text` for mention tokens. Duplicates (exact string match) are
/// dropped; first-occurrence order is kept so output is deterministic.
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '@' {
            continue;
        }
        let mut name = String::new();
        while let Some((_, next)) = chars.peek() {
            if is_word_char(*next) {
                name.push(*next);
                chars.next();
            } else {
                break;
            }
        }
        // A bare "@" (or "@@" before a name) captures nothing for this
        // occurrence; the scan restarts at the next character.
        if !name.is_empty() && !found.iter().any(|n| *n == name) {
            found.push(name);
        }
    }

    found
}
