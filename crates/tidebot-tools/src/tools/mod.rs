//! Built-in tool implementations.

pub mod cron;
pub mod exec;
pub mod fs;
pub mod message;
pub mod web;

/// Cut `text` to at most `max_chars` characters, marking the cut.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            let mut out = text[..byte_idx].to_string();
            out.push_str("\n... [output truncated]");
            (out, true)
        }
        None => (text.to_string(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        let (out, truncated) = truncate_chars("héllo wörld", 4);
        assert!(truncated);
        assert!(out.starts_with("héll\n"));

        let (out, truncated) = truncate_chars("short", 10);
        assert!(!truncated);
        assert_eq!(out, "short");
    }
}
