//! Ingestion limits and structural validation
//!
//! Oversized fields are truncated at ingestion, never rejected - a client
//! that pastes a novel loses the tail, not the message. Only an empty
//! payload (after trimming) is a rejected-input case.

/// Maximum payload length in characters (sealed or plaintext)
pub const MAX_PAYLOAD_CHARS: usize = 5000;

/// Maximum sealed envelope key length in characters
pub const MAX_ENVELOPE_KEY_CHARS: usize = 5000;

/// Maximum key fingerprint length in characters
pub const MAX_FINGERPRINT_CHARS: usize = 100;

/// Truncate a string to at most `max` characters
///
/// Operates on char boundaries, so multi-byte text is never split mid-glyph.
/// Returns the input unchanged when it already fits.
pub fn truncate_chars(s: String, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => {
            let mut s = s;
            s.truncate(byte_idx);
            s
        }
        None => s,
    }
}

/// Structural payload check: non-empty after trimming whitespace
///
/// The only shape requirement the broker places on content. Everything
/// else about the payload is opaque.
pub fn validate_payload(payload: &str) -> bool {
    !payload.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_shorter_than_max_unchanged() {
        assert_eq!(truncate_chars("hello".to_string(), 10), "hello");
    }

    #[test]
    fn test_truncate_exactly_max_unchanged() {
        assert_eq!(truncate_chars("hello".to_string(), 5), "hello");
    }

    #[test]
    fn test_truncate_over_max() {
        assert_eq!(truncate_chars("hello world".to_string(), 5), "hello");
    }

    #[test]
    fn test_truncate_multibyte_on_char_boundary() {
        assert_eq!(truncate_chars("日本語テスト".to_string(), 3), "日本語");
    }

    #[test]
    fn test_truncate_emoji() {
        assert_eq!(truncate_chars("🎉🎉🎉🎉".to_string(), 2), "🎉🎉");
    }

    #[test]
    fn test_validate_payload_rejects_empty() {
        assert!(!validate_payload(""));
        assert!(!validate_payload("   "));
        assert!(!validate_payload("\n\t "));
    }

    #[test]
    fn test_validate_payload_accepts_content() {
        assert!(validate_payload("hi"));
        assert!(validate_payload("  hi  "));
    }
}
