//! Unicode sanitization: replace invalid surrogate sequences with U+FFFD so
//! downstream tokenizers never fault on a bad PDF.

/// Rust strings are already guaranteed valid UTF-8, so the only input that
/// can carry a lone surrogate or other invalid byte sequence is bytes
/// recovered from a lossy source (OCR/VLM output, a badly-encoded PDF text
/// layer). Run content through a lossy round-trip from its raw bytes so any
/// invalid sequence becomes U+FFFD rather than being rejected upstream.
pub fn sanitize_unicode(input: &str) -> String {
    String::from_utf8_lossy(input.as_bytes()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_utf8_passes_through_unchanged() {
        let input = "Les jours de RTT sont accordés selon l'ancienneté.";
        assert_eq!(sanitize_unicode(input), input);
    }

    #[test]
    fn replaces_invalid_byte_sequences_with_replacement_character() {
        let invalid = unsafe { String::from_utf8_unchecked(vec![0x68, 0x69, 0xff, 0xfe]) };
        let sanitized = sanitize_unicode(&invalid);
        assert!(sanitized.contains('\u{FFFD}'));
        assert!(sanitized.starts_with("hi"));
    }
}
