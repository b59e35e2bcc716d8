//! Content-type detection from a payload's leading bytes.

/// Number of leading bytes inspected.
pub const SNIFF_LEN: usize = 512;

pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Guess a media type from the first bytes of a payload.
///
/// Known binary signatures win; otherwise UTF-8 without control bytes is
/// plain text and anything else is an opaque byte stream.
pub fn sniff(head: &[u8]) -> String {
    let head = &head[..head.len().min(SNIFF_LEN)];
    if let Some(kind) = infer::get(head) {
        return kind.mime_type().to_string();
    }
    if looks_like_text(head) {
        TEXT_PLAIN.to_string()
    } else {
        OCTET_STREAM.to_string()
    }
}

fn looks_like_text(head: &[u8]) -> bool {
    // The window may cut a multi-byte character in half.
    let utf8 = match std::str::from_utf8(head) {
        Ok(_) => true,
        Err(err) => err.error_len().is_none(),
    };
    utf8 && !head
        .iter()
        .any(|&b| matches!(b, 0x00..=0x08 | 0x0B | 0x0E..=0x1A | 0x1C..=0x1F))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_is_text() {
        assert_eq!(sniff(b""), TEXT_PLAIN);
    }

    #[test]
    fn plain_text() {
        assert_eq!(sniff(b"hello world\n"), TEXT_PLAIN);
        assert_eq!(sniff("grüße\r\n".as_bytes()), TEXT_PLAIN);
    }

    #[test]
    fn known_signatures() {
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
        assert_eq!(sniff(png), "image/png");
        assert_eq!(sniff(b"%PDF-1.7\n%\xe2\xe3"), "application/pdf");
    }

    #[test]
    fn control_bytes_mean_binary() {
        assert_eq!(sniff(b"abc\x01\x02def"), OCTET_STREAM);
        assert_eq!(sniff(b"text\0with nul"), OCTET_STREAM);
    }

    #[test]
    fn truncated_utf8_at_window_edge_is_still_text() {
        let mut head = vec![b'a'; SNIFF_LEN - 1];
        head.extend_from_slice("é".as_bytes());
        assert_eq!(sniff(&head), TEXT_PLAIN);
    }
}
