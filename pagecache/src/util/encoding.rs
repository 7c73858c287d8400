use data_encoding::Encoding;
use data_encoding_macro::new_encoding;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Lowercase base32 without padding; safe for file names on case-insensitive filesystems.
pub const ICASE_NOPAD_ALPHANUMERIC_ENCODING: Encoding = new_encoding! {
    symbols: "abcdefghijklmnopqrstuvwxyz012345",
    padding: None,
    translate_from: "ABCDEFGHIJKLMNOPQRSTUVWXYZ",
    translate_to: "abcdefghijklmnopqrstuvwxyz",
};

/// Everything but the RFC 3986 unreserved characters.
const RESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encodes everything except RFC 3986 unreserved characters, as required for object names
/// in S3 request paths and for SigV4 canonical requests.
pub fn uri_encode(value: &str) -> String {
    utf8_percent_encode(value, RESERVED).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_encode_keeps_unreserved_characters() {
        assert_eq!(uri_encode("Doc-1_a.b~c"), "Doc-1_a.b~c");
    }

    #[test]
    fn test_uri_encode_escapes_reserved_and_non_ascii_characters() {
        assert_eq!(uri_encode("a b/c+d"), "a%20b%2Fc%2Bd");
        assert_eq!(uri_encode("ü"), "%C3%BC");
    }
}
