#![deny(unsafe_code)]
#![deny(warnings)]
//! Minimal scanning of flat JSON documents
//!
//! The clock only reads a few top-level integers (`unixtime`, sync
//! intervals) out of small documents, so a key scan replaces a full parser.

/// Unsigned integer value of `"key": 123` anywhere in `doc`
pub fn find_u64(doc: &[u8], key: &str) -> Option<u64> {
    let value = value_after_key(doc, key)?;
    let digits = value.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    value[..digits].iter().try_fold(0u64, |acc, b| {
        acc.checked_mul(10)?.checked_add(u64::from(b - b'0'))
    })
}

/// Whether `doc` looks like a single JSON object
pub fn is_object(doc: &[u8]) -> bool {
    let doc = doc.trim_ascii();
    doc.len() >= 2 && doc[0] == b'{' && doc[doc.len() - 1] == b'}'
}

/// Bytes following the colon of the first `"key"` occurrence
fn value_after_key<'a>(doc: &'a [u8], key: &str) -> Option<&'a [u8]> {
    let key = key.as_bytes();
    let mut start = 0;
    while start + key.len() + 2 <= doc.len() {
        let rest = &doc[start..];
        let at = rest.iter().position(|&b| b == b'"')?;
        let candidate = &rest[at + 1..];
        if candidate.starts_with(key) && candidate.get(key.len()) == Some(&b'"') {
            let after = candidate[key.len() + 1..].trim_ascii_start();
            if let Some(value) = after.strip_prefix(b":") {
                return Some(value.trim_ascii_start());
            }
        }
        start += at + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_u64() {
        let doc = br#"{"abbreviation":"CST","unixtime":1704067200,"utc_offset":"+08:00"}"#;
        assert_eq!(find_u64(doc, "unixtime"), Some(1_704_067_200));
        assert_eq!(find_u64(doc, "missing"), None);
        assert_eq!(find_u64(doc, "abbreviation"), None);
    }

    #[test]
    fn test_find_u64_whitespace_and_overflow() {
        assert_eq!(find_u64(br#"{ "dataSyncInterval" : 30 }"#, "dataSyncInterval"), Some(30));
        assert_eq!(find_u64(br#"{"n":99999999999999999999999}"#, "n"), None);
    }

    #[test]
    fn test_key_must_match_whole_name() {
        let doc = br#"{"unixtime_ms":5,"unixtime":7}"#;
        assert_eq!(find_u64(doc, "unixtime"), Some(7));
    }

    #[test]
    fn test_is_object() {
        assert!(is_object(b" {\"weather\":\"sunny\"}\n"));
        assert!(!is_object(b"<html></html>"));
        assert!(!is_object(b"{"));
    }
}
