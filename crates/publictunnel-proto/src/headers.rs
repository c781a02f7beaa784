//! Multi-valued HTTP header map used on the wire

use std::collections::BTreeMap;

/// Header name -> values, in the order they were received
pub type Headers = BTreeMap<String, Vec<String>>;

/// Connection-scoped headers that must not be replayed across the relay
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
];

/// Returns true for headers that describe a single hop rather than the message
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Append a value under `name`, keeping earlier values
pub fn append_header(headers: &mut Headers, name: &str, value: &str) {
    headers
        .entry(name.to_string())
        .or_default()
        .push(value.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_keeps_all_values() {
        let mut headers = Headers::new();
        append_header(&mut headers, "set-cookie", "a=1");
        append_header(&mut headers, "set-cookie", "b=2");
        append_header(&mut headers, "content-type", "text/plain");

        assert_eq!(headers["set-cookie"], vec!["a=1", "b=2"]);
        assert_eq!(headers["content-type"], vec!["text/plain"]);
    }

    #[test]
    fn test_hop_by_hop_is_case_insensitive() {
        assert!(is_hop_by_hop("Transfer-Encoding"));
        assert!(is_hop_by_hop("connection"));
        assert!(!is_hop_by_hop("Content-Type"));
        assert!(!is_hop_by_hop("x-request-id"));
    }
}
