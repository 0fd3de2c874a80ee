//! Canonical cache-key derivation.
//!
//! Request fields are collected in a [`SortedMap`], so joining them in
//! iteration order gives a byte-stable string for any insertion order. The
//! fingerprint doubles as the dedup key for the pending-request queue.

use crate::ds::SortedMap;
use crate::oauth::transport::Method;

/// Field separator used in request bodies.
pub const BODY_SEPARATOR: &str = "&";
/// Escaped field separator used when fields are spliced into a URL.
pub const URL_SEPARATOR: &str = "\\&";

/// Joins fields as `key=value` pairs in sorted key order.
pub fn encode_fields(fields: &SortedMap<String, String>, separator: &str) -> String {
    let mut out = String::new();
    for (key, value) in fields.iter() {
        if !out.is_empty() {
            out.push_str(separator);
        }
        out.push_str(key);
        out.push('=');
        out.push_str(value);
    }
    out
}

/// Derives the cache key for a request: `/{METHOD}/{endpoint}?{fields}`.
pub fn fingerprint(method: Method, endpoint: &str, fields: &SortedMap<String, String>) -> String {
    format!(
        "/{}/{}?{}",
        method.as_str(),
        endpoint,
        encode_fields(fields, BODY_SEPARATOR)
    )
}
