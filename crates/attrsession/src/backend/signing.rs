//! AWS Signature Version 2 request signing for the SimpleDB query API.

use base64::Engine as _;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::Sha256;
use url::Url;

use crate::error::{StoreError, StoreResult};

type HmacSha256 = Hmac<Sha256>;

/// RFC 3986 unreserved characters stay literal, everything else is escaped.
const AWS_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode a query key or value the way the signature expects.
pub(crate) fn encode(value: &str) -> String {
    utf8_percent_encode(value, AWS_ENCODE_SET).to_string()
}

/// Sort parameters by key in byte order and join them as `k=v&k=v`.
pub(crate) fn canonical_query(params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Lowercase host header value, with the port when it is not the default.
pub(crate) fn host_header(endpoint: &Url) -> String {
    let host = endpoint.host_str().unwrap_or_default().to_lowercase();
    match endpoint.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    }
}

pub(crate) fn string_to_sign(method: &str, host: &str, path: &str, canonical: &str) -> String {
    let path = if path.is_empty() { "/" } else { path };
    format!("{}\n{}\n{}\n{}", method, host, path, canonical)
}

/// Base64 HMAC-SHA256 of `string_to_sign` keyed with the secret key.
pub(crate) fn sign(secret_key: &str, string_to_sign: &str) -> StoreResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|e| StoreError::Config(format!("HMAC error: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}
