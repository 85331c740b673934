//! API Key Authentication

use axum::http::{header::AUTHORIZATION, HeaderMap};

/// Extract the API key from an `Authorization` header value.
///
/// Accepts both `Bearer <key>` and a bare `<key>`.
pub fn extract_api_key(header_value: &str) -> &str {
    header_value
        .strip_prefix("Bearer ")
        .unwrap_or(header_value)
}

/// Check the request's `Authorization` header against the configured key.
pub fn is_authorized(headers: &HeaderMap, api_key: &str) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|value| {
            constant_time_eq(extract_api_key(value).as_bytes(), api_key.as_bytes())
        })
}

/// Compare two byte strings without short-circuiting on the first mismatch.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn bearer_and_bare_keys_are_accepted() {
        assert!(is_authorized(&headers_with("Bearer secret123"), "secret123"));
        assert!(is_authorized(&headers_with("secret123"), "secret123"));
    }

    #[test]
    fn wrong_or_missing_keys_are_rejected() {
        assert!(!is_authorized(&headers_with("Bearer wrong"), "secret123"));
        assert!(!is_authorized(&headers_with("secret1234"), "secret123"));
        assert!(!is_authorized(&headers_with("bearer secret123"), "secret123"));
        assert!(!is_authorized(&HeaderMap::new(), "secret123"));
    }

    #[test]
    fn only_one_bearer_prefix_is_stripped() {
        assert_eq!(extract_api_key("Bearer Bearer x"), "Bearer x");
        assert_eq!(extract_api_key("Bearerx"), "Bearerx");
    }

    #[test]
    fn constant_time_eq_compares_contents_and_length() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
        assert!(constant_time_eq(b"", b""));
    }
}
