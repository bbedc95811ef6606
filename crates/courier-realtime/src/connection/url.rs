//! Socket URL construction.

use url::Url;

use crate::errors::{ConnectionError, Result};

/// Query parameter carrying the auth token.
pub const TOKEN_PARAM: &str = "token";

/// Parse `base` and attach `token` as the `token` query parameter.
///
/// Any `token` pair already on `base` is replaced; other pairs keep their
/// order. An empty token leaves the parameter off.
pub fn build_socket_url(base: &str, token: &str) -> Result<Url> {
    let mut url =
        Url::parse(base).map_err(|e| ConnectionError::InvalidUrl(format!("{base}: {e}")))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ConnectionError::InvalidUrl(format!(
            "{base}: scheme must be ws or wss"
        )));
    }

    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != TOKEN_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    url.set_query(None);

    if !retained.is_empty() || !token.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in &retained {
            let _ = pairs.append_pair(key, value);
        }
        if !token.is_empty() {
            let _ = pairs.append_pair(TOKEN_PARAM, token);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn appends_token() {
        let url = build_socket_url("ws://localhost:8080/ws", "abc").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/ws?token=abc");
    }

    #[test]
    fn replaces_existing_token_and_keeps_other_pairs() {
        let url = build_socket_url("wss://chat.example.com/ws?v=2&token=old", "new").unwrap();
        assert_eq!(url.as_str(), "wss://chat.example.com/ws?v=2&token=new");
    }

    #[test]
    fn encodes_token() {
        let url = build_socket_url("ws://localhost/ws", "a b&c").unwrap();
        assert_eq!(url.query(), Some("token=a+b%26c"));
    }

    #[test]
    fn empty_token_leaves_query_off() {
        let url = build_socket_url("ws://localhost/ws?token=stale", "").unwrap();
        assert_eq!(url.as_str(), "ws://localhost/ws");
    }

    #[test]
    fn rejects_http_scheme() {
        assert_matches!(
            build_socket_url("http://localhost/ws", "t"),
            Err(ConnectionError::InvalidUrl(m)) if m.contains("scheme")
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_matches!(
            build_socket_url("not a url", "t"),
            Err(ConnectionError::InvalidUrl(_))
        );
    }
}
