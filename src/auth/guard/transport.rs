//! Token transport and request tenant hints.
//!
//! Tokens arrive as the session cookie or as `Authorization: Bearer`. When both
//! are present the cookie wins.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{AUTHORIZATION, COOKIE, HOST, InvalidHeaderValue},
};

pub const SESSION_COOKIE_NAME: &str = "warden_session";
pub const TENANT_HEADER: &str = "x-tenant";

#[must_use]
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    extract_cookie_token(headers).or_else(|| extract_bearer_token(headers))
}

fn extract_cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == SESSION_COOKIE_NAME).then(|| val.trim().to_string())
        })
        .find(|token| !token.is_empty())
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// `HttpOnly` session cookie; `Secure` only when the frontend is served over HTTPS.
///
/// # Errors
/// Returns an error if the token contains bytes not allowed in a header.
pub fn session_cookie(
    token: &str,
    max_age_seconds: i64,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// # Errors
/// Never in practice; the value is static apart from the `Secure` flag.
pub fn clear_session_cookie(secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Tenant reference carried by the request, if any: the `x-tenant` header
/// (subdomain or id), otherwise the first label of `Host` below `base_host`.
#[must_use]
pub fn tenant_hint(headers: &HeaderMap, base_host: &str) -> Option<String> {
    let explicit = headers
        .get(TENANT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(value) = explicit {
        return Some(value.to_string());
    }

    let host = headers.get(HOST)?.to_str().ok()?;
    let host = host.split(':').next()?.trim().to_ascii_lowercase();
    let base = base_host.trim().to_ascii_lowercase();
    let prefix = host.strip_suffix(&base)?.strip_suffix('.')?;
    // Only one label below the base host names a tenant.
    if prefix.is_empty() || prefix.contains('.') {
        return None;
    }
    Some(prefix.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(*name, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn cookie_wins_over_bearer() {
        let h = headers(&[
            ("authorization", "Bearer header-token"),
            ("cookie", "theme=dark; warden_session=cookie-token"),
        ]);
        assert_eq!(extract_session_token(&h), Some("cookie-token".to_string()));
    }

    #[test]
    fn bearer_is_used_without_cookie() {
        let h = headers(&[("authorization", "bearer  abc ")]);
        assert_eq!(extract_session_token(&h), Some("abc".to_string()));
        let empty = headers(&[("authorization", "Bearer ")]);
        assert_eq!(extract_session_token(&empty), None);
    }

    #[test]
    fn empty_cookie_falls_back_to_bearer() {
        let h = headers(&[
            ("authorization", "Bearer header-token"),
            ("cookie", "warden_session="),
        ]);
        assert_eq!(extract_session_token(&h), Some("header-token".to_string()));
    }

    #[test]
    fn cookie_flags() -> anyhow::Result<()> {
        let cookie = session_cookie("t", 60, true)?;
        let cookie = cookie.to_str()?;
        assert!(cookie.starts_with("warden_session=t;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=60"));
        assert!(cookie.ends_with("; Secure"));
        assert!(!clear_session_cookie(false)?.to_str()?.contains("Secure"));
        Ok(())
    }

    #[test]
    fn tenant_hint_from_header_or_host() {
        let explicit = headers(&[("x-tenant", " acme "), ("host", "globex.example.com")]);
        assert_eq!(tenant_hint(&explicit, "example.com"), Some("acme".to_string()));

        let host = headers(&[("host", "Globex.Example.com:8443")]);
        assert_eq!(tenant_hint(&host, "example.com"), Some("globex".to_string()));

        let apex = headers(&[("host", "example.com")]);
        assert_eq!(tenant_hint(&apex, "example.com"), None);

        let nested = headers(&[("host", "a.b.example.com")]);
        assert_eq!(tenant_hint(&nested, "example.com"), None);

        let foreign = headers(&[("host", "acme.other.org")]);
        assert_eq!(tenant_hint(&foreign, "example.com"), None);
    }
}
