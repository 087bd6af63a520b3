//! Refresh-token cookies for the HTTP surface.

use axum::http::header;
use uuid::Uuid;

/// Cookie name for the refresh token (long-lived, 15 days).
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";

/// Cookie name for the user id the refresh token was issued to.
pub const USER_COOKIE_NAME: &str = "refresh_user";

/// Refresh cookies are only sent to the auth routes.
pub const COOKIE_PATH: &str = "/api/auth";

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            if key.trim() == name {
                return Some(value.trim());
            }
        }
    }
    None
}

fn cookie(name: &str, value: &str, max_age: i64, secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path={}; Max-Age={}{}",
        name, value, COOKIE_PATH, max_age, secure
    )
}

/// `Set-Cookie` values carrying a refresh token and its owner.
pub fn refresh_cookies(token: &str, user_id: Uuid, max_age: i64, secure: bool) -> [String; 2] {
    [
        cookie(REFRESH_COOKIE_NAME, token, max_age, secure),
        cookie(USER_COOKIE_NAME, &user_id.to_string(), max_age, secure),
    ]
}

/// `Set-Cookie` values that delete both refresh cookies.
pub fn clear_refresh_cookies(secure: bool) -> [String; 2] {
    [
        cookie(REFRESH_COOKIE_NAME, "", 0, secure),
        cookie(USER_COOKIE_NAME, "", 0, secure),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_get_cookie_multiple() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("foo=bar; refresh_token=xyz789; refresh_user=abc"),
        );

        assert_eq!(get_cookie(&headers, "refresh_token"), Some("xyz789"));
        assert_eq!(get_cookie(&headers, "refresh_user"), Some("abc"));
        assert_eq!(get_cookie(&headers, "foo"), Some("bar"));
        assert_eq!(get_cookie(&headers, "missing"), None);
    }

    #[test]
    fn test_get_cookie_no_header() {
        let headers = axum::http::HeaderMap::new();
        assert_eq!(get_cookie(&headers, "refresh_token"), None);
    }

    #[test]
    fn test_get_cookie_with_spaces() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("  refresh_token = abc123  ; foo=bar"),
        );

        assert_eq!(get_cookie(&headers, "refresh_token"), Some("abc123"));
    }

    #[test]
    fn test_refresh_cookie_attributes() {
        let user_id = Uuid::new_v4();
        let [token, user] = refresh_cookies("tok", user_id, 1296000, true);

        assert_eq!(
            token,
            "refresh_token=tok; HttpOnly; SameSite=Strict; Path=/api/auth; Max-Age=1296000; Secure"
        );
        assert!(user.starts_with(&format!("refresh_user={};", user_id)));
        assert!(user.contains("HttpOnly"));
    }

    #[test]
    fn test_insecure_and_clear_cookies() {
        let [token, user] = clear_refresh_cookies(false);
        assert_eq!(
            token,
            "refresh_token=; HttpOnly; SameSite=Strict; Path=/api/auth; Max-Age=0"
        );
        assert!(user.starts_with("refresh_user=;"));
        assert!(!user.contains("Secure"));
    }
}
