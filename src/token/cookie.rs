//! Gate cookies: the client-held artifact carrying an access token.
//!
//! One cookie per resource, named `token_<resource_id>`.

use std::collections::HashMap;

/// Cookie name prefix; the resource id follows
pub const COOKIE_PREFIX: &str = "token_";

/// Name of the cookie holding the token for `resource_id`
pub fn cookie_name(resource_id: u64) -> String {
    format!("{COOKIE_PREFIX}{resource_id}")
}

/// Render a `Set-Cookie` header value for a freshly issued token.
pub fn token_cookie(resource_id: u64, token: &str, ttl_seconds: u64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
        cookie_name(resource_id),
        token,
        ttl_seconds
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Parse one or more `Cookie` header values into name/value pairs.
///
/// The first occurrence of a name wins.
pub fn parse_cookie_header<'a, I>(headers: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut cookies = HashMap::new();
    for header in headers {
        for pair in header.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = value.trim().trim_matches('"');
            cookies
                .entry(name.to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    cookies
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_name() {
        assert_eq!(cookie_name(42), "token_42");
    }

    #[test]
    fn test_set_cookie_attributes() {
        let plain = token_cookie(42, "abc=", 600, false);
        assert_eq!(plain, "token_42=abc=; Max-Age=600; Path=/; HttpOnly; SameSite=Lax");

        let secure = token_cookie(42, "abc=", 600, true);
        assert!(secure.ends_with("; Secure"));
    }

    #[test]
    fn test_parse_cookie_header() {
        let cookies = parse_cookie_header(["a=1; token_42=NDJ8MTIzfGFi==", "b=\"2\"; a=9"]);
        assert_eq!(cookies.get("a").map(String::as_str), Some("1"));
        assert_eq!(cookies.get("b").map(String::as_str), Some("2"));
        // base64 padding survives: only the first '=' separates name and value
        assert_eq!(
            cookies.get("token_42").map(String::as_str),
            Some("NDJ8MTIzfGFi==")
        );
    }

    #[test]
    fn test_parse_ignores_garbage() {
        let cookies = parse_cookie_header(["novalue; =x; ;"]);
        assert!(cookies.is_empty());
    }
}
