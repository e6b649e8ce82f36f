//! Set-Cookie parsing
//!
//! The cookie jar itself is updated by the transport; this module parses
//! `Set-Cookie` response headers so the pipeline can report which cookies
//! changed (debug trail, `cookie_jar_updated` hook).

use cookie::Cookie;

/// Parse every `Set-Cookie` header in a response header list into typed
/// cookies. Multi-cookie header values are split first.
pub fn parse_set_cookie_headers(headers: &[(String, String)]) -> Vec<Cookie<'static>> {
    headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("set-cookie"))
        .flat_map(|(_, value)| split_cookies(value))
        .filter_map(|raw| Cookie::parse(raw).ok())
        .map(|cookie| cookie.into_owned())
        .collect()
}

/// Split a header value holding several cookies into individual cookie
/// strings.
///
/// Cookie values may themselves contain commas (an Expires date does), so
/// a plain split is wrong; a boundary is only a ", " followed by something
/// shaped like a new `name=` token.
pub fn split_cookies(value: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut rest = value;

    while let Some(pos) = rest.find(", ") {
        let after = &rest[pos + 2..];
        if starts_new_cookie(after) {
            current.push_str(&rest[..pos]);
            result.push(current.trim().to_string());
            current.clear();
        } else {
            current.push_str(&rest[..pos + 2]);
        }
        rest = after;
    }
    current.push_str(rest);

    if !current.trim().is_empty() {
        result.push(current.trim().to_string());
    }

    result
}

/// Check whether a string begins with a cookie name token followed by `=`.
fn starts_new_cookie(s: &str) -> bool {
    let mut chars = s.chars();

    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' || c == '-' => {}
        _ => return false,
    }

    for c in chars {
        if c == '=' {
            return true;
        }
        if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
            return false;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_cookies() {
        let value = "session=abc123; Path=/; Secure, tracking=xyz; Path=/";
        let result = split_cookies(value);
        assert_eq!(result.len(), 2);
        assert!(result[0].starts_with("session="));
        assert!(result[1].starts_with("tracking="));
    }

    #[test]
    fn test_split_cookies_with_expires_date() {
        // The Expires attribute contains a comma that is not a boundary.
        let value = "session=abc; Expires=Mon, 01 Jan 2024 00:00:00 GMT, other=xyz";
        let result = split_cookies(value);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_parse_from_header_list() {
        let headers = vec![
            ("content-type".to_string(), "text/plain".to_string()),
            ("set-cookie".to_string(), "a=1; Path=/".to_string()),
            ("set-cookie".to_string(), "b=2; HttpOnly, c=3".to_string()),
        ];
        let cookies = parse_set_cookie_headers(&headers);
        let names: Vec<_> = cookies.iter().map(|c| c.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(cookies[0].value(), "1");
    }

    #[test]
    fn test_no_set_cookie_headers() {
        let headers = vec![("content-type".to_string(), "text/plain".to_string())];
        assert!(parse_set_cookie_headers(&headers).is_empty());
    }
}
