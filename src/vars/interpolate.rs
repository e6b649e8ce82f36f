//! Request interpolation
//!
//! Substitutes `{{name}}` placeholders in every string field of a request
//! using the flattened variable map. Unresolved tokens become the empty
//! string so they never leak into the wire request. Substitution is a
//! single pass: a substituted value containing `{{...}}` is not expanded
//! again.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value as JsonValue;

use crate::collection::{AuthConfig, RequestBodyDef, RequestDef};

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.$-]+)\s*\}\}").expect("valid token regex"));

/// Substitute placeholders in a single string.
pub fn interpolate_str(input: &str, flat: &IndexMap<String, JsonValue>) -> String {
    TOKEN_RE
        .replace_all(input, |caps: &Captures| {
            flat.get(&caps[1]).map(value_to_string).unwrap_or_default()
        })
        .to_string()
}

/// Stringify a variable value the way a template expects: bare strings stay
/// bare, everything else renders as JSON.
pub fn value_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// Interpolate every string field of the request in place: URL, headers,
/// query params, body, and auth fields.
pub fn interpolate_request(request: &mut RequestDef, flat: &IndexMap<String, JsonValue>) {
    request.url = interpolate_str(&request.url, flat);

    for header in &mut request.headers {
        header.name = interpolate_str(&header.name, flat);
        header.value = interpolate_str(&header.value, flat);
    }

    for param in &mut request.params {
        param.name = interpolate_str(&param.name, flat);
        param.value = interpolate_str(&param.value, flat);
    }

    match &mut request.body {
        RequestBodyDef::None => {}
        RequestBodyDef::Text { content }
        | RequestBodyDef::Json { content }
        | RequestBodyDef::Xml { content } => {
            *content = interpolate_str(content, flat);
        }
        RequestBodyDef::FormUrlEncoded { fields } => {
            for field in fields {
                field.name = interpolate_str(&field.name, flat);
                field.value = interpolate_str(&field.value, flat);
            }
        }
    }

    match &mut request.auth {
        AuthConfig::Inherit | AuthConfig::None => {}
        AuthConfig::Basic { username, password } => {
            *username = interpolate_str(username, flat);
            *password = interpolate_str(password, flat);
        }
        AuthConfig::Bearer { token } => {
            *token = interpolate_str(token, flat);
        }
        AuthConfig::OAuth2(config) => {
            config.client_id = interpolate_str(&config.client_id, flat);
            config.token_url = interpolate_str(&config.token_url, flat);
            if let Some(secret) = &mut config.client_secret {
                *secret = interpolate_str(secret, flat);
            }
            if let Some(authorize_url) = &mut config.authorize_url {
                *authorize_url = interpolate_str(authorize_url, flat);
            }
            if let Some(callback_url) = &mut config.callback_url {
                *callback_url = interpolate_str(callback_url, flat);
            }
            if let Some(username) = &mut config.username {
                *username = interpolate_str(username, flat);
            }
            if let Some(password) = &mut config.password {
                *password = interpolate_str(password, flat);
            }
            if let Some(scope) = &mut config.scope {
                *scope = interpolate_str(scope, flat);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::HeaderEntry;

    fn flat(pairs: &[(&str, JsonValue)]) -> IndexMap<String, JsonValue> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_substitute_simple() {
        let map = flat(&[("base", serde_json::json!("https://api"))]);
        assert_eq!(interpolate_str("{{base}}/x", &map), "https://api/x");
    }

    #[test]
    fn test_missing_token_becomes_empty() {
        let map = IndexMap::new();
        assert_eq!(interpolate_str("{{missing}}/path", &map), "/path");
    }

    #[test]
    fn test_single_pass_no_recursive_expansion() {
        let map = flat(&[
            ("outer", serde_json::json!("{{inner}}")),
            ("inner", serde_json::json!("secret")),
        ]);
        // The substituted value is emitted verbatim, not expanded again.
        assert_eq!(interpolate_str("{{outer}}", &map), "{{inner}}");
    }

    #[test]
    fn test_non_string_values_render_as_json() {
        let map = flat(&[
            ("count", serde_json::json!(3)),
            ("flag", serde_json::json!(true)),
            ("user", serde_json::json!({"id": 1})),
        ]);
        assert_eq!(
            interpolate_str("{{count}}-{{flag}}-{{user}}", &map),
            "3-true-{\"id\":1}"
        );
    }

    #[test]
    fn test_whitespace_inside_braces() {
        let map = flat(&[("host", serde_json::json!("example.org"))]);
        assert_eq!(interpolate_str("https://{{ host }}/", &map), "https://example.org/");
    }

    #[test]
    fn test_interpolate_request_fields() {
        let map = flat(&[
            ("base", serde_json::json!("https://api.example.com")),
            ("token", serde_json::json!("t-123")),
            ("name", serde_json::json!("alice")),
        ]);
        let mut request = RequestDef {
            method: "POST".to_string(),
            url: "{{base}}/users".to_string(),
            headers: vec![HeaderEntry::new("Authorization", "Bearer {{token}}")],
            body: RequestBodyDef::Json {
                content: r#"{"name": "{{name}}"}"#.to_string(),
            },
            ..Default::default()
        };

        interpolate_request(&mut request, &map);

        assert_eq!(request.url, "https://api.example.com/users");
        assert_eq!(request.headers[0].value, "Bearer t-123");
        match &request.body {
            RequestBodyDef::Json { content } => assert_eq!(content, r#"{"name": "alice"}"#),
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_interpolate_auth_fields() {
        let map = flat(&[("secret", serde_json::json!("s3cret"))]);
        let mut request = RequestDef {
            auth: AuthConfig::Bearer {
                token: "{{secret}}".to_string(),
            },
            ..Default::default()
        };
        interpolate_request(&mut request, &map);
        assert!(matches!(request.auth, AuthConfig::Bearer { ref token } if token == "s3cret"));
    }

    #[test]
    fn test_process_env_token() {
        let map = flat(&[("process.env.API_HOST", serde_json::json!("internal.example"))]);
        assert_eq!(
            interpolate_str("https://{{process.env.API_HOST}}/v1", &map),
            "https://internal.example/v1"
        );
    }
}
