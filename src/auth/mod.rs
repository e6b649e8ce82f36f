//! Request authentication
//!
//! Basic and bearer auth render directly into an Authorization header;
//! OAuth2 goes through the [`oauth2`] resolver first and renders from the
//! acquired token.

pub mod oauth2;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::collection::AuthConfig;
use oauth2::CachedToken;

/// Build the Authorization header value for the resolved auth mode.
///
/// OAuth2 requires a token acquired by the resolver; `Inherit` must already
/// have been resolved away by the settings cascade.
pub fn authorization_header(
    auth: &AuthConfig,
    oauth_token: Option<&CachedToken>,
) -> Option<String> {
    match auth {
        AuthConfig::Inherit | AuthConfig::None => None,
        AuthConfig::Basic { username, password } => {
            let encoded = STANDARD.encode(format!("{username}:{password}"));
            Some(format!("Basic {encoded}"))
        }
        AuthConfig::Bearer { token } => Some(format!("Bearer {token}")),
        AuthConfig::OAuth2(_) => oauth_token.map(|token| token.authorization_header()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_auth_header() {
        let auth = AuthConfig::Basic {
            username: "user".to_string(),
            password: "password".to_string(),
        };
        assert_eq!(
            authorization_header(&auth, None),
            Some("Basic dXNlcjpwYXNzd29yZA==".to_string())
        );
    }

    #[test]
    fn test_bearer_auth_header() {
        let auth = AuthConfig::Bearer {
            token: "t-1".to_string(),
        };
        assert_eq!(authorization_header(&auth, None), Some("Bearer t-1".to_string()));
    }

    #[test]
    fn test_no_auth_yields_nothing() {
        assert_eq!(authorization_header(&AuthConfig::None, None), None);
        assert_eq!(authorization_header(&AuthConfig::Inherit, None), None);
    }
}
