use axum::{async_trait, extract::FromRequestParts};
use chrono::{DateTime, Utc};
use http::{header::AUTHORIZATION, request::Parts};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AppError;

const IDENTITY_KEY_LEN: usize = 16;

/// OAuth token handed over by the authorization boundary. Never refreshed here.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn from_access_token(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: Some("Bearer".to_string()),
            refresh_token: None,
            expiry: None,
        }
    }

    /// Accepts the JSON token object, with or without a `Bearer ` prefix, or a
    /// bare opaque access token after `Bearer `.
    pub fn from_authorization_header(value: &str) -> Result<Self, AuthError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        let (token, had_scheme) = match value.split_once(' ') {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => (rest.trim(), true),
            _ => (value, false),
        };

        let credential = if token.starts_with('{') {
            serde_json::from_str::<Credential>(token).map_err(|e| {
                tracing::debug!("Error decoding token: {:?}", e);
                AuthError::InvalidToken
            })?
        } else if had_scheme {
            Credential::from_access_token(token)
        } else {
            return Err(AuthError::InvalidToken);
        };

        if credential.access_token.trim().is_empty() {
            return Err(AuthError::MissingCredentials);
        }

        Ok(credential)
    }

    /// Stable key for this session's ingestion run
    pub fn identity_key(&self) -> String {
        let mut key = format!("{:x}", Sha256::digest(self.access_token.as_bytes()));
        key.truncate(IDENTITY_KEY_LEN);
        key
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("expiry", &self.expiry)
            .finish()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    MissingCredentials,
    InvalidToken,
}

impl From<AuthError> for AppError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::MissingCredentials => {
                AppError::Unauthorized("Authorization header not provided".to_string())
            }
            AuthError::InvalidToken => AppError::Unauthorized("Invalid token format".to_string()),
        }
    }
}

/// The caller's credential plus the identity key derived from it.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub identity_key: String,
    pub credential: Credential,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::MissingCredentials)?
            .to_str()
            .map_err(|_| AuthError::InvalidToken)?;

        let credential = Credential::from_authorization_header(header)?;

        Ok(AuthenticatedUser {
            identity_key: credential.identity_key(),
            credential,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_token_with_bearer_prefix() {
        let header = r#"Bearer {"access_token":"ya29.abc","token_type":"Bearer","refresh_token":"1//r","expiry":"2024-05-01T10:00:00Z"}"#;
        let credential = Credential::from_authorization_header(header).unwrap();
        assert_eq!(credential.access_token, "ya29.abc");
        assert_eq!(credential.refresh_token.as_deref(), Some("1//r"));
        assert!(credential.expiry.is_some());
    }

    #[test]
    fn test_parse_json_token_without_prefix() {
        let credential =
            Credential::from_authorization_header(r#"{"access_token":"ya29.abc"}"#).unwrap();
        assert_eq!(credential.access_token, "ya29.abc");
        assert!(credential.expiry.is_none());
    }

    #[test]
    fn test_parse_opaque_bearer_token() {
        let credential = Credential::from_authorization_header("Bearer ya29.opaque").unwrap();
        assert_eq!(credential.access_token, "ya29.opaque");
    }

    #[test]
    fn test_rejects_bad_headers() {
        assert_eq!(
            Credential::from_authorization_header("").unwrap_err(),
            AuthError::MissingCredentials
        );
        assert_eq!(
            Credential::from_authorization_header("Bearer {not json").unwrap_err(),
            AuthError::InvalidToken
        );
        assert_eq!(
            Credential::from_authorization_header("just-a-token").unwrap_err(),
            AuthError::InvalidToken
        );
        assert_eq!(
            Credential::from_authorization_header(r#"{"access_token":""}"#).unwrap_err(),
            AuthError::MissingCredentials
        );
    }

    #[test]
    fn test_identity_key_is_stable_and_short() {
        let a = Credential::from_access_token("token-one");
        let b = Credential::from_access_token("token-one");
        let c = Credential::from_access_token("token-two");

        assert_eq!(a.identity_key(), b.identity_key());
        assert_ne!(a.identity_key(), c.identity_key());
        assert_eq!(a.identity_key().len(), 16);
    }

    #[test]
    fn test_debug_redacts_access_token() {
        let credential = Credential::from_access_token("super-secret");
        assert!(!format!("{:?}", credential).contains("super-secret"));
    }
}
