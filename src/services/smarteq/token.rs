//! OAuth tokens and the file they are cached in
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::services::persistent_state::JsonFile;

/// Tokens this close to expiry are treated as expired.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// Token as returned by the token endpoint.
#[derive(Deserialize)]
pub struct RawToken {
    access_token: String,
    refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: i64,
    scope: Option<String>,
    id_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl std::fmt::Debug for RawToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawToken")
            .field("access_token", &"[censored]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[censored]"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("id_token", &self.id_token.as_ref().map(|_| "[censored]"))
            .finish()
    }
}

/// The token endpoint returned a lifetime that cannot be stamped.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("Token lifetime {0} s is out of range")]
pub struct InvalidExpiry(pub i64);

/// Token to access the vehicle API.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Token {
    access_token: String,
    refresh_token: Option<String>,

    /// Usually `Bearer`.
    pub token_type: String,

    /// Lifetime in seconds, as granted.
    pub expires_in: i64,

    /// Unix time in seconds the token expires.
    pub expires_at: i64,

    /// Granted scopes.
    pub scope: Option<String>,

    id_token: Option<String>,
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[censored]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[censored]"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .field("id_token", &self.id_token.as_ref().map(|_| "[censored]"))
            .finish()
    }
}

impl Token {
    /// Stamp a token received at `now`.
    ///
    /// A response without a refresh token keeps `previous_refresh_token`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidExpiry` if `expires_in` does not fit a timestamp.
    pub fn from_raw(
        raw: RawToken,
        now: DateTime<Utc>,
        previous_refresh_token: Option<String>,
    ) -> Result<Self, InvalidExpiry> {
        let expires_at = now
            .timestamp()
            .checked_add(raw.expires_in)
            .filter(|at| DateTime::from_timestamp(*at, 0).is_some())
            .ok_or(InvalidExpiry(raw.expires_in))?;

        Ok(Self {
            access_token: raw.access_token,
            refresh_token: raw.refresh_token.or(previous_refresh_token),
            token_type: raw.token_type,
            expires_in: raw.expires_in,
            expires_at,
            scope: raw.scope,
            id_token: raw.id_token,
        })
    }

    /// The bearer secret.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// The refresh secret, if granted.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Does the token expire within the next minute?
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now.timestamp() < EXPIRY_MARGIN_SECS
    }
}

/// The token cache file.
///
/// Failures are logged and swallowed, a broken cache just means logging in again.
pub struct TokenStore {
    file: JsonFile<Token>,
}

impl TokenStore {
    /// Use the cache file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonFile::new(path),
        }
    }

    /// Read the cached token.
    #[must_use]
    pub fn load(&self) -> Option<Token> {
        match self.file.load() {
            Ok(token) => Some(token),
            Err(err) if err.is_not_found() => {
                debug!("No cached token at {}", self.file.path().display());
                None
            }
            Err(err) => {
                error!("Failed to load cached token: {err}");
                None
            }
        }
    }

    /// Replace the cached token.
    pub fn save(&self, token: &Token) {
        if let Err(err) = self.file.save(token) {
            error!("Failed to save token: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawToken {
        serde_json::from_value(value).unwrap()
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[rstest]
    #[case(0, true)]
    #[case(59, true)]
    #[case(60, false)]
    #[case(3600, false)]
    #[case(-10, true)]
    fn test_is_expired(#[case] remaining: i64, #[case] expected: bool) {
        let token = Token::from_raw(
            raw(json!({"access_token": "a", "expires_in": remaining})),
            now(),
            None,
        )
        .unwrap();
        assert_eq!(token.expires_at, now().timestamp() + remaining);
        assert_eq!(token.is_expired(now()), expected);
    }

    #[test]
    fn test_refresh_token_is_inherited() {
        let token = Token::from_raw(
            raw(json!({"access_token": "a", "expires_in": 7200})),
            now(),
            Some("old".into()),
        )
        .unwrap();
        assert_eq!(token.refresh_token(), Some("old"));
        assert_eq!(token.token_type, "Bearer");

        let token = Token::from_raw(
            raw(json!({"access_token": "a", "refresh_token": "new", "expires_in": 7200})),
            now(),
            Some("old".into()),
        )
        .unwrap();
        assert_eq!(token.refresh_token(), Some("new"));
    }

    #[rstest]
    #[case(i64::MAX)]
    #[case(i64::MIN)]
    #[case(300_000_000_000_000)]
    fn test_expiry_out_of_range(#[case] expires_in: i64) {
        let err = Token::from_raw(
            raw(json!({"access_token": "a", "expires_in": expires_in})),
            now(),
            None,
        )
        .unwrap_err();
        assert_eq!(err, InvalidExpiry(expires_in));
    }

    #[test]
    fn test_debug_is_censored() {
        let token = Token::from_raw(
            raw(json!({"access_token": "secret-a", "refresh_token": "secret-r", "expires_in": 1})),
            now(),
            None,
        )
        .unwrap();
        let debug = format!("{token:?}");
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token"));
        assert!(store.load().is_none());

        let token = Token::from_raw(
            raw(json!({"access_token": "a", "refresh_token": "r", "expires_in": 7200, "scope": "openid"})),
            now(),
            None,
        )
        .unwrap();
        store.save(&token);
        store.save(&token);
        assert_eq!(store.load().unwrap(), token);
    }

    #[test]
    fn test_store_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token");
        std::fs::write(&path, "[]").unwrap();
        assert!(TokenStore::new(path).load().is_none());
    }
}
