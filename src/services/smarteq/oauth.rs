//! PIN based login and token lifecycle
//!
//! Logging in takes two calls. [`OAuthFlow::request_pin`] starts an authorization code flow with
//! a fresh PKCE pair and asks the identity provider to mail a one time passcode.
//! [`OAuthFlow::request_access_token`] submits that passcode, follows the resume URL by hand
//! and exchanges the resulting code for a token.
//!
//! After that [`OAuthFlow::get_cached_token`] hands out a valid token, refreshing it when
//! needed. Concurrent callers share one refresh.
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::Utc;
use reqwest::{
    cookie::Jar,
    header::{ACCEPT, ACCEPT_LANGUAGE, LOCATION, ORIGIN, REFERER, USER_AGENT},
    redirect, RequestBuilder,
};
use serde_json::{json, Value};
use tap::Pipe;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    endpoint,
    http::{self, json_body, send, send_json},
    meters::{AuthOperation, Meters},
    pkce::{generate_pkce_pair, PkcePair},
    token::{RawToken, Token, TokenStore},
    Endpoints, Region, BROWSER_USER_AGENT, DEVICE_USER_AGENT, LOGIN_APP_ID_EU, LOGIN_SCOPE,
    REDIRECT_URI,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_JSON: &str = "application/json, text/plain, */*";

/// Something went wrong logging in or refreshing the token.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The identity provider could not be reached, try again later.
    #[error("Authentication request failed: {0}")]
    Request(#[from] http::Error),

    /// The identity provider did not accept the login, a new PIN is required.
    #[error("Login rejected: {0}")]
    Rejected(String),

    /// The identity provider did not accept the refresh token.
    #[error("Refresh token rejected: {0}")]
    RefreshRejected(http::Error),

    /// There is no refresh token to refresh with.
    #[error("No refresh token available")]
    MissingRefreshToken,

    /// A PIN was submitted without requesting one first.
    #[error("No PIN has been requested for this account")]
    NoPinRequested,
}

impl AuthError {
    /// Is an interactive login needed to recover?
    #[must_use]
    pub const fn requires_reauthentication(&self) -> bool {
        !matches!(self, Self::Request(_))
    }

    /// A 4xx from a login step means the login itself was refused.
    fn from_login(err: http::Error) -> Self {
        match err.status() {
            Some(status) if status.is_client_error() => Self::Rejected(err.to_string()),
            _ => Self::Request(err),
        }
    }

    fn from_refresh(err: http::Error) -> Self {
        match err.status() {
            Some(status) if status.is_client_error() => Self::RefreshRejected(err),
            _ => Self::Request(err),
        }
    }
}

/// Where the login is at.
#[derive(Debug, Clone)]
pub enum AuthState {
    /// No valid token and no login in progress
    NoToken,

    /// A PIN was sent, waiting for it to be submitted
    PinRequested,

    /// The PIN was accepted, the token exchange is in progress
    OtpSubmitted,

    /// We have a valid token
    Authorized(Token),
}

/// The response of the identity provider to a PIN request.
#[derive(Debug, Clone)]
pub struct PinRequestResult {
    /// Body of the OTP request
    pub response: Value,
}

enum LoginState {
    Idle,
    PinRequested {
        identifier: String,
        resume: String,
        pkce: PkcePair,
    },
    OtpSubmitted,
}

/// Settings for the identity provider.
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    /// Base URLs
    pub endpoints: Endpoints,

    /// Account region
    pub region: Region,

    /// Locale sent with token refreshes
    pub locale: String,
}

/// Login and token refresh against the identity provider.
pub struct OAuthFlow {
    browser: reqwest::Client,
    no_redirect: reqwest::Client,
    settings: OAuthSettings,
    store: TokenStore,
    meters: Meters,
    token: tokio::sync::Mutex<Option<Token>>,
    login: Mutex<LoginState>,
}

impl OAuthFlow {
    /// Create the flow, nothing is loaded or sent yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP clients cannot be created.
    pub fn new(
        settings: OAuthSettings,
        store: TokenStore,
        meters: Meters,
    ) -> Result<Self, reqwest::Error> {
        let jar = Arc::new(Jar::default());

        let browser = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .timeout(DEFAULT_TIMEOUT)
            .build()?;

        let no_redirect = reqwest::Client::builder()
            .cookie_provider(jar)
            .redirect(redirect::Policy::none())
            .timeout(DEFAULT_TIMEOUT)
            .build()?;

        Ok(Self {
            browser,
            no_redirect,
            settings,
            store,
            meters,
            token: tokio::sync::Mutex::new(None),
            login: Mutex::new(LoginState::Idle),
        })
    }

    fn set_login(&self, state: LoginState) {
        *self.login.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Claim the pending PIN request of `identifier`.
    ///
    /// A request for another identifier is left in place.
    fn take_pin_request(&self, identifier: &str) -> Option<(String, PkcePair)> {
        let mut login = self.login.lock().unwrap_or_else(PoisonError::into_inner);
        match &*login {
            LoginState::PinRequested {
                identifier: requested,
                ..
            } if requested == identifier => {}
            LoginState::Idle | LoginState::PinRequested { .. } | LoginState::OtpSubmitted => {
                return None
            }
        }

        match std::mem::replace(&mut *login, LoginState::Idle) {
            LoginState::PinRequested { resume, pkce, .. } => Some((resume, pkce)),
            LoginState::Idle | LoginState::OtpSubmitted => None,
        }
    }

    fn url(&self, path: &str) -> String {
        endpoint(&self.settings.endpoints.login_base, path)
    }

    fn browser_headers(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(ACCEPT_LANGUAGE, "de-DE,de;q=0.9")
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(REFERER, self.url("/ciam/auth/login"))
    }

    fn json_headers(&self, request: RequestBuilder) -> RequestBuilder {
        let origin = self
            .settings
            .endpoints
            .login_base
            .origin()
            .ascii_serialization();
        self.browser_headers(request)
            .header(ACCEPT, ACCEPT_JSON)
            .header(ORIGIN, origin)
    }

    fn region_headers(&self, request: RequestBuilder) -> RequestBuilder {
        if self.settings.region == Region::Europe {
            request.header("X-ApplicationName", LOGIN_APP_ID_EU)
        } else {
            request
        }
    }

    /// Where is the login at?
    pub async fn state(&self) -> AuthState {
        let login = match &*self.login.lock().unwrap_or_else(PoisonError::into_inner) {
            LoginState::Idle => None,
            LoginState::PinRequested { .. } => Some(AuthState::PinRequested),
            LoginState::OtpSubmitted => Some(AuthState::OtpSubmitted),
        };
        if let Some(state) = login {
            return state;
        }

        match &*self.token.lock().await {
            Some(token) if !token.is_expired(Utc::now()) => AuthState::Authorized(token.clone()),
            _ => AuthState::NoToken,
        }
    }

    /// Ask the identity provider to send a PIN to `identifier`.
    ///
    /// Any login in progress is abandoned.
    ///
    /// # Errors
    ///
    /// Returns an error if one of the login steps fails.
    #[tracing::instrument(skip(self))]
    pub async fn request_pin(&self, identifier: &str) -> Result<PinRequestResult, AuthError> {
        info!("Requesting PIN");
        self.set_login(LoginState::Idle);

        let pkce = generate_pkce_pair();
        let resume = self.authorize(&pkce).await?;
        debug!("Got resume URL: {resume}");

        self.login_user(identifier).await?;
        let response = self.request_otp(identifier).await?;

        self.set_login(LoginState::PinRequested {
            identifier: identifier.to_string(),
            resume,
            pkce,
        });
        info!("PIN requested");
        Ok(PinRequestResult { response })
    }

    async fn authorize(&self, pkce: &PkcePair) -> Result<String, AuthError> {
        let url = self.url("/as/authorization.oauth2");
        let request = self
            .browser
            .get(&url)
            .query(&[
                ("client_id", LOGIN_APP_ID_EU),
                ("response_type", "code"),
                ("scope", LOGIN_SCOPE),
                ("redirect_uri", REDIRECT_URI),
                ("code_challenge", pkce.code_challenge.as_str()),
                ("code_challenge_method", "S256"),
            ])
            .header(ACCEPT, ACCEPT_HTML)
            .pipe(|request| self.browser_headers(request));

        let response = send(&url, request)
            .await
            .map_err(AuthError::from_login)
            .pipe(|result| self.meters.auth(&url, AuthOperation::Authorize, result))?;

        response
            .url()
            .query_pairs()
            .find(|(key, _)| key == "resume")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| AuthError::Rejected("No resume URL in authorization redirect".into()))
    }

    async fn login_user(&self, identifier: &str) -> Result<(), AuthError> {
        let url = self.url("/ciam/auth/login/user");
        let request = self
            .browser
            .post(&url)
            .json(&json!({ "username": identifier }))
            .pipe(|request| self.json_headers(request));

        let response = send(&url, request)
            .await
            .map_err(AuthError::from_login)
            .pipe(|result| self.meters.auth(&url, AuthOperation::LoginUser, result))?;
        debug!("Login user returned {}", response.status());
        Ok(())
    }

    async fn request_otp(&self, identifier: &str) -> Result<Value, AuthError> {
        let url = self.url("/ciam/auth/login/otp");
        let request = self
            .browser
            .put(&url)
            .json(&json!({ "username": identifier }))
            .pipe(|request| self.json_headers(request));

        send_json(&url, request)
            .await
            .map_err(AuthError::from_login)
            .pipe(|result| self.meters.auth(&url, AuthOperation::RequestOtp, result))
    }

    /// Submit the PIN and exchange it for a token.
    ///
    /// The token is cached and saved.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NoPinRequested` if `request_pin` was not called for this
    /// identifier. A pending request for another identifier stays valid. If one of the login
    /// steps fails a new PIN is needed.
    #[tracing::instrument(skip(self, pin))]
    pub async fn request_access_token(
        &self,
        identifier: &str,
        pin: &str,
    ) -> Result<Token, AuthError> {
        let (resume, pkce) = self
            .take_pin_request(identifier)
            .ok_or(AuthError::NoPinRequested)?;

        let result = self.complete_login(identifier, pin, &resume, &pkce).await;
        self.set_login(LoginState::Idle);
        let token = result?;

        self.store.save(&token);
        *self.token.lock().await = Some(token.clone());
        info!("Login complete, token expires at {}", token.expires_at);
        Ok(token)
    }

    async fn complete_login(
        &self,
        identifier: &str,
        pin: &str,
        resume: &str,
        pkce: &PkcePair,
    ) -> Result<Token, AuthError> {
        let login_token = self.submit_otp(identifier, pin).await?;
        self.set_login(LoginState::OtpSubmitted);

        let code = self.resume(resume, &login_token).await?;
        let raw = self.exchange_code(&code, pkce).await?;
        Token::from_raw(raw, Utc::now(), None)
            .map_err(|err| AuthError::Rejected(err.to_string()))
    }

    async fn submit_otp(&self, identifier: &str, pin: &str) -> Result<String, AuthError> {
        let url = self.url("/ciam/auth/login/otp");
        let request = self
            .browser
            .post(&url)
            .json(&json!({ "username": identifier, "password": pin, "rememberMe": true }))
            .pipe(|request| self.json_headers(request));

        let body: Value = send_json(&url, request)
            .await
            .map_err(AuthError::from_login)
            .pipe(|result| self.meters.auth(&url, AuthOperation::SubmitOtp, result))?;

        body.get("token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AuthError::Rejected("PIN was not accepted".into()))
    }

    async fn resume(&self, resume: &str, login_token: &str) -> Result<String, AuthError> {
        let url = self.url(resume);
        let request = self
            .no_redirect
            .post(&url)
            .header(ACCEPT, ACCEPT_HTML)
            .form(&[("token", login_token)])
            .pipe(|request| self.browser_headers(request));

        let response = send(&url, request)
            .await
            .map_err(AuthError::from_login)
            .pipe(|result| self.meters.auth(&url, AuthOperation::Resume, result))?;

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AuthError::Rejected("No redirect after submitting the PIN".into()))?;

        self.settings
            .endpoints
            .login_base
            .join(location)
            .map_err(|err| AuthError::Rejected(format!("Invalid redirect {location}: {err}")))?
            .query_pairs()
            .find(|(key, _)| key == "code")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| AuthError::Rejected("No authorization code in redirect".into()))
    }

    async fn exchange_code(&self, code: &str, pkce: &PkcePair) -> Result<RawToken, AuthError> {
        let url = self.url("/as/token.oauth2");
        let request = self
            .no_redirect
            .post(&url)
            .header(ACCEPT, ACCEPT_JSON)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", REDIRECT_URI),
                ("code_verifier", pkce.code_verifier.as_str()),
                ("client_id", LOGIN_APP_ID_EU),
            ])
            .pipe(|request| self.browser_headers(request));

        send_json(&url, request)
            .await
            .map_err(AuthError::from_login)
            .pipe(|result| self.meters.auth(&url, AuthOperation::ExchangeCode, result))
    }

    /// Refresh using `refresh_token`.
    ///
    /// The new token is cached and saved.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::RefreshRejected` if the identity provider refuses the refresh
    /// token, or `AuthError::Request` if it could not be reached.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<Token, AuthError> {
        let mut cached = self.token.lock().await;
        let token = self.refresh_locked(refresh_token).await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Refresh the current token, even if it has not expired.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::MissingRefreshToken` if there is no token with a refresh token, or
    /// an error if the refresh fails.
    pub async fn renew(&self) -> Result<Token, AuthError> {
        let mut cached = self.token.lock().await;
        let refresh_token = cached
            .clone()
            .or_else(|| self.store.load())
            .and_then(|token| token.refresh_token().map(str::to_string))
            .ok_or(AuthError::MissingRefreshToken)?;

        let token = self.refresh_locked(&refresh_token).await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Get a token that is valid for at least another minute.
    ///
    /// Returns `Ok(None)` if there is no token, or it expired without a refresh token. An
    /// interactive login is required then.
    ///
    /// # Errors
    ///
    /// Returns an error if the token had to be refreshed and the refresh failed.
    pub async fn get_cached_token(&self) -> Result<Option<Token>, AuthError> {
        // Held across the refresh, concurrent callers wait for its result.
        let mut cached = self.token.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref().filter(|token| !token.is_expired(now)) {
            return Ok(Some(token.clone()));
        }

        let Some(token) = self.store.load().or_else(|| cached.take()) else {
            debug!("No cached token");
            return Ok(None);
        };

        if !token.is_expired(now) {
            *cached = Some(token.clone());
            return Ok(Some(token));
        }

        let Some(refresh_token) = token.refresh_token() else {
            warn!("Token expired without a refresh token, login required");
            *cached = None;
            return Ok(None);
        };

        info!("Token expired, refreshing");
        let token = self.refresh_locked(refresh_token).await?;
        *cached = Some(token.clone());
        Ok(Some(token))
    }

    /// Caller must hold the token lock.
    #[tracing::instrument(skip_all)]
    async fn refresh_locked(&self, refresh_token: &str) -> Result<Token, AuthError> {
        let url = self.url("/as/token.oauth2");
        let request = self
            .no_redirect
            .post(&url)
            .header("X-SessionId", Uuid::new_v4().to_string())
            .header("X-TrackingId", Uuid::new_v4().to_string())
            .header("X-Locale", self.settings.locale.as_str())
            .header(USER_AGENT, DEVICE_USER_AGENT)
            .header("Stage", "prod")
            .header("X-AuthMode", "CIAMNG")
            .header("device-uuid", Uuid::new_v4().to_string())
            .form(&[
                ("client_id", LOGIN_APP_ID_EU),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .pipe(|request| self.region_headers(request));

        let result = match send(&url, request).await {
            Ok(response) => json_body::<RawToken>(&url, response).await,
            Err(err) => Err(err),
        };

        let raw = result
            .map_err(AuthError::from_refresh)
            .pipe(|result| self.meters.auth(&url, AuthOperation::RefreshToken, result))?;

        let token = Token::from_raw(raw, Utc::now(), Some(refresh_token.to_string()))
            .map_err(|err| AuthError::Rejected(err.to_string()))?;
        self.store.save(&token);
        info!("Token refreshed, expires at {}", token.expires_at);
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use reqwest::StatusCode;

    fn status_error(status: StatusCode) -> http::Error {
        http::Error::Status {
            url: "http://localhost/as/token.oauth2".into(),
            status,
        }
    }

    #[test]
    fn test_error_classification() {
        let err = AuthError::from_refresh(status_error(StatusCode::BAD_REQUEST));
        assert!(matches!(err, AuthError::RefreshRejected(_)));
        assert!(err.requires_reauthentication());

        let err = AuthError::from_refresh(status_error(StatusCode::BAD_GATEWAY));
        assert!(matches!(err, AuthError::Request(_)));
        assert!(!err.requires_reauthentication());

        let err = AuthError::from_login(status_error(StatusCode::UNAUTHORIZED));
        assert!(matches!(err, AuthError::Rejected(_)));

        assert!(AuthError::NoPinRequested.requires_reauthentication());
        assert!(AuthError::MissingRefreshToken.requires_reauthentication());
    }

    #[tokio::test]
    async fn test_submit_without_request() {
        let dir = tempfile::tempdir().unwrap();
        let flow = OAuthFlow::new(
            OAuthSettings {
                endpoints: Endpoints::default(),
                region: Region::Europe,
                locale: "de-DE".into(),
            },
            TokenStore::new(dir.path().join("token")),
            Meters::new(),
        )
        .unwrap();

        let err = flow.request_access_token("a@example.com", "1234").await.unwrap_err();
        assert!(matches!(err, AuthError::NoPinRequested));
        assert!(matches!(flow.state().await, AuthState::NoToken));
        assert!(matches!(flow.renew().await, Err(AuthError::MissingRefreshToken)));
        assert!(flow.get_cached_token().await.unwrap().is_none());
    }
}
