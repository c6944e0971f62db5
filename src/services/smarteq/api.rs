//! Authenticated calls to the vehicle REST API
use std::{sync::Arc, time::Duration};

use reqwest::{
    header::{ACCEPT, USER_AGENT},
    RequestBuilder,
};
use serde_json::{json, Value};
use tap::Pipe;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::{
    endpoint,
    http::{self, send, send_json},
    meters::{AccountOperation, Meters, VehicleOperation},
    oauth::{AuthError, OAuthFlow},
    token::Token,
    Endpoints, DEVICE_USER_AGENT, LOGIN_APP_ID_EU,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A generic error return from the API
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request failed. Transport errors and error statuses are not distinguished.
    #[error("API request failed: {0}")]
    Request(#[from] http::Error),

    /// There is no token, a login is required.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Getting a token failed.
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
}

impl ApiError {
    /// Is an interactive login needed to recover?
    #[must_use]
    pub const fn requires_reauthentication(&self) -> bool {
        match self {
            Self::Request(_) => false,
            Self::NotAuthenticated => true,
            Self::Auth(err) => err.requires_reauthentication(),
        }
    }
}

/// Settings for the vehicle API.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Base URLs
    pub endpoints: Endpoints,

    /// Country sent with init data requests
    pub country_code: String,

    /// Locale sent with init data requests
    pub locale: String,
}

/// Client for the vehicle API.
pub struct ApiClient {
    client: reqwest::Client,
    oauth: Arc<OAuthFlow>,
    guid: String,
    settings: ApiSettings,
    meters: Meters,
}

impl ApiClient {
    /// Create a client using tokens from `oauth`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(
        settings: ApiSettings,
        oauth: Arc<OAuthFlow>,
        meters: Meters,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self {
            client,
            oauth,
            guid: Uuid::new_v4().to_string(),
            settings,
            meters,
        })
    }

    fn url(&self, path: &str) -> String {
        endpoint(&self.settings.endpoints.api_base, path)
    }

    async fn token(&self) -> Result<Token, ApiError> {
        self.oauth
            .get_cached_token()
            .await?
            .ok_or(ApiError::NotAuthenticated)
    }

    fn authorized(&self, request: RequestBuilder, token: &Token) -> RequestBuilder {
        request
            .header(ACCEPT, "*/*")
            .bearer_auth(token.access_token())
            .header("Guid", self.guid.as_str())
            .header("X-ApplicationName", LOGIN_APP_ID_EU)
            .header(USER_AGENT, DEVICE_USER_AGENT)
    }

    /// Get the account master data, including the vehicles it may access.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no valid token or the request fails.
    #[tracing::instrument(skip(self))]
    pub async fn get_user_info(&self) -> Result<Value, ApiError> {
        let token = self.token().await?;
        let url = self.url("/seqc/v0/users/current");
        let request = self.authorized(self.client.get(&url), &token);

        send_json::<Value>(&url, request)
            .await
            .pipe(|result| self.meters.account(&url, AccountOperation::GetUserInfo, result))?
            .pipe(Ok)
    }

    /// Get the static data of a vehicle.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no valid token or the request fails.
    #[tracing::instrument(skip(self))]
    pub async fn get_car_details_init(&self, vin: &str) -> Result<Value, ApiError> {
        let token = self.token().await?;
        let url = self.url(&format!("/seqc/v0/vehicles/{vin}/init-data"));
        let request = self
            .client
            .get(&url)
            .query(&[
                ("requestedData", "BOTH"),
                ("countryCode", self.settings.country_code.as_str()),
                ("locale", self.settings.locale.as_str()),
            ])
            .pipe(|request| self.authorized(request, &token));

        send_json::<Value>(&url, request)
            .await
            .pipe(|result| {
                self.meters
                    .vehicle(&url, VehicleOperation::GetInitData, vin, result)
            })?
            .pipe(Ok)
    }

    /// Get the current status of a vehicle.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no valid token or the request fails.
    #[tracing::instrument(skip(self))]
    pub async fn get_car_details(&self, vin: &str) -> Result<Value, ApiError> {
        let token = self.token().await?;
        let url = self.url(&format!("/seqc/v0/vehicles/{vin}/refresh-data"));
        let request = self.authorized(self.client.get(&url), &token);

        send_json::<Value>(&url, request)
            .await
            .pipe(|result| {
                self.meters
                    .vehicle(&url, VehicleOperation::GetRefreshData, vin, result)
            })?
            .pipe(Ok)
    }

    /// Get the commands a vehicle supports.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no valid token or the request fails.
    #[tracing::instrument(skip(self))]
    pub async fn get_car_capabilities_commands(&self, vin: &str) -> Result<Value, ApiError> {
        let token = self.token().await?;
        let url = self.url(&format!("/v1/vehicle/{vin}/capabilities/commands"));
        let request = self.authorized(self.client.get(&url), &token);

        send_json::<Value>(&url, request)
            .await
            .pipe(|result| {
                self.meters
                    .vehicle(&url, VehicleOperation::GetCapabilities, vin, result)
            })?
            .pipe(Ok)
    }

    /// Start preconditioning the cabin now.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no valid token or the request fails.
    #[tracing::instrument(skip(self))]
    pub async fn start_preheating(&self, vin: &str) -> Result<(), ApiError> {
        let token = self.token().await?;
        let url = self.url(&format!("/seqc/v0/vehicles/{vin}/precond"));
        let request = self
            .client
            .post(&url)
            .json(&json!({ "type": "immediate" }))
            .pipe(|request| self.authorized(request, &token));

        let response = send(&url, request).await.pipe(|result| {
            self.meters
                .vehicle(&url, VehicleOperation::StartPreheating, vin, result)
        })?;
        debug!("Preheating requested, got {}", response.status());
        Ok(())
    }
}
