//! Transport helpers shared by the login flow and the API client
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tap::Pipe;
use thiserror::Error;
use tracing::{debug, error};

/// A request to the vendor failed.
///
/// Timeouts, connection failures, non-success statuses and bodies that are not JSON all end
/// up here. They are transient from the caller's point of view.
#[derive(Debug, Error)]
pub enum Error {
    /// The request could not be sent or the body could not be read.
    #[error("Request to {url} failed: {source}")]
    Reqwest {
        /// The URL requested
        url: String,
        /// The cause
        source: reqwest::Error,
    },

    /// The body was not the JSON we expected.
    #[error("Invalid JSON from {url}: {source}")]
    Json {
        /// The URL requested
        url: String,
        /// The cause
        source: serde_json::Error,
    },

    /// The server answered with an error status.
    #[error("Request to {url} returned {status}")]
    Status {
        /// The URL requested
        url: String,
        /// The status returned
        status: StatusCode,
    },
}

impl Error {
    /// The status code returned by the server, if we got that far.
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Reqwest { .. } | Self::Json { .. } => None,
        }
    }

    /// The URL of the failed request.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Reqwest { url, .. } | Self::Json { url, .. } | Self::Status { url, .. } => url,
        }
    }
}

/// Turn transport failures and error statuses into an `Error`.
///
/// Redirects are passed through, the login flow reads their `Location` header.
#[tracing::instrument(skip(response))]
pub fn handle_error(
    url: &str,
    response: Result<reqwest::Response, reqwest::Error>,
) -> Result<reqwest::Response, Error> {
    match response {
        Ok(response) => {
            let status = response.status();
            if status.is_client_error() || status.is_server_error() {
                error!("Request to {url} returned {status}");
                return Err(Error::Status {
                    url: url.to_string(),
                    status,
                });
            }
            response.pipe(Ok)
        }
        Err(e) => {
            error!("Reqwest error: {}", e);
            Err(Error::Reqwest {
                url: url.to_string(),
                source: e,
            })
        }
    }
}

/// Read the body of a response as JSON.
///
/// # Errors
///
/// Returns an error if the body cannot be read or is not valid JSON for `U`.
pub async fn json_body<U: DeserializeOwned>(
    url: &str,
    response: reqwest::Response,
) -> Result<U, Error> {
    let text = response.text().await.map_err(|source| Error::Reqwest {
        url: url.to_string(),
        source,
    })?;

    serde_json::from_str(&text).map_err(|source| Error::Json {
        url: url.to_string(),
        source,
    })
}

/// Send a request.
///
/// # Errors
///
/// Returns an error if the request fails or the server returns an error status.
pub async fn send(url: &str, request: RequestBuilder) -> Result<reqwest::Response, Error> {
    debug!("send: {}", url);
    request.send().await.pipe(|result| handle_error(url, result))
}

/// Send a request and parse the JSON response.
///
/// # Errors
///
/// Returns an error if the request fails, the server returns an error status or the body
/// is not valid JSON for `U`.
pub async fn send_json<U: DeserializeOwned>(url: &str, request: RequestBuilder) -> Result<U, Error> {
    let response = send(url, request).await?;
    let value = json_body(url, response).await?;
    debug!("send done: {}", url);
    Ok(value)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use serde_json::Value;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    async fn fetch(server: &MockServer, status: u16, body: &str) -> Result<Value, Error> {
        Mock::given(method("GET"))
            .and(path("/doc"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(server)
            .await;

        let url = format!("{}/doc", server.uri());
        send_json(&url, reqwest::Client::new().get(&url)).await
    }

    #[tokio::test]
    async fn test_redirect_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/resume"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/done?code=abc"))
            .mount(&server)
            .await;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();
        let url = format!("{}/resume", server.uri());
        let response = send(&url, client.post(&url)).await.unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
    }

    #[tokio::test]
    async fn test_json_body() {
        let server = MockServer::start().await;
        let value = fetch(&server, 200, r#"{"a": 1}"#).await.unwrap();
        assert_eq!(value["a"], 1);
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start().await;
        let err = fetch(&server, 500, "oops").await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(err.url().ends_with("/doc"));
    }

    #[tokio::test]
    async fn test_not_json() {
        let server = MockServer::start().await;
        let err = fetch(&server, 200, "<html>").await.unwrap_err();
        assert!(matches!(err, Error::Json { .. }));
        assert_eq!(err.status(), None);
    }
}
