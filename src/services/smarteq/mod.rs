//! Client for the smart EQ connect cloud
pub mod api;
pub mod http;
pub mod meters;
pub mod normalize;
pub mod oauth;
pub mod pkce;
pub mod token;

use serde::{Deserialize, Serialize};
use url::Url;

/// Application id registered with the identity provider.
pub const LOGIN_APP_ID_EU: &str = "70d89501-938c-4bec-82d0-6abb550b0825";

/// Identity provider of the manufacturer.
pub const LOGIN_BASE_URI: &str = "https://id.mercedes-benz.com";

/// Vehicle REST API.
pub const REST_API_BASE: &str = "https://oneapp.microservice.smart.com";

/// Where the identity provider sends the authorization code.
pub const REDIRECT_URI: &str = "https://oneapp.microservice.smart.mercedes-benz.com";

/// Scopes requested at login.
pub const LOGIN_SCOPE: &str = "openid profile email phone ciam-uid offline_access";

/// Manufacturer reported for every registered device.
pub const MANUFACTURER: &str = "Mercedes Benz";

/// The vendor API only talks to the official app.
pub const DEVICE_USER_AGENT: &str = "Device: iPhone13,3; OS-version: iOS_15.0.2; App-Name: smart EQ control; App-Version: 3.0; Build: 202108260942; Language: de_DE";

/// Browser user agent used for the login pages.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 15_0_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148";

/// Account region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Region {
    /// Europe
    #[default]
    Europe,

    /// North America
    #[serde(rename = "North America")]
    NorthAmerica,

    /// Asia-Pacific
    #[serde(rename = "Asia-Pacific")]
    AsiaPacific,
}

impl Region {
    /// Regions the vendor service is available in.
    pub const ALLOWED: &'static [Region] = &[Region::Europe];

    /// Is the service available in this region?
    #[must_use]
    pub fn is_allowed(self) -> bool {
        Self::ALLOWED.contains(&self)
    }
}

/// Base URLs of the vendor services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    /// Identity provider base URL.
    #[serde(default = "default_login_base")]
    pub login_base: Url,

    /// REST API base URL.
    #[serde(default = "default_api_base")]
    pub api_base: Url,
}

#[allow(clippy::expect_used)]
fn parse_constant(url: &str) -> Url {
    Url::parse(url).expect("constant URL must be valid")
}

fn default_login_base() -> Url {
    parse_constant(LOGIN_BASE_URI)
}

fn default_api_base() -> Url {
    parse_constant(REST_API_BASE)
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login_base: default_login_base(),
            api_base: default_api_base(),
        }
    }
}

/// Join a base URL and a path that starts with `/`.
///
/// Unlike `Url::join` this keeps any path prefix of the base.
pub(crate) fn endpoint(base: &Url, path: &str) -> String {
    format!("{}{path}", base.as_str().trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_endpoint() {
        let base = Url::parse("https://id.mercedes-benz.com").unwrap();
        assert_eq!(
            endpoint(&base, "/as/token.oauth2"),
            "https://id.mercedes-benz.com/as/token.oauth2"
        );

        let base = Url::parse("http://127.0.0.1:8080/prefix/").unwrap();
        assert_eq!(
            endpoint(&base, "/seqc/v0/users/current"),
            "http://127.0.0.1:8080/prefix/seqc/v0/users/current"
        );
    }

    #[test]
    fn test_region() {
        assert!(Region::Europe.is_allowed());
        assert!(!Region::NorthAmerica.is_allowed());
        let region: Region = serde_json::from_str("\"Asia-Pacific\"").unwrap();
        assert_eq!(region, Region::AsiaPacific);
    }
}
