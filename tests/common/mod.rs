#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use std::{path::Path, sync::Once};

use serde_json::json;
use smarteq_connect::{
    config::Config,
    services::smarteq::{
        meters::Meters,
        oauth::{OAuthFlow, OAuthSettings},
        token::TokenStore,
        Endpoints, Region,
    },
};
use url::Url;
use wiremock::MockServer;

static INIT: Once = Once::new();

pub fn setup() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("smarteq_connect=debug")
            .try_init()
            .ok();
    });
}

pub fn endpoints(server: &MockServer) -> Endpoints {
    let base = Url::parse(&server.uri()).unwrap();
    Endpoints {
        login_base: base.clone(),
        api_base: base,
    }
}

pub fn config(server: &MockServer, dir: &Path) -> Config {
    Config {
        token_path: dir.join("token"),
        debug_path: dir.join("messages"),
        endpoints: endpoints(server),
        ..Config::default()
    }
}

pub fn oauth(server: &MockServer, token_path: &Path) -> OAuthFlow {
    OAuthFlow::new(
        OAuthSettings {
            endpoints: endpoints(server),
            region: Region::Europe,
            locale: "de-DE".to_string(),
        },
        TokenStore::new(token_path),
        Meters::new(),
    )
    .unwrap()
}

/// Write a token cache file as a previous run would have left it.
pub fn write_token(path: &Path, expires_at: i64, refresh_token: Option<&str>) {
    let token = json!({
        "access_token": "cached-access",
        "refresh_token": refresh_token,
        "token_type": "Bearer",
        "expires_in": 7200,
        "expires_at": expires_at,
    });
    std::fs::write(path, token.to_string()).unwrap();
}
