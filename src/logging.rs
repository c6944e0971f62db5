//! Logging setup
use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::{
    filter::ParseError, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Default filter directives, `RUST_LOG` takes precedence.
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

/// An error setting up logging
#[derive(Error, Debug)]
pub enum Error {
    /// A filter directive is invalid
    #[error("Invalid filter: {0}")]
    Filter(#[from] ParseError),

    /// A subscriber is already installed
    #[error("TryInitError error: {0}")]
    TryInit(#[from] tracing_subscriber::util::TryInitError),
}

fn filter(config: &Config) -> Result<EnvFilter, Error> {
    let directives =
        std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| config.filter.clone());

    // HTTP client internals only at error level.
    let filter = EnvFilter::try_new(directives)?
        .add_directive("hyper=error".parse()?)
        .add_directive("reqwest=error".parse()?);
    Ok(filter)
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if the filter is invalid or a subscriber is already installed.
pub fn init_tracing_subscriber(config: &Config) -> Result<(), Error> {
    tracing_subscriber::registry()
        .with(filter(config)?)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter() {
        // RUST_LOG would override the configured directives.
        if std::env::var(EnvFilter::DEFAULT_ENV).is_ok() {
            return;
        }

        assert!(filter(&Config::default()).is_ok());

        let config = Config {
            filter: "smarteq_connect=notalevel".to_string(),
        };
        assert!(matches!(filter(&config), Err(Error::Filter(_))));
    }
}
