//! Configuration loaded from YAML files
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use envconfig::Envconfig;
use serde::{Deserialize, Deserializer};
use smarteq_common::AttributeKey;
use thiserror::Error;

use crate::{
    logging,
    services::smarteq::{Endpoints, Region},
};

/// Settings read from the environment.
#[derive(Envconfig)]
pub struct Environment {
    /// The main configuration file.
    #[envconfig(from = "CONFIG_FILE")]
    pub config_file: PathBuf,

    /// Optional file with account details, its top level keys override the config file.
    #[envconfig(from = "SECRETS_FILE")]
    pub secrets_file: Option<PathBuf>,
}

impl Environment {
    /// Load the environment from the environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `CONFIG_FILE` is not set.
    pub fn load() -> Result<Self, envconfig::Error> {
        Self::init_from_env()
    }

    /// Load the configuration files named by the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or the configuration is invalid.
    pub fn config(&self) -> Result<Config, Error> {
        let mut config = load_file(&self.config_file)?;

        if let Some(secrets_file) = &self.secrets_file {
            let secrets = load_file(secrets_file)?;
            overlay(&mut config, secrets).map_err(|e| Error::Merge(secrets_file.clone(), e))?;
        }

        Config::from_value(config).map_err(|e| e.with_path(&self.config_file))
    }
}

fn load_file(filename: &Path) -> Result<serde_yml::Value, Error> {
    let f = std::fs::File::open(filename).map_err(|e| Error::File(filename.to_path_buf(), e))?;
    serde_yml::from_reader(f).map_err(|e| Error::Yaml(filename.to_path_buf(), e))
}

fn overlay(config: &mut serde_yml::Value, secrets: serde_yml::Value) -> Result<(), String> {
    let secrets = match secrets {
        serde_yml::Value::Null => return Ok(()),
        serde_yml::Value::Mapping(secrets) => secrets,
        _ => return Err("expected a mapping at the top level".to_string()),
    };

    if config.is_null() {
        *config = serde_yml::Value::Mapping(serde_yml::Mapping::new());
    }

    let serde_yml::Value::Mapping(config) = config else {
        return Err("expected a mapping at the top level".to_string());
    };

    for (key, value) in secrets {
        config.insert(key, value);
    }
    Ok(())
}

/// An error loading the Config
#[derive(Error, Debug)]
pub enum Error {
    /// Error reading the file
    #[error("Error reading file {0}: {1}")]
    File(PathBuf, std::io::Error),

    /// Error parsing the file
    #[error("Error parsing file {0}: {1}")]
    Yaml(PathBuf, serde_yml::Error),

    /// Error merging the secrets file
    #[error("Error merging file {0}: {1}")]
    Merge(PathBuf, String),

    /// The service is not available in the region
    #[error("Region {0:?} is not supported, use one of {allowed:?}", allowed = Region::ALLOWED)]
    Region(Region),

    /// A setting has an invalid value
    #[error("Invalid setting {0}: {1}")]
    Invalid(&'static str, String),
}

impl Error {
    fn with_path(self, path: &Path) -> Self {
        match self {
            Self::Yaml(p, e) if p.as_os_str().is_empty() => Self::Yaml(path.to_path_buf(), e),
            other => other,
        }
    }
}

fn default_locale() -> String {
    "de-DE".to_string()
}

fn default_country_code() -> String {
    "DE".to_string()
}

fn default_token_path() -> PathBuf {
    PathBuf::from(".smarteqconnect-token-cache")
}

fn default_debug_path() -> PathBuf {
    PathBuf::from("messages")
}

const fn default_update_interval() -> u64 {
    30
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListOrString {
    List(Vec<String>),
    Text(String),
}

fn excluded_cars<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let cars = match Option::<ListOrString>::deserialize(deserializer)? {
        None => vec![],
        Some(ListOrString::List(cars)) => cars,
        Some(ListOrString::Text(cars)) => cars.split(',').map(str::to_string).collect(),
    };

    Ok(cars
        .into_iter()
        .map(|car| car.trim().to_string())
        .filter(|car| !car.is_empty())
        .collect())
}

/// The configuration of the client.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Account email, used as the default for logging in
    #[serde(default)]
    pub username: Option<String>,

    /// Account region
    #[serde(default)]
    pub region: Region,

    /// Locale sent to the vendor
    #[serde(default = "default_locale")]
    pub locale: String,

    /// Country sent to the vendor
    #[serde(default = "default_country_code")]
    pub country_code: String,

    /// Vehicles to ignore, as a list or a comma separated string
    #[serde(default, deserialize_with = "excluded_cars")]
    pub excluded_cars: Vec<String>,

    /// Save raw vendor documents to `debug_path`
    #[serde(default)]
    pub save_files: bool,

    /// The token cache file
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,

    /// Where raw vendor documents are saved
    #[serde(default = "default_debug_path")]
    pub debug_path: PathBuf,

    /// Seconds between polls
    #[serde(default = "default_update_interval")]
    pub update_interval: u64,

    /// Attributes to report on every update
    #[serde(default)]
    pub sensors: Vec<AttributeKey>,

    /// Vendor base URLs
    #[serde(default)]
    pub endpoints: Endpoints,

    /// Logging
    #[serde(default)]
    pub logging: logging::Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            username: None,
            region: Region::default(),
            locale: default_locale(),
            country_code: default_country_code(),
            excluded_cars: vec![],
            save_files: false,
            token_path: default_token_path(),
            debug_path: default_debug_path(),
            update_interval: default_update_interval(),
            sensors: vec![],
            endpoints: Endpoints::default(),
            logging: logging::Config::default(),
        }
    }
}

impl Config {
    /// Load the configuration from a single file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the configuration is invalid.
    pub fn load(filename: &Path) -> Result<Self, Error> {
        load_file(filename)
            .and_then(Self::from_value)
            .map_err(|e| e.with_path(filename))
    }

    /// Parse and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn from_value(value: serde_yml::Value) -> Result<Self, Error> {
        let config: Self =
            serde_yml::from_value(value).map_err(|e| Error::Yaml(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if !self.region.is_allowed() {
            return Err(Error::Region(self.region));
        }
        if self.update_interval == 0 {
            return Err(Error::Invalid("update_interval", "must be positive".into()));
        }
        if self.locale.trim().is_empty() {
            return Err(Error::Invalid("locale", "must not be empty".into()));
        }
        Ok(())
    }

    /// Time between polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use rstest::rstest;
    use smarteq_common::GroupKind;

    fn parse(yaml: &str) -> Result<Config, Error> {
        Config::from_value(serde_yml::from_str(yaml).unwrap())
    }

    #[test]
    fn test_defaults() {
        let config = parse("{}").unwrap();
        assert_eq!(config.region, Region::Europe);
        assert_eq!(config.locale, "de-DE");
        assert_eq!(config.country_code, "DE");
        assert!(config.excluded_cars.is_empty());
        assert!(!config.save_files);
        assert_eq!(config.token_path, PathBuf::from(".smarteqconnect-token-cache"));
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.endpoints, Endpoints::default());
    }

    #[rstest]
    #[case("excluded_cars: WME1, WME2 ,", vec!["WME1", "WME2"])]
    #[case("excluded_cars: [WME1, WME3]", vec!["WME1", "WME3"])]
    #[case("excluded_cars: ''", vec![])]
    #[case("excluded_cars: null", vec![])]
    fn test_excluded_cars(#[case] yaml: &str, #[case] expected: Vec<&str>) {
        let config = parse(yaml).unwrap();
        assert_eq!(config.excluded_cars, expected);
    }

    #[test]
    fn test_sensors_are_validated() {
        let config = parse("sensors: [electric.soc, odometer.odo]").unwrap();
        assert_eq!(config.sensors.len(), 2);
        assert_eq!(config.sensors[0].group(), GroupKind::Electric);

        assert!(matches!(parse("sensors: [electric.nope]"), Err(Error::Yaml(_, _))));
        assert!(matches!(parse("sensors: [soc]"), Err(Error::Yaml(_, _))));
    }

    #[test]
    fn test_region_is_validated() {
        assert!(matches!(
            parse("region: North America"),
            Err(Error::Region(Region::NorthAmerica))
        ));
        assert!(matches!(parse("update_interval: 0"), Err(Error::Invalid(_, _))));
    }

    #[test]
    fn test_environment_with_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let config_file = dir.path().join("config.yaml");
        let secrets_file = dir.path().join("secrets.yaml");
        std::fs::write(&config_file, "username: old@example.com\nsave_files: true\n").unwrap();
        std::fs::write(&secrets_file, "username: me@example.com\n").unwrap();

        let env = Environment {
            config_file: config_file.clone(),
            secrets_file: Some(secrets_file),
        };
        let config = env.config().unwrap();
        assert_eq!(config.username.as_deref(), Some("me@example.com"));
        assert!(config.save_files);

        let config = Config::load(&config_file).unwrap();
        assert_eq!(config.username.as_deref(), Some("old@example.com"));

        let err = Config::load(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, Error::File(_, _)));
    }
}
