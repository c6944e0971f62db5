//! One account session: discover the vehicles once, then poll them
use std::{path::PathBuf, sync::Arc, time::Duration};

use chrono::Utc;
use serde_json::Value;
use smarteq_common::{decode_binary_state, BinaryState, GroupKind, Vehicle};
use thiserror::Error;
use tokio::{
    select, spawn,
    sync::mpsc,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    services::{
        persistent_state::JsonFile,
        smarteq::{
            api::{ApiClient, ApiError, ApiSettings},
            meters::Meters,
            normalize::{normalize_vehicle, MergeMode},
            oauth::{OAuthFlow, OAuthSettings},
            token::TokenStore,
            MANUFACTURER,
        },
    },
};

/// A device to register with the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// The vehicle identification
    pub identifier: String,

    /// Always the vehicle manufacturer
    pub manufacturer: String,

    /// The model, if the vehicle data could be fetched
    pub model: Option<String>,

    /// The license plate, or the identification if there is none
    pub name: String,
}

/// The host's registry of devices.
pub trait DeviceRegistry {
    /// A vehicle was discovered.
    fn register_device(&mut self, device: &DeviceInfo);
}

/// Error from a session
#[derive(Debug, Error)]
pub enum Error {
    /// The HTTP clients could not be created
    #[error("Cannot create HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    /// The account must log in again
    #[error("Reauthentication required: {0}")]
    ReauthenticationRequired(ApiError),

    /// A request failed, try again later
    #[error("API error: {0}")]
    Api(ApiError),

    /// The vehicle is not part of this session
    #[error("Unknown vehicle: {0}")]
    UnknownVehicle(String),
}

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        if err.requires_reauthentication() {
            Self::ReauthenticationRequired(err)
        } else {
            Self::Api(err)
        }
    }
}

/// Commands for a running session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start preconditioning a vehicle
    PreheatStart {
        /// The vehicle identification
        vin: String,
    },

    /// Poll now instead of waiting for the timer
    UpdateNow,

    /// Stop the session
    Shutdown,
}

/// The vehicles of one account.
pub struct Session {
    oauth: Arc<OAuthFlow>,
    api: ApiClient,
    vehicles: Vec<Vehicle>,
    excluded_cars: Vec<String>,
    debug_path: Option<PathBuf>,
    update_interval: Duration,
}

fn model_name(init_data: &Value) -> Option<String> {
    init_data
        .pointer("/vehicleData/salesRelatedInformation/baumuster/baumusterDescription")
        .and_then(Value::as_str)
        .map(str::to_string)
}

impl Session {
    /// Create a session, nothing is sent until discovery.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP clients cannot be created.
    pub fn new(config: &Config) -> Result<Self, Error> {
        let meters = Meters::new();

        let oauth = OAuthFlow::new(
            OAuthSettings {
                endpoints: config.endpoints.clone(),
                region: config.region,
                locale: config.locale.clone(),
            },
            TokenStore::new(&config.token_path),
            meters.clone(),
        )?;
        let oauth = Arc::new(oauth);

        let api = ApiClient::new(
            ApiSettings {
                endpoints: config.endpoints.clone(),
                country_code: config.country_code.clone(),
                locale: config.locale.clone(),
            },
            oauth.clone(),
            meters,
        )?;

        Ok(Self {
            oauth,
            api,
            vehicles: vec![],
            excluded_cars: config.excluded_cars.clone(),
            debug_path: config.save_files.then(|| config.debug_path.clone()),
            update_interval: config.poll_interval(),
        })
    }

    /// The login flow of this session.
    #[must_use]
    pub fn oauth(&self) -> &Arc<OAuthFlow> {
        &self.oauth
    }

    /// The API client of this session.
    #[must_use]
    pub const fn api(&self) -> &ApiClient {
        &self.api
    }

    /// The discovered vehicles.
    #[must_use]
    pub fn vehicles(&self) -> &[Vehicle] {
        &self.vehicles
    }

    /// Find a discovered vehicle.
    #[must_use]
    pub fn vehicle(&self, finorvin: &str) -> Option<&Vehicle> {
        self.vehicles.iter().find(|v| v.finorvin() == finorvin)
    }

    fn is_excluded(&self, finorvin: &str) -> bool {
        self.excluded_cars.iter().any(|car| car == finorvin)
    }

    fn dump(&self, kind: &str, document: &Value) {
        let Some(debug_path) = &self.debug_path else {
            return;
        };
        let path = debug_path.join(format!("{kind}{}.json", Utc::now().timestamp_millis()));
        match JsonFile::<Value>::new(&path).save(document) {
            Ok(()) => debug!("Saved {}", path.display()),
            Err(err) => warn!("Cannot save debug document: {err}"),
        }
    }

    /// Find the vehicles of the account and register them with the host.
    ///
    /// Vehicles already known or excluded are skipped. Returns the number of new vehicles.
    ///
    /// # Errors
    ///
    /// Returns an error if the account data cannot be fetched, or a login is required.
    pub async fn discover_vehicles<R>(&mut self, registry: &mut R) -> Result<usize, Error>
    where
        R: DeviceRegistry + ?Sized,
    {
        let masterdata = self.api.get_user_info().await?;
        self.dump("md", &masterdata);

        let Some(authorizations) = masterdata.get("authorizations").and_then(Value::as_array)
        else {
            warn!("Account data has no vehicle authorizations");
            return Ok(0);
        };

        let mut added = 0;
        for authorization in authorizations {
            let Some(fin) = authorization.get("fin").and_then(Value::as_str) else {
                warn!("Vehicle authorization without fin: {authorization}");
                continue;
            };

            if self.is_excluded(fin) {
                info!("Skipping excluded vehicle {fin}");
                continue;
            }

            if self.vehicle(fin).is_some() {
                debug!("Vehicle {fin} already known");
                continue;
            }

            let model = match self.api.get_car_details_init(fin).await {
                Ok(init_data) => {
                    self.dump("cd", &init_data);
                    model_name(&init_data)
                }
                Err(err) if err.requires_reauthentication() => {
                    return Err(Error::ReauthenticationRequired(err))
                }
                Err(err) => {
                    warn!("Cannot get init data for {fin}: {err}");
                    None
                }
            };

            let licenseplate = authorization
                .get("licensePlate")
                .and_then(Value::as_str)
                .filter(|plate| !plate.is_empty())
                .map(str::to_string);

            let mut vehicle = Vehicle::new(fin, licenseplate);
            vehicle.mark_seen(Utc::now());
            registry.register_device(&DeviceInfo {
                identifier: fin.to_string(),
                manufacturer: MANUFACTURER.to_string(),
                model,
                name: vehicle.licenseplate().to_string(),
            });

            info!("Vehicle added: {fin}");
            self.vehicles.push(vehicle);
            added += 1;
        }

        Ok(added)
    }

    /// Poll every vehicle once and notify its listeners.
    ///
    /// A vehicle that cannot be fetched is marked as failed and the others are still polled.
    ///
    /// # Errors
    ///
    /// Returns `Error::ReauthenticationRequired` if a login is required. The cycle stops.
    pub async fn update_all(&mut self) -> Result<(), Error> {
        for vehicle in &mut self.vehicles {
            let vin = vehicle.finorvin().to_string();
            debug!("Updating {vin}");

            match self.api.get_car_details(&vin).await {
                Ok(document) => {
                    normalize_vehicle(vehicle, Some(&document), MergeMode::Replace);
                }
                Err(err) if err.requires_reauthentication() => {
                    error!("Login required, stopping update: {err}");
                    return Err(Error::ReauthenticationRequired(err));
                }
                Err(err) => {
                    warn!("Cannot update {vin}: {err}");
                    normalize_vehicle(vehicle, None, MergeMode::Replace);
                }
            }

            vehicle.publish_updates();
        }
        Ok(())
    }

    /// Start preconditioning a vehicle.
    ///
    /// # Errors
    ///
    /// Returns an error if the vehicle is unknown or the request fails.
    pub async fn start_preheating(&self, vin: &str) -> Result<(), Error> {
        if self.vehicle(vin).is_none() {
            return Err(Error::UnknownVehicle(vin.to_string()));
        }
        info!("Start preheating {vin}");
        self.api.start_preheating(vin).await?;
        Ok(())
    }

    /// Does the vehicle report this feature as active?
    ///
    /// Unknown vehicles and features are not available.
    #[must_use]
    pub fn is_feature_available(&self, vin: &str, feature: &str) -> bool {
        self.vehicle(vin)
            .and_then(|vehicle| vehicle.group(GroupKind::Features).get(feature))
            .is_some_and(|attribute| decode_binary_state(&attribute.value) == BinaryState::On)
    }
}

async fn handle_command(session: &Session, command: Command) -> Result<(), Error> {
    match command {
        Command::PreheatStart { vin } => match session.start_preheating(&vin).await {
            Err(err @ Error::ReauthenticationRequired(_)) => Err(err),
            Err(err) => {
                error!("Preheating {vin} failed: {err}");
                Ok(())
            }
            Ok(()) => Ok(()),
        },
        Command::UpdateNow | Command::Shutdown => Ok(()),
    }
}

/// Poll once, watching for a shutdown while the cycle runs.
///
/// Returns `None` on shutdown. Other commands received meanwhile are queued.
async fn cycle(
    session: &mut Session,
    rx_cmd: &mut mpsc::Receiver<Command>,
    queued: &mut Vec<Command>,
) -> Option<Result<(), Error>> {
    let update = session.update_all();
    tokio::pin!(update);

    loop {
        select! {
            result = &mut update => return Some(result),
            command = rx_cmd.recv() => match command {
                Some(Command::Shutdown) | None => return None,
                Some(command) => queued.push(command),
            },
        }
    }
}

/// Run the session until it is shut down.
///
/// The first poll happens immediately. Returns `Err` only if a login is required.
#[must_use]
pub fn run(mut session: Session) -> (mpsc::Sender<Command>, JoinHandle<Result<(), Error>>) {
    let (tx_cmd, mut rx_cmd) = mpsc::channel(16);

    let handle = spawn(async move {
        info!("session: Starting with {} vehicles", session.vehicles.len());
        let mut timer = tokio::time::interval(session.update_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut queued = Vec::new();

        loop {
            let mut poll = false;

            select! {
                _ = timer.tick() => poll = true,

                command = rx_cmd.recv() => {
                    debug!("session: Received command {command:?}");
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(Command::UpdateNow) => poll = true,
                        Some(command) => handle_command(&session, command).await?,
                    }
                }
            }

            if poll {
                match cycle(&mut session, &mut rx_cmd, &mut queued).await {
                    Some(result) => result?,
                    None => break,
                }
            }

            for command in queued.drain(..) {
                handle_command(&session, command).await?;
            }
        }

        info!("session: Ending");
        Ok::<(), Error>(())
    });

    (tx_cmd, handle)
}
