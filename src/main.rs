//! Main entry point for the application.

#![warn(missing_docs)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use smarteq_common::{AttributeKey, Listener, Subscription, Vehicle};
use smarteq_connect::{
    config::{Config, Environment},
    logging,
    session::{self, Command, DeviceInfo, DeviceRegistry, Session},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    select,
};
use tracing::{debug, info, warn};

/// Poll smart EQ vehicles from the vendor cloud
#[derive(Parser)]
#[command(name = "smarteq-connect", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover the vehicles and poll them until interrupted
    Run,

    /// Log in with a PIN sent by email
    Login {
        /// Account email, defaults to `username` from the config
        #[arg(long, env = "SMARTEQ_EMAIL")]
        email: Option<String>,
    },

    /// Refresh the cached token now
    Refresh,

    /// Start preconditioning a vehicle
    Preheat {
        /// The vehicle identification
        #[arg(long)]
        vin: String,
    },
}

/// Reports discovered vehicles to the log.
struct LogRegistry;

impl DeviceRegistry for LogRegistry {
    fn register_device(&mut self, device: &DeviceInfo) {
        info!(
            "Device {} {} {}: {}",
            device.manufacturer,
            device.model.as_deref().unwrap_or("unknown model"),
            device.identifier,
            device.name
        );
    }
}

fn report(vehicle: &Vehicle, sensors: &[AttributeKey]) {
    for key in sensors {
        match vehicle.attribute(*key) {
            Some(attribute) => info!(
                "{} {key}: {} {} ({})",
                vehicle.licenseplate(),
                attribute.value,
                attribute.unit.as_deref().unwrap_or_default(),
                attribute.retrieval_status
            ),
            None => debug!("{} {key}: no data", vehicle.licenseplate()),
        }
    }
}

async fn read_pin() -> Result<String> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let pin = lines
        .next_line()
        .await?
        .ok_or_else(|| anyhow!("No PIN entered"))?;
    Ok(pin.trim().to_string())
}

async fn login(session: &Session, email: &str) -> Result<()> {
    let oauth = session.oauth();
    let result = oauth.request_pin(email).await?;
    debug!("PIN requested: {}", result.response);

    println!("Enter the PIN sent to {email}:");
    let pin = read_pin().await?;

    let token = oauth.request_access_token(email, &pin).await?;
    info!("Logged in, token expires at {}", token.expires_at);
    Ok(())
}

async fn run(mut session: Session, config: &Config) -> Result<()> {
    let added = session.discover_vehicles(&mut LogRegistry).await?;
    if added == 0 {
        warn!("No vehicles found");
    }

    let sensors = config.sensors.clone();
    let listener: Arc<Listener> = Arc::new(move |vehicle: &Vehicle| report(vehicle, &sensors));
    let _subscriptions: Vec<Subscription> = session
        .vehicles()
        .iter()
        .map(|vehicle| vehicle.subscribe(&listener))
        .collect();

    let (tx_cmd, mut handle) = session::run(session);

    let finished = select! {
        result = &mut handle => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    let result = match finished {
        Some(result) => result,
        None => {
            info!("Shutting down");
            if tx_cmd.send(Command::Shutdown).await.is_err() {
                debug!("Session already stopped");
            }
            handle.await
        }
    };

    result??;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env = Environment::load()?;
    let config = env.config()?;
    logging::init_tracing_subscriber(&config.logging)?;

    let session = Session::new(&config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(session, &config).await?,
        Commands::Login { email } => {
            let email = email
                .or_else(|| config.username.clone())
                .ok_or_else(|| anyhow!("No email given and no username configured"))?;
            login(&session, &email).await?;
        }
        Commands::Refresh => {
            let token = session.oauth().renew().await?;
            info!("Token refreshed, expires at {}", token.expires_at);
        }
        Commands::Preheat { vin } => {
            let mut session = session;
            session.discover_vehicles(&mut LogRegistry).await?;
            session.start_preheating(&vin).await?;
            info!("Preheating started for {vin}");
        }
    }

    Ok(())
}
