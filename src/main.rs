use std::sync::Arc;

use colored::Colorize;
use fete_collab::{
    Collab, DatabaseError, MemoryDatabase, PgDatabase, SharedDatabase, SharedRemote,
};
use fete_spotify::SpotifyRemote;
use log::{error, info, warn};
use thiserror::Error;
use tokio::{
    runtime::{self, Runtime},
    sync::watch,
};

use crate::config::AppConfig;

mod config;
mod logging;

pub struct SpotiFete {
    collab: Collab,
    runtime: Runtime,
}

#[derive(Debug, Error)]
enum StartupError {
    #[error("Invalid configuration: {0:#}")]
    Config(anyhow::Error),

    #[error("Could not initialize database: {0}")]
    Database(#[from] DatabaseError),

    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl SpotiFete {
    fn new(config: AppConfig) -> Result<Self, StartupError> {
        info!("Building async runtime...");
        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("spotifete-async")
            .build()
            .map_err(|e| StartupError::Fatal(e.to_string()))?;

        let database: SharedDatabase = match &config.database_url {
            Some(url) => {
                info!("Connecting to database...");
                Arc::new(runtime.block_on(PgDatabase::new(url))?)
            }
            None => {
                warn!("DATABASE_URL is not set, nothing will be persisted");
                Arc::new(MemoryDatabase::new())
            }
        };

        let remote: SharedRemote = Arc::new(SpotifyRemote::new(config.spotify));
        let collab = Collab::new(config.collab, remote, database);

        Ok(Self { collab, runtime })
    }

    fn run(&self) {
        let (shutdown, receiver) = watch::channel(false);
        let poller = self.collab.poller();

        self.runtime.block_on(async move {
            let task = tokio::spawn(poller.run(receiver));

            match self.collab.sessions.active_count().await {
                Ok(count) => info!("{} sessions are active", count),
                Err(e) => warn!("Could not count active sessions: {}", e),
            }

            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Could not listen for shutdown: {}", e);
            }

            info!("Shutting down...");
            let _ = shutdown.send(true);

            if let Err(e) = task.await {
                error!("Session poller crashed: {}", e);
            }
        });
    }
}

impl StartupError {
    fn hint(&self) -> String {
        match self {
            StartupError::Config(_) => {
                "Check the environment variables or your .env file.".to_string()
            }
            StartupError::Database(_) => "This is a database error. Make sure the Postgres instance in DATABASE_URL is running and reachable, then try again.".to_string(),
            StartupError::Fatal(_) => "This error is fatal, and should not happen.".to_string(),
        }
    }
}

fn start() -> Result<SpotiFete, StartupError> {
    let config = AppConfig::from_env().map_err(StartupError::Config)?;

    if let Err(e) = logging::init_logger(config.log_level) {
        eprintln!("Could not initialize logging: {}", e);
    }

    SpotiFete::new(config)
}

fn main() {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    match start() {
        Ok(spotifete) => {
            info!("Initialized successfully.");
            spotifete.run();
        }
        Err(error) => {
            // The logger may not be up yet
            eprintln!(
                "{} Read the error below to troubleshoot the issue.",
                "SpotiFete failed to start!".bold().red()
            );
            eprintln!("{}", error);
            eprintln!("{}", format!("Hint: {}", error.hint()).dimmed().italic());
            std::process::exit(1);
        }
    }
}
