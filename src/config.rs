use std::{env, str::FromStr, time::Duration};

use anyhow::{anyhow, Context};
use fete_collab::{Config, RemoteQueueMode};
use fete_spotify::SpotifyConfig;
use log::LevelFilter;

const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/callback";

/// Everything read from the environment at startup
pub struct AppConfig {
    /// Postgres connection string, the in-memory database is used without one
    pub database_url: Option<String>,
    pub spotify: SpotifyConfig,
    pub collab: Config,
    pub log_level: LevelFilter,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut collab = Config::default();

        if let Some(secs) = optional::<u64>("SPOTIFETE_POLL_INTERVAL_SECS")? {
            if secs == 0 {
                return Err(anyhow!("SPOTIFETE_POLL_INTERVAL_SECS must be at least 1"));
            }

            collab.poll_interval = Duration::from_secs(secs);
        }

        if let Some(mode) = optional::<RemoteQueueMode>("SPOTIFETE_QUEUE_MODE")? {
            collab.remote_queue_mode = mode;
        }

        let spotify = SpotifyConfig {
            client_id: required("SPOTIFY_CLIENT_ID")?,
            client_secret: required("SPOTIFY_CLIENT_SECRET")?,
            redirect_uri: optional("SPOTIFY_REDIRECT_URI")?
                .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string()),
        };

        Ok(Self {
            database_url: optional("DATABASE_URL")?,
            log_level: optional("SPOTIFETE_LOG_LEVEL")?.unwrap_or(LevelFilter::Info),
            spotify,
            collab,
        })
    }
}

fn optional<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow!("{} has an invalid value: {}", name, e)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("{} could not be read", name)),
    }
}

fn required(name: &str) -> anyhow::Result<String> {
    optional(name)?.ok_or_else(|| anyhow!("{} is not set", name))
}
