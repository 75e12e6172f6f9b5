use std::{str::FromStr, time::Duration};

/// Where tracks that are up next are pushed to on the music service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteQueueMode {
    /// Nothing is written remotely
    Disabled,
    /// Tracks are added to the playback queue of the owner
    PlayerQueue,
    /// Tracks are appended to the session's queue playlist
    #[default]
    Playlist,
}

impl FromStr for RemoteQueueMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" | "off" => Ok(Self::Disabled),
            "player" | "player_queue" => Ok(Self::PlayerQueue),
            "playlist" => Ok(Self::Playlist),
            other => Err(format!("unknown remote queue mode {}", other)),
        }
    }
}

/// The configuration of the collab system
#[derive(Debug, Clone)]
pub struct Config {
    /// Tokens expiring within this window are refreshed before use
    pub token_refresh_margin: Duration,
    /// Length of generated join codes
    pub join_code_length: usize,
    /// How many join codes are tried before giving up on a collision streak
    pub join_code_attempts: usize,
    pub remote_queue_mode: RemoteQueueMode,
    /// How often active sessions are reconciled with the remote playback
    pub poll_interval: Duration,
    /// Prepended to the session title to name the queue playlist
    pub playlist_name_prefix: String,
    /// How many search results are returned when no limit is given
    pub default_search_limit: u32,
}

impl Config {
    pub fn token_refresh_margin(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.token_refresh_margin)
            .unwrap_or_else(|_| chrono::Duration::zero())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            token_refresh_margin: Duration::from_secs(10),
            join_code_length: 8,
            join_code_attempts: 32,
            remote_queue_mode: RemoteQueueMode::default(),
            poll_interval: Duration::from_secs(5),
            playlist_name_prefix: "SpotiFete: ".to_string(),
            default_search_limit: 10,
        }
    }
}
