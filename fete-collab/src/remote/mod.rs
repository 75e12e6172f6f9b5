use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::{PlaylistMetadata, Token, TrackMetadata};

#[cfg(test)]
mod fake;
#[cfg(test)]
pub use fake::*;

pub type RemoteResult<T> = Result<T, RemoteError>;
pub type SharedRemote = Arc<dyn Remote>;
pub type RemoteHandleRef = Arc<dyn RemoteHandle>;

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The access or refresh token was rejected
    #[error("Credentials were rejected by the remote service")]
    Unauthorized,

    #[error("{0} was not found")]
    NotFound(String),

    #[error("Rate limited by the remote service")]
    RateLimited,

    #[error("Remote service responded with {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Failed to reach remote service: {0}")]
    Transport(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),
}

/// The account behind an access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUser {
    pub id: String,
    pub display_name: String,
    pub country: Option<String>,
}

/// Represents the authorization side of the music service
#[async_trait]
pub trait Remote: Send + Sync {
    /// Exchanges a refresh token for a new token
    async fn refresh_token(&self, refresh_token: &str) -> RemoteResult<Token>;

    /// Creates an API handle authenticated with the given token
    fn handle(&self, token: &Token) -> RemoteHandleRef;
}

/// An authenticated handle to the music service API
#[async_trait]
pub trait RemoteHandle: Send + Sync {
    async fn current_user(&self) -> RemoteResult<RemoteUser>;

    async fn search_tracks(
        &self,
        query: &str,
        limit: u32,
        market: Option<&str>,
    ) -> RemoteResult<Vec<TrackMetadata>>;

    async fn search_playlists(&self, query: &str, limit: u32)
        -> RemoteResult<Vec<PlaylistMetadata>>;

    async fn track(&self, track_id: &str) -> RemoteResult<TrackMetadata>;

    async fn playlist(&self, playlist_id: &str) -> RemoteResult<PlaylistMetadata>;

    /// Returns every track of a playlist, following pagination
    async fn playlist_tracks(&self, playlist_id: &str) -> RemoteResult<Vec<TrackMetadata>>;

    /// Returns the id of the track currently playing on the account, if any
    async fn currently_playing(&self) -> RemoteResult<Option<String>>;

    /// Adds a track to the account's playback queue
    async fn enqueue_track(&self, track_id: &str) -> RemoteResult<()>;

    /// Creates a private playlist and returns its id
    async fn create_playlist(&self, user_id: &str, name: &str) -> RemoteResult<String>;

    async fn add_to_playlist(&self, playlist_id: &str, track_ids: &[String]) -> RemoteResult<()>;
}
