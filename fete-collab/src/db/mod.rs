use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

mod data;
pub use data::*;

mod memory;
pub use memory::*;

mod pg;
pub use pg::*;

pub type Result<T> = std::result::Result<T, DatabaseError>;
pub type SharedDatabase = Arc<dyn Database>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An unknown or internal error happened with the database
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A resource already exists
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        /// The resource in question
        resource: &'static str,
        /// The field that is conflicting
        field: &'static str,
        /// The conflicting value
        value: String,
    },
    /// A resource in the database doesn't exist
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
}

impl DatabaseError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Helper trait to reduce boilerplate
pub trait IntoDatabaseError {
    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError;
    /// Turns a unique constraint violation into [DatabaseError::Conflict]
    fn conflict_or(
        self,
        resource: &'static str,
        field: &'static str,
        value: &str,
    ) -> DatabaseError;
    fn any(self) -> DatabaseError;
}

/// Helper trait to reduce boilerplate
pub trait DatabaseResult<T> {
    /// Turns the Result into a conflict error if it's Ok()
    fn conflict_or_ok(self, resource: &'static str, field: &'static str, value: &str)
        -> Result<()>;

    /// Turns a not found error into [None]
    fn optional(self) -> Result<Option<T>>;
}

impl<T> DatabaseResult<T> for Result<T> {
    fn conflict_or_ok(
        self,
        resource: &'static str,
        field: &'static str,
        value: &str,
    ) -> Result<()> {
        match self {
            Ok(_) => Err(DatabaseError::Conflict {
                resource,
                field,
                value: value.to_string(),
            }),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Represents a type that can store and fetch SpotiFete records
#[async_trait]
pub trait Database: Send + Sync {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData>;
    async fn user_by_remote_id(&self, remote_id: &str) -> Result<UserData>;
    async fn create_user(&self, new_user: NewUser) -> Result<UserData>;

    async fn credential_by_user(&self, user_id: PrimaryKey) -> Result<CredentialData>;
    /// Stores the token unconditionally
    async fn set_credential(&self, user_id: PrimaryKey, token: &Token) -> Result<()>;
    /// Stores the token only if it expires later than the stored one.
    /// Returns true if the token was written.
    async fn update_credential_if_newer(&self, user_id: PrimaryKey, token: &Token)
        -> Result<bool>;

    async fn session_by_id(&self, session_id: PrimaryKey) -> Result<SessionData>;
    async fn session_by_join_code(&self, join_code: &str) -> Result<SessionData>;
    async fn list_active_sessions(&self) -> Result<Vec<SessionData>>;
    async fn sessions_by_owner(&self, owner_id: PrimaryKey) -> Result<Vec<SessionData>>;
    async fn count_sessions(&self, only_active: bool) -> Result<i64>;
    async fn create_session(&self, new_session: NewSession) -> Result<SessionData>;
    async fn set_fallback_playlist(
        &self,
        session_id: PrimaryKey,
        playlist_id: Option<&str>,
    ) -> Result<SessionData>;
    /// Deactivates the session and clears its join code
    async fn close_session(&self, session_id: PrimaryKey) -> Result<SessionData>;

    /// All requests of a session in arrival order
    async fn song_requests(&self, session_id: PrimaryKey) -> Result<Vec<SongRequestData>>;
    /// All requests of a session that are not played yet, in arrival order
    async fn active_song_requests(&self, session_id: PrimaryKey)
        -> Result<Vec<SongRequestData>>;
    async fn create_song_request(&self, new_request: NewSongRequest) -> Result<SongRequestData>;
    async fn update_song_request_status(
        &self,
        request_id: PrimaryKey,
        status: SongRequestStatus,
    ) -> Result<SongRequestData>;

    async fn track_metadata_by_remote_id(&self, remote_id: &str) -> Result<TrackMetadataData>;
    async fn create_track_metadata(&self, metadata: TrackMetadata) -> Result<TrackMetadataData>;
    async fn update_track_metadata(
        &self,
        id: PrimaryKey,
        metadata: TrackMetadata,
    ) -> Result<TrackMetadataData>;

    async fn playlist_metadata_by_remote_id(
        &self,
        remote_id: &str,
    ) -> Result<PlaylistMetadataData>;
    async fn create_playlist_metadata(
        &self,
        metadata: PlaylistMetadata,
    ) -> Result<PlaylistMetadataData>;
    async fn update_playlist_metadata(
        &self,
        id: PrimaryKey,
        metadata: PlaylistMetadata,
    ) -> Result<PlaylistMetadataData>;
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub remote_id: String,
    pub display_name: String,
    pub country: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub owner_id: PrimaryKey,
    pub join_code: String,
    pub title: String,
    pub queue_playlist_id: String,
}

#[derive(Debug, Clone)]
pub struct NewSongRequest {
    pub session_id: PrimaryKey,
    pub requester_id: Option<PrimaryKey>,
    pub track_id: String,
    pub status: SongRequestStatus,
}
