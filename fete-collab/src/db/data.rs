use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// The type used for primary keys in the database.
pub type PrimaryKey = i32;

/// An OAuth token issued by the music service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// A token is only usable when every field is populated
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty()
            && !self.refresh_token.is_empty()
            && !self.token_type.is_empty()
    }
}

/// A SpotiFete account, linked to a music service account
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub id: PrimaryKey,
    /// The id of the account on the music service
    pub remote_id: String,
    pub display_name: String,
    pub country: Option<String>,
}

/// The stored OAuth credential of a user
#[derive(Debug, Clone)]
pub struct CredentialData {
    pub user_id: PrimaryKey,
    pub token: Token,
}

/// A listening session, which guests can join with the join code
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub id: PrimaryKey,
    pub owner_id: PrimaryKey,
    /// Only present while the session is active
    pub join_code: Option<String>,
    pub active: bool,
    /// The remote playlist the session plays from
    pub queue_playlist_id: String,
    /// Used to source tracks when nobody requested anything
    pub fallback_playlist_id: Option<String>,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

/// The lifecycle of a song request. The variants are ordered, a request only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SongRequestStatus {
    InQueue,
    UpNext,
    CurrentlyPlaying,
    Played,
}

impl SongRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InQueue => "IN_QUEUE",
            Self::UpNext => "UP_NEXT",
            Self::CurrentlyPlaying => "CURRENTLY_PLAYING",
            Self::Played => "PLAYED",
        }
    }

    /// Everything but [SongRequestStatus::Played] is still part of the queue
    pub fn is_active(&self) -> bool {
        *self != Self::Played
    }
}

impl Display for SongRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SongRequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_QUEUE" => Ok(Self::InQueue),
            "UP_NEXT" => Ok(Self::UpNext),
            "CURRENTLY_PLAYING" => Ok(Self::CurrentlyPlaying),
            "PLAYED" => Ok(Self::Played),
            other => Err(format!("unknown song request status {}", other)),
        }
    }
}

/// A track requested by a guest, the owner, or sourced from the fallback playlist
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SongRequestData {
    pub id: PrimaryKey,
    pub session_id: PrimaryKey,
    /// Absent when the request was sourced from the fallback playlist
    pub requester_id: Option<PrimaryKey>,
    /// The remote id of the track
    pub track_id: String,
    pub status: SongRequestStatus,
    pub created_at: DateTime<Utc>,
}

/// Display metadata of a remote track
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackMetadata {
    pub remote_id: String,
    pub title: String,
    /// Artist names, comma separated
    pub artists: String,
    pub album: String,
    pub image_url: Option<String>,
    pub duration_ms: i32,
}

/// Display metadata of a remote playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistMetadata {
    pub remote_id: String,
    pub name: String,
    pub owner_name: String,
    pub image_url: Option<String>,
    pub track_count: i32,
}

/// A cached [TrackMetadata] row
#[derive(Debug, Clone, Serialize)]
pub struct TrackMetadataData {
    pub id: PrimaryKey,
    #[serde(flatten)]
    pub metadata: TrackMetadata,
}

/// A cached [PlaylistMetadata] row
#[derive(Debug, Clone, Serialize)]
pub struct PlaylistMetadataData {
    pub id: PrimaryKey,
    #[serde(flatten)]
    pub metadata: PlaylistMetadata,
}
