//! Response bodies of the Spotify Web API and accounts service.

use chrono::{DateTime, Duration, Utc};
use fete_collab::{PlaylistMetadata, RemoteUser, Token, TrackMetadata};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    /// Only present when the refresh token was rotated
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenResponse {
    pub fn into_token(self, issued_at: DateTime<Utc>) -> Token {
        Token {
            access_token: self.access_token,
            refresh_token: self.refresh_token.unwrap_or_default(),
            token_type: self.token_type,
            expires_at: issued_at + Duration::seconds(self.expires_in),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: Option<String>,
    pub country: Option<String>,
}

impl From<User> for RemoteUser {
    fn from(value: User) -> Self {
        Self {
            display_name: value.display_name.unwrap_or_else(|| value.id.clone()),
            id: value.id,
            country: value.country,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Image {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct Artist {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct Album {
    pub name: String,
    #[serde(default)]
    pub images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
pub struct Track {
    /// Local files have no id
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    pub album: Album,
    pub duration_ms: i32,
}

impl Track {
    pub fn into_metadata(self) -> Option<TrackMetadata> {
        let artists: Vec<_> = self.artists.into_iter().map(|a| a.name).collect();

        Some(TrackMetadata {
            remote_id: self.id?,
            title: self.name,
            artists: artists.join(", "),
            album: self.album.name,
            // Spotify lists the biggest image first
            image_url: self.album.images.into_iter().next().map(|i| i.url),
            duration_ms: self.duration_ms,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct PlaylistOwner {
    pub id: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlaylistTracksRef {
    pub total: i32,
}

#[derive(Debug, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub name: String,
    pub owner: PlaylistOwner,
    #[serde(default)]
    pub images: Option<Vec<Image>>,
    pub tracks: PlaylistTracksRef,
}

impl From<Playlist> for PlaylistMetadata {
    fn from(value: Playlist) -> Self {
        Self {
            remote_id: value.id,
            name: value.name,
            owner_name: value.owner.display_name.unwrap_or(value.owner.id),
            image_url: value
                .images
                .unwrap_or_default()
                .into_iter()
                .next()
                .map(|i| i.url),
            track_count: value.tracks.total,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Page<T> {
    /// Spotify sometimes returns null entries
    pub items: Vec<Option<T>>,
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub tracks: Option<Page<Track>>,
    pub playlists: Option<Page<Playlist>>,
}

#[derive(Debug, Deserialize)]
pub struct PlaylistItem {
    pub track: Option<Track>,
}

#[derive(Debug, Deserialize)]
pub struct CurrentlyPlaying {
    pub is_playing: bool,
    pub item: Option<Track>,
}

impl CurrentlyPlaying {
    pub fn into_track_id(self) -> Option<String> {
        if !self.is_playing {
            return None;
        }

        self.item.and_then(|t| t.id)
    }
}

#[derive(Debug, Deserialize)]
pub struct Created {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct NewPlaylist<'a> {
    pub name: &'a str,
    pub public: bool,
    pub description: &'a str,
}

#[derive(Debug, Serialize)]
pub struct AddTracks {
    pub uris: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ErrorDetail {
    Api { message: String },
    /// The accounts service uses OAuth style errors
    OAuth(String),
}

impl ErrorDetail {
    pub fn message(self) -> String {
        match self {
            Self::Api { message } => message,
            Self::OAuth(code) => code,
        }
    }
}

pub fn track_uri(track_id: &str) -> String {
    format!("spotify:track:{}", track_id)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn track_json(id: serde_json::Value) -> serde_json::Value {
        json!({
            "id": id,
            "name": "Around the World",
            "artists": [{ "name": "Daft Punk" }, { "name": "Someone Else" }],
            "album": {
                "name": "Homework",
                "images": [
                    { "url": "https://i.scdn.co/large", "width": 640 },
                    { "url": "https://i.scdn.co/small", "width": 64 }
                ]
            },
            "duration_ms": 429533
        })
    }

    #[test]
    fn tracks_become_metadata() {
        let track: Track = serde_json::from_value(track_json(json!("abc"))).unwrap();

        assert_eq!(
            track.into_metadata(),
            Some(TrackMetadata {
                remote_id: "abc".to_string(),
                title: "Around the World".to_string(),
                artists: "Daft Punk, Someone Else".to_string(),
                album: "Homework".to_string(),
                image_url: Some("https://i.scdn.co/large".to_string()),
                duration_ms: 429533,
            })
        );
    }

    #[test]
    fn local_tracks_are_skipped() {
        let track: Track = serde_json::from_value(track_json(json!(null))).unwrap();

        assert_eq!(track.into_metadata(), None);
    }

    #[test]
    fn playlists_fall_back_to_the_owner_id() {
        let playlist: Playlist = serde_json::from_value(json!({
            "id": "p1",
            "name": "Fallback",
            "owner": { "id": "owner-id", "display_name": null },
            "images": null,
            "tracks": { "total": 12 }
        }))
        .unwrap();

        let metadata = PlaylistMetadata::from(playlist);

        assert_eq!(metadata.owner_name, "owner-id");
        assert_eq!(metadata.image_url, None);
        assert_eq!(metadata.track_count, 12);
    }

    #[test]
    fn tokens_expire_relative_to_the_issue_time() {
        let response: TokenResponse = serde_json::from_value(json!({
            "access_token": "access",
            "token_type": "Bearer",
            "scope": "user-read-private",
            "expires_in": 3600
        }))
        .unwrap();

        let issued_at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let token = response.into_token(issued_at);

        assert_eq!(token.expires_at, issued_at + Duration::hours(1));
        // Not rotated, the caller keeps the old refresh token
        assert!(token.refresh_token.is_empty());
    }

    #[test]
    fn paused_playback_counts_as_nothing_playing() {
        let playing: CurrentlyPlaying = serde_json::from_value(json!({
            "is_playing": false,
            "item": track_json(json!("abc"))
        }))
        .unwrap();

        assert_eq!(playing.into_track_id(), None);
    }

    #[test]
    fn search_pages_tolerate_null_items() {
        let response: SearchResponse = serde_json::from_value(json!({
            "playlists": {
                "items": [null, {
                    "id": "p1",
                    "name": "Party",
                    "owner": { "id": "o", "display_name": "Owner" },
                    "images": [{ "url": "https://i.scdn.co/p1" }],
                    "tracks": { "total": 3 }
                }],
                "next": null
            }
        }))
        .unwrap();

        let playlists: Vec<_> = response
            .playlists
            .unwrap()
            .items
            .into_iter()
            .flatten()
            .collect();

        assert_eq!(playlists.len(), 1);
        assert!(response.tracks.is_none());
    }

    #[test]
    fn both_error_styles_are_understood() {
        let api: ErrorBody = serde_json::from_value(json!({
            "error": { "status": 404, "message": "Non existing id" }
        }))
        .unwrap();
        let oauth: ErrorBody = serde_json::from_value(json!({
            "error": "invalid_grant",
            "error_description": "Refresh token revoked"
        }))
        .unwrap();

        assert_eq!(api.error.message(), "Non existing id");
        assert_eq!(oauth.error.message(), "invalid_grant");
    }
}
