use async_trait::async_trait;
use fete_collab::{
    PlaylistMetadata, RemoteError, RemoteHandle, RemoteResult, RemoteUser, Token, TrackMetadata,
};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use crate::{check, parse, transport, wire, API_BASE};

/// Spotify only allows this many tracks per playlist write
const MAX_TRACKS_PER_WRITE: usize = 100;
const PLAYLIST_PAGE_SIZE: u32 = 100;

/// A Spotify Web API client acting as a single user
pub struct SpotifyHandle {
    http: Client,
    access_token: String,
}

impl SpotifyHandle {
    pub fn new(http: Client, token: &Token) -> Self {
        Self {
            http,
            access_token: token.access_token.clone(),
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{}", API_BASE, path))
            .bearer_auth(&self.access_token)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(format!("{}{}", API_BASE, path))
            .bearer_auth(&self.access_token)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> RemoteResult<T> {
        let response = request.send().await.map_err(transport)?;
        parse(response).await
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<()> {
        let response = request.send().await.map_err(transport)?;
        check(response).await?;

        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        kind: &str,
        limit: u32,
        market: Option<&str>,
    ) -> RemoteResult<wire::SearchResponse> {
        let limit = limit.clamp(1, 50).to_string();
        let mut params = vec![("q", query), ("type", kind), ("limit", limit.as_str())];

        if let Some(market) = market {
            params.push(("market", market));
        }

        self.fetch(self.get("/search").query(&params)).await
    }
}

#[async_trait]
impl RemoteHandle for SpotifyHandle {
    async fn current_user(&self) -> RemoteResult<RemoteUser> {
        let user: wire::User = self.fetch(self.get("/me")).await?;
        Ok(user.into())
    }

    async fn search_tracks(
        &self,
        query: &str,
        limit: u32,
        market: Option<&str>,
    ) -> RemoteResult<Vec<TrackMetadata>> {
        let response = self.search(query, "track", limit, market).await?;

        Ok(response
            .tracks
            .map(|page| page.items)
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .filter_map(wire::Track::into_metadata)
            .collect())
    }

    async fn search_playlists(
        &self,
        query: &str,
        limit: u32,
    ) -> RemoteResult<Vec<PlaylistMetadata>> {
        let response = self.search(query, "playlist", limit, None).await?;

        Ok(response
            .playlists
            .map(|page| page.items)
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .map(PlaylistMetadata::from)
            .collect())
    }

    async fn track(&self, track_id: &str) -> RemoteResult<TrackMetadata> {
        let track: wire::Track = self.fetch(self.get(&format!("/tracks/{}", track_id))).await?;

        track
            .into_metadata()
            .ok_or_else(|| RemoteError::NotFound(format!("track {}", track_id)))
    }

    async fn playlist(&self, playlist_id: &str) -> RemoteResult<PlaylistMetadata> {
        let playlist: wire::Playlist = self
            .fetch(self.get(&format!("/playlists/{}", playlist_id)))
            .await?;

        Ok(playlist.into())
    }

    async fn playlist_tracks(&self, playlist_id: &str) -> RemoteResult<Vec<TrackMetadata>> {
        let mut tracks = vec![];
        let mut offset = 0;

        loop {
            let page: wire::Page<wire::PlaylistItem> = self
                .fetch(
                    self.get(&format!("/playlists/{}/tracks", playlist_id))
                        .query(&[("limit", PLAYLIST_PAGE_SIZE), ("offset", offset)]),
                )
                .await?;

            tracks.extend(
                page.items
                    .into_iter()
                    .flatten()
                    .filter_map(|item| item.track)
                    .filter_map(wire::Track::into_metadata),
            );

            if page.next.is_none() {
                break;
            }

            offset += PLAYLIST_PAGE_SIZE;
        }

        Ok(tracks)
    }

    async fn currently_playing(&self) -> RemoteResult<Option<String>> {
        let response = self
            .get("/me/player/currently-playing")
            .send()
            .await
            .map_err(transport)?;

        // Nothing is playing on any device
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let playing: wire::CurrentlyPlaying = parse(response).await?;
        Ok(playing.into_track_id())
    }

    async fn enqueue_track(&self, track_id: &str) -> RemoteResult<()> {
        let uri = wire::track_uri(track_id);

        self.send(self.post("/me/player/queue").query(&[("uri", uri)]))
            .await
    }

    async fn create_playlist(&self, user_id: &str, name: &str) -> RemoteResult<String> {
        let body = wire::NewPlaylist {
            name,
            public: false,
            description: "Managed by SpotiFete",
        };

        let created: wire::Created = self
            .fetch(self.post(&format!("/users/{}/playlists", user_id)).json(&body))
            .await?;

        Ok(created.id)
    }

    async fn add_to_playlist(&self, playlist_id: &str, track_ids: &[String]) -> RemoteResult<()> {
        for chunk in track_ids.chunks(MAX_TRACKS_PER_WRITE) {
            let body = wire::AddTracks {
                uris: chunk.iter().map(|id| wire::track_uri(id)).collect(),
            };

            self.send(
                self.post(&format!("/playlists/{}/tracks", playlist_id))
                    .json(&body),
            )
            .await?;
        }

        Ok(())
    }
}
