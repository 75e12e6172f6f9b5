//! A scripted stand-in for the music service, used by tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration as StdDuration,
};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;

use crate::{PlaylistMetadata, Token, TrackMetadata};

use super::{Remote, RemoteError, RemoteHandle, RemoteHandleRef, RemoteResult, RemoteUser};

#[derive(Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<FakeState>>,
}

#[derive(Default)]
struct FakeState {
    refresh_script: VecDeque<RemoteResult<Token>>,
    refresh_delay: Option<StdDuration>,
    refresh_calls: usize,
    tracks: HashMap<String, TrackMetadata>,
    playlists: HashMap<String, (PlaylistMetadata, Vec<String>)>,
    playing: Option<String>,
    enqueued: Vec<String>,
    playlist_writes: Vec<(String, Vec<String>)>,
    created_playlists: Vec<String>,
    searches: Vec<(String, Option<String>)>,
    used_tokens: Vec<String>,
    fail_queue_writes: bool,
}

pub struct FakeHandle {
    token: Token,
    state: Arc<Mutex<FakeState>>,
}

pub fn fake_token(access_token: &str, expires_in: Duration) -> Token {
    Token {
        access_token: access_token.to_string(),
        refresh_token: format!("{}-refresh", access_token),
        token_type: "Bearer".to_string(),
        expires_at: Utc::now() + expires_in,
    }
}

pub fn fake_track(remote_id: &str) -> TrackMetadata {
    TrackMetadata {
        remote_id: remote_id.to_string(),
        title: format!("Title of {}", remote_id),
        artists: "Some Artist".to_string(),
        album: "Some Album".to_string(),
        image_url: None,
        duration_ms: 180_000,
    }
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracks(track_ids: &[&str]) -> Self {
        let remote = Self::new();
        for id in track_ids {
            remote.add_track(fake_track(id));
        }
        remote
    }

    pub fn add_track(&self, track: TrackMetadata) {
        self.state
            .lock()
            .tracks
            .insert(track.remote_id.clone(), track);
    }

    pub fn add_playlist(&self, playlist_id: &str, track_ids: &[&str]) {
        for id in track_ids {
            self.add_track(fake_track(id));
        }

        let metadata = PlaylistMetadata {
            remote_id: playlist_id.to_string(),
            name: format!("Playlist {}", playlist_id),
            owner_name: "Someone".to_string(),
            image_url: None,
            track_count: track_ids.len() as i32,
        };

        self.state.lock().playlists.insert(
            playlist_id.to_string(),
            (metadata, track_ids.iter().map(|t| t.to_string()).collect()),
        );
    }

    pub fn set_playing(&self, track_id: Option<&str>) {
        self.state.lock().playing = track_id.map(|t| t.to_string());
    }

    /// Queues up the result of the next refresh call.
    /// Without a script, refreshes succeed with a token valid for an hour.
    pub fn script_refresh(&self, result: RemoteResult<Token>) {
        self.state.lock().refresh_script.push_back(result);
    }

    pub fn delay_refresh(&self, delay: StdDuration) {
        self.state.lock().refresh_delay = Some(delay);
    }

    /// Makes enqueueing and playlist writes fail until turned off again
    pub fn fail_queue_writes(&self, fail: bool) {
        self.state.lock().fail_queue_writes = fail;
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.lock().refresh_calls
    }

    pub fn enqueued(&self) -> Vec<String> {
        self.state.lock().enqueued.clone()
    }

    pub fn playlist_writes(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().playlist_writes.clone()
    }

    pub fn created_playlists(&self) -> Vec<String> {
        self.state.lock().created_playlists.clone()
    }

    pub fn searches(&self) -> Vec<(String, Option<String>)> {
        self.state.lock().searches.clone()
    }

    pub fn used_tokens(&self) -> Vec<String> {
        self.state.lock().used_tokens.clone()
    }
}

#[async_trait]
impl Remote for FakeRemote {
    async fn refresh_token(&self, refresh_token: &str) -> RemoteResult<Token> {
        let (delay, scripted, call) = {
            let mut state = self.state.lock();
            state.refresh_calls += 1;
            (
                state.refresh_delay,
                state.refresh_script.pop_front(),
                state.refresh_calls,
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        scripted.unwrap_or_else(|| {
            Ok(Token {
                access_token: format!("refreshed-{}", call),
                refresh_token: refresh_token.to_string(),
                token_type: "Bearer".to_string(),
                expires_at: Utc::now() + Duration::hours(1),
            })
        })
    }

    fn handle(&self, token: &Token) -> RemoteHandleRef {
        Arc::new(FakeHandle {
            token: token.clone(),
            state: self.state.clone(),
        })
    }
}

impl FakeState {
    fn check_queue_write(&self) -> RemoteResult<()> {
        if self.fail_queue_writes {
            return Err(RemoteError::Status {
                status: 503,
                message: "queue writes are unavailable".to_string(),
            });
        }

        Ok(())
    }
}

impl FakeHandle {
    fn state(&self) -> parking_lot::MutexGuard<'_, FakeState> {
        let mut state = self.state.lock();
        state.used_tokens.push(self.token.access_token.clone());
        state
    }
}

#[async_trait]
impl RemoteHandle for FakeHandle {
    async fn current_user(&self) -> RemoteResult<RemoteUser> {
        drop(self.state());

        Ok(RemoteUser {
            id: "remote-owner".to_string(),
            display_name: "Owner".to_string(),
            country: Some("DE".to_string()),
        })
    }

    async fn search_tracks(
        &self,
        query: &str,
        limit: u32,
        market: Option<&str>,
    ) -> RemoteResult<Vec<TrackMetadata>> {
        let mut state = self.state();
        state
            .searches
            .push((query.to_string(), market.map(|m| m.to_string())));

        let needle = query.trim_end_matches('*').to_lowercase();
        let mut results: Vec<_> = state
            .tracks
            .values()
            .filter(|t| t.title.to_lowercase().contains(&needle))
            .cloned()
            .collect();

        results.sort_by(|a, b| a.remote_id.cmp(&b.remote_id));
        results.truncate(limit as usize);
        Ok(results)
    }

    async fn search_playlists(
        &self,
        query: &str,
        limit: u32,
    ) -> RemoteResult<Vec<PlaylistMetadata>> {
        let mut state = self.state();
        state.searches.push((query.to_string(), None));

        let needle = query.trim_end_matches('*').to_lowercase();
        let mut results: Vec<_> = state
            .playlists
            .values()
            .map(|(p, _)| p.clone())
            .filter(|p| p.name.to_lowercase().contains(&needle))
            .collect();

        results.sort_by(|a, b| a.remote_id.cmp(&b.remote_id));
        results.truncate(limit as usize);
        Ok(results)
    }

    async fn track(&self, track_id: &str) -> RemoteResult<TrackMetadata> {
        self.state()
            .tracks
            .get(track_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("track {}", track_id)))
    }

    async fn playlist(&self, playlist_id: &str) -> RemoteResult<PlaylistMetadata> {
        self.state()
            .playlists
            .get(playlist_id)
            .map(|(p, _)| p.clone())
            .ok_or_else(|| RemoteError::NotFound(format!("playlist {}", playlist_id)))
    }

    async fn playlist_tracks(&self, playlist_id: &str) -> RemoteResult<Vec<TrackMetadata>> {
        let state = self.state();
        let (_, track_ids) = state
            .playlists
            .get(playlist_id)
            .ok_or_else(|| RemoteError::NotFound(format!("playlist {}", playlist_id)))?;

        Ok(track_ids
            .iter()
            .filter_map(|id| state.tracks.get(id).cloned())
            .collect())
    }

    async fn currently_playing(&self) -> RemoteResult<Option<String>> {
        Ok(self.state().playing.clone())
    }

    async fn enqueue_track(&self, track_id: &str) -> RemoteResult<()> {
        let mut state = self.state();
        state.check_queue_write()?;
        state.enqueued.push(track_id.to_string());
        Ok(())
    }

    async fn create_playlist(&self, _user_id: &str, name: &str) -> RemoteResult<String> {
        let mut state = self.state();
        let id = format!("queue-{}", state.created_playlists.len() + 1);
        state.created_playlists.push(name.to_string());
        Ok(id)
    }

    async fn add_to_playlist(&self, playlist_id: &str, track_ids: &[String]) -> RemoteResult<()> {
        let mut state = self.state();
        state.check_queue_write()?;
        state
            .playlist_writes
            .push((playlist_id.to_string(), track_ids.to_vec()));
        Ok(())
    }
}
