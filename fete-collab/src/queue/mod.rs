mod advance;
mod search;

use std::{collections::VecDeque, sync::Arc};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;

use crate::{
    util::KeyedLocks, ClientCache, CollabContext, CollabError, CollabResult, Config,
    NewSongRequest, PlaylistMetadataCache, PrimaryKey, RemoteHandleRef, RemoteQueueMode,
    SessionData, SharedDatabase, SongRequestData, SongRequestStatus, TrackMetadataCache,
};

pub use advance::*;

/// The queue of a session as shown to guests
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub currently_playing: Option<SongRequestData>,
    /// The request up next, followed by the waiting ones in arrival order
    pub queue: Vec<SongRequestData>,
}

/// The active requests of a session, split by status
#[derive(Debug, Default)]
pub(crate) struct ActiveQueue {
    pub current: Option<SongRequestData>,
    pub up_next: Option<SongRequestData>,
    pub waiting: VecDeque<SongRequestData>,
}

impl ActiveQueue {
    fn new(mut requests: Vec<SongRequestData>) -> Self {
        requests.sort_by_key(|r| r.id);

        let mut queue = Self::default();

        for request in requests {
            match request.status {
                SongRequestStatus::CurrentlyPlaying => queue.current = Some(request),
                SongRequestStatus::UpNext => queue.up_next = Some(request),
                SongRequestStatus::InQueue => queue.waiting.push_back(request),
                SongRequestStatus::Played => {}
            }
        }

        queue
    }

    fn contains_track(&self, track_id: &str) -> bool {
        self.current
            .iter()
            .chain(self.up_next.iter())
            .chain(self.waiting.iter())
            .any(|r| r.track_id == track_id)
    }

    fn into_snapshot(self) -> QueueSnapshot {
        QueueSnapshot {
            currently_playing: self.current,
            queue: self.up_next.into_iter().chain(self.waiting).collect(),
        }
    }
}

/// The queue state machine of every session
pub struct QueueEngine {
    config: Config,
    database: SharedDatabase,
    clients: Arc<ClientCache>,
    tracks: Arc<TrackMetadataCache>,
    playlists: Arc<PlaylistMetadataCache>,

    /// Serializes every queue mutation of a session
    locks: KeyedLocks<PrimaryKey>,
    last_updated: DashMap<PrimaryKey, DateTime<Utc>>,
}

impl QueueEngine {
    pub fn new(context: &CollabContext) -> Self {
        Self {
            config: context.config.clone(),
            database: context.database.clone(),
            clients: context.clients.clone(),
            tracks: context.tracks.clone(),
            playlists: context.playlists.clone(),
            locks: Default::default(),
            last_updated: Default::default(),
        }
    }

    /// Adds a track to the end of the queue
    pub async fn request_song(
        &self,
        session: &SessionData,
        requester_id: Option<PrimaryKey>,
        track_id: &str,
    ) -> CollabResult<SongRequestData> {
        let track_id = track_id.trim();

        if track_id.is_empty() {
            return Err(CollabError::InvalidInput("track id is empty".to_string()));
        }

        if !session.active {
            return Err(CollabError::SessionClosed);
        }

        // Validates the track and caches what guests get to see of it
        if self.tracks.lookup(track_id).await?.is_none() {
            let handle = self.owner_client(session).await?;
            let metadata = handle.track(track_id).await?;

            self.tracks.upsert(metadata).await?;
        }

        let _guard = self.session_lock(session.id).await;
        let session = self.reload(session).await?;

        let queue = self.active_queue(session.id).await?;

        if queue.contains_track(track_id) {
            return Err(CollabError::DuplicateInQueue);
        }

        let request = self
            .database
            .create_song_request(NewSongRequest {
                session_id: session.id,
                requester_id,
                track_id: track_id.to_string(),
                status: SongRequestStatus::InQueue,
            })
            .await?;

        debug!("Track {} was requested in session {}", track_id, session.id);

        self.touch(session.id);
        Ok(request)
    }

    /// Returns the playing request and the queue, in the order it will be played
    pub async fn get_ordered_queue(&self, session: &SessionData) -> CollabResult<QueueSnapshot> {
        Ok(self.active_queue(session.id).await?.into_snapshot())
    }

    /// Every request ever made in the session, in arrival order
    pub async fn history(&self, session: &SessionData) -> CollabResult<Vec<SongRequestData>> {
        let mut requests = self.database.song_requests(session.id).await?;
        requests.sort_by_key(|r| r.id);

        Ok(requests)
    }

    /// Sets or clears the playlist tracks are picked from when the queue runs dry
    pub async fn change_fallback_playlist(
        &self,
        session: &SessionData,
        requester_id: PrimaryKey,
        playlist_id: Option<&str>,
    ) -> CollabResult<SessionData> {
        if requester_id != session.owner_id {
            return Err(CollabError::Forbidden);
        }

        if !session.active {
            return Err(CollabError::SessionClosed);
        }

        let playlist_id = playlist_id.map(str::trim).filter(|p| !p.is_empty());

        if let Some(playlist_id) = playlist_id {
            let handle = self.owner_client(session).await?;
            let playlist = handle.playlist(playlist_id).await?;

            self.playlists.upsert(playlist).await?;
        }

        let _guard = self.session_lock(session.id).await;
        let updated = self
            .database
            .set_fallback_playlist(session.id, playlist_id)
            .await?;

        info!(
            "Fallback playlist of session {} set to {}",
            session.id,
            playlist_id.unwrap_or("nothing")
        );

        self.touch(session.id);
        Ok(updated)
    }

    /// When the queue of a session last changed
    pub fn queue_last_updated(&self, session_id: PrimaryKey) -> DateTime<Utc> {
        *self.last_updated.entry(session_id).or_insert_with(Utc::now)
    }

    /// Waits until no queue operation runs on the session
    pub(crate) async fn session_lock(&self, session_id: PrimaryKey) -> OwnedMutexGuard<()> {
        self.locks.lock(&session_id).await
    }

    /// Drops the bookkeeping of a closed session
    pub(crate) fn forget(&self, session_id: PrimaryKey) {
        self.locks.forget(&session_id);
    }

    fn touch(&self, session_id: PrimaryKey) {
        self.last_updated.insert(session_id, Utc::now());
    }

    pub(crate) async fn owner_client(
        &self,
        session: &SessionData,
    ) -> CollabResult<RemoteHandleRef> {
        Ok(self.clients.client(session.owner_id).await?)
    }

    /// Reads the session again, for callers that hold the session lock
    async fn reload(&self, session: &SessionData) -> CollabResult<SessionData> {
        let session = self
            .database
            .session_by_id(session.id)
            .await
            .map_err(|e| match e {
                e if e.is_not_found() => CollabError::SessionNotFound,
                e => e.into(),
            })?;

        if !session.active {
            return Err(CollabError::SessionClosed);
        }

        Ok(session)
    }

    async fn active_queue(&self, session_id: PrimaryKey) -> CollabResult<ActiveQueue> {
        let requests = self.database.active_song_requests(session_id).await?;
        Ok(ActiveQueue::new(requests))
    }

    /// Moves a request forward in its lifecycle
    async fn transition(
        &self,
        request: SongRequestData,
        status: SongRequestStatus,
    ) -> CollabResult<SongRequestData> {
        debug_assert!(
            status > request.status,
            "song requests only move forward, {} -> {}",
            request.status,
            status
        );

        Ok(self
            .database
            .update_song_request_status(request.id, status)
            .await?)
    }

    /// Writes a track that is up next to the music service
    async fn push_remote(
        &self,
        session: &SessionData,
        handle: &RemoteHandleRef,
        track_id: &str,
    ) -> CollabResult<()> {
        match self.config.remote_queue_mode {
            RemoteQueueMode::Disabled => {}
            RemoteQueueMode::PlayerQueue => handle.enqueue_track(track_id).await?,
            RemoteQueueMode::Playlist => {
                handle
                    .add_to_playlist(&session.queue_playlist_id, &[track_id.to_string()])
                    .await?
            }
        }

        Ok(())
    }
}
