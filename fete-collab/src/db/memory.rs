use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use crossbeam::atomic::AtomicCell;
use parking_lot::Mutex;

use crate::{
    CredentialData, Database, DatabaseError, DatabaseResult, NewSession, NewSongRequest, NewUser,
    PlaylistMetadata, PlaylistMetadataData, PrimaryKey, Result, SessionData, SongRequestData,
    SongRequestStatus, Token, TrackMetadata, TrackMetadataData, UserData,
};

/// An in-memory database, used when no database url is configured and in tests.
#[derive(Default)]
pub struct MemoryDatabase {
    id_counter: AtomicCell<PrimaryKey>,
    tables: Mutex<Tables>,
    /// Makes every credential write fail, to simulate an unavailable store
    failing_credential_writes: AtomicBool,
}

#[derive(Default)]
struct Tables {
    users: Vec<(UserData, Option<Token>)>,
    sessions: Vec<SessionData>,
    song_requests: Vec<SongRequestData>,
    tracks: Vec<TrackMetadataData>,
    playlists: Vec<PlaylistMetadataData>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage of the credential storage
    pub fn fail_credential_writes(&self, fail: bool) {
        self.failing_credential_writes.store(fail, Ordering::SeqCst);
    }

    fn next_id(&self) -> PrimaryKey {
        self.id_counter.fetch_add(1) + 1
    }

    fn check_credential_writes(&self) -> Result<()> {
        if self.failing_credential_writes.load(Ordering::SeqCst) {
            return Err(DatabaseError::Internal(
                "credential storage is unavailable".into(),
            ));
        }

        Ok(())
    }

    fn update_session<F>(&self, session_id: PrimaryKey, update: F) -> Result<SessionData>
    where
        F: FnOnce(&mut SessionData),
    {
        let mut tables = self.tables.lock();
        let session = tables
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or(DatabaseError::NotFound {
                resource: "session",
                identifier: "id",
            })?;

        update(session);
        Ok(session.clone())
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData> {
        self.tables
            .lock()
            .users
            .iter()
            .find(|(u, _)| u.id == user_id)
            .map(|(u, _)| u.clone())
            .ok_or(DatabaseError::NotFound {
                resource: "user",
                identifier: "id",
            })
    }

    async fn user_by_remote_id(&self, remote_id: &str) -> Result<UserData> {
        self.tables
            .lock()
            .users
            .iter()
            .find(|(u, _)| u.remote_id == remote_id)
            .map(|(u, _)| u.clone())
            .ok_or(DatabaseError::NotFound {
                resource: "user",
                identifier: "remote_id",
            })
    }

    async fn create_user(&self, new_user: NewUser) -> Result<UserData> {
        self.user_by_remote_id(&new_user.remote_id)
            .await
            .conflict_or_ok("user", "remote_id", &new_user.remote_id)?;

        let user = UserData {
            id: self.next_id(),
            remote_id: new_user.remote_id,
            display_name: new_user.display_name,
            country: new_user.country,
        };

        self.tables.lock().users.push((user.clone(), None));
        Ok(user)
    }

    async fn credential_by_user(&self, user_id: PrimaryKey) -> Result<CredentialData> {
        self.tables
            .lock()
            .users
            .iter()
            .find(|(u, _)| u.id == user_id)
            .and_then(|(_, token)| token.clone())
            .map(|token| CredentialData { user_id, token })
            .ok_or(DatabaseError::NotFound {
                resource: "credential",
                identifier: "user_id",
            })
    }

    async fn set_credential(&self, user_id: PrimaryKey, token: &Token) -> Result<()> {
        self.check_credential_writes()?;

        let mut tables = self.tables.lock();
        let (_, stored) = tables
            .users
            .iter_mut()
            .find(|(u, _)| u.id == user_id)
            .ok_or(DatabaseError::NotFound {
                resource: "user",
                identifier: "id",
            })?;

        *stored = Some(token.clone());
        Ok(())
    }

    async fn update_credential_if_newer(
        &self,
        user_id: PrimaryKey,
        token: &Token,
    ) -> Result<bool> {
        self.check_credential_writes()?;

        let mut tables = self.tables.lock();
        let (_, stored) = tables
            .users
            .iter_mut()
            .find(|(u, _)| u.id == user_id)
            .ok_or(DatabaseError::NotFound {
                resource: "user",
                identifier: "id",
            })?;

        let is_newer = stored
            .as_ref()
            .map_or(true, |s| s.expires_at < token.expires_at);

        if is_newer {
            *stored = Some(token.clone());
        }

        Ok(is_newer)
    }

    async fn session_by_id(&self, session_id: PrimaryKey) -> Result<SessionData> {
        self.tables
            .lock()
            .sessions
            .iter()
            .find(|s| s.id == session_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "session",
                identifier: "id",
            })
    }

    async fn session_by_join_code(&self, join_code: &str) -> Result<SessionData> {
        self.tables
            .lock()
            .sessions
            .iter()
            .find(|s| s.join_code.as_deref() == Some(join_code))
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "session",
                identifier: "join_code",
            })
    }

    async fn list_active_sessions(&self) -> Result<Vec<SessionData>> {
        Ok(self
            .tables
            .lock()
            .sessions
            .iter()
            .filter(|s| s.active)
            .cloned()
            .collect())
    }

    async fn sessions_by_owner(&self, owner_id: PrimaryKey) -> Result<Vec<SessionData>> {
        Ok(self
            .tables
            .lock()
            .sessions
            .iter()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn count_sessions(&self, only_active: bool) -> Result<i64> {
        let count = self
            .tables
            .lock()
            .sessions
            .iter()
            .filter(|s| !only_active || s.active)
            .count();

        Ok(count as i64)
    }

    async fn create_session(&self, new_session: NewSession) -> Result<SessionData> {
        self.session_by_join_code(&new_session.join_code)
            .await
            .conflict_or_ok("session", "join_code", &new_session.join_code)?;

        self.user_by_id(new_session.owner_id).await?;

        let session = SessionData {
            id: self.next_id(),
            owner_id: new_session.owner_id,
            join_code: Some(new_session.join_code),
            active: true,
            queue_playlist_id: new_session.queue_playlist_id,
            fallback_playlist_id: None,
            title: new_session.title,
            created_at: Utc::now(),
        };

        self.tables.lock().sessions.push(session.clone());
        Ok(session)
    }

    async fn set_fallback_playlist(
        &self,
        session_id: PrimaryKey,
        playlist_id: Option<&str>,
    ) -> Result<SessionData> {
        self.update_session(session_id, |s| {
            s.fallback_playlist_id = playlist_id.map(|p| p.to_string())
        })
    }

    async fn close_session(&self, session_id: PrimaryKey) -> Result<SessionData> {
        self.update_session(session_id, |s| {
            s.active = false;
            s.join_code = None;
        })
    }

    async fn song_requests(&self, session_id: PrimaryKey) -> Result<Vec<SongRequestData>> {
        Ok(self
            .tables
            .lock()
            .song_requests
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn active_song_requests(
        &self,
        session_id: PrimaryKey,
    ) -> Result<Vec<SongRequestData>> {
        Ok(self
            .tables
            .lock()
            .song_requests
            .iter()
            .filter(|r| r.session_id == session_id && r.status.is_active())
            .cloned()
            .collect())
    }

    async fn create_song_request(&self, new_request: NewSongRequest) -> Result<SongRequestData> {
        self.session_by_id(new_request.session_id).await?;

        let request = SongRequestData {
            id: self.next_id(),
            session_id: new_request.session_id,
            requester_id: new_request.requester_id,
            track_id: new_request.track_id,
            status: new_request.status,
            created_at: Utc::now(),
        };

        self.tables.lock().song_requests.push(request.clone());
        Ok(request)
    }

    async fn update_song_request_status(
        &self,
        request_id: PrimaryKey,
        status: SongRequestStatus,
    ) -> Result<SongRequestData> {
        let mut tables = self.tables.lock();
        let request = tables
            .song_requests
            .iter_mut()
            .find(|r| r.id == request_id)
            .ok_or(DatabaseError::NotFound {
                resource: "song request",
                identifier: "id",
            })?;

        request.status = status;
        Ok(request.clone())
    }

    async fn track_metadata_by_remote_id(&self, remote_id: &str) -> Result<TrackMetadataData> {
        self.tables
            .lock()
            .tracks
            .iter()
            .find(|t| t.metadata.remote_id == remote_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "track metadata",
                identifier: "remote_id",
            })
    }

    async fn create_track_metadata(&self, metadata: TrackMetadata) -> Result<TrackMetadataData> {
        self.track_metadata_by_remote_id(&metadata.remote_id)
            .await
            .conflict_or_ok("track metadata", "remote_id", &metadata.remote_id)?;

        let row = TrackMetadataData {
            id: self.next_id(),
            metadata,
        };

        self.tables.lock().tracks.push(row.clone());
        Ok(row)
    }

    async fn update_track_metadata(
        &self,
        id: PrimaryKey,
        metadata: TrackMetadata,
    ) -> Result<TrackMetadataData> {
        let mut tables = self.tables.lock();
        let row = tables
            .tracks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(DatabaseError::NotFound {
                resource: "track metadata",
                identifier: "id",
            })?;

        row.metadata = metadata;
        Ok(row.clone())
    }

    async fn playlist_metadata_by_remote_id(
        &self,
        remote_id: &str,
    ) -> Result<PlaylistMetadataData> {
        self.tables
            .lock()
            .playlists
            .iter()
            .find(|p| p.metadata.remote_id == remote_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "playlist metadata",
                identifier: "remote_id",
            })
    }

    async fn create_playlist_metadata(
        &self,
        metadata: PlaylistMetadata,
    ) -> Result<PlaylistMetadataData> {
        self.playlist_metadata_by_remote_id(&metadata.remote_id)
            .await
            .conflict_or_ok("playlist metadata", "remote_id", &metadata.remote_id)?;

        let row = PlaylistMetadataData {
            id: self.next_id(),
            metadata,
        };

        self.tables.lock().playlists.push(row.clone());
        Ok(row)
    }

    async fn update_playlist_metadata(
        &self,
        id: PrimaryKey,
        metadata: PlaylistMetadata,
    ) -> Result<PlaylistMetadataData> {
        let mut tables = self.tables.lock();
        let row = tables
            .playlists
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(DatabaseError::NotFound {
                resource: "playlist metadata",
                identifier: "id",
            })?;

        row.metadata = metadata;
        Ok(row.clone())
    }
}
