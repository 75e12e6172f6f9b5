use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::PgPoolOptions, query, query_as, query_scalar, Error as SqlxError, FromRow, PgPool,
};

use crate::{
    CredentialData, Database, DatabaseError, DatabaseResult, IntoDatabaseError, NewSession,
    NewSongRequest, NewUser, PlaylistMetadata, PlaylistMetadataData, PrimaryKey, Result,
    SessionData, SongRequestData, SongRequestStatus, Token, TrackMetadata, TrackMetadataData,
    UserData,
};

const SESSION_COLUMNS: &str =
    "id, owner_id, join_code, active, queue_playlist_id, fallback_playlist_id, title, created_at";
const REQUEST_COLUMNS: &str = "id, session_id, requester_id, track_id, status, created_at";

/// A postgres database implementation for SpotiFete
pub struct PgDatabase {
    pool: PgPool,
}

#[derive(FromRow)]
struct UserRow {
    id: PrimaryKey,
    remote_id: String,
    display_name: String,
    country: Option<String>,
}

#[derive(FromRow)]
struct CredentialRow {
    access_token: Option<String>,
    refresh_token: Option<String>,
    token_type: Option<String>,
    token_expiry: Option<DateTime<Utc>>,
}

#[derive(FromRow)]
struct SessionRow {
    id: PrimaryKey,
    owner_id: PrimaryKey,
    join_code: Option<String>,
    active: bool,
    queue_playlist_id: String,
    fallback_playlist_id: Option<String>,
    title: String,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct SongRequestRow {
    id: PrimaryKey,
    session_id: PrimaryKey,
    requester_id: Option<PrimaryKey>,
    track_id: String,
    status: String,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct TrackMetadataRow {
    id: PrimaryKey,
    remote_id: String,
    title: String,
    artists: String,
    album: String,
    image_url: Option<String>,
    duration_ms: i32,
}

#[derive(FromRow)]
struct PlaylistMetadataRow {
    id: PrimaryKey,
    remote_id: String,
    name: String,
    owner_name: String,
    image_url: Option<String>,
    track_count: i32,
}

impl PgDatabase {
    pub async fn new(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| e.any())?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| DatabaseError::Internal(Box::new(e)))?;

        Ok(Self { pool })
    }

    async fn sessions_where(
        &self,
        condition: &str,
        value: Option<PrimaryKey>,
    ) -> Result<Vec<SessionData>> {
        let sql = format!(
            "SELECT {} FROM listening_sessions WHERE {} ORDER BY id",
            SESSION_COLUMNS, condition
        );

        let mut statement = query_as::<_, SessionRow>(&sql);
        if let Some(value) = value {
            statement = statement.bind(value);
        }

        let rows = statement.fetch_all(&self.pool).await.map_err(|e| e.any())?;

        Ok(rows.into_iter().map(SessionData::from).collect())
    }

    async fn requests_where(
        &self,
        condition: &str,
        session_id: PrimaryKey,
    ) -> Result<Vec<SongRequestData>> {
        let sql = format!(
            "SELECT {} FROM song_requests WHERE session_id = $1 {} ORDER BY id",
            REQUEST_COLUMNS, condition
        );

        query_as::<_, SongRequestRow>(&sql)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())?
            .into_iter()
            .map(SongRequestData::try_from)
            .collect()
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData> {
        query_as::<_, UserRow>(
            "SELECT id, remote_id, display_name, country FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map(UserData::from)
        .map_err(|e| e.not_found_or("user", "id"))
    }

    async fn user_by_remote_id(&self, remote_id: &str) -> Result<UserData> {
        query_as::<_, UserRow>(
            "SELECT id, remote_id, display_name, country FROM users WHERE remote_id = $1",
        )
        .bind(remote_id)
        .fetch_one(&self.pool)
        .await
        .map(UserData::from)
        .map_err(|e| e.not_found_or("user", "remote_id"))
    }

    async fn create_user(&self, new_user: NewUser) -> Result<UserData> {
        let remote_id = new_user.remote_id.clone();

        self.user_by_remote_id(&remote_id)
            .await
            .conflict_or_ok("user", "remote_id", &remote_id)?;

        query_as::<_, UserRow>(
            "INSERT INTO users (remote_id, display_name, country) VALUES ($1, $2, $3)
            RETURNING id, remote_id, display_name, country",
        )
        .bind(new_user.remote_id)
        .bind(new_user.display_name)
        .bind(new_user.country)
        .fetch_one(&self.pool)
        .await
        .map(UserData::from)
        .map_err(|e| e.conflict_or("user", "remote_id", &remote_id))
    }

    async fn credential_by_user(&self, user_id: PrimaryKey) -> Result<CredentialData> {
        let row = query_as::<_, CredentialRow>(
            "SELECT access_token, refresh_token, token_type, token_expiry FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("user", "id"))?;

        let not_found = DatabaseError::NotFound {
            resource: "credential",
            identifier: "user_id",
        };

        match row {
            CredentialRow {
                access_token: Some(access_token),
                refresh_token: Some(refresh_token),
                token_type: Some(token_type),
                token_expiry: Some(expires_at),
            } => Ok(CredentialData {
                user_id,
                token: Token {
                    access_token,
                    refresh_token,
                    token_type,
                    expires_at,
                },
            }),
            _ => Err(not_found),
        }
    }

    async fn set_credential(&self, user_id: PrimaryKey, token: &Token) -> Result<()> {
        let result = query(
            "UPDATE users SET access_token = $1, refresh_token = $2, token_type = $3, token_expiry = $4
            WHERE id = $5",
        )
        .bind(&token.access_token)
        .bind(&token.refresh_token)
        .bind(&token.token_type)
        .bind(token.expires_at)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "user",
                identifier: "id",
            });
        }

        Ok(())
    }

    async fn update_credential_if_newer(
        &self,
        user_id: PrimaryKey,
        token: &Token,
    ) -> Result<bool> {
        let result = query(
            "UPDATE users SET access_token = $1, refresh_token = $2, token_type = $3, token_expiry = $4
            WHERE id = $5 AND (token_expiry IS NULL OR token_expiry < $4)",
        )
        .bind(&token.access_token)
        .bind(&token.refresh_token)
        .bind(&token.token_type)
        .bind(token.expires_at)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // Either a later token is stored or the user is gone
        self.user_by_id(user_id).await?;
        Ok(false)
    }

    async fn session_by_id(&self, session_id: PrimaryKey) -> Result<SessionData> {
        self.sessions_where("id = $1", Some(session_id))
            .await?
            .into_iter()
            .next()
            .ok_or(DatabaseError::NotFound {
                resource: "session",
                identifier: "id",
            })
    }

    async fn session_by_join_code(&self, join_code: &str) -> Result<SessionData> {
        let sql = format!(
            "SELECT {} FROM listening_sessions WHERE join_code = $1",
            SESSION_COLUMNS
        );

        query_as::<_, SessionRow>(&sql)
            .bind(join_code)
            .fetch_one(&self.pool)
            .await
            .map(SessionData::from)
            .map_err(|e| e.not_found_or("session", "join_code"))
    }

    async fn list_active_sessions(&self) -> Result<Vec<SessionData>> {
        self.sessions_where("active", None).await
    }

    async fn sessions_by_owner(&self, owner_id: PrimaryKey) -> Result<Vec<SessionData>> {
        self.sessions_where("owner_id = $1", Some(owner_id)).await
    }

    async fn count_sessions(&self, only_active: bool) -> Result<i64> {
        let sql = if only_active {
            "SELECT COUNT(*) FROM listening_sessions WHERE active"
        } else {
            "SELECT COUNT(*) FROM listening_sessions"
        };

        query_scalar::<_, i64>(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.any())
    }

    async fn create_session(&self, new_session: NewSession) -> Result<SessionData> {
        let join_code = new_session.join_code.clone();

        self.session_by_join_code(&join_code)
            .await
            .conflict_or_ok("session", "join_code", &join_code)?;

        let sql = format!(
            "INSERT INTO listening_sessions (owner_id, join_code, active, queue_playlist_id, title)
            VALUES ($1, $2, TRUE, $3, $4)
            RETURNING {}",
            SESSION_COLUMNS
        );

        query_as::<_, SessionRow>(&sql)
            .bind(new_session.owner_id)
            .bind(new_session.join_code)
            .bind(new_session.queue_playlist_id)
            .bind(new_session.title)
            .fetch_one(&self.pool)
            .await
            .map(SessionData::from)
            .map_err(|e| e.conflict_or("session", "join_code", &join_code))
    }

    async fn set_fallback_playlist(
        &self,
        session_id: PrimaryKey,
        playlist_id: Option<&str>,
    ) -> Result<SessionData> {
        let sql = format!(
            "UPDATE listening_sessions SET fallback_playlist_id = $1 WHERE id = $2 RETURNING {}",
            SESSION_COLUMNS
        );

        query_as::<_, SessionRow>(&sql)
            .bind(playlist_id)
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .map(SessionData::from)
            .map_err(|e| e.not_found_or("session", "id"))
    }

    async fn close_session(&self, session_id: PrimaryKey) -> Result<SessionData> {
        let sql = format!(
            "UPDATE listening_sessions SET active = FALSE, join_code = NULL WHERE id = $1 RETURNING {}",
            SESSION_COLUMNS
        );

        query_as::<_, SessionRow>(&sql)
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .map(SessionData::from)
            .map_err(|e| e.not_found_or("session", "id"))
    }

    async fn song_requests(&self, session_id: PrimaryKey) -> Result<Vec<SongRequestData>> {
        self.requests_where("", session_id).await
    }

    async fn active_song_requests(
        &self,
        session_id: PrimaryKey,
    ) -> Result<Vec<SongRequestData>> {
        self.requests_where("AND status <> 'PLAYED'", session_id)
            .await
    }

    async fn create_song_request(&self, new_request: NewSongRequest) -> Result<SongRequestData> {
        let sql = format!(
            "INSERT INTO song_requests (session_id, requester_id, track_id, status)
            VALUES ($1, $2, $3, $4)
            RETURNING {}",
            REQUEST_COLUMNS
        );

        let row = query_as::<_, SongRequestRow>(&sql)
            .bind(new_request.session_id)
            .bind(new_request.requester_id)
            .bind(&new_request.track_id)
            .bind(new_request.status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.conflict_or("song request", "track_id", &new_request.track_id))?;

        SongRequestData::try_from(row)
    }

    async fn update_song_request_status(
        &self,
        request_id: PrimaryKey,
        status: SongRequestStatus,
    ) -> Result<SongRequestData> {
        let sql = format!(
            "UPDATE song_requests SET status = $1 WHERE id = $2 RETURNING {}",
            REQUEST_COLUMNS
        );

        let row = query_as::<_, SongRequestRow>(&sql)
            .bind(status.as_str())
            .bind(request_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("song request", "id"))?;

        SongRequestData::try_from(row)
    }

    async fn track_metadata_by_remote_id(&self, remote_id: &str) -> Result<TrackMetadataData> {
        query_as::<_, TrackMetadataRow>("SELECT * FROM track_metadata WHERE remote_id = $1")
            .bind(remote_id)
            .fetch_one(&self.pool)
            .await
            .map(TrackMetadataData::from)
            .map_err(|e| e.not_found_or("track metadata", "remote_id"))
    }

    async fn create_track_metadata(&self, metadata: TrackMetadata) -> Result<TrackMetadataData> {
        let remote_id = metadata.remote_id.clone();

        self.track_metadata_by_remote_id(&remote_id)
            .await
            .conflict_or_ok("track metadata", "remote_id", &remote_id)?;

        query_as::<_, TrackMetadataRow>(
            "INSERT INTO track_metadata (remote_id, title, artists, album, image_url, duration_ms)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *",
        )
        .bind(metadata.remote_id)
        .bind(metadata.title)
        .bind(metadata.artists)
        .bind(metadata.album)
        .bind(metadata.image_url)
        .bind(metadata.duration_ms)
        .fetch_one(&self.pool)
        .await
        .map(TrackMetadataData::from)
        .map_err(|e| e.conflict_or("track metadata", "remote_id", &remote_id))
    }

    async fn update_track_metadata(
        &self,
        id: PrimaryKey,
        metadata: TrackMetadata,
    ) -> Result<TrackMetadataData> {
        query_as::<_, TrackMetadataRow>(
            "UPDATE track_metadata
            SET remote_id = $1, title = $2, artists = $3, album = $4, image_url = $5, duration_ms = $6
            WHERE id = $7
            RETURNING *",
        )
        .bind(metadata.remote_id)
        .bind(metadata.title)
        .bind(metadata.artists)
        .bind(metadata.album)
        .bind(metadata.image_url)
        .bind(metadata.duration_ms)
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map(TrackMetadataData::from)
        .map_err(|e| e.not_found_or("track metadata", "id"))
    }

    async fn playlist_metadata_by_remote_id(
        &self,
        remote_id: &str,
    ) -> Result<PlaylistMetadataData> {
        query_as::<_, PlaylistMetadataRow>("SELECT * FROM playlist_metadata WHERE remote_id = $1")
            .bind(remote_id)
            .fetch_one(&self.pool)
            .await
            .map(PlaylistMetadataData::from)
            .map_err(|e| e.not_found_or("playlist metadata", "remote_id"))
    }

    async fn create_playlist_metadata(
        &self,
        metadata: PlaylistMetadata,
    ) -> Result<PlaylistMetadataData> {
        let remote_id = metadata.remote_id.clone();

        self.playlist_metadata_by_remote_id(&remote_id)
            .await
            .conflict_or_ok("playlist metadata", "remote_id", &remote_id)?;

        query_as::<_, PlaylistMetadataRow>(
            "INSERT INTO playlist_metadata (remote_id, name, owner_name, image_url, track_count)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *",
        )
        .bind(metadata.remote_id)
        .bind(metadata.name)
        .bind(metadata.owner_name)
        .bind(metadata.image_url)
        .bind(metadata.track_count)
        .fetch_one(&self.pool)
        .await
        .map(PlaylistMetadataData::from)
        .map_err(|e| e.conflict_or("playlist metadata", "remote_id", &remote_id))
    }

    async fn update_playlist_metadata(
        &self,
        id: PrimaryKey,
        metadata: PlaylistMetadata,
    ) -> Result<PlaylistMetadataData> {
        query_as::<_, PlaylistMetadataRow>(
            "UPDATE playlist_metadata
            SET remote_id = $1, name = $2, owner_name = $3, image_url = $4, track_count = $5
            WHERE id = $6
            RETURNING *",
        )
        .bind(metadata.remote_id)
        .bind(metadata.name)
        .bind(metadata.owner_name)
        .bind(metadata.image_url)
        .bind(metadata.track_count)
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map(PlaylistMetadataData::from)
        .map_err(|e| e.not_found_or("playlist metadata", "id"))
    }
}

impl From<UserRow> for UserData {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            remote_id: row.remote_id,
            display_name: row.display_name,
            country: row.country,
        }
    }
}

impl From<SessionRow> for SessionData {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            join_code: row.join_code,
            active: row.active,
            queue_playlist_id: row.queue_playlist_id,
            fallback_playlist_id: row.fallback_playlist_id,
            title: row.title,
            created_at: row.created_at,
        }
    }
}

impl TryFrom<SongRequestRow> for SongRequestData {
    type Error = DatabaseError;

    fn try_from(row: SongRequestRow) -> Result<Self> {
        let status = row
            .status
            .parse::<SongRequestStatus>()
            .map_err(|e| DatabaseError::Internal(e.into()))?;

        Ok(Self {
            id: row.id,
            session_id: row.session_id,
            requester_id: row.requester_id,
            track_id: row.track_id,
            status,
            created_at: row.created_at,
        })
    }
}

impl From<TrackMetadataRow> for TrackMetadataData {
    fn from(row: TrackMetadataRow) -> Self {
        Self {
            id: row.id,
            metadata: TrackMetadata {
                remote_id: row.remote_id,
                title: row.title,
                artists: row.artists,
                album: row.album,
                image_url: row.image_url,
                duration_ms: row.duration_ms,
            },
        }
    }
}

impl From<PlaylistMetadataRow> for PlaylistMetadataData {
    fn from(row: PlaylistMetadataRow) -> Self {
        Self {
            id: row.id,
            metadata: PlaylistMetadata {
                remote_id: row.remote_id,
                name: row.name,
                owner_name: row.owner_name,
                image_url: row.image_url,
                track_count: row.track_count,
            },
        }
    }
}

impl IntoDatabaseError for SqlxError {
    fn any(self) -> DatabaseError {
        DatabaseError::Internal(Box::new(self))
    }

    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError {
        match self {
            SqlxError::RowNotFound => DatabaseError::NotFound {
                resource,
                identifier,
            },
            e => Self::any(e),
        }
    }

    fn conflict_or(
        self,
        resource: &'static str,
        field: &'static str,
        value: &str,
    ) -> DatabaseError {
        match self {
            // Lost a race against a concurrent insert of the same key
            SqlxError::Database(e) if e.is_unique_violation() => DatabaseError::Conflict {
                resource,
                field,
                value: value.to_string(),
            },
            e => Self::any(e),
        }
    }
}
