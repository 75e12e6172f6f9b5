use std::marker::PhantomData;

use async_trait::async_trait;
use dashmap::DashMap;
use log::debug;

use crate::{
    Database, DatabaseError, DatabaseResult, PlaylistMetadata, PlaylistMetadataData, PrimaryKey,
    SharedDatabase, TrackMetadata, TrackMetadataData,
};

/// A kind of remote object whose display metadata is cached locally
#[async_trait]
pub trait MetadataKind: Send + Sync + 'static {
    type Fresh: Clone + PartialEq + Send + Sync;
    type Row: Clone + Send + Sync;

    fn remote_id(fresh: &Self::Fresh) -> &str;
    fn row_id(row: &Self::Row) -> PrimaryKey;
    fn metadata(row: &Self::Row) -> &Self::Fresh;

    async fn find(db: &dyn Database, remote_id: &str) -> Result<Self::Row, DatabaseError>;
    async fn create(db: &dyn Database, fresh: Self::Fresh) -> Result<Self::Row, DatabaseError>;
    async fn update(
        db: &dyn Database,
        id: PrimaryKey,
        fresh: Self::Fresh,
    ) -> Result<Self::Row, DatabaseError>;
}

pub struct Tracks;
pub struct Playlists;

#[async_trait]
impl MetadataKind for Tracks {
    type Fresh = TrackMetadata;
    type Row = TrackMetadataData;

    fn remote_id(fresh: &TrackMetadata) -> &str {
        &fresh.remote_id
    }

    fn row_id(row: &TrackMetadataData) -> PrimaryKey {
        row.id
    }

    fn metadata(row: &TrackMetadataData) -> &TrackMetadata {
        &row.metadata
    }

    async fn find(db: &dyn Database, remote_id: &str) -> Result<TrackMetadataData, DatabaseError> {
        db.track_metadata_by_remote_id(remote_id).await
    }

    async fn create(
        db: &dyn Database,
        fresh: TrackMetadata,
    ) -> Result<TrackMetadataData, DatabaseError> {
        db.create_track_metadata(fresh).await
    }

    async fn update(
        db: &dyn Database,
        id: PrimaryKey,
        fresh: TrackMetadata,
    ) -> Result<TrackMetadataData, DatabaseError> {
        db.update_track_metadata(id, fresh).await
    }
}

#[async_trait]
impl MetadataKind for Playlists {
    type Fresh = PlaylistMetadata;
    type Row = PlaylistMetadataData;

    fn remote_id(fresh: &PlaylistMetadata) -> &str {
        &fresh.remote_id
    }

    fn row_id(row: &PlaylistMetadataData) -> PrimaryKey {
        row.id
    }

    fn metadata(row: &PlaylistMetadataData) -> &PlaylistMetadata {
        &row.metadata
    }

    async fn find(
        db: &dyn Database,
        remote_id: &str,
    ) -> Result<PlaylistMetadataData, DatabaseError> {
        db.playlist_metadata_by_remote_id(remote_id).await
    }

    async fn create(
        db: &dyn Database,
        fresh: PlaylistMetadata,
    ) -> Result<PlaylistMetadataData, DatabaseError> {
        db.create_playlist_metadata(fresh).await
    }

    async fn update(
        db: &dyn Database,
        id: PrimaryKey,
        fresh: PlaylistMetadata,
    ) -> Result<PlaylistMetadataData, DatabaseError> {
        db.update_playlist_metadata(id, fresh).await
    }
}

pub type TrackMetadataCache = MetadataCache<Tracks>;
pub type PlaylistMetadataCache = MetadataCache<Playlists>;

/// Keeps one local row per remote object, so display data does not need the music service.
pub struct MetadataCache<K: MetadataKind> {
    db: SharedDatabase,
    memo: DashMap<String, K::Row>,
    kind: PhantomData<K>,
}

impl<K: MetadataKind> MetadataCache<K> {
    pub fn new(db: &SharedDatabase) -> Self {
        Self {
            db: db.clone(),
            memo: Default::default(),
            kind: PhantomData,
        }
    }

    /// Stores fresh metadata, updating the existing row in place.
    /// Upserting the same data twice leaves exactly one row.
    pub async fn upsert(&self, fresh: K::Fresh) -> Result<K::Row, DatabaseError> {
        let remote_id = K::remote_id(&fresh).to_string();

        if let Some(row) = self.memo.get(&remote_id) {
            if K::metadata(&row) == &fresh {
                return Ok(row.clone());
            }
        }

        let existing = K::find(self.db.as_ref(), &remote_id).await.optional()?;

        let row = match existing {
            Some(row) if K::metadata(&row) == &fresh => row,
            Some(row) => K::update(self.db.as_ref(), K::row_id(&row), fresh).await?,
            None => match K::create(self.db.as_ref(), fresh.clone()).await {
                Ok(row) => row,
                // Someone else inserted it first
                Err(DatabaseError::Conflict { .. }) => {
                    let row = K::find(self.db.as_ref(), &remote_id).await?;
                    K::update(self.db.as_ref(), K::row_id(&row), fresh).await?
                }
                Err(e) => return Err(e),
            },
        };

        debug!("Cached metadata of {}", remote_id);

        self.memo.insert(remote_id, row.clone());
        Ok(row)
    }

    pub async fn upsert_all(&self, fresh: Vec<K::Fresh>) -> Result<Vec<K::Row>, DatabaseError> {
        let mut rows = Vec::with_capacity(fresh.len());

        for item in fresh {
            rows.push(self.upsert(item).await?);
        }

        Ok(rows)
    }

    /// Looks up cached metadata. Never contacts the music service.
    pub async fn lookup(&self, remote_id: &str) -> Result<Option<K::Row>, DatabaseError> {
        if let Some(row) = self.memo.get(remote_id) {
            return Ok(Some(row.clone()));
        }

        let row = K::find(self.db.as_ref(), remote_id).await.optional()?;

        if let Some(row) = &row {
            self.memo.insert(remote_id.to_string(), row.clone());
        }

        Ok(row)
    }
}
