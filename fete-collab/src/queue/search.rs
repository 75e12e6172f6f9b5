use crate::{
    CollabError, CollabResult, PlaylistMetadataData, SessionData, TrackMetadataData,
};

use super::QueueEngine;

/// Turns user input into a prefix query
fn to_query(query: &str) -> CollabResult<String> {
    let query = query.trim();

    if query.is_empty() {
        return Err(CollabError::InvalidInput("search query is empty".to_string()));
    }

    Ok(format!("{}*", query.trim_end_matches('*')))
}

impl QueueEngine {
    /// Searches tracks in the market of the session owner and caches the results
    pub async fn search_tracks(
        &self,
        session: &SessionData,
        query: &str,
        limit: Option<u32>,
    ) -> CollabResult<Vec<TrackMetadataData>> {
        let query = to_query(query)?;

        if !session.active {
            return Err(CollabError::SessionClosed);
        }

        let handle = self.owner_client(session).await?;
        let market = handle.current_user().await?.country;

        let results = handle
            .search_tracks(
                &query,
                limit.unwrap_or(self.config.default_search_limit),
                market.as_deref(),
            )
            .await?;

        Ok(self.tracks.upsert_all(results).await?)
    }

    /// Searches playlists, for picking a fallback playlist
    pub async fn search_playlists(
        &self,
        session: &SessionData,
        query: &str,
        limit: Option<u32>,
    ) -> CollabResult<Vec<PlaylistMetadataData>> {
        let query = to_query(query)?;

        if !session.active {
            return Err(CollabError::SessionClosed);
        }

        let handle = self.owner_client(session).await?;
        let results = handle
            .search_playlists(&query, limit.unwrap_or(self.config.default_search_limit))
            .await?;

        Ok(self.playlists.upsert_all(results).await?)
    }
}
