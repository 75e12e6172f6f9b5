use log::{debug, info, warn};
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::{
    CollabResult, NewSongRequest, RemoteHandleRef, SessionData, SongRequestData,
    SongRequestStatus,
};

use super::{ActiveQueue, QueueEngine};

/// What happened when a session was reconciled with the remote playback
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceReport {
    /// The request that stopped playing
    pub finished: Option<SongRequestData>,
    /// Requests that were jumped over by the owner
    pub skipped: Vec<SongRequestData>,
    pub now_playing: Option<SongRequestData>,
    pub up_next: Option<SongRequestData>,
    /// Nothing is up next and nothing could be sourced
    pub starved: bool,
}

impl QueueEngine {
    /// Reconciles the queue of a session with what the owner is actually playing
    pub async fn advance_queue(&self, session: &SessionData) -> CollabResult<AdvanceReport> {
        let _guard = self.session_lock(session.id).await;
        let session = self.reload(session).await?;

        let handle = self.owner_client(&session).await?;
        let playing = handle.currently_playing().await?;

        let mut queue = self.active_queue(session.id).await?;
        let mut report = AdvanceReport::default();

        let Some(playing) = playing else {
            // Paused or stopped, nothing moves
            report.starved = queue.up_next.is_none() && queue.waiting.is_empty();
            report.now_playing = queue.current;
            report.up_next = queue.up_next;
            return Ok(report);
        };

        let same_track = queue
            .current
            .as_ref()
            .is_some_and(|current| current.track_id == playing);

        if !same_track {
            if let Some(current) = queue.current.take() {
                report.finished = Some(self.transition(current, SongRequestStatus::Played).await?);
            }

            // Something unrelated leaves the queue as it is
            if let Some(started) = self.catch_up(&mut queue, &playing, &mut report).await? {
                queue.current = Some(
                    self.transition(started, SongRequestStatus::CurrentlyPlaying)
                        .await?,
                );
            }
        }

        let had_up_next = queue.up_next.is_some();

        if !had_up_next {
            queue.up_next = match queue.waiting.pop_front() {
                Some(head) => Some(self.promote(&session, &handle, head, &playing).await?),
                None => {
                    let finished = report.finished.as_ref().map(|r| r.track_id.as_str());

                    self.source_from_fallback(&session, &handle, &queue, &playing, finished)
                        .await?
                }
            };
        }

        report.starved = queue.up_next.is_none();

        if report.starved {
            warn!("Session {} has nothing left to play", session.id);
        }

        if !same_track || (!had_up_next && queue.up_next.is_some()) {
            debug!("Queue of session {} advanced", session.id);
            self.touch(session.id);
        }

        report.now_playing = queue.current;
        report.up_next = queue.up_next;

        Ok(report)
    }

    /// Finds the request of the track that is playing. Everything queued before it
    /// was skipped and is marked as played.
    async fn catch_up(
        &self,
        queue: &mut ActiveQueue,
        playing: &str,
        report: &mut AdvanceReport,
    ) -> CollabResult<Option<SongRequestData>> {
        if queue.up_next.as_ref().is_some_and(|r| r.track_id == playing) {
            return Ok(queue.up_next.take());
        }

        let Some(position) = queue.waiting.iter().position(|r| r.track_id == playing) else {
            return Ok(None);
        };

        let skipped: Vec<_> = queue
            .up_next
            .take()
            .into_iter()
            .chain(queue.waiting.drain(..position))
            .collect();

        for request in skipped {
            info!("Request {} was skipped", request.id);
            report
                .skipped
                .push(self.transition(request, SongRequestStatus::Played).await?);
        }

        Ok(queue.waiting.pop_front())
    }

    /// Moves the head of the queue up next
    async fn promote(
        &self,
        session: &SessionData,
        handle: &RemoteHandleRef,
        request: SongRequestData,
        playing: &str,
    ) -> CollabResult<SongRequestData> {
        // No need to queue what is already playing
        if request.track_id != playing {
            self.push_remote(session, handle, &request.track_id).await?;
        }

        self.transition(request, SongRequestStatus::UpNext).await
    }

    /// Picks a random track from the fallback playlist that is not queued yet
    async fn source_from_fallback(
        &self,
        session: &SessionData,
        handle: &RemoteHandleRef,
        queue: &ActiveQueue,
        playing: &str,
        finished: Option<&str>,
    ) -> CollabResult<Option<SongRequestData>> {
        let Some(playlist_id) = &session.fallback_playlist_id else {
            return Ok(None);
        };

        let tracks = handle.playlist_tracks(playlist_id).await?;

        let eligible: Vec<_> = tracks
            .into_iter()
            .filter(|t| t.remote_id != playing)
            .filter(|t| Some(t.remote_id.as_str()) != finished)
            .filter(|t| !queue.contains_track(&t.remote_id))
            .collect();

        let picked = {
            let mut rng = rand::thread_rng();
            eligible.choose(&mut rng).cloned()
        };

        let Some(track) = picked else {
            info!(
                "Fallback playlist {} of session {} has no eligible tracks",
                playlist_id, session.id
            );
            return Ok(None);
        };

        let track = self.tracks.upsert(track).await?.metadata;
        self.push_remote(session, handle, &track.remote_id).await?;

        let request = self
            .database
            .create_song_request(NewSongRequest {
                session_id: session.id,
                requester_id: None,
                track_id: track.remote_id,
                status: SongRequestStatus::UpNext,
            })
            .await?;

        debug!(
            "Sourced {} from the fallback playlist of session {}",
            request.track_id, session.id
        );

        Ok(Some(request))
    }
}
