mod clients;
mod config;
mod db;
mod errors;
mod metadata;
mod queue;
mod remote;
mod sessions;
mod tokens;
mod util;

#[cfg(test)]
mod fixture;

use std::sync::Arc;

pub use clients::*;
pub use config::*;
pub use db::*;
pub use errors::*;
pub use metadata::*;
pub use queue::*;
pub use remote::*;
pub use sessions::*;
pub use tokens::*;

/// The SpotiFete collab system, managing listening sessions, their queues, and the
/// credentials needed to talk to the music service.
pub struct Collab {
    context: CollabContext,

    pub queue: Arc<QueueEngine>,
    pub sessions: SessionRegistry,
}

/// Shared services passed to the components of the collab system.
#[derive(Clone)]
pub struct CollabContext {
    pub config: Config,
    pub database: SharedDatabase,
    pub remote: SharedRemote,

    pub tokens: TokenStore,
    pub clients: Arc<ClientCache>,
    pub tracks: Arc<TrackMetadataCache>,
    pub playlists: Arc<PlaylistMetadataCache>,
}

impl Collab {
    pub fn new(config: Config, remote: SharedRemote, database: SharedDatabase) -> Self {
        let tokens = TokenStore::new(&database);
        let clients = Arc::new(ClientCache::new(&config, &remote, &tokens));

        let context = CollabContext {
            tracks: Arc::new(TrackMetadataCache::new(&database)),
            playlists: Arc::new(PlaylistMetadataCache::new(&database)),
            config,
            database,
            remote,
            tokens,
            clients,
        };

        let queue = Arc::new(QueueEngine::new(&context));
        let sessions = SessionRegistry::new(&context, &queue);

        Self {
            context,
            queue,
            sessions,
        }
    }

    pub fn context(&self) -> &CollabContext {
        &self.context
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.context.tokens
    }

    pub fn clients(&self) -> &Arc<ClientCache> {
        &self.context.clients
    }

    /// Creates a poller that keeps every active session in sync with the remote playback
    pub fn poller(&self) -> SessionPoller {
        SessionPoller::new(&self.context, &self.queue)
    }
}
