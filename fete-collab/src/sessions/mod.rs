mod poller;

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::{
    util::random_join_code, ClientCache, CollabContext, CollabError, CollabResult, Config,
    DatabaseError, DatabaseResult, NewSession, PrimaryKey, QueueEngine, SessionData,
    SharedDatabase,
};

pub use poller::*;

type CodeGenerator = Box<dyn Fn(usize) -> String + Send + Sync>;

/// Creates, finds and closes listening sessions
pub struct SessionRegistry {
    config: Config,
    database: SharedDatabase,
    clients: Arc<ClientCache>,
    queue: Arc<QueueEngine>,

    /// Serializes join code allocation
    creation: Mutex<()>,
    generate_code: CodeGenerator,
}

impl SessionRegistry {
    pub fn new(context: &CollabContext, queue: &Arc<QueueEngine>) -> Self {
        Self {
            config: context.config.clone(),
            database: context.database.clone(),
            clients: context.clients.clone(),
            queue: queue.clone(),
            creation: Default::default(),
            generate_code: Box::new(random_join_code),
        }
    }

    /// Replaces the join code generator, to force collisions
    #[cfg(test)]
    fn with_code_generator<F>(mut self, generate: F) -> Self
    where
        F: Fn(usize) -> String + Send + Sync + 'static,
    {
        self.generate_code = Box::new(generate);
        self
    }

    /// Starts a new session owned by the user, with its own queue playlist
    pub async fn new_session(
        &self,
        owner_id: PrimaryKey,
        title: &str,
    ) -> CollabResult<SessionData> {
        let title = title.trim();

        if title.is_empty() {
            return Err(CollabError::InvalidInput("session title is empty".to_string()));
        }

        let owner = self
            .database
            .user_by_id(owner_id)
            .await
            .optional()?
            .ok_or(CollabError::Unauthenticated)?;

        let handle = self.clients.client(owner_id).await?;

        // The code is reserved before anything is written to the owner's account
        let _guard = self.creation.lock().await;
        let join_code = self.allocate_join_code().await?;

        let playlist_name = format!("{}{}", self.config.playlist_name_prefix, title);
        let queue_playlist_id = handle
            .create_playlist(&owner.remote_id, &playlist_name)
            .await?;

        let session = self
            .database
            .create_session(NewSession {
                owner_id,
                join_code,
                title: title.to_string(),
                queue_playlist_id: queue_playlist_id.clone(),
            })
            .await
            .map_err(|e| {
                warn!(
                    "Queue playlist {} of {} is orphaned, the session could not be stored: {}",
                    queue_playlist_id, owner.display_name, e
                );
                e
            })?;

        info!(
            "{} started session {} ({})",
            owner.display_name, session.title, session.id
        );

        Ok(session)
    }

    /// Finds a join code that no active session uses
    async fn allocate_join_code(&self) -> CollabResult<String> {
        for _ in 0..self.config.join_code_attempts {
            let code = (self.generate_code)(self.config.join_code_length);

            let taken = self
                .database
                .session_by_join_code(&code)
                .await
                .optional()?
                .is_some();

            if !taken {
                return Ok(code);
            }

            debug!("Join code collision, retrying");
        }

        warn!(
            "No free join code found in {} attempts",
            self.config.join_code_attempts
        );

        Err(CollabError::PersistenceFailure(DatabaseError::Conflict {
            resource: "session",
            field: "join_code",
            value: "*".to_string(),
        }))
    }

    /// Closes a session, which makes it unreachable by its join code
    pub async fn close_session(
        &self,
        requester_id: PrimaryKey,
        join_code: &str,
    ) -> CollabResult<SessionData> {
        let session = self
            .find_active_by_join_code(join_code)
            .await?
            .ok_or(CollabError::SessionNotFound)?;

        if session.owner_id != requester_id {
            return Err(CollabError::Forbidden);
        }

        let closed = {
            let _guard = self.queue.session_lock(session.id).await;
            self.database.close_session(session.id).await?
        };

        self.queue.forget(session.id);

        info!("Session {} ({}) was closed", closed.title, closed.id);
        Ok(closed)
    }

    /// Returns the session with the join code, if it is still active
    pub async fn find_active_by_join_code(
        &self,
        join_code: &str,
    ) -> CollabResult<Option<SessionData>> {
        let session = self
            .database
            .session_by_join_code(join_code.trim())
            .await
            .optional()?;

        Ok(session.filter(|s| s.active))
    }

    pub async fn find_by_id(&self, session_id: PrimaryKey) -> CollabResult<SessionData> {
        self.database
            .session_by_id(session_id)
            .await
            .optional()?
            .ok_or(CollabError::SessionNotFound)
    }

    pub async fn active_sessions(&self) -> CollabResult<Vec<SessionData>> {
        Ok(self.database.list_active_sessions().await?)
    }

    pub async fn sessions_by_owner(&self, owner_id: PrimaryKey) -> CollabResult<Vec<SessionData>> {
        Ok(self.database.sessions_by_owner(owner_id).await?)
    }

    pub async fn active_count(&self) -> CollabResult<i64> {
        Ok(self.database.count_sessions(true).await?)
    }

    pub async fn total_count(&self) -> CollabResult<i64> {
        Ok(self.database.count_sessions(false).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{fixture::Fixture, Database, RemoteQueueMode};

    #[tokio::test]
    async fn new_sessions_get_a_queue_playlist_and_a_join_code() {
        let fixture = Fixture::new().await;

        let session = fixture.session("Party").await;

        assert!(session.active);
        assert_eq!(session.join_code.as_ref().map(|c| c.len()), Some(8));
        assert_eq!(session.queue_playlist_id, "queue-1");
        assert_eq!(
            fixture.remote.created_playlists(),
            vec!["SpotiFete: Party".to_string()]
        );
    }

    #[tokio::test]
    async fn sessions_need_a_title_and_a_known_owner() {
        let fixture = Fixture::new().await;
        let sessions = &fixture.collab.sessions;

        let untitled = sessions.new_session(fixture.owner.id, "  ").await;
        let unknown = sessions.new_session(999, "Party").await;

        assert!(matches!(untitled, Err(CollabError::InvalidInput(_))));
        assert!(matches!(unknown, Err(CollabError::Unauthenticated)));
        assert_eq!(sessions.total_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn join_code_collisions_are_retried() {
        let fixture = Fixture::new().await;
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let sessions = SessionRegistry::new(fixture.collab.context(), &fixture.collab.queue)
            .with_code_generator(move |_| {
                // Every code is handed out twice
                let n = counter.fetch_add(1, Ordering::SeqCst);
                format!("code{}", n / 2)
            });

        let first = sessions.new_session(fixture.owner.id, "One").await.unwrap();
        let second = sessions.new_session(fixture.owner.id, "Two").await.unwrap();

        assert_eq!(first.join_code.as_deref(), Some("code0"));
        assert_eq!(second.join_code.as_deref(), Some("code1"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn endless_collisions_give_up() {
        let fixture = Fixture::new().await;
        let sessions = SessionRegistry::new(fixture.collab.context(), &fixture.collab.queue)
            .with_code_generator(|_| "same".to_string());

        sessions.new_session(fixture.owner.id, "One").await.unwrap();
        let playlists_before = fixture.remote.created_playlists();

        let result = sessions.new_session(fixture.owner.id, "Two").await;

        assert!(matches!(
            result,
            Err(CollabError::PersistenceFailure(DatabaseError::Conflict { .. }))
        ));
        assert_eq!(sessions.active_count().await.unwrap(), 1);

        // No queue playlist is left behind on the owner's account
        assert_eq!(fixture.remote.created_playlists(), playlists_before);
        assert_eq!(playlists_before, vec!["SpotiFete: One".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sessions_never_share_a_join_code() {
        let fixture = Arc::new(
            Fixture::with_config(Config {
                join_code_length: 1,
                remote_queue_mode: RemoteQueueMode::Disabled,
                ..Default::default()
            })
            .await,
        );

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let fixture = fixture.clone();
                tokio::spawn(async move {
                    fixture
                        .collab
                        .sessions
                        .new_session(fixture.owner.id, &format!("Party {}", i))
                        .await
                })
            })
            .collect();

        let mut codes = vec![];
        for task in tasks {
            // With single character codes some attempts may run out, which is fine
            if let Ok(session) = task.await.unwrap() {
                codes.push(session.join_code.unwrap());
            }
        }

        let count = codes.len();
        codes.sort();
        codes.dedup();

        assert_eq!(codes.len(), count);
    }

    #[tokio::test]
    async fn only_owners_close_sessions() {
        let fixture = Fixture::new().await;
        let guest = fixture.guest("guest").await;
        let session = fixture.session("Party").await;
        let code = session.join_code.clone().unwrap();

        let result = fixture.collab.sessions.close_session(guest.id, &code).await;

        assert!(matches!(result, Err(CollabError::Forbidden)));
        assert!(fixture.db.session_by_id(session.id).await.unwrap().active);
    }

    #[tokio::test]
    async fn closed_sessions_are_unreachable_but_kept() {
        let fixture = Fixture::new().await;
        let sessions = &fixture.collab.sessions;
        let session = fixture.session("Party").await;
        let code = session.join_code.clone().unwrap();

        let closed = sessions
            .close_session(fixture.owner.id, &code)
            .await
            .unwrap();

        assert!(!closed.active);
        assert_eq!(closed.join_code, None);
        assert!(sessions.find_active_by_join_code(&code).await.unwrap().is_none());
        assert!(matches!(
            sessions.close_session(fixture.owner.id, &code).await,
            Err(CollabError::SessionNotFound)
        ));

        assert_eq!(sessions.find_by_id(session.id).await.unwrap().id, session.id);
        assert_eq!(sessions.active_count().await.unwrap(), 0);
        assert_eq!(sessions.total_count().await.unwrap(), 1);
        assert_eq!(
            sessions
                .sessions_by_owner(fixture.owner.id)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn sessions_of_unauthenticated_owners_are_rejected() {
        let fixture = Fixture::new().await;
        fixture
            .remote
            .script_refresh(Err(crate::RemoteError::Unauthorized));

        // An owner whose token is about to expire and whose refresh token was revoked
        let owner = fixture
            .collab
            .tokens()
            .register(
                &crate::RemoteUser {
                    id: "revoked".to_string(),
                    display_name: "Revoked".to_string(),
                    country: None,
                },
                &crate::fake_token("revoked", chrono::Duration::seconds(1)),
            )
            .await
            .unwrap();

        let result = fixture.collab.sessions.new_session(owner.id, "Party").await;

        assert!(matches!(result, Err(CollabError::Unauthenticated)));
    }
}
