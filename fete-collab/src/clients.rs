use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use thiserror::Error;

use crate::{
    util::KeyedLocks, Config, DatabaseError, PrimaryKey, RemoteError, RemoteHandleRef,
    SharedRemote, Token, TokenStore,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("User {0} has no stored credential")]
    NoCredential(PrimaryKey),
    /// The refresh token was rejected, the user has to log in again
    #[error("The refresh token of user {0} was revoked")]
    Revoked(PrimaryKey),
    #[error("Failed to refresh token: {0}")]
    Refresh(RemoteError),
    #[error(transparent)]
    Db(#[from] DatabaseError),
}

/// An authenticated API handle for a single user.
/// Never mutated, a refresh replaces the whole value.
pub struct CachedClient {
    user_id: PrimaryKey,
    token: Token,
    handle: RemoteHandleRef,
}

impl CachedClient {
    fn new(user_id: PrimaryKey, token: Token, handle: RemoteHandleRef) -> Self {
        Self {
            user_id,
            token,
            handle,
        }
    }

    pub fn user_id(&self) -> PrimaryKey {
        self.user_id
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.token.expires_at
    }

    pub fn handle(&self) -> RemoteHandleRef {
        self.handle.clone()
    }
}

/// Owns one API client per user and keeps their tokens fresh.
pub struct ClientCache {
    config: Config,
    remote: SharedRemote,
    tokens: TokenStore,

    clients: DashMap<PrimaryKey, Arc<CachedClient>>,
    refreshes: KeyedLocks<PrimaryKey>,

    /// Background token writes, so tests can wait for them
    #[cfg(test)]
    pending_writes: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl ClientCache {
    pub fn new(config: &Config, remote: &SharedRemote, tokens: &TokenStore) -> Self {
        Self {
            config: config.clone(),
            remote: remote.clone(),
            tokens: tokens.clone(),
            clients: Default::default(),
            refreshes: Default::default(),
            #[cfg(test)]
            pending_writes: Default::default(),
        }
    }

    /// Returns an API handle for the user with a token that is not about to expire
    pub async fn client(&self, user_id: PrimaryKey) -> Result<RemoteHandleRef, ClientError> {
        self.ensure_fresh_token(user_id)
            .await
            .map(|client| client.handle())
    }

    /// Returns the cached client of a user, loading or refreshing it if necessary
    pub async fn ensure_fresh_token(
        &self,
        user_id: PrimaryKey,
    ) -> Result<Arc<CachedClient>, ClientError> {
        let client = match self.cached(user_id) {
            Some(client) => client,
            None => self.load(user_id).await?,
        };

        if !self.needs_refresh(&client) {
            return Ok(client);
        }

        let _guard = self.refreshes.lock(&user_id).await;

        // Another caller might have refreshed while we were waiting
        if let Some(current) = self.cached(user_id) {
            if !self.needs_refresh(&current) {
                return Ok(current);
            }

            return self.refresh(current).await;
        }

        self.refresh(client).await
    }

    /// Returns the cached client without checking its token
    pub fn cached(&self, user_id: PrimaryKey) -> Option<Arc<CachedClient>> {
        self.clients.get(&user_id).map(|c| c.clone())
    }

    fn needs_refresh(&self, client: &CachedClient) -> bool {
        client.expires_at() - self.config.token_refresh_margin() <= Utc::now()
    }

    async fn load(&self, user_id: PrimaryKey) -> Result<Arc<CachedClient>, ClientError> {
        let token = self
            .tokens
            .load(user_id)
            .await?
            .ok_or(ClientError::NoCredential(user_id))?;

        debug!("Creating client for user {}", user_id);

        let handle = self.remote.handle(&token);
        let client = Arc::new(CachedClient::new(user_id, token, handle));

        Ok(self.install(client))
    }

    /// Puts a client in the cache, unless the cached one expires later.
    /// Returns the client that is cached afterwards.
    fn install(&self, client: Arc<CachedClient>) -> Arc<CachedClient> {
        let mut entry = self
            .clients
            .entry(client.user_id)
            .or_insert_with(|| client.clone());

        if entry.expires_at() < client.expires_at() {
            *entry = client;
        }

        entry.clone()
    }

    async fn refresh(&self, stale: Arc<CachedClient>) -> Result<Arc<CachedClient>, ClientError> {
        let user_id = stale.user_id;
        info!("Refreshing token of user {}", user_id);

        let result = self.remote.refresh_token(&stale.token.refresh_token).await;

        let mut token = match result {
            Ok(token) => token,
            Err(e) => {
                warn!("Token refresh for user {} failed: {}", user_id, e);

                // Evict, so the next call starts over instead of reusing a dead client
                self.clients
                    .remove_if(&user_id, |_, cached| Arc::ptr_eq(cached, &stale));

                return Err(match e {
                    RemoteError::Unauthorized => ClientError::Revoked(user_id),
                    e => ClientError::Refresh(e),
                });
            }
        };

        // The refresh token is not always rotated
        if token.refresh_token.is_empty() {
            token.refresh_token = stale.token.refresh_token.clone();
        }

        let handle = self.remote.handle(&token);
        let fresh = Arc::new(CachedClient::new(user_id, token, handle));

        if fresh.expires_at() > stale.expires_at() {
            self.persist_in_background(user_id, fresh.token.clone());
        }

        Ok(self.replace(&stale, fresh))
    }

    /// Swaps out the stale client. If something else was installed in the meantime,
    /// the later of the two wins.
    fn replace(&self, stale: &Arc<CachedClient>, fresh: Arc<CachedClient>) -> Arc<CachedClient> {
        if let Some(mut entry) = self.clients.get_mut(&fresh.user_id) {
            if Arc::ptr_eq(&entry, stale) {
                *entry = fresh.clone();
                return fresh;
            }
        }

        self.install(fresh)
    }

    fn persist_in_background(&self, user_id: PrimaryKey, token: Token) {
        let tokens = self.tokens.clone();

        let task = tokio::spawn(async move {
            match tokens.save(user_id, &token).await {
                Ok(true) => debug!("Persisted refreshed token of user {}", user_id),
                Ok(false) => debug!("A later token of user {} is already stored", user_id),
                Err(e) => error!("Failed to persist refreshed token of user {}: {}", user_id, e),
            }
        });

        #[cfg(test)]
        self.pending_writes.lock().push(task);

        #[cfg(not(test))]
        drop(task);
    }

    /// Waits for every background token write started so far
    #[cfg(test)]
    pub async fn wait_for_persistence(&self) {
        let tasks: Vec<_> = self.pending_writes.lock().drain(..).collect();

        for task in tasks {
            task.await.expect("persistence task does not panic");
        }
    }
}
