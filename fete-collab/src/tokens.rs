use log::info;

use crate::{
    DatabaseError, DatabaseResult, NewUser, PrimaryKey, RemoteUser, SharedDatabase, Token, UserData,
};

/// Data access for the OAuth credentials of users
#[derive(Clone)]
pub struct TokenStore {
    db: SharedDatabase,
}

impl TokenStore {
    pub fn new(db: &SharedDatabase) -> Self {
        Self { db: db.clone() }
    }

    /// Returns the stored token of a user, if it is complete
    pub async fn load(&self, user_id: PrimaryKey) -> Result<Option<Token>, DatabaseError> {
        let credential = self.db.credential_by_user(user_id).await.optional()?;

        Ok(credential
            .map(|c| c.token)
            .filter(|token| token.is_complete()))
    }

    /// Persists a refreshed token, unless a later one is already stored
    pub async fn save(&self, user_id: PrimaryKey, token: &Token) -> Result<bool, DatabaseError> {
        self.db.update_credential_if_newer(user_id, token).await
    }

    /// Links a music service account after a login, creating the user if needed
    pub async fn register(
        &self,
        remote_user: &RemoteUser,
        token: &Token,
    ) -> Result<UserData, DatabaseError> {
        let existing = self
            .db
            .user_by_remote_id(&remote_user.id)
            .await
            .optional()?;

        let user = match existing {
            Some(user) => user,
            None => {
                info!("Creating user for {}", remote_user.display_name);

                self.db
                    .create_user(NewUser {
                        remote_id: remote_user.id.clone(),
                        display_name: remote_user.display_name.clone(),
                        country: remote_user.country.clone(),
                    })
                    .await?
            }
        };

        self.db.set_credential(user.id, token).await?;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::{fake_token, Database, MemoryDatabase};

    fn remote_user() -> RemoteUser {
        RemoteUser {
            id: "spotify-user".to_string(),
            display_name: "Host".to_string(),
            country: Some("NL".to_string()),
        }
    }

    #[tokio::test]
    async fn register_is_idempotent_per_remote_account() {
        let db: SharedDatabase = Arc::new(MemoryDatabase::new());
        let store = TokenStore::new(&db);

        let first = store
            .register(&remote_user(), &fake_token("a", Duration::hours(1)))
            .await
            .unwrap();
        let second = store
            .register(&remote_user(), &fake_token("b", Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(
            store.load(first.id).await.unwrap().unwrap().access_token,
            "b"
        );
    }

    #[tokio::test]
    async fn partial_tokens_count_as_absent() {
        let db: SharedDatabase = Arc::new(MemoryDatabase::new());
        let store = TokenStore::new(&db);

        let mut token = fake_token("a", Duration::hours(1));
        token.refresh_token = String::new();

        let user = store.register(&remote_user(), &token).await.unwrap();

        assert!(store.load(user.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn users_without_credentials_have_no_token() {
        let db: SharedDatabase = Arc::new(MemoryDatabase::new());
        let store = TokenStore::new(&db);

        let user = db
            .create_user(NewUser {
                remote_id: "x".to_string(),
                display_name: "X".to_string(),
                country: None,
            })
            .await
            .unwrap();

        assert!(store.load(user.id).await.unwrap().is_none());
    }
}
