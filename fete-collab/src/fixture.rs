//! A fully wired collab system over the in-memory database and the fake remote.

use std::sync::Arc;

use chrono::Duration;

use crate::{
    fake_token, Collab, Config, FakeRemote, MemoryDatabase, RemoteUser, SessionData, SharedDatabase,
    SharedRemote, UserData,
};

pub struct Fixture {
    pub db: Arc<MemoryDatabase>,
    pub remote: FakeRemote,
    pub collab: Collab,
    pub owner: UserData,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let db = Arc::new(MemoryDatabase::new());
        let remote = FakeRemote::with_tracks(&["T1", "T2", "T3", "T4", "T5", "T6", "T7", "T8"]);

        let shared_db: SharedDatabase = db.clone();
        let shared_remote: SharedRemote = Arc::new(remote.clone());
        let collab = Collab::new(config, shared_remote, shared_db);

        let owner = collab
            .tokens()
            .register(
                &RemoteUser {
                    id: "remote-owner".to_string(),
                    display_name: "Owner".to_string(),
                    country: Some("DE".to_string()),
                },
                &fake_token("owner", Duration::hours(1)),
            )
            .await
            .unwrap();

        Self {
            db,
            remote,
            collab,
            owner,
        }
    }

    pub async fn guest(&self, remote_id: &str) -> UserData {
        self.collab
            .tokens()
            .register(
                &RemoteUser {
                    id: remote_id.to_string(),
                    display_name: format!("Guest {}", remote_id),
                    country: None,
                },
                &fake_token(remote_id, Duration::hours(1)),
            )
            .await
            .unwrap()
    }

    pub async fn session(&self, title: &str) -> SessionData {
        self.collab
            .sessions
            .new_session(self.owner.id, title)
            .await
            .unwrap()
    }
}
