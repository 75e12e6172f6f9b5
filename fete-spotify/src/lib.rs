mod handle;
mod wire;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use fete_collab::{Remote, RemoteError, RemoteHandleRef, RemoteResult, Token};
use log::debug;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

pub use handle::*;

const ACCOUNTS_BASE: &str = "https://accounts.spotify.com";
const API_BASE: &str = "https://api.spotify.com/v1";

/// Everything SpotiFete needs to do on behalf of a user
pub const SCOPES: [&str; 5] = [
    "playlist-read-private",
    "playlist-modify-private",
    "user-modify-playback-state",
    "user-read-currently-playing",
    "user-read-private",
];

/// The credentials of the Spotify application
#[derive(Debug, Clone)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Where Spotify sends users after they logged in
    pub redirect_uri: String,
}

/// The Spotify Web API as a music service
#[derive(Clone)]
pub struct SpotifyRemote {
    config: SpotifyConfig,
    http: Client,
}

impl SpotifyRemote {
    pub fn new(config: SpotifyConfig) -> Self {
        Self {
            config,
            http: Client::new(),
        }
    }

    /// The page users are sent to for logging in
    pub fn authorize_url(&self, state: &str) -> Result<Url, url::ParseError> {
        let scopes = SCOPES.join(" ");

        Url::parse_with_params(
            &format!("{}/authorize", ACCOUNTS_BASE),
            &[
                ("client_id", self.config.client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", scopes.as_str()),
                ("state", state),
            ],
        )
    }

    /// Exchanges the code of a finished login for a token
    pub async fn exchange_code(&self, code: &str) -> RemoteResult<Token> {
        self.request_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ])
        .await
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> RemoteResult<Token> {
        let issued_at = Utc::now();

        let response = self
            .http
            .post(format!("{}/api/token", ACCOUNTS_BASE))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(form)
            .send()
            .await
            .map_err(transport)?;

        let body: wire::TokenResponse = parse(response).await?;
        Ok(body.into_token(issued_at))
    }
}

#[async_trait]
impl Remote for SpotifyRemote {
    async fn refresh_token(&self, refresh_token: &str) -> RemoteResult<Token> {
        debug!("Requesting a new access token");

        self.request_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    fn handle(&self, token: &Token) -> RemoteHandleRef {
        Arc::new(SpotifyHandle::new(self.http.clone(), token))
    }
}

fn transport(error: reqwest::Error) -> RemoteError {
    RemoteError::Transport(error.to_string())
}

/// Maps an error status to what went wrong
async fn check(response: Response) -> RemoteResult<Response> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    let path = response.url().path().to_string();

    match status {
        StatusCode::UNAUTHORIZED => Err(RemoteError::Unauthorized),
        StatusCode::NOT_FOUND => Err(RemoteError::NotFound(path)),
        StatusCode::TOO_MANY_REQUESTS => Err(RemoteError::RateLimited),
        status => {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<wire::ErrorBody>(&text)
                .map(|body| body.error.message())
                .unwrap_or(text);

            // A revoked refresh token is reported as a bad request
            if status == StatusCode::BAD_REQUEST && message == "invalid_grant" {
                return Err(RemoteError::Unauthorized);
            }

            Err(RemoteError::Status {
                status: status.as_u16(),
                message,
            })
        }
    }
}

async fn parse<T: DeserializeOwned>(response: Response) -> RemoteResult<T> {
    let response = check(response).await?;
    let bytes = response.bytes().await.map_err(transport)?;

    serde_json::from_slice(&bytes).map_err(|e| RemoteError::Parse(e.to_string()))
}
