use anyhow::{Context, Result};
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::models::{PlaybackStatus, TrackMetadata, parse_shuffle};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("remote returned a non-numeric session id: {0:?}")]
    SessionId(String),
    #[error("malformed metadata payload: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Typed client for the Tidal-Chrome web API.
///
/// Control endpoints are fire-and-forget: the remote side acknowledges
/// nothing useful and the bus caller is not waiting for a result, so
/// transport errors are absorbed here and only logged. Query endpoints
/// return errors so the sync loop can decide what a failed fetch means.
#[derive(Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    base: String,
}

impl RemoteClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .with_context(|| "Failed to build HTTP client")?;

        Ok(Self {
            http,
            base: config.remote.host.trim_end_matches('/').to_string(),
        })
    }

    async fn get_text(&self, path: &str) -> Result<String, RemoteError> {
        let url = format!("{}/{path}", self.base);
        let response = self.http.get(&url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    /// Issue a control request and swallow the outcome.
    async fn command(&self, path: &str) {
        if let Err(e) = self.get_text(path).await {
            debug!("command {path} failed: {e}");
        }
    }

    // Control endpoints

    pub async fn play(&self) {
        self.command("player/play").await;
    }

    pub async fn pause(&self) {
        self.command("player/pause").await;
    }

    pub async fn play_pause(&self) {
        self.command("player/playpause").await;
    }

    pub async fn next(&self) {
        self.command("player/next").await;
    }

    pub async fn previous(&self) {
        self.command("player/previous").await;
    }

    pub async fn toggle_shuffle(&self) {
        self.command("player/toggle/shuffle").await;
    }

    /// Ask the remote service to shut down.
    pub async fn quit(&self) {
        self.command("quit").await;
    }

    /// Release a session id so the remote stops tracking it.
    pub async fn unping(&self, id: u32) {
        self.command(&format!("unping/{id}")).await;
    }

    // Query endpoints

    /// Obtain a fresh session id from the remote.
    pub async fn session_id(&self) -> Result<u32, RemoteError> {
        let body = self.get_text("ping/id").await?;
        body.trim()
            .parse()
            .map_err(|_| RemoteError::SessionId(body))
    }

    /// Fetch metadata for the given session. An empty body means the track
    /// has not changed since this session last asked.
    pub async fn metadata(&self, id: u32) -> Result<Option<TrackMetadata>, RemoteError> {
        let body = self.get_text(&format!("ping/{id}")).await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&body)?))
    }

    /// Current playback state. Errors read as paused; there is no unknown
    /// state on the bus side.
    pub async fn playback_status(&self) -> PlaybackStatus {
        match self.get_text("player/is/playing").await {
            Ok(body) => PlaybackStatus::from_remote(&body),
            Err(e) => {
                debug!("status fetch failed: {e}");
                PlaybackStatus::Paused
            }
        }
    }

    /// Current shuffle state, or None when the remote cannot say.
    pub async fn shuffle(&self) -> Option<bool> {
        match self.get_text("player/is/shuffle").await {
            Ok(body) => parse_shuffle(&body),
            Err(e) => {
                debug!("shuffle fetch failed: {e}");
                None
            }
        }
    }

    /// The service banner from `/`, used by `tidal-mpris check`.
    pub async fn probe(&self) -> Result<String, RemoteError> {
        self.get_text("").await
    }

    pub async fn can_play(&self) -> Result<bool, RemoteError> {
        Ok(self.get_text("player/canPlay").await?.trim() == "True")
    }

    pub async fn current_title(&self) -> Result<String, RemoteError> {
        self.get_text("player/current/title").await
    }

    pub async fn current_artists(&self) -> Result<String, RemoteError> {
        self.get_text("player/current/artists").await
    }
}
