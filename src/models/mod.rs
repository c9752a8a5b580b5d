use mpris_server::{Metadata, Time};
use serde::Deserialize;

/// Now-playing metadata as served by the remote's `ping/{id}` endpoint.
///
/// The payload uses MPRIS metadata keys directly, except that the artist
/// list arrives as one ", "-joined string. Unknown keys are ignored and
/// missing keys fall back to empty values.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TrackMetadata {
    #[serde(rename = "xesam:title", default)]
    pub title: String,
    #[serde(rename = "xesam:album", default)]
    pub album: String,
    #[serde(rename = "xesam:artist", default)]
    pub artist: String,
    #[serde(rename = "mpris:artUrl", default)]
    pub art_url: String,
    /// Track length in microseconds.
    #[serde(rename = "mpris:length", default)]
    pub length_us: i64,
}

impl TrackMetadata {
    pub fn artists(&self) -> Vec<String> {
        if self.artist.is_empty() {
            return Vec::new();
        }
        self.artist.split(", ").map(str::to_string).collect()
    }

    /// Full-snapshot conversion for the bus; every publish replaces the
    /// previous metadata wholesale.
    pub fn to_mpris(&self) -> Metadata {
        let mut builder = Metadata::builder()
            .title(self.title.clone())
            .album(self.album.clone())
            .artist(self.artists())
            .length(Time::from_micros(self.length_us));
        if !self.art_url.is_empty() {
            builder = builder.art_url(self.art_url.clone());
        }
        builder.build()
    }
}

/// Playback state derived from the remote's boolean-ish text responses.
///
/// The remote renders Python booleans, so only the literal `True` means
/// playing; anything else, including errors, reads as paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    Playing,
    #[default]
    Paused,
}

impl PlaybackStatus {
    pub fn from_remote(body: &str) -> Self {
        if body.trim() == "True" {
            PlaybackStatus::Playing
        } else {
            PlaybackStatus::Paused
        }
    }

    pub fn to_mpris(self) -> mpris_server::PlaybackStatus {
        match self {
            PlaybackStatus::Playing => mpris_server::PlaybackStatus::Playing,
            PlaybackStatus::Paused => mpris_server::PlaybackStatus::Paused,
        }
    }
}

impl std::fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackStatus::Playing => write!(f, "Playing"),
            PlaybackStatus::Paused => write!(f, "Paused"),
        }
    }
}

/// Parse the remote's `player/is/shuffle` body. The driver reports `None`
/// while the player page is not ready, which callers should treat as
/// "leave the current value alone".
pub fn parse_shuffle(body: &str) -> Option<bool> {
    match body.trim() {
        "True" => Some(true),
        "False" => Some(false),
        _ => None,
    }
}
