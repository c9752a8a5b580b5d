use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result};
use mpris_server::{PlaybackStatus, Player};
use tokio::task;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::TrackMetadata;
use crate::remote::RemoteClient;

const BUS_NAME: &str = "tidal_mpris";
const IDENTITY: &str = "Tidal-Chrome API bridge";

/// Shuffle rarely changes, so it is reconciled on a reduced cadence:
/// once every this many regular ticks.
const SHUFFLE_SYNC_EVERY: u32 = 5;

/// The published-property surface of the bus player.
///
/// The sync loop only ever reads the last-published state and replaces
/// whole snapshots, which keeps this seam narrow and lets tests run the
/// loop without a D-Bus session.
pub trait MediaEndpoint {
    fn playback_status(&self) -> PlaybackStatus;
    fn shuffle(&self) -> bool;
    async fn publish_metadata(&self, metadata: &TrackMetadata);
    async fn publish_status(&self, status: PlaybackStatus);
    async fn publish_shuffle(&self, shuffle: bool);
}

impl MediaEndpoint for Player {
    fn playback_status(&self) -> PlaybackStatus {
        Player::playback_status(self)
    }

    fn shuffle(&self) -> bool {
        Player::shuffle(self)
    }

    async fn publish_metadata(&self, metadata: &TrackMetadata) {
        if let Err(e) = self.set_metadata(metadata.to_mpris()).await {
            warn!("failed to publish metadata: {e}");
        }
    }

    async fn publish_status(&self, status: PlaybackStatus) {
        if let Err(e) = self.set_playback_status(status).await {
            warn!("failed to publish playback status: {e}");
        }
    }

    async fn publish_shuffle(&self, shuffle: bool) {
        if let Err(e) = self.set_shuffle(shuffle).await {
            warn!("failed to publish shuffle: {e}");
        }
    }
}

/// Session id shared between the sync loop (sole writer) and the
/// quit/shutdown paths, which read it to release the id remotely.
#[derive(Clone, Default)]
pub struct SessionHandle(Rc<Cell<Option<u32>>>);

impl SessionHandle {
    pub fn get(&self) -> Option<u32> {
        self.0.get()
    }

    fn set(&self, id: u32) {
        self.0.set(Some(id));
    }
}

/// Periodic reconciliation of remote playback state onto the bus.
pub struct SyncLoop {
    remote: RemoteClient,
    session: SessionHandle,
    ticks: u32,
}

impl SyncLoop {
    pub fn new(remote: RemoteClient, session: SessionHandle) -> Self {
        Self {
            remote,
            session,
            ticks: 0,
        }
    }

    /// One tick of the sync state machine.
    ///
    /// Until a session id has been obtained, a tick only attempts the
    /// identity fetch; the fixed interval is the retry mechanism. Once
    /// registered, metadata and status are fetched concurrently, and
    /// status is republished only when it changed.
    pub async fn tick(&mut self, endpoint: &impl MediaEndpoint) {
        let Some(id) = self.session.get() else {
            match self.remote.session_id().await {
                Ok(id) => {
                    self.session.set(id);
                    info!("registered with remote service as client {id}");
                }
                Err(e) => debug!("session registration failed: {e}"),
            }
            return;
        };

        self.ticks = self.ticks.wrapping_add(1);

        let (metadata, status) =
            tokio::join!(self.remote.metadata(id), self.remote.playback_status());

        match metadata {
            Ok(Some(metadata)) => endpoint.publish_metadata(&metadata).await,
            // Empty body: track unchanged since we last asked
            Ok(None) => {}
            Err(e) => debug!("skipping metadata update: {e}"),
        }

        let status = status.to_mpris();
        if endpoint.playback_status() != status {
            endpoint.publish_status(status).await;
        }

        if self.ticks % SHUFFLE_SYNC_EVERY == 0 {
            if let Some(shuffle) = self.remote.shuffle().await {
                if endpoint.shuffle() != shuffle {
                    endpoint.publish_shuffle(shuffle).await;
                }
            }
        }
    }

    pub async fn run(mut self, endpoint: &impl MediaEndpoint, every: Duration) {
        let mut interval = time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick(endpoint).await;
        }
    }
}

/// Wire bus control events to remote calls. Each handler fires its
/// request on a local task so the bus dispatch never waits on HTTP.
fn register_controls(player: &Player, remote: &RemoteClient, session: &SessionHandle) {
    let r = remote.clone();
    player.connect_play(move |_| {
        let r = r.clone();
        task::spawn_local(async move { r.play().await });
    });

    let r = remote.clone();
    player.connect_pause(move |_| {
        let r = r.clone();
        task::spawn_local(async move { r.pause().await });
    });

    let r = remote.clone();
    player.connect_play_pause(move |_| {
        let r = r.clone();
        task::spawn_local(async move { r.play_pause().await });
    });

    let r = remote.clone();
    player.connect_next(move |_| {
        let r = r.clone();
        task::spawn_local(async move { r.next().await });
    });

    let r = remote.clone();
    player.connect_previous(move |_| {
        let r = r.clone();
        task::spawn_local(async move { r.previous().await });
    });

    // The remote only exposes a toggle, so forward a Shuffle write only
    // when the requested value differs from what the remote reports.
    let r = remote.clone();
    player.connect_set_shuffle(move |_, shuffle| {
        let r = r.clone();
        task::spawn_local(async move {
            if let Some(current) = r.shuffle().await {
                if current != shuffle {
                    r.toggle_shuffle().await;
                }
            }
        });
    });

    let r = remote.clone();
    let s = session.clone();
    player.connect_quit(move |_| {
        let r = r.clone();
        let s = s.clone();
        task::spawn_local(async move {
            if let Some(id) = s.get() {
                r.unping(id).await;
            }
            // Bounded by the request timeout; the exit does not depend
            // on the remote answering.
            r.quit().await;
            info!("quit requested, exiting");
            std::process::exit(0);
        });
    });
}

pub async fn run(config: Config) -> Result<()> {
    let remote = RemoteClient::new(&config)?;
    let session = SessionHandle::default();

    let player = Player::builder(BUS_NAME)
        .identity(IDENTITY)
        .supported_uri_schemes(Vec::<String>::new())
        .supported_mime_types(Vec::<String>::new())
        .can_quit(true)
        .can_raise(false)
        .can_play(true)
        .can_pause(true)
        .can_go_next(true)
        .can_go_previous(true)
        .can_seek(false)
        .can_control(true)
        .build()
        .await
        .with_context(|| "Failed to register MPRIS player on the session bus")?;

    register_controls(&player, &remote, &session);

    let sync = SyncLoop::new(remote.clone(), session.clone());
    info!("bridge running against {}", config.remote.host);

    tokio::select! {
        _ = player.run() => {}
        _ = sync.run(&player, config.poll_interval()) => {}
        _ = tokio::signal::ctrl_c() => {
            if let Some(id) = session.get() {
                remote.unping(id).await;
            }
            info!("interrupted, shutting down");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct MockEndpoint {
        status: Cell<PlaybackStatus>,
        shuffle: Cell<bool>,
        metadata_writes: RefCell<Vec<TrackMetadata>>,
        status_writes: RefCell<Vec<PlaybackStatus>>,
        shuffle_writes: RefCell<Vec<bool>>,
    }

    impl MockEndpoint {
        fn new() -> Self {
            Self {
                // A fresh bus player starts out stopped
                status: Cell::new(PlaybackStatus::Stopped),
                shuffle: Cell::new(false),
                metadata_writes: RefCell::new(Vec::new()),
                status_writes: RefCell::new(Vec::new()),
                shuffle_writes: RefCell::new(Vec::new()),
            }
        }
    }

    impl MediaEndpoint for MockEndpoint {
        fn playback_status(&self) -> PlaybackStatus {
            self.status.get()
        }

        fn shuffle(&self) -> bool {
            self.shuffle.get()
        }

        async fn publish_metadata(&self, metadata: &TrackMetadata) {
            self.metadata_writes.borrow_mut().push(metadata.clone());
        }

        async fn publish_status(&self, status: PlaybackStatus) {
            self.status.set(status);
            self.status_writes.borrow_mut().push(status);
        }

        async fn publish_shuffle(&self, shuffle: bool) {
            self.shuffle.set(shuffle);
            self.shuffle_writes.borrow_mut().push(shuffle);
        }
    }

    fn client_for(uri: &str) -> RemoteClient {
        let mut config = Config::default();
        config.remote.host = uri.to_string();
        RemoteClient::new(&config).unwrap()
    }

    async fn mount_text(server: &MockServer, route: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_no_publishing_before_identity() {
        let server = MockServer::start().await;
        // Identity endpoint down: every route 404s

        let session = SessionHandle::default();
        let mut sync = SyncLoop::new(client_for(&server.uri()), session.clone());
        let endpoint = MockEndpoint::new();

        sync.tick(&endpoint).await;

        assert_eq!(session.get(), None);
        assert!(endpoint.metadata_writes.borrow().is_empty());
        assert!(endpoint.status_writes.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_identity_tick_ends_early() {
        let server = MockServer::start().await;
        mount_text(&server, "/ping/id", "42").await;
        mount_text(&server, "/ping/42", r#"{"xesam:title":"Song A"}"#).await;
        mount_text(&server, "/player/is/playing", "True").await;

        let session = SessionHandle::default();
        let mut sync = SyncLoop::new(client_for(&server.uri()), session.clone());
        let endpoint = MockEndpoint::new();

        sync.tick(&endpoint).await;

        // Identity acquired, but no fetch on the same tick
        assert_eq!(session.get(), Some(42));
        assert!(endpoint.metadata_writes.borrow().is_empty());
        assert!(endpoint.status_writes.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_tick_sequence_publishes_then_deduplicates() {
        let server = MockServer::start().await;
        mount_text(&server, "/ping/id", "42").await;
        Mock::given(method("GET"))
            .and(path("/ping/42"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"{"xesam:title":"Song A"}"#),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        // Track unchanged afterwards
        mount_text(&server, "/ping/42", "").await;
        mount_text(&server, "/player/is/playing", "True").await;

        let session = SessionHandle::default();
        let mut sync = SyncLoop::new(client_for(&server.uri()), session.clone());
        let endpoint = MockEndpoint::new();

        // Tick 1: identity. Tick 2: first publish. Tick 3: no changes.
        sync.tick(&endpoint).await;
        sync.tick(&endpoint).await;
        sync.tick(&endpoint).await;

        let metadata_writes = endpoint.metadata_writes.borrow();
        assert_eq!(metadata_writes.len(), 1);
        assert_eq!(metadata_writes[0].title, "Song A");

        let status_writes = endpoint.status_writes.borrow();
        assert_eq!(*status_writes, vec![PlaybackStatus::Playing]);
    }

    #[tokio::test]
    async fn test_identity_retries_on_next_tick() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping/id"))
            .respond_with(ResponseTemplate::new(200).set_body_string("starting up"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_text(&server, "/ping/id", "7").await;

        let session = SessionHandle::default();
        let mut sync = SyncLoop::new(client_for(&server.uri()), session.clone());
        let endpoint = MockEndpoint::new();

        sync.tick(&endpoint).await;
        assert_eq!(session.get(), None);

        sync.tick(&endpoint).await;
        assert_eq!(session.get(), Some(7));
    }

    #[tokio::test]
    async fn test_status_errors_read_as_paused() {
        let server = MockServer::start().await;
        mount_text(&server, "/ping/id", "42").await;
        mount_text(&server, "/ping/42", "").await;
        // No /player/is/playing route mounted

        let session = SessionHandle::default();
        let mut sync = SyncLoop::new(client_for(&server.uri()), session.clone());
        let endpoint = MockEndpoint::new();

        sync.tick(&endpoint).await;
        sync.tick(&endpoint).await;

        // Stopped -> Paused is a change and gets published once
        assert_eq!(
            *endpoint.status_writes.borrow(),
            vec![PlaybackStatus::Paused]
        );
        assert!(endpoint.metadata_writes.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_metadata_skips_tick() {
        let server = MockServer::start().await;
        mount_text(&server, "/ping/id", "42").await;
        mount_text(&server, "/ping/42", "<html>crash page</html>").await;
        mount_text(&server, "/player/is/playing", "True").await;

        let session = SessionHandle::default();
        let mut sync = SyncLoop::new(client_for(&server.uri()), session.clone());
        let endpoint = MockEndpoint::new();

        sync.tick(&endpoint).await;
        sync.tick(&endpoint).await;

        // Metadata skipped, status still reconciled
        assert!(endpoint.metadata_writes.borrow().is_empty());
        assert_eq!(
            *endpoint.status_writes.borrow(),
            vec![PlaybackStatus::Playing]
        );
    }

    #[tokio::test]
    async fn test_metadata_keyed_by_session_id() {
        let server = MockServer::start().await;
        mount_text(&server, "/ping/id", "901").await;
        mount_text(&server, "/ping/901", r#"{"xesam:title":"Keyed"}"#).await;
        mount_text(&server, "/player/is/playing", "False").await;

        let session = SessionHandle::default();
        let mut sync = SyncLoop::new(client_for(&server.uri()), session.clone());
        let endpoint = MockEndpoint::new();

        sync.tick(&endpoint).await;
        sync.tick(&endpoint).await;
        sync.tick(&endpoint).await;

        // Both fetches hit ping/901; a wrong key would have 404ed and
        // produced no metadata writes
        assert_eq!(endpoint.metadata_writes.borrow().len(), 2);
        assert_eq!(session.get(), Some(901));
    }

    #[tokio::test]
    async fn test_shuffle_synced_on_reduced_cadence() {
        let server = MockServer::start().await;
        mount_text(&server, "/ping/id", "42").await;
        mount_text(&server, "/ping/42", "").await;
        mount_text(&server, "/player/is/playing", "False").await;
        mount_text(&server, "/player/is/shuffle", "True").await;

        let session = SessionHandle::default();
        let mut sync = SyncLoop::new(client_for(&server.uri()), session.clone());
        let endpoint = MockEndpoint::new();

        // Identity tick plus one full cadence of regular ticks
        for _ in 0..=SHUFFLE_SYNC_EVERY {
            sync.tick(&endpoint).await;
        }

        assert_eq!(*endpoint.shuffle_writes.borrow(), vec![true]);

        // Another cadence with an unchanged remote publishes nothing new
        for _ in 0..SHUFFLE_SYNC_EVERY {
            sync.tick(&endpoint).await;
        }
        assert_eq!(*endpoint.shuffle_writes.borrow(), vec![true]);
    }
}
