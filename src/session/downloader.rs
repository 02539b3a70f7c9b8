//! Public handle to a download session.

use std::path::Path;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::instrument;

use super::actor::{Command, FileRequest, Reply, SessionActor};
use super::{SessionError, SessionState};
use crate::config::DownloaderConfig;
use crate::events::{EventChannel, EventStream};
use crate::progress::SessionStats;
use crate::transfer::{HttpTransferFactory, TransferFactory};

/// Orchestrates a batch of file downloads as one session.
///
/// The handle is cheap to query: [`state()`](Self::state) and
/// [`stats()`](Self::stats) read the latest values the session published.
/// Lifecycle calls are forwarded to the session task and resolve once it has
/// applied them. Dropping the handle stops every in-flight transfer.
///
/// # Example
///
/// ```no_run
/// use batch_downloader::{Downloader, DownloaderConfig, SessionEvent};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let downloader = Downloader::new(DownloaderConfig::default())?;
/// let mut events = downloader.subscribe();
/// downloader
///     .add_file("https://example.com/1MB.dat", "./downloads", None, None)
///     .await?
///     .add_file("https://example.com/10MB.dat", "./downloads", Some("big/10MB.dat"), None)
///     .await?;
/// downloader.start(false).await?;
///
/// while let Some(event) = events.recv().await {
///     match event {
///         SessionEvent::Progress(p) => println!("{:.1}%", p.stats.total_progress),
///         SessionEvent::Error(failure) => eprintln!("{failure}"),
///         SessionEvent::End(_) | SessionEvent::Stop => break,
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Downloader {
    commands: mpsc::UnboundedSender<Command>,
    events: EventChannel,
    state: watch::Receiver<SessionState>,
    stats: watch::Receiver<SessionStats>,
    config: DownloaderConfig,
}

impl Downloader {
    /// Creates a session backed by [`HttpTransferFactory`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] for out-of-range settings or
    /// if the HTTP client cannot be built, and [`SessionError::NoRuntime`]
    /// outside a Tokio runtime.
    pub fn new(config: DownloaderConfig) -> Result<Self, SessionError> {
        let factory = HttpTransferFactory::new()
            .map_err(|e| SessionError::invalid_config("http client", e.to_string()))?;
        Self::with_factory(config, Arc::new(factory))
    }

    /// Creates a session using `factory` for every transfer.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidConfig`] for out-of-range settings and
    /// [`SessionError::NoRuntime`] outside a Tokio runtime.
    pub fn with_factory(
        config: DownloaderConfig,
        factory: Arc<dyn TransferFactory>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::StandBy);
        let (stats_tx, stats_rx) = watch::channel(SessionStats::default());
        let events = EventChannel::new();

        let actor = SessionActor::new(
            config.clone(),
            factory,
            events.clone(),
            notice_tx,
            state_tx,
            stats_tx,
        );
        runtime.spawn(actor.run(command_rx, notice_rx));

        Ok(Self {
            commands: command_tx,
            events,
            state: state_rx,
            stats: stats_rx,
            config,
        })
    }

    /// Appends a file to the queue.
    ///
    /// `file_name` defaults to the last URL path segment and may contain
    /// sub-directories below `dest_dir`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidState`] unless the session is in stand-by
    /// - [`SessionError::InvalidUrl`] if `url` does not parse
    /// - [`SessionError::InvalidDestination`] for absolute or escaping names
    /// - [`SessionError::DuplicateDestination`] if another file targets the same path
    /// - [`SessionError::InvalidChecksum`] if `expected_checksum` is not a hex
    ///   digest of the configured algorithm
    #[instrument(skip(self, dest_dir, expected_checksum), fields(url = %url))]
    pub async fn add_file(
        &self,
        url: &str,
        dest_dir: impl AsRef<Path>,
        file_name: Option<&str>,
        expected_checksum: Option<&str>,
    ) -> Result<&Self, SessionError> {
        let request = FileRequest {
            url: url.to_string(),
            dest_dir: dest_dir.as_ref().to_path_buf(),
            file_name: file_name.map(str::to_string),
            expected_checksum: expected_checksum.map(str::to_string),
        };
        self.call(|reply| Command::AddFile { request, reply })
            .await?;
        Ok(self)
    }

    /// Probes every remote size, then starts admitting transfers.
    ///
    /// With `force_download`, existing files are downloaded again without
    /// checking them.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidState`] unless the session is in stand-by
    /// - [`SessionError::SizeProbe`] if any size is undeterminable; the
    ///   session returns to stand-by with its queue intact
    pub async fn start(&self, force_download: bool) -> Result<(), SessionError> {
        self.call(|reply| Command::Start {
            force_download,
            reply,
        })
        .await
    }

    /// Pauses every in-flight transfer.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidState`] unless downloading.
    pub async fn pause(&self) -> Result<(), SessionError> {
        self.call(|reply| Command::Pause { reply }).await
    }

    /// Resumes paused transfers and refills free slots from the queue.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidState`] unless paused.
    pub async fn resume(&self) -> Result<(), SessionError> {
        self.call(|reply| Command::Resume { reply }).await
    }

    /// Requests every in-flight transfer to stop.
    ///
    /// The session is `Stopped` when this returns; a [`SessionEvent::Stop`]
    /// follows once every transfer acknowledged, after which the session is
    /// back in stand-by with an empty queue.
    ///
    /// [`SessionEvent::Stop`]: crate::SessionEvent::Stop
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidState`] unless downloading or paused.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.call(|reply| Command::Stop { reply }).await
    }

    /// Drops the queue and counters and returns to stand-by.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidState`] while downloading.
    pub async fn clean(&self) -> Result<(), SessionError> {
        self.call(|reply| Command::Clean { reply }).await
    }

    /// Latest published session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Latest published counters.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        *self.stats.borrow()
    }

    /// Subscribes to session events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    #[must_use]
    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    async fn call<F>(&self, command: F) -> Result<(), SessionError>
    where
        F: FnOnce(Reply<()>) -> Command,
    {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| SessionError::SessionClosed)?;
        response.await.map_err(|_| SessionError::SessionClosed)?
    }
}
