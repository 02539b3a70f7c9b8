//! HTTP transfer engine built on `reqwest`.
//!
//! Each [`HttpTransfer`] streams one URL into one file. Control signals
//! travel over a `watch` channel that the streaming task checks between
//! chunks; progress is reported at most every 250 ms and once at the end.
//!
//! The read timeout is an idle limit: it bounds the wait for response
//! headers and for each body chunk while the transfer runs. A paused
//! transfer is not reading, so no timer runs during the pause.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::CONTENT_LENGTH;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::{Transfer, TransferError, TransferEvents, TransferFactory, TransferRequest, TransferStats};

/// Default HTTP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default idle read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Minimum delay between two progress reports of one attempt.
const PROGRESS_REPORT_INTERVAL: Duration = Duration::from_millis(250);

/// Marks an unknown remote size in [`Counters::total`].
const UNKNOWN_TOTAL: u64 = u64::MAX;

fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("batch-downloader/{version}")
}

/// Builds [`HttpTransfer`]s sharing one connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransferFactory {
    client: Client,
    read_timeout: Duration,
}

impl HttpTransferFactory {
    /// Creates a factory with the default timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Client`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, TransferError> {
        Self::with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }

    /// Creates a factory with explicit timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Client`] if the HTTP client cannot be built.
    pub fn with_timeouts(
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, TransferError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(default_user_agent())
            .build()
            .map_err(|source| TransferError::Client { source })?;
        Ok(Self {
            client,
            read_timeout,
        })
    }

    /// Wraps an existing client, with the default read timeout.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl TransferFactory for HttpTransferFactory {
    fn create(&self, request: TransferRequest, events: TransferEvents) -> Box<dyn Transfer> {
        Box::new(
            HttpTransfer::new(self.client.clone(), request, events)
                .with_read_timeout(self.read_timeout),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    Pause,
    Stop,
}

#[derive(Debug)]
struct Counters {
    downloaded: AtomicU64,
    total: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> TransferStats {
        let total = self.total.load(Ordering::SeqCst);
        TransferStats {
            downloaded: self.downloaded.load(Ordering::SeqCst),
            total: (total != UNKNOWN_TOTAL).then_some(total),
        }
    }
}

/// Streams a single URL to a single file.
#[derive(Debug)]
pub struct HttpTransfer {
    client: Client,
    read_timeout: Duration,
    url: String,
    destination: PathBuf,
    events: TransferEvents,
    counters: Arc<Counters>,
    control: watch::Sender<Control>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HttpTransfer {
    #[must_use]
    pub fn new(client: Client, request: TransferRequest, events: TransferEvents) -> Self {
        let (control, _) = watch::channel(Control::Run);
        Self {
            client,
            read_timeout: DEFAULT_READ_TIMEOUT,
            url: request.url,
            destination: request.destination,
            events,
            counters: Arc::new(Counters {
                downloaded: AtomicU64::new(0),
                total: AtomicU64::new(UNKNOWN_TOTAL),
            }),
            control,
            worker: Mutex::new(None),
        }
    }

    /// Sets the idle read timeout.
    #[must_use]
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

fn header_content_length(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

// A dropped transfer winds its attempt down through the normal stop path so
// the partial file is still removed.
impl Drop for HttpTransfer {
    fn drop(&mut self) {
        self.control.send_replace(Control::Stop);
    }
}

#[async_trait]
impl Transfer for HttpTransfer {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn total_size(&self) -> Result<u64, TransferError> {
        match self
            .client
            .head(&self.url)
            .timeout(self.read_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                if let Some(size) = header_content_length(&response) {
                    debug!(size, "size from HEAD");
                    return Ok(size);
                }
            }
            Ok(response) => {
                debug!(status = response.status().as_u16(), "HEAD rejected, trying GET");
            }
            Err(error) => {
                debug!(error = %error, "HEAD failed, trying GET");
            }
        }

        let response = self
            .client
            .get(&self.url)
            .timeout(self.read_timeout)
            .send()
            .await
            .map_err(|e| TransferError::network(&self.url, e))?;
        if !response.status().is_success() {
            return Err(TransferError::http_status(
                &self.url,
                response.status().as_u16(),
            ));
        }
        header_content_length(&response)
            .or_else(|| response.content_length())
            .ok_or_else(|| TransferError::unknown_size(&self.url))
    }

    fn start(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = worker.take() {
            previous.abort();
        }

        self.counters.downloaded.store(0, Ordering::SeqCst);
        self.control.send_replace(Control::Run);

        let attempt = Attempt {
            client: self.client.clone(),
            read_timeout: self.read_timeout,
            url: self.url.clone(),
            destination: self.destination.clone(),
            counters: Arc::clone(&self.counters),
            control: self.control.subscribe(),
            events: self.events.clone(),
        };
        *worker = Some(tokio::spawn(attempt.run()));
    }

    fn pause(&self) {
        self.control.send_if_modified(|control| {
            if *control == Control::Run {
                *control = Control::Pause;
                true
            } else {
                false
            }
        });
    }

    fn resume(&self) {
        self.control.send_if_modified(|control| {
            if *control == Control::Pause {
                *control = Control::Run;
                true
            } else {
                false
            }
        });
    }

    fn stop(&self) {
        if self.is_running() {
            self.control.send_replace(Control::Stop);
        } else {
            debug!(url = %self.url, "stop with no active attempt");
            self.events.stopped();
        }
    }

    fn stats(&self) -> TransferStats {
        self.counters.snapshot()
    }
}

enum Outcome {
    Completed,
    Stopped,
}

/// What woke the streaming loop.
enum Step<C> {
    Chunk(Option<C>),
    /// No chunk within the read timeout.
    Idle,
    Control(bool),
}

/// One streaming attempt, owned by its spawned task.
struct Attempt {
    client: Client,
    read_timeout: Duration,
    url: String,
    destination: PathBuf,
    counters: Arc<Counters>,
    control: watch::Receiver<Control>,
    events: TransferEvents,
}

impl Attempt {
    async fn run(mut self) {
        match self.stream().await {
            Ok(Outcome::Completed) => {
                debug!(path = %self.destination.display(), "transfer complete");
                self.events.completed(self.destination.clone());
            }
            Ok(Outcome::Stopped) => {
                remove_partial(&self.destination).await;
                self.events.stopped();
            }
            Err(error) => {
                warn!(url = %self.url, error = %error, "transfer failed");
                remove_partial(&self.destination).await;
                self.events.failed(error);
            }
        }
    }

    /// Blocks while paused. Returns false once stop is requested.
    async fn wait_runnable(&mut self) -> bool {
        loop {
            let control = *self.control.borrow_and_update();
            match control {
                Control::Run => return true,
                Control::Stop => return false,
                Control::Pause => {
                    if self.control.changed().await.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    async fn stream(&mut self) -> Result<Outcome, TransferError> {
        if !self.wait_runnable().await {
            return Ok(Outcome::Stopped);
        }

        let response = tokio::time::timeout(self.read_timeout, self.client.get(&self.url).send())
            .await
            .map_err(|_| TransferError::timeout(&self.url))?
            .map_err(|e| TransferError::network(&self.url, e))?;
        if !response.status().is_success() {
            return Err(TransferError::http_status(
                &self.url,
                response.status().as_u16(),
            ));
        }
        if let Some(total) = response.content_length() {
            self.counters.total.store(total, Ordering::SeqCst);
        }

        if let Some(parent) = self.destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::io(parent, e))?;
        }
        let file = File::create(&self.destination)
            .await
            .map_err(|e| TransferError::io(&self.destination, e))?;
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut last_report = Instant::now();

        loop {
            if !self.wait_runnable().await {
                return Ok(Outcome::Stopped);
            }

            let step = tokio::select! {
                chunk = tokio::time::timeout(self.read_timeout, stream.next()) => match chunk {
                    Ok(chunk) => Step::Chunk(chunk),
                    Err(_) => Step::Idle,
                },
                changed = self.control.changed() => Step::Control(changed.is_ok()),
            };

            match step {
                Step::Chunk(None) => break,
                Step::Idle => return Err(TransferError::timeout(&self.url)),
                Step::Chunk(Some(Err(error))) => {
                    return Err(TransferError::network(&self.url, error));
                }
                Step::Chunk(Some(Ok(chunk))) => {
                    writer
                        .write_all(&chunk)
                        .await
                        .map_err(|e| TransferError::io(&self.destination, e))?;
                    self.counters
                        .downloaded
                        .fetch_add(chunk.len() as u64, Ordering::SeqCst);
                    if last_report.elapsed() >= PROGRESS_REPORT_INTERVAL {
                        last_report = Instant::now();
                        self.events.progress(self.counters.snapshot());
                    }
                }
                Step::Control(true) => {}
                Step::Control(false) => return Ok(Outcome::Stopped),
            }
        }

        writer
            .flush()
            .await
            .map_err(|e| TransferError::io(&self.destination, e))?;
        self.events.progress(self.counters.snapshot());
        Ok(Outcome::Completed)
    }
}

async fn remove_partial(path: &Path) {
    if let Err(error) = tokio::fs::remove_file(path).await
        && error.kind() != std::io::ErrorKind::NotFound
    {
        debug!(path = %path.display(), error = %error, "failed to remove partial file");
    }
}
