//! The session actor: sole owner of tasks, queue and counters.
//!
//! Commands from [`Downloader`](super::Downloader) and notices from
//! transfers and digest jobs are handled one at a time on a single Tokio
//! task, so none of the state below needs locking. After every message the
//! actor admits queued tasks into free slots, checks for completion and
//! publishes its state and stats for the synchronous accessors.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::destination::{file_name_from_url, resolve_destination};
use super::task::{Task, TaskId, TaskPhase};
use super::{SessionError, SessionState};
use crate::config::DownloaderConfig;
use crate::events::{EventChannel, SessionEvent};
use crate::progress::{ProgressAggregator, ProgressSnapshot, SessionStats};
use crate::transfer::{TransferEvent, TransferEvents, TransferFactory, TransferRequest, TransferStats};
use crate::verify::VerifyError;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// A file to append to the queue.
#[derive(Debug)]
pub(crate) struct FileRequest {
    pub(crate) url: String,
    pub(crate) dest_dir: PathBuf,
    pub(crate) file_name: Option<String>,
    pub(crate) expected_checksum: Option<String>,
}

/// Requests from the public handle.
#[derive(Debug)]
pub(crate) enum Command {
    AddFile {
        request: FileRequest,
        reply: Reply<()>,
    },
    Start {
        force_download: bool,
        reply: Reply<()>,
    },
    Pause {
        reply: Reply<()>,
    },
    Resume {
        reply: Reply<()>,
    },
    Stop {
        reply: Reply<()>,
    },
    Clean {
        reply: Reply<()>,
    },
}

/// Why a digest job was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HashPurpose {
    /// Staleness check of an existing destination.
    Check,
    /// Verification of a finished download.
    Verify,
}

/// Asynchronous reports from transfers and digest jobs.
#[derive(Debug)]
pub(crate) enum Notice {
    Transfer {
        task: TaskId,
        event: TransferEvent,
    },
    HashChunk {
        task: TaskId,
        bytes: u64,
    },
    HashDone {
        task: TaskId,
        purpose: HashPurpose,
        result: Result<Option<String>, VerifyError>,
    },
}

pub(crate) struct SessionActor {
    pub(super) config: DownloaderConfig,
    factory: Arc<dyn TransferFactory>,
    events: EventChannel,
    pub(super) notices: mpsc::UnboundedSender<Notice>,
    state_tx: watch::Sender<SessionState>,
    stats_tx: watch::Sender<SessionStats>,
    pub(super) state: SessionState,
    pub(super) tasks: HashMap<TaskId, Task>,
    queue: VecDeque<TaskId>,
    pub(super) in_progress: Vec<TaskId>,
    pub(super) progress: ProgressAggregator,
    pub(super) force_download: bool,
    next_task_id: u64,
}

impl SessionActor {
    pub(crate) fn new(
        config: DownloaderConfig,
        factory: Arc<dyn TransferFactory>,
        events: EventChannel,
        notices: mpsc::UnboundedSender<Notice>,
        state_tx: watch::Sender<SessionState>,
        stats_tx: watch::Sender<SessionStats>,
    ) -> Self {
        let progress = ProgressAggregator::new(config.progress_interval());
        Self {
            config,
            factory,
            events,
            notices,
            state_tx,
            stats_tx,
            state: SessionState::StandBy,
            tasks: HashMap::new(),
            queue: VecDeque::new(),
            in_progress: Vec::new(),
            progress,
            force_download: false,
            next_task_id: 0,
        }
    }

    /// Processes messages until the owning handle is dropped.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut notices: mpsc::UnboundedReceiver<Notice>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command).await;
                }
                Some(notice) = notices.recv() => {
                    self.handle_notice(notice);
                    self.pump();
                    self.publish();
                }
            }
        }
        self.shutdown();
    }

    async fn handle_command(&mut self, command: Command) {
        let (result, reply) = match command {
            Command::AddFile { request, reply } => (self.add_file(request), reply),
            Command::Start {
                force_download,
                reply,
            } => (self.start(force_download).await, reply),
            Command::Pause { reply } => (self.pause(), reply),
            Command::Resume { reply } => (self.resume(), reply),
            Command::Stop { reply } => (self.stop(), reply),
            Command::Clean { reply } => (self.clean(), reply),
        };
        self.pump();
        self.publish();
        let _ = reply.send(result);
    }

    fn handle_notice(&mut self, notice: Notice) {
        match notice {
            Notice::Transfer { task, event } => self.on_transfer_event(task, event),
            Notice::HashChunk { task, bytes } => self.on_hash_chunk(task, bytes),
            Notice::HashDone {
                task,
                purpose,
                result,
            } => self.on_hash_done(task, purpose, result),
        }
    }

    fn add_file(&mut self, request: FileRequest) -> Result<(), SessionError> {
        if self.state != SessionState::StandBy {
            return Err(SessionError::invalid_state("add a file", self.state));
        }

        let parsed = Url::parse(&request.url).map_err(|_| SessionError::InvalidUrl {
            url: request.url.clone(),
        })?;
        let file_name = match request.file_name {
            Some(name) => name,
            None => file_name_from_url(&parsed).ok_or_else(|| {
                SessionError::invalid_destination(
                    &request.dest_dir,
                    format!("cannot derive a file name from {}", request.url),
                )
            })?,
        };
        let destination = resolve_destination(&request.dest_dir, &file_name)?;
        if self.tasks.values().any(|t| t.destination == destination) {
            return Err(SessionError::DuplicateDestination { path: destination });
        }

        let expected_checksum = request
            .expected_checksum
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty());
        if let Some(checksum) = &expected_checksum {
            let algorithm = self.config.algorithm;
            if checksum.len() != algorithm.hex_len()
                || !checksum.bytes().all(|b| b.is_ascii_hexdigit())
            {
                return Err(SessionError::InvalidChecksum {
                    url: request.url,
                    checksum: checksum.clone(),
                    algorithm,
                });
            }
        }

        let id = TaskId(self.next_task_id);
        self.next_task_id += 1;

        let notices = self.notices.clone();
        let events = TransferEvents::new(move |event| {
            let _ = notices.send(Notice::Transfer { task: id, event });
        });
        let transfer = self.factory.create(
            TransferRequest {
                url: request.url.clone(),
                destination: destination.clone(),
            },
            events,
        );

        debug!(task_id = %id, url = %request.url, path = %destination.display(), "file queued");
        self.tasks.insert(
            id,
            Task::new(id, request.url, destination, expected_checksum, transfer),
        );
        self.queue.push_back(id);
        Ok(())
    }

    #[instrument(skip(self), fields(files = self.queue.len()))]
    async fn start(&mut self, force_download: bool) -> Result<(), SessionError> {
        if self.state != SessionState::StandBy {
            return Err(SessionError::invalid_state("start", self.state));
        }
        self.state = SessionState::Downloading;
        self.force_download = force_download;
        self.publish();

        let probes = self
            .queue
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .map(|task| async move { (task.id, task.transfer.total_size().await) });
        let results = join_all(probes).await;

        let mut total_bytes: u64 = 0;
        for (id, result) in results {
            match result {
                Ok(size) => {
                    if let Some(task) = self.tasks.get_mut(&id) {
                        task.file_size = size;
                        task.phase = TaskPhase::SizeProbed;
                    }
                    total_bytes = total_bytes.saturating_add(size);
                }
                Err(source) => {
                    let url = self
                        .tasks
                        .get(&id)
                        .map(|t| t.url.clone())
                        .unwrap_or_default();
                    warn!(url = %url, error = %source, "size probe failed, session not started");
                    self.revert_start();
                    return Err(SessionError::size_probe(url, source));
                }
            }
        }

        self.progress.begin(self.queue.len(), total_bytes);
        info!(
            files = self.queue.len(),
            bytes = total_bytes,
            force_download,
            "session started"
        );
        Ok(())
    }

    fn revert_start(&mut self) {
        self.state = SessionState::StandBy;
        self.force_download = false;
        self.progress.reset();
        for task in self.tasks.values_mut() {
            task.rewind();
        }
    }

    fn pause(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Downloading {
            return Err(SessionError::invalid_state("pause", self.state));
        }
        self.state = SessionState::Paused;
        for id in &self.in_progress {
            if let Some(task) = self.tasks.get(id)
                && task.phase == TaskPhase::Downloading
            {
                task.transfer.pause();
            }
        }
        info!(in_progress = self.in_progress.len(), "session paused");
        Ok(())
    }

    fn resume(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Paused {
            return Err(SessionError::invalid_state("resume", self.state));
        }
        self.state = SessionState::Downloading;
        for id in self.in_progress.clone() {
            let Some(task) = self.tasks.get(&id) else {
                continue;
            };
            let phase = task.phase;
            match phase {
                TaskPhase::Downloading => task.transfer.resume(),
                TaskPhase::Ready => self.launch(id),
                _ => {}
            }
        }
        info!(in_progress = self.in_progress.len(), "session resumed");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SessionError> {
        if !self.state.is_active() {
            return Err(SessionError::invalid_state("stop", self.state));
        }
        self.begin_stop();
        Ok(())
    }

    /// Moves to `Stopped` and asks every in-flight task to wind down.
    pub(super) fn begin_stop(&mut self) {
        self.state = SessionState::Stopped;
        info!(in_progress = self.in_progress.len(), "stopping session");

        for id in self.in_progress.clone() {
            let Some(task) = self.tasks.get_mut(&id) else {
                continue;
            };
            let phase = task.phase;
            match phase {
                TaskPhase::Downloading => task.transfer.stop(),
                TaskPhase::Checking | TaskPhase::Verifying => task.abort_hash(),
                _ => self.task_stopped(id),
            }
        }
        self.finish_stop_if_idle();
    }

    fn clean(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Downloading => Err(SessionError::invalid_state("clean", self.state)),
            SessionState::Stopped => {
                self.finish_stop();
                Ok(())
            }
            SessionState::Paused => {
                self.release_in_flight();
                self.reset();
                info!("paused session cleaned");
                Ok(())
            }
            SessionState::StandBy | SessionState::Completed => {
                self.reset();
                Ok(())
            }
        }
    }

    /// Signals every in-flight transfer and digest to stop without waiting.
    fn release_in_flight(&mut self) {
        for id in &self.in_progress {
            if let Some(task) = self.tasks.get_mut(id) {
                if task.phase == TaskPhase::Downloading {
                    task.transfer.stop();
                }
                task.abort_hash();
            }
        }
    }

    fn reset(&mut self) {
        for task in self.tasks.values_mut() {
            task.abort_hash();
        }
        self.tasks.clear();
        self.queue.clear();
        self.in_progress.clear();
        self.progress.reset();
        self.force_download = false;
        self.state = SessionState::StandBy;
    }

    pub(super) fn finish_stop_if_idle(&mut self) {
        if self.state == SessionState::Stopped && self.in_progress.is_empty() {
            self.finish_stop();
        }
    }

    fn finish_stop(&mut self) {
        if self.state != SessionState::Stopped {
            return;
        }
        self.reset();
        info!("session stopped");
        self.emit(&SessionEvent::Stop);
    }

    fn shutdown(&mut self) {
        debug!("download handle dropped, shutting down session");
        self.release_in_flight();
        self.reset();
    }

    /// Admits queued tasks into free slots, then checks for completion.
    fn pump(&mut self) {
        while self.state == SessionState::Downloading
            && self.in_progress.len() < self.config.concurrency
        {
            let Some(id) = self.queue.pop_front() else {
                break;
            };
            self.in_progress.push(id);
            debug!(task_id = %id, in_progress = self.in_progress.len(), "task admitted");
            self.begin_task(id);
        }
        self.check_completion();
    }

    fn check_completion(&mut self) {
        if self.state == SessionState::Downloading && self.progress.is_complete() {
            self.state = SessionState::Completed;
            let stats = self.stats_snapshot();
            info!(
                files = self.progress.files_to_download(),
                completed = stats.files_completed,
                failed = stats.files_failed,
                "session complete"
            );
            self.emit(&SessionEvent::End(stats));
        }
    }

    pub(super) fn remove_in_progress(&mut self, id: TaskId) {
        self.in_progress.retain(|t| *t != id);
    }

    fn stats_snapshot(&self) -> SessionStats {
        self.progress.stats(self.queue.len(), self.in_progress.len())
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state);
        self.stats_tx.send_replace(self.stats_snapshot());
    }

    pub(super) fn emit(&self, event: &SessionEvent) {
        self.publish();
        self.events.emit(event);
    }

    /// Emits a throttled progress event while the session is running.
    pub(super) fn emit_progress(&mut self, transfer: Option<TransferStats>) {
        if !self.state.is_active() {
            return;
        }
        if self.progress.should_emit(Instant::now()) {
            let snapshot = ProgressSnapshot {
                stats: self.stats_snapshot(),
                transfer,
            };
            self.emit(&SessionEvent::Progress(snapshot));
        }
    }
}
