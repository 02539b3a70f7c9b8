//! Scripted in-memory transfers for session integration tests.
//!
//! [`ScriptedFactory`] serves registered URLs from memory, writes the bytes to
//! the requested destination and records how often each URL was started and
//! how many transfers ran at once. Files can be held until [`release`]d,
//! corrupted for their first attempts, or made to fail the size probe.
//!
//! [`release`]: ScriptedFactory::release

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use batch_downloader::{
    EventStream, SessionEvent, Transfer, TransferError, TransferEvents, TransferFactory,
    TransferRequest, TransferStats,
};
use sha2::{Digest, Sha256};
use tokio::sync::watch;

/// Behaviour of one scripted URL.
#[derive(Debug, Clone, Default)]
pub struct ScriptedFile {
    pub content: Vec<u8>,
    /// Attempts that deliver corrupted bytes before the real content.
    pub corrupt_attempts: usize,
    /// Wait for `release()` before writing anything.
    pub hold: bool,
    /// The size probe fails.
    pub probe_fails: bool,
    /// Every attempt fails after starting.
    pub fail_transfer: bool,
}

impl ScriptedFile {
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn held(mut self) -> Self {
        self.hold = true;
        self
    }

    pub fn corrupt_first(mut self, attempts: usize) -> Self {
        self.corrupt_attempts = attempts;
        self
    }

    pub fn failing_probe(mut self) -> Self {
        self.probe_fails = true;
        self
    }

    pub fn failing_transfer(mut self) -> Self {
        self.fail_transfer = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    Pause,
    Stop,
}

#[derive(Default)]
struct Shared {
    files: Mutex<HashMap<String, ScriptedFile>>,
    starts: Mutex<HashMap<String, usize>>,
    probes: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Shared {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Factory of scripted transfers.
#[derive(Clone)]
pub struct ScriptedFactory {
    shared: Arc<Shared>,
    gate: Arc<watch::Sender<bool>>,
}

impl Default for ScriptedFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedFactory {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared::default()),
            gate: Arc::new(gate),
        }
    }

    /// Registers `file` under `url`.
    pub fn serve(&self, url: &str, file: ScriptedFile) -> &Self {
        self.shared
            .files
            .lock()
            .unwrap()
            .insert(url.to_string(), file);
        self
    }

    /// Lets every held transfer proceed.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Number of attempts started for `url`.
    pub fn starts(&self, url: &str) -> usize {
        self.shared
            .starts
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_starts(&self) -> usize {
        self.shared.starts.lock().unwrap().values().sum()
    }

    pub fn probes(&self) -> usize {
        self.shared.probes.load(Ordering::SeqCst)
    }

    /// Transfers currently between start and their final event.
    pub fn active(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.shared.max_active.load(Ordering::SeqCst)
    }

    pub fn into_arc(self) -> Arc<dyn TransferFactory> {
        Arc::new(self)
    }
}

impl TransferFactory for ScriptedFactory {
    fn create(&self, request: TransferRequest, events: TransferEvents) -> Box<dyn Transfer> {
        let (control, _) = watch::channel(Control::Run);
        Box::new(ScriptedTransfer {
            shared: Arc::clone(&self.shared),
            gate: self.gate.subscribe(),
            request,
            events,
            control,
            downloaded: Arc::new(AtomicU64::new(0)),
            attempts: Arc::new(AtomicUsize::new(0)),
        })
    }
}

struct ScriptedTransfer {
    shared: Arc<Shared>,
    gate: watch::Receiver<bool>,
    request: TransferRequest,
    events: TransferEvents,
    control: watch::Sender<Control>,
    downloaded: Arc<AtomicU64>,
    attempts: Arc<AtomicUsize>,
}

impl ScriptedTransfer {
    fn script(&self) -> Option<ScriptedFile> {
        self.shared
            .files
            .lock()
            .unwrap()
            .get(&self.request.url)
            .cloned()
    }
}

#[async_trait]
impl Transfer for ScriptedTransfer {
    async fn total_size(&self) -> Result<u64, TransferError> {
        self.shared.probes.fetch_add(1, Ordering::SeqCst);
        match self.script() {
            Some(file) if !file.probe_fails => Ok(file.content.len() as u64),
            _ => Err(TransferError::unknown_size(&self.request.url)),
        }
    }

    fn start(&self) {
        *self
            .shared
            .starts
            .lock()
            .unwrap()
            .entry(self.request.url.clone())
            .or_insert(0) += 1;
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        self.downloaded.store(0, Ordering::SeqCst);
        self.control.send_replace(Control::Run);

        let file = self.script().unwrap_or_default();
        let run = Attempt {
            shared: Arc::clone(&self.shared),
            gate: self.gate.clone(),
            control: self.control.subscribe(),
            events: self.events.clone(),
            url: self.request.url.clone(),
            destination: self.request.destination.clone(),
            downloaded: Arc::clone(&self.downloaded),
            corrupt: attempt < file.corrupt_attempts,
            file,
        };
        self.shared.enter();
        tokio::spawn(run.run());
    }

    fn pause(&self) {
        self.control.send_if_modified(|c| {
            if *c == Control::Run {
                *c = Control::Pause;
                true
            } else {
                false
            }
        });
    }

    fn resume(&self) {
        self.control.send_if_modified(|c| {
            if *c == Control::Pause {
                *c = Control::Run;
                true
            } else {
                false
            }
        });
    }

    fn stop(&self) {
        self.control.send_replace(Control::Stop);
    }

    fn stats(&self) -> TransferStats {
        TransferStats {
            downloaded: self.downloaded.load(Ordering::SeqCst),
            total: None,
        }
    }
}

struct Attempt {
    shared: Arc<Shared>,
    gate: watch::Receiver<bool>,
    control: watch::Receiver<Control>,
    events: TransferEvents,
    url: String,
    destination: PathBuf,
    downloaded: Arc<AtomicU64>,
    file: ScriptedFile,
    corrupt: bool,
}

impl Attempt {
    async fn run(mut self) {
        if !self.wait_runnable().await {
            let _ = std::fs::remove_file(&self.destination);
            self.shared.leave();
            self.events.stopped();
            return;
        }

        if self.file.fail_transfer {
            self.shared.leave();
            self.events.failed(TransferError::http_status(&self.url, 500));
            return;
        }

        let mut content = self.file.content.clone();
        if self.corrupt
            && let Some(first) = content.first_mut()
        {
            *first ^= 0xff;
        }
        let total = content.len() as u64;
        let half = content.len() / 2;

        if let Some(parent) = self.destination.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&self.destination, &content[..half]).unwrap();
        self.report(half as u64, total);
        tokio::time::sleep(Duration::from_millis(2)).await;

        std::fs::write(&self.destination, &content).unwrap();
        self.report(total, total);

        self.shared.leave();
        self.events.completed(self.destination.clone());
    }

    fn report(&self, downloaded: u64, total: u64) {
        self.downloaded.store(downloaded, Ordering::SeqCst);
        self.events.progress(TransferStats {
            downloaded,
            total: Some(total),
        });
    }

    /// Waits until running and released; false once stopped.
    async fn wait_runnable(&mut self) -> bool {
        loop {
            let control = *self.control.borrow_and_update();
            let released = !self.file.hold || *self.gate.borrow_and_update();
            match control {
                Control::Stop => return false,
                Control::Run if released => return true,
                _ => {}
            }
            tokio::select! {
                changed = self.control.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                changed = self.gate.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }
}

pub fn sha256_hex(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Scripted URL for `name`.
pub fn url(name: &str) -> String {
    format!("https://files.test/{name}")
}

pub fn sidecar(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".sha256");
    PathBuf::from(name)
}

/// Waits for the next event matching `pred`, skipping others.
pub async fn next_matching<F>(events: &mut EventStream, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Waits for `End` or `Stop`, collecting every event on the way.
pub async fn collect_until_terminal(events: &mut EventStream) -> Vec<SessionEvent> {
    tokio::time::timeout(Duration::from_secs(10), async {
        let mut seen = Vec::new();
        loop {
            let event = events.recv().await.expect("event stream closed");
            let terminal = matches!(event, SessionEvent::End(_) | SessionEvent::Stop);
            seen.push(event);
            if terminal {
                return seen;
            }
        }
    })
    .await
    .expect("timed out waiting for end or stop")
}

/// Polls `cond` until it holds.
pub async fn wait_until<F>(mut cond: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
