//! Per-task flow: staleness check, download, verification and retry.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tracing::{debug, info, warn};

use super::SessionState;
use super::actor::{HashPurpose, Notice, SessionActor};
use super::task::{TaskId, TaskPhase};
use crate::events::{SessionEvent, TaskFailure};
use crate::transfer::TransferEvent;
use crate::verify::{
    ChecksumAlgorithm, LocalFile, VerifyError, hash_file, inspect_local, remove_sidecar,
    sidecar_path, write_sidecar,
};

impl SessionActor {
    /// Runs the incremental-sync check for a freshly admitted task.
    pub(super) fn begin_task(&mut self, id: TaskId) {
        let algorithm = self.config.algorithm;
        if self.force_download {
            self.prepare_download(id);
            return;
        }

        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        let local = inspect_local(
            &task.destination,
            task.expected_checksum.as_deref(),
            algorithm,
        );
        match local {
            Ok(LocalFile::Missing) => self.prepare_download(id),
            Ok(LocalFile::Unverified) => {
                let verified = task.finish_verify();
                self.progress.credit_verify(verified);
                self.complete_without_transfer(id);
            }
            Ok(LocalFile::Recorded(digest)) => {
                let verified = task.finish_verify();
                self.progress.credit_verify(verified);
                let fresh = task.checksum_matches(&digest);
                self.settle_check(id, fresh);
            }
            Ok(LocalFile::NeedsDigest) => {
                task.phase = TaskPhase::Checking;
                task.begin_verify_pass();
                let abort = task.arm_hash();
                let path = task.destination.clone();
                debug!(task_id = %id, path = %path.display(), "no sidecar, computing digest");
                self.spawn_hash(id, path, HashPurpose::Check, abort);
            }
            Err(error) => {
                let path = task.destination.clone();
                self.fail_task(id, io_failure(&path, &error));
            }
        }
    }

    /// Routes a checked task: fresh files finish, stale ones re-download.
    fn settle_check(&mut self, id: TaskId, fresh: bool) {
        if fresh {
            debug!(task_id = %id, "local file up to date");
            self.complete_without_transfer(id);
            return;
        }
        if let Some(task) = self.tasks.get(&id) {
            debug!(task_id = %id, path = %task.destination.display(), "local file stale");
            self.progress.extend_verify(task.file_size);
        }
        self.prepare_download(id);
    }

    fn complete_without_transfer(&mut self, id: TaskId) {
        if let Some(task) = self.tasks.get_mut(&id) {
            let downloaded = task.finish_download();
            self.progress.credit_download(downloaded);
        }
        self.complete_task(id);
    }

    /// Clears the destination and starts (or parks) the first attempt.
    fn prepare_download(&mut self, id: TaskId) {
        let algorithm = self.config.algorithm;
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        task.begin_attempt();
        if let Err(failure) = clear_destination(&task.destination, algorithm) {
            self.fail_task(id, failure);
            return;
        }
        self.dispatch_attempt(id);
    }

    /// Starts the current attempt now, or on `resume()` when paused.
    fn dispatch_attempt(&mut self, id: TaskId) {
        match self.state {
            SessionState::Downloading => self.launch(id),
            SessionState::Paused => {
                if let Some(task) = self.tasks.get_mut(&id) {
                    task.phase = TaskPhase::Ready;
                }
            }
            _ => self.task_stopped(id),
        }
    }

    pub(super) fn launch(&mut self, id: TaskId) {
        if let Some(task) = self.tasks.get_mut(&id) {
            debug!(task_id = %id, url = %task.url, attempt = task.retry_count + 1, "transfer started");
            task.phase = TaskPhase::Downloading;
            task.transfer.start();
        }
    }

    fn spawn_hash(&self, id: TaskId, path: PathBuf, purpose: HashPurpose, abort: Arc<AtomicBool>) {
        let notices = self.notices.clone();
        let algorithm = self.config.algorithm;
        tokio::spawn(async move {
            let chunks = notices.clone();
            let result = hash_file(&path, algorithm, &abort, |bytes| {
                let _ = chunks.send(Notice::HashChunk { task: id, bytes });
            })
            .await;
            let _ = notices.send(Notice::HashDone {
                task: id,
                purpose,
                result,
            });
        });
    }

    pub(super) fn on_transfer_event(&mut self, id: TaskId, event: TransferEvent) {
        let Some(task) = self.tasks.get_mut(&id) else {
            debug!(task_id = %id, "event for a task no longer in the session");
            return;
        };
        if task.phase != TaskPhase::Downloading {
            debug!(task_id = %id, phase = ?task.phase, "transfer event ignored");
            return;
        }

        match event {
            TransferEvent::Progress(stats) => {
                let downloaded = task.advance_download(stats.downloaded);
                let verified = if task.expected_checksum.is_none() {
                    task.advance_verify(stats.downloaded)
                } else {
                    0
                };
                self.progress.credit_download(downloaded);
                self.progress.credit_verify(verified);
                self.emit_progress(Some(stats));
            }
            TransferEvent::Completed { path } => {
                if self.state == SessionState::Stopped {
                    self.task_stopped(id);
                    return;
                }
                let downloaded = task.finish_download();
                self.progress.credit_download(downloaded);
                if task.expected_checksum.is_some() {
                    task.phase = TaskPhase::Verifying;
                    task.begin_verify_pass();
                    let abort = task.arm_hash();
                    self.spawn_hash(id, path, HashPurpose::Verify, abort);
                } else {
                    let verified = task.finish_verify();
                    self.progress.credit_verify(verified);
                    self.complete_task(id);
                }
            }
            TransferEvent::Stopped => {
                if self.state == SessionState::Stopped {
                    self.task_stopped(id);
                } else {
                    let failure = TaskFailure::Transfer {
                        url: task.url.clone(),
                        message: "transfer stopped unexpectedly".to_string(),
                    };
                    self.transfer_failed(id, failure);
                }
            }
            TransferEvent::Failed(error) => {
                if self.state == SessionState::Stopped {
                    self.task_stopped(id);
                    return;
                }
                let failure = TaskFailure::Transfer {
                    url: task.url.clone(),
                    message: error.to_string(),
                };
                self.transfer_failed(id, failure);
            }
        }
    }

    pub(super) fn on_hash_chunk(&mut self, id: TaskId, bytes: u64) {
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        if !task.is_hashing() {
            return;
        }
        let verified = task.add_verified(bytes);
        self.progress.credit_verify(verified);
        let stats = task.transfer.stats();
        self.emit_progress(Some(stats));
    }

    pub(super) fn on_hash_done(
        &mut self,
        id: TaskId,
        purpose: HashPurpose,
        result: Result<Option<String>, VerifyError>,
    ) {
        let algorithm = self.config.algorithm;
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        let expected_phase = match purpose {
            HashPurpose::Check => TaskPhase::Checking,
            HashPurpose::Verify => TaskPhase::Verifying,
        };
        if task.phase != expected_phase {
            return;
        }
        if self.state == SessionState::Stopped {
            self.task_stopped(id);
            return;
        }

        let digest = match result {
            Ok(Some(digest)) => digest,
            Ok(None) => {
                debug!(task_id = %id, "digest aborted");
                self.task_stopped(id);
                return;
            }
            Err(error) => {
                let path = task.destination.clone();
                self.fail_task(id, io_failure(&path, &error));
                return;
            }
        };

        let verified = task.finish_verify();
        self.progress.credit_verify(verified);

        match purpose {
            HashPurpose::Check => {
                let sidecar = sidecar_path(&task.destination, algorithm);
                if let Err(error) = write_sidecar(&sidecar, &digest) {
                    self.fail_task(id, io_failure(&sidecar, &error));
                    return;
                }
                let fresh = task.checksum_matches(&digest);
                self.settle_check(id, fresh);
            }
            HashPurpose::Verify => self.settle_verify(id, digest),
        }
    }

    /// Accepts, retries or fails a downloaded file by its digest.
    fn settle_verify(&mut self, id: TaskId, digest: String) {
        let algorithm = self.config.algorithm;
        let max_retries = self.config.max_retries;
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };

        if task.checksum_matches(&digest) {
            let sidecar = sidecar_path(&task.destination, algorithm);
            if let Err(error) = write_sidecar(&sidecar, &digest) {
                self.fail_task(id, io_failure(&sidecar, &error));
                return;
            }
            self.complete_task(id);
        } else if task.retry_count < max_retries {
            task.retry_count += 1;
            warn!(
                task_id = %id,
                url = %task.url,
                retry = task.retry_count,
                max_retries,
                "checksum mismatch, downloading again"
            );
            self.progress.extend_retry(task.file_size);
            task.begin_attempt();
            self.dispatch_attempt(id);
        } else {
            let failure = TaskFailure::ChecksumMismatch {
                url: task.url.clone(),
                path: task.destination.clone(),
                expected: task.expected_checksum.clone().unwrap_or_default(),
                actual: digest,
            };
            self.fail_task(id, failure);
        }
    }

    fn complete_task(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        task.phase = TaskPhase::Completed;
        let stats = task.transfer.stats();
        info!(task_id = %id, path = %task.destination.display(), "file ready");
        self.progress.file_completed();
        self.remove_in_progress(id);
        self.emit_progress(Some(stats));
    }

    /// Reports a per-task failure; the task leaves its slot.
    ///
    /// The task's remaining byte credits are granted so the rest of the
    /// session can still reach 100%.
    fn fail_task(&mut self, id: TaskId, failure: TaskFailure) {
        if let Some(task) = self.tasks.get_mut(&id) {
            task.phase = TaskPhase::Failed;
            task.abort_hash();
            let downloaded = task.finish_download();
            let verified = task.finish_verify();
            self.progress.credit_download(downloaded);
            self.progress.credit_verify(verified);
            self.progress.file_failed();
        }
        warn!(task_id = %id, error = %failure, "file failed");
        self.remove_in_progress(id);
        self.emit(&SessionEvent::Error(failure));
        self.finish_stop_if_idle();
    }

    /// A transport failure fails the task and stops the whole session.
    fn transfer_failed(&mut self, id: TaskId, failure: TaskFailure) {
        self.fail_task(id, failure);
        if self.state.is_active() {
            self.begin_stop();
        }
    }

    pub(super) fn task_stopped(&mut self, id: TaskId) {
        if let Some(task) = self.tasks.get_mut(&id) {
            task.phase = TaskPhase::Stopped;
            task.abort_hash();
        }
        debug!(task_id = %id, "task stopped");
        self.remove_in_progress(id);
        self.finish_stop_if_idle();
    }
}

/// Prepares the destination for a fresh download: parent directories
/// exist, and no stale file or sidecar remains.
fn clear_destination(path: &Path, algorithm: ChecksumAlgorithm) -> Result<(), TaskFailure> {
    let io = |error: std::io::Error| TaskFailure::Io {
        path: path.to_path_buf(),
        message: error.to_string(),
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io)?;
    }
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => return Err(io(error)),
    }
    remove_sidecar(&sidecar_path(path, algorithm)).map_err(|e| io_failure(path, &e))
}

fn io_failure(path: &Path, error: &VerifyError) -> TaskFailure {
    let message = match error {
        VerifyError::Io { source, .. } => source.to_string(),
        VerifyError::UnknownAlgorithm { .. } => error.to_string(),
    };
    TaskFailure::Io {
        path: path.to_path_buf(),
        message,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_clear_destination_removes_file_and_sidecar() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("nested/dir/file.bin");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"old").unwrap();
        let sidecar = sidecar_path(&file, ChecksumAlgorithm::Sha256);
        std::fs::write(&sidecar, "00").unwrap();

        clear_destination(&file, ChecksumAlgorithm::Sha256).unwrap();

        assert!(!file.exists());
        assert!(!sidecar.exists());
        assert!(file.parent().unwrap().is_dir());
    }

    #[test]
    fn test_clear_destination_creates_missing_parents() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a/b/c/file.bin");
        clear_destination(&file, ChecksumAlgorithm::Md5).unwrap();
        assert!(temp.path().join("a/b/c").is_dir());
    }

    #[test]
    fn test_io_failure_keeps_path() {
        let error = VerifyError::io(
            "/tmp/x.sha256",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let failure = io_failure(Path::new("/tmp/x.sha256"), &error);
        assert_eq!(
            failure,
            TaskFailure::Io {
                path: PathBuf::from("/tmp/x.sha256"),
                message: "denied".to_string(),
            }
        );
    }
}
