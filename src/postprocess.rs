//! Post-processing pipeline driver.
//!
//! Jobs arrive here after their last article terminates and run through
//! par-rename → par-check → unpack → move → cleanup → scripts. The
//! heavyweight engines (Reed-Solomon repair, unpackers, user scripts) are
//! external collaborators behind narrow traits with no-op defaults; this
//! module owns the sequencing, the status vector updates, the stage
//! timers, and the hand-off to history and the duplicate coordinator.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::dupe;
use crate::history;
use crate::model::DownloadQueue;
use crate::rename::ParRenamer;
use crate::services::Services;
use crate::types::{
    CleanupStatus, MessageKind, MoveStatus, NzbId, ParStatus, PostRenameStatus, QueueEvent,
    ScriptStatus, TaskStatus, UnpackStatus,
};
use crate::utils;

/// Result of the par-check stage
#[derive(Clone, Debug)]
pub struct ParCheckOutcome {
    /// Resulting par status of the job
    pub status: ParStatus,
    /// Seconds spent repairing (on top of verification)
    pub repair_sec: i64,
}

/// External par-check/repair engine
#[async_trait]
pub trait ParChecker: Send + Sync {
    /// Verify (and if needed repair) the files in `dest_dir`
    async fn check_and_repair(&self, dest_dir: &Path, cancel: CancellationToken)
        -> ParCheckOutcome;
}

/// Par-check collaborator that skips the stage entirely
pub struct NoOpParChecker;

#[async_trait]
impl ParChecker for NoOpParChecker {
    async fn check_and_repair(
        &self,
        _dest_dir: &Path,
        _cancel: CancellationToken,
    ) -> ParCheckOutcome {
        ParCheckOutcome {
            status: ParStatus::Skipped,
            repair_sec: 0,
        }
    }
}

/// Result of the unpack stage
#[derive(Clone, Debug)]
pub struct UnpackOutcome {
    /// Resulting unpack status of the job
    pub status: UnpackStatus,
    /// The unpacker already removed the downloaded archives from disk
    pub cleaned_up_disk: bool,
}

/// External archive unpacker
#[async_trait]
pub trait Unpacker: Send + Sync {
    /// Extract archives found in `dest_dir`
    async fn unpack(
        &self,
        dest_dir: &Path,
        password: Option<&str>,
        cancel: CancellationToken,
    ) -> UnpackOutcome;
}

/// Unpack collaborator that skips the stage entirely
pub struct NoOpUnpacker;

#[async_trait]
impl Unpacker for NoOpUnpacker {
    async fn unpack(
        &self,
        _dest_dir: &Path,
        _password: Option<&str>,
        _cancel: CancellationToken,
    ) -> UnpackOutcome {
        UnpackOutcome {
            status: UnpackStatus::Skipped,
            cleaned_up_disk: false,
        }
    }
}

/// External post-processing script runner
#[async_trait]
pub trait PostScriptRunner: Send + Sync {
    /// Run the configured scripts against the finished directory and
    /// report per-script outcomes
    async fn run(
        &self,
        dest_dir: &Path,
        nzb_name: &str,
        cancel: CancellationToken,
    ) -> Vec<(String, ScriptStatus)>;
}

/// Script collaborator that runs nothing
pub struct NoOpScripts;

#[async_trait]
impl PostScriptRunner for NoOpScripts {
    async fn run(
        &self,
        _dest_dir: &Path,
        _nzb_name: &str,
        _cancel: CancellationToken,
    ) -> Vec<(String, ScriptStatus)> {
        Vec::new()
    }
}

/// The stage driver. One job post-processes at a time, in arrival order.
pub struct PostProcessor {
    queue: Arc<Mutex<DownloadQueue>>,
    services: Services,
    par_checker: Arc<dyn ParChecker>,
    unpacker: Arc<dyn Unpacker>,
    scripts: Arc<dyn PostScriptRunner>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<NzbId>>>,
    shutdown: CancellationToken,
}

impl PostProcessor {
    /// Create the driver; `rx` is the receiving end of the services'
    /// post-processing channel
    pub fn new(
        queue: Arc<Mutex<DownloadQueue>>,
        services: Services,
        par_checker: Arc<dyn ParChecker>,
        unpacker: Arc<dyn Unpacker>,
        scripts: Arc<dyn PostScriptRunner>,
        rx: mpsc::UnboundedReceiver<NzbId>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            services,
            par_checker,
            unpacker,
            scripts,
            rx: Mutex::new(Some(rx)),
            shutdown,
        }
    }

    /// Drain the post-processing channel until shutdown
    pub async fn run(&self) {
        let mut rx = match self.rx.lock().await.take() {
            Some(rx) => rx,
            None => return,
        };

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                id = rx.recv() => {
                    match id {
                        Some(id) => self.process(id).await,
                        None => break,
                    }
                }
            }
        }
    }

    /// Run all stages for one job and move it to history
    async fn process(&self, nzb_id: NzbId) {
        let cancel = CancellationToken::new();
        {
            let mut registry = self
                .services
                .post_cancel
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            registry.insert(nzb_id, cancel.clone());
        }

        let started = Instant::now();
        self.run_stages(nzb_id, &cancel).await;

        {
            let mut registry = self
                .services
                .post_cancel
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            registry.remove(&nzb_id);
        }

        // finalize: stamp timers, announce the verdict, move to history
        let mut queue = self.queue.lock().await;
        let queue = &mut *queue;
        let (status_text, final_path) = match queue.find_nzb_mut(nzb_id) {
            Some(nzb) => {
                nzb.post_total_sec += started.elapsed().as_secs() as i64;
                nzb.post_processing = false;
                let path = if nzb.final_dir.as_os_str().is_empty() {
                    nzb.dest_dir.clone()
                } else {
                    nzb.final_dir.clone()
                };
                (nzb.make_text_status(false).to_string(), path)
            }
            None => return,
        };

        self.services.emit(QueueEvent::NzbCompleted {
            id: nzb_id,
            status: status_text,
            path: final_path,
        });

        history::add_to_history(&self.services, queue, nzb_id);
        dupe::nzb_completed(&self.services, queue, nzb_id);
        queue.history_changed();
    }

    async fn run_stages(&self, nzb_id: NzbId, cancel: &CancellationToken) {
        self.wait_for_direct_rename(nzb_id, cancel).await;

        let (dest_dir, name, password, direct_rename_ok, unpack_wanted) = {
            let mut queue = self.queue.lock().await;
            let nzb = match queue.find_nzb_mut(nzb_id) {
                Some(nzb) => nzb,
                None => return,
            };
            (
                nzb.dest_dir.clone(),
                nzb.name.clone(),
                nzb.parameters
                    .find("*Unpack:Password")
                    .map(|p| p.value.clone()),
                nzb.direct_rename_status == TaskStatus::Success,
                nzb.parameters
                    .find("*Unpack:")
                    .map(|p| p.value.eq_ignore_ascii_case("yes"))
                    .unwrap_or(self.services.config.unpack),
            )
        };

        // par-rename fallback covers what direct rename could not
        if !cancel.is_cancelled() {
            self.par_rename_stage(nzb_id, &dest_dir, direct_rename_ok, cancel)
                .await;
        }

        // par-check / repair
        if !cancel.is_cancelled() {
            let stage_start = Instant::now();
            let outcome = self
                .par_checker
                .check_and_repair(&dest_dir, cancel.clone())
                .await;
            let mut queue = self.queue.lock().await;
            if let Some(nzb) = queue.find_nzb_mut(nzb_id) {
                nzb.par_status = outcome.status;
                nzb.par_sec += stage_start.elapsed().as_secs() as i64;
                nzb.repair_sec += outcome.repair_sec;
            }
        }

        // unpack, unless the par stage already declared defeat
        let par_failed = {
            let queue = self.queue.lock().await;
            queue
                .find_nzb(nzb_id)
                .map(|nzb| nzb.par_status == ParStatus::Failure)
                .unwrap_or(true)
        };
        if !cancel.is_cancelled() && unpack_wanted && !par_failed {
            let stage_start = Instant::now();
            let outcome = self
                .unpacker
                .unpack(&dest_dir, password.as_deref(), cancel.clone())
                .await;
            let mut queue = self.queue.lock().await;
            if let Some(nzb) = queue.find_nzb_mut(nzb_id) {
                nzb.unpack_status = outcome.status;
                nzb.unpack_cleaned_up_disk = outcome.cleaned_up_disk;
                nzb.unpack_sec += stage_start.elapsed().as_secs() as i64;
            }
        }

        // move to the final directory when an intermediate dir is in use
        if !cancel.is_cancelled() && self.services.config.paths.inter_dir.is_some() {
            self.move_stage(nzb_id, &dest_dir).await;
        }

        // cleanup of helper files
        if !cancel.is_cancelled() && !self.services.config.ext_cleanup_disk.is_empty() {
            self.cleanup_stage(nzb_id).await;
        }

        // user scripts
        if !cancel.is_cancelled() {
            let statuses = self.scripts.run(&dest_dir, &name, cancel.clone()).await;
            if !statuses.is_empty() {
                let mut queue = self.queue.lock().await;
                if let Some(nzb) = queue.find_nzb_mut(nzb_id) {
                    for (script_name, status) in statuses {
                        nzb.script_statuses.0.push(crate::model::ScriptStatusEntry {
                            name: script_name,
                            status,
                        });
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            let mut queue = self.queue.lock().await;
            if let Some(nzb) = queue.find_nzb_mut(nzb_id) {
                nzb.add_message(
                    MessageKind::Warning,
                    "Post-processing cancelled".to_string(),
                );
            }
        }
    }

    /// Let a pending direct-rename loader settle before the stages run.
    ///
    /// A job whose fingerprints never completed can no longer finish the
    /// rename; its status flips to failure so the par-rename fallback
    /// takes over.
    async fn wait_for_direct_rename(&self, nzb_id: NzbId, cancel: &CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }

            let pending = {
                let mut queue = self.queue.lock().await;
                let nzb = match queue.find_nzb_mut(nzb_id) {
                    Some(nzb) => nzb,
                    None => return,
                };
                if nzb.direct_rename_status != TaskStatus::Running {
                    false
                } else if nzb.loading_par {
                    // the loader is parsing par files and will commit its
                    // result shortly
                    true
                } else {
                    nzb.direct_rename_status = TaskStatus::Failure;
                    false
                }
            };

            if !pending {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }

    async fn par_rename_stage(
        &self,
        nzb_id: NzbId,
        dest_dir: &Path,
        direct_rename_ok: bool,
        cancel: &CancellationToken,
    ) {
        if direct_rename_ok {
            let mut queue = self.queue.lock().await;
            if let Some(nzb) = queue.find_nzb_mut(nzb_id) {
                nzb.par_rename_status = PostRenameStatus::Skipped;
            }
            return;
        }

        let renamer = ParRenamer::new(dest_dir.to_path_buf(), false, cancel.clone());
        let result = tokio::task::spawn_blocking(move || renamer.run()).await;

        let mut queue = self.queue.lock().await;
        if let Some(nzb) = queue.find_nzb_mut(nzb_id) {
            match result {
                Ok(result) if result.renamed_count > 0 => {
                    let count = result.renamed_count;
                    nzb.par_rename_status = PostRenameStatus::Success;
                    nzb.add_message(
                        MessageKind::Info,
                        format!("Par-renamed {count} file(s)"),
                    );
                }
                Ok(_) => {
                    nzb.par_rename_status = PostRenameStatus::Nothing;
                }
                Err(_) => {
                    nzb.par_rename_status = PostRenameStatus::Nothing;
                }
            }
        }
    }

    async fn move_stage(&self, nzb_id: NzbId, dest_dir: &Path) {
        let final_dir = {
            let queue = self.queue.lock().await;
            match queue.find_nzb(nzb_id) {
                Some(nzb) => nzb.build_final_dir_name(&self.services.config),
                None => return,
            }
        };

        let status = match move_directory_content(dest_dir, &final_dir) {
            Ok(()) => {
                std::fs::remove_dir(dest_dir).ok();
                MoveStatus::Success
            }
            Err(e) => {
                tracing::error!(
                    from = %dest_dir.display(),
                    to = %final_dir.display(),
                    error = %e,
                    "could not move files to the final directory"
                );
                MoveStatus::Failure
            }
        };

        let mut queue = self.queue.lock().await;
        if let Some(nzb) = queue.find_nzb_mut(nzb_id) {
            nzb.move_status = status;
            if status == MoveStatus::Success {
                nzb.final_dir = final_dir.clone();
                nzb.dest_dir = final_dir;
            }
        }
    }

    async fn cleanup_stage(&self, nzb_id: NzbId) {
        let (dest_dir, eligible) = {
            let queue = self.queue.lock().await;
            match queue.find_nzb(nzb_id) {
                Some(nzb) => (
                    nzb.dest_dir.clone(),
                    nzb.par_status == ParStatus::Success
                        || nzb.par_status == ParStatus::RepairPossible
                        || nzb.unpack_status == UnpackStatus::Success,
                ),
                None => return,
            }
        };
        if !eligible {
            return;
        }

        let ext_list = self.services.config.ext_cleanup_disk.clone();
        let mut failed = false;
        let mut deleted = 0usize;
        if let Ok(entries) = std::fs::read_dir(&dest_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                let name = entry.file_name();
                let matched = name
                    .to_str()
                    .map(|name| utils::match_file_ext(name, &ext_list))
                    .unwrap_or(false);
                if matched && path.is_file() {
                    match std::fs::remove_file(&path) {
                        Ok(()) => deleted += 1,
                        Err(e) => {
                            tracing::error!(file = %path.display(), error = %e, "could not delete file");
                            failed = true;
                        }
                    }
                }
            }
        }

        let mut queue = self.queue.lock().await;
        if let Some(nzb) = queue.find_nzb_mut(nzb_id) {
            nzb.cleanup_status = if failed {
                CleanupStatus::Failure
            } else {
                CleanupStatus::Success
            };
            if deleted > 0 {
                nzb.cleanup_disk = true;
                nzb.add_message(
                    MessageKind::Info,
                    format!("Deleted {deleted} file(s) from the download directory"),
                );
            }
        }
    }
}

/// Move every entry of `from` into `to`, creating `to` as needed
fn move_directory_content(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)?.flatten() {
        let target: PathBuf = to.join(entry.file_name());
        std::fs::rename(entry.path(), target)?;
    }
    Ok(())
}
