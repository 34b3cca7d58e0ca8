//! Incoming-directory scanner.
//!
//! Watches the configured directory for `.nzb` files. A file is only
//! picked up once its size stayed stable for the configured age, so
//! half-copied files are left alone. Subdirectory names become (or extend)
//! the category. Scan scripts may rewrite a candidate before it is parsed;
//! processed sources are renamed to `*.queued` (or `*.error` on parse
//! failure). A filesystem watcher triggers scans between the interval
//! ticks, and `add_external_file` provides the synchronous intake path.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use notify::Watcher;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::model::{NzbParameterList, NzbInfo};
use crate::nzb;
use crate::queue::QueueCoordinator;
use crate::services::Services;
use crate::types::{AddStatus, DeleteStatus, DupeMode, NzbId};
use crate::utils;

/// Candidate properties of an incoming file; scan scripts may rewrite them
#[derive(Clone, Debug, Default)]
pub struct ScanCandidate {
    /// Override for the job name (empty keeps the filename-derived name)
    pub nzb_name: String,
    /// Category
    pub category: String,
    /// Scheduling priority
    pub priority: i32,
    /// Duplicate key
    pub dupe_key: String,
    /// Duplicate score
    pub dupe_score: i32,
    /// Duplicate mode
    pub dupe_mode: DupeMode,
    /// Post-processing parameters
    pub parameters: NzbParameterList,
    /// Insert at the top of the queue
    pub add_top: bool,
    /// Add with all files paused
    pub add_paused: bool,
}

/// External scan-script hook, invoked for every accepted file before
/// parsing. Implementations may rewrite the candidate or rename the file
/// on disk (a rename to `*.nzb_processed` is re-renamed to `*.nzb`).
#[async_trait]
pub trait ScanScript: Send + Sync {
    /// Inspect and possibly rewrite one candidate
    async fn scan(&self, path: &Path, candidate: &mut ScanCandidate);
}

/// Scan-script collaborator that changes nothing
pub struct NoOpScanScript;

#[async_trait]
impl ScanScript for NoOpScanScript {
    async fn scan(&self, _path: &Path, _candidate: &mut ScanCandidate) {}
}

/// Stability record of a file seen in the incoming directory
struct FileData {
    path: PathBuf,
    size: i64,
    last_change: i64,
}

/// An externally submitted file waiting for its scan verdict
struct QueueData {
    path: PathBuf,
    candidate: ScanCandidate,
    status_tx: Option<oneshot::Sender<(AddStatus, NzbId)>>,
}

#[derive(Default)]
struct ScannerState {
    file_list: Vec<FileData>,
    queue_list: Vec<QueueData>,
}

/// The incoming-directory scanner
pub struct Scanner {
    coordinator: Arc<QueueCoordinator>,
    services: Services,
    scan_script: Arc<dyn ScanScript>,
    state: Mutex<ScannerState>,
    scan_requested: Notify,
    shutdown: CancellationToken,
    temp_id_gen: AtomicI32,
}

impl Scanner {
    /// Create a scanner handing accepted jobs to the coordinator
    pub fn new(
        coordinator: Arc<QueueCoordinator>,
        services: Services,
        scan_script: Arc<dyn ScanScript>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            coordinator,
            services,
            scan_script,
            state: Mutex::new(ScannerState::default()),
            scan_requested: Notify::new(),
            shutdown,
            temp_id_gen: AtomicI32::new(0),
        }
    }

    /// Request an immediate scan (bypassing the size-stability gate)
    pub fn request_scan(&self) {
        self.scan_requested.notify_one();
    }

    /// The scanner loop: interval scans, watcher-triggered scans and
    /// requested scans until shutdown.
    pub async fn run(&self) {
        let nzb_dir = self.services.config.paths.nzb_dir.clone();
        if let Err(e) = std::fs::create_dir_all(&nzb_dir) {
            tracing::error!(dir = %nzb_dir.display(), error = %e, "could not create incoming directory");
        }

        // the watcher shortens the reaction time; the interval scan is the
        // reliable fallback
        let (watch_tx, mut watch_rx) = mpsc::unbounded_channel();
        let _watcher = match notify::recommended_watcher(move |result| {
            watch_tx.send(result).ok();
        }) {
            Ok(mut watcher) => {
                if let Err(e) = watcher.watch(&nzb_dir, notify::RecursiveMode::Recursive) {
                    tracing::warn!(error = %e, "could not watch incoming directory");
                }
                Some(watcher)
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not create filesystem watcher");
                None
            }
        };

        let mut tick = tokio::time::interval(self.services.config.scan.nzb_dir_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tick.tick() => {
                    self.scan(true).await;
                }
                _ = self.scan_requested.notified() => {
                    self.scan(false).await;
                }
                event = watch_rx.recv() => {
                    if let Some(Ok(event)) = event {
                        if matches!(
                            event.kind,
                            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
                        ) {
                            self.scan(true).await;
                        }
                    }
                }
            }
        }
    }

    /// One scan pass over the incoming directory tree
    pub async fn scan(&self, check_stat: bool) {
        let nzb_dir = self.services.config.paths.nzb_dir.clone();
        self.check_incoming_dir(&nzb_dir, "", check_stat).await;
        self.drop_old_files().await;

        // a requested scan processes everything, so leftover external
        // submissions were genuinely skipped; interval scans keep them
        // pending for the requested scan that follows
        if !check_stat {
            let mut state = self.state.lock().await;
            for mut queue_data in state.queue_list.drain(..) {
                if let Some(tx) = queue_data.status_tx.take() {
                    tx.send((AddStatus::Skipped, NzbId(0))).ok();
                }
            }
        }
    }

    fn check_incoming_dir<'a>(
        &'a self,
        dir: &'a Path,
        category: &'a str,
        check_stat: bool,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(_) => return,
            };

            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = match name.to_str() {
                    Some(name) => name,
                    None => continue,
                };
                if name.starts_with('.') {
                    continue;
                }

                let path = entry.path();
                if path.is_dir() {
                    // subdirectory names become (or extend) the category
                    let sub_category = if category.is_empty() {
                        name.to_string()
                    } else {
                        format!("{category}/{name}")
                    };
                    self.check_incoming_dir(&path, &sub_category, check_stat)
                        .await;
                } else if self.can_process_file(&path, check_stat).await {
                    self.process_incoming_file(&path, category).await;
                }
            }
        })
    }

    /// The size-stability gate.
    ///
    /// `.queued`, `.error` and `.processed` files are never processed.
    /// With `check_stat` a file is accepted only once its size stayed
    /// unchanged for the configured file age.
    async fn can_process_file(&self, path: &Path, check_stat: bool) -> bool {
        let extension = match path.extension().and_then(|e| e.to_str()) {
            Some(extension) => extension,
            None => return false,
        };
        if extension.eq_ignore_ascii_case("queued")
            || extension.eq_ignore_ascii_case("error")
            || extension.eq_ignore_ascii_case("processed")
        {
            return false;
        }

        if !check_stat {
            return true;
        }

        let size = std::fs::metadata(path).map(|m| m.len() as i64).unwrap_or(0);
        let now = utils::current_time();
        let file_age = self.services.config.scan.nzb_dir_file_age.as_secs() as i64;

        let mut state = self.state.lock().await;
        match state.file_list.iter_mut().position(|f| f.path == path) {
            Some(index) => {
                let accept = {
                    let data = &mut state.file_list[index];
                    if data.size != size {
                        data.size = size;
                        data.last_change = now;
                        false
                    } else {
                        now - data.last_change >= file_age
                    }
                };
                if accept {
                    state.file_list.remove(index);
                }
                accept
            }
            None => {
                state.file_list.push(FileData {
                    path: path.to_path_buf(),
                    size,
                    last_change: now,
                });
                false
            }
        }
    }

    /// Forget stability records of files that vanished without being
    /// processed
    async fn drop_old_files(&self) {
        let now = utils::current_time();
        let config = &self.services.config.scan;
        let limit = (config.nzb_dir_interval.as_secs() + config.nzb_dir_file_age.as_secs()) as i64 * 2;

        let mut state = self.state.lock().await;
        state.file_list.retain(|data| {
            let stale = now - data.last_change >= limit
                // can occur if the system clock was adjusted
                || now < data.last_change;
            if stale {
                tracing::debug!(file = %data.path.display(), "removing file from scan list");
            }
            !stale
        });
    }

    async fn process_incoming_file(&self, path: &Path, category: &str) {
        let extension = match path.extension().and_then(|e| e.to_str()) {
            Some(extension) => extension.to_ascii_lowercase(),
            None => return,
        };

        // take a matching external submission, falling back to defaults
        let (mut candidate, status_tx) = {
            let mut state = self.state.lock().await;
            match state.queue_list.iter().position(|q| q.path == path) {
                Some(index) => {
                    let mut queue_data = state.queue_list.remove(index);
                    (queue_data.candidate.clone(), queue_data.status_tx.take())
                }
                None => (
                    ScanCandidate {
                        category: category.to_string(),
                        ..Default::default()
                    },
                    None,
                ),
            }
        };

        let category_name = candidate.category.clone();
        init_pp_parameters(&self.services, &category_name, &mut candidate.parameters);

        let mut path = path.to_path_buf();
        if extension != "nzb_processed" {
            self.scan_script.scan(&path, &mut candidate).await;
            let exists = path.is_file();
            if exists && extension != "nzb" {
                // a non-nzb leftover of the scan script is set aside
                let processed = path.with_extension(format!("{extension}.processed"));
                if let Err(e) = std::fs::rename(&path, &processed) {
                    tracing::error!(file = %path.display(), error = %e, "could not rename file");
                }
                self.send_status(status_tx, AddStatus::Skipped, NzbId(0));
                return;
            }
            if !exists {
                self.send_status(status_tx, AddStatus::Skipped, NzbId(0));
                return;
            }
        } else {
            // a scan script produced this file; give it back its .nzb name
            let renamed = path.with_extension("nzb");
            match std::fs::rename(&path, &renamed) {
                Ok(()) => path = renamed,
                Err(e) => {
                    tracing::error!(file = %path.display(), error = %e, "could not rename file");
                    self.send_status(status_tx, AddStatus::Failed, NzbId(0));
                    return;
                }
            }
        }

        let (status, id) = self.add_file_to_queue(&path, &candidate).await;
        self.send_status(status_tx, status, id);
    }

    fn send_status(
        &self,
        status_tx: Option<oneshot::Sender<(AddStatus, NzbId)>>,
        status: AddStatus,
        id: NzbId,
    ) {
        if let Some(tx) = status_tx {
            tx.send((status, id)).ok();
        }
    }

    /// Parse one accepted file, rename the source and hand the job to the
    /// queue coordinator
    async fn add_file_to_queue(&self, path: &Path, candidate: &ScanCandidate) -> (AddStatus, NzbId) {
        let basename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_string();
        tracing::info!(collection = %basename, "adding collection to queue");

        let parsed = nzb::parse_nzb_file(path, &candidate.category, &self.services.config);
        let ok = parsed.is_ok();
        if let Err(e) = &parsed {
            tracing::error!(collection = %basename, error = %e, "could not add collection to queue");
        }

        // success renames to *.queued, failure to *.error
        let bak_name = PathBuf::from(format!(
            "{}.{}",
            path.display(),
            if ok { "queued" } else { "error" }
        ));
        let renamed = std::fs::rename(path, &bak_name).is_ok();
        if !renamed {
            tracing::error!(
                file = %path.display(),
                target = %bak_name.display(),
                "could not rename file"
            );
        }

        let mut nzb = match parsed {
            Ok(nzb) => nzb,
            Err(_) => {
                // the failed parse still leaves a history trace
                let mut nzb = NzbInfo::new();
                nzb.set_filename(&path.to_string_lossy());
                nzb.category = candidate.category.clone();
                nzb.delete_status = DeleteStatus::Scan;
                let id = self.coordinator.add_nzb_to_queue(nzb, false).await;
                return (AddStatus::Failed, id);
            }
        };
        if !renamed {
            return (AddStatus::Failed, NzbId(0));
        }

        nzb.queued_filename = bak_name.to_string_lossy().into_owned();

        if !candidate.nzb_name.is_empty() {
            nzb.name = utils::nice_nzb_name(&candidate.nzb_name);
        }
        nzb.dupe_key = candidate.dupe_key.clone();
        nzb.dupe_score = candidate.dupe_score;
        nzb.dupe_mode = candidate.dupe_mode;
        nzb.priority = candidate.priority;
        nzb.parameters.copy_from(&candidate.parameters);

        if candidate.add_paused {
            for file in &mut nzb.file_list {
                file.paused = true;
            }
            nzb.update_current_stats();
        }

        let id = self
            .coordinator
            .add_nzb_to_queue(nzb, candidate.add_top)
            .await;
        (AddStatus::Success, id)
    }

    /// Synchronous intake: place a buffer into the watched directory under
    /// a unique name, trigger a scan and wait for that file's verdict.
    pub async fn add_external_file(
        &self,
        nzb_name: &str,
        buffer: &[u8],
        candidate: ScanCandidate,
    ) -> (AddStatus, NzbId) {
        let temp_dir = self.services.config.paths.temp_dir.clone();
        if std::fs::create_dir_all(&temp_dir).is_err() {
            return (AddStatus::Failed, NzbId(0));
        }

        let num = self.temp_id_gen.fetch_add(1, Ordering::SeqCst) + 1;
        let temp_path = utils::unique_path(&temp_dir.join(format!("nzb-{num}.tmp")));
        if let Err(e) = std::fs::write(&temp_path, buffer) {
            tracing::error!(file = %temp_path.display(), error = %e, "could not create file");
            return (AddStatus::Failed, NzbId(0));
        }

        let looks_like_nzb = buffer.starts_with(b"<?xml")
            && buffer.windows(4).any(|window| window == b"<nzb");

        let mut valid_name = utils::make_valid_filename(utils::base_file_name(nzb_name));
        if looks_like_nzb && !utils::ends_with_ignore_case(&valid_name, ".nzb") {
            valid_name.push_str(".nzb");
        }

        let target = utils::unique_path(&self.services.config.paths.nzb_dir.join(&valid_name));
        if let Err(e) = std::fs::rename(&temp_path, &target) {
            tracing::error!(
                from = %temp_path.display(),
                to = %target.display(),
                error = %e,
                "could not move file"
            );
            std::fs::remove_file(&temp_path).ok();
            return (AddStatus::Failed, NzbId(0));
        }

        let (status_tx, status_rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            state.queue_list.push(QueueData {
                path: target,
                candidate,
                status_tx: Some(status_tx),
            });
        }

        self.request_scan();
        status_rx.await.unwrap_or((AddStatus::Failed, NzbId(0)))
    }
}

/// Seed the category-derived post-processing parameters.
///
/// The unpack decision comes from the category (falling back to the global
/// default); every script enabled for the category gets a `<name>:`
/// parameter unless the candidate already carries one.
fn init_pp_parameters(services: &Services, category: &str, parameters: &mut NzbParameterList) {
    let mut unpack = services.config.unpack;
    let mut extensions = services.config.extensions.clone();

    if !category.is_empty() {
        if let Some(category) = services.config.find_category(category) {
            unpack = category.unpack;
            if !category.extensions.is_empty() {
                extensions = category.extensions.clone();
            }
        }
    }

    if parameters.find("*Unpack:").is_none() {
        parameters.set_parameter("*Unpack:", if unpack { "yes" } else { "no" });
    }

    for script_name in utils::split_ext_list(&extensions) {
        let param_name = format!("{script_name}:");
        if parameters.find(&param_name).is_none() {
            parameters.set_parameter(&param_name, "yes");
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CategoryConfig, Config};

    fn services_with_config(config: Config) -> Services {
        let (events, _) = tokio::sync::broadcast::channel(16);
        let (post_tx, _post_rx) = mpsc::unbounded_channel();
        let dir = tempfile::tempdir().unwrap();
        let disk_state =
            Arc::new(crate::diskstate::DiskState::new(dir.path().join("queue")).unwrap());
        std::mem::forget(dir);
        Services {
            config: Arc::new(config),
            events,
            disk_state,
            post_tx,
            post_cancel: Arc::default(),
        }
    }

    #[test]
    fn init_pp_parameters_uses_category_settings() {
        let config = Config {
            unpack: true,
            extensions: "global-script".to_string(),
            categories: vec![CategoryConfig {
                name: "tv".to_string(),
                unpack: false,
                extensions: "rename,notify".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let services = services_with_config(config);

        let mut parameters = NzbParameterList::default();
        init_pp_parameters(&services, "tv", &mut parameters);

        assert_eq!(parameters.find("*Unpack:").unwrap().value, "no");
        assert_eq!(parameters.find("rename:").unwrap().value, "yes");
        assert_eq!(parameters.find("notify:").unwrap().value, "yes");
        assert!(parameters.find("global-script:").is_none());
    }

    #[test]
    fn init_pp_parameters_respects_existing_values() {
        let services = services_with_config(Config {
            unpack: true,
            ..Default::default()
        });

        let mut parameters = NzbParameterList::default();
        parameters.set_parameter("*Unpack:", "no");
        init_pp_parameters(&services, "", &mut parameters);

        assert_eq!(
            parameters.find("*Unpack:").unwrap().value,
            "no",
            "a parameter set by the submitter wins over the category default"
        );
    }
}
