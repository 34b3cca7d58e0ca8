//! The queue coordinator: select work, dispatch article fetches, collect
//! results, finalize files and jobs, persist progress.
//!
//! All state lives behind one `Arc<Mutex<DownloadQueue>>` — the queue
//! lock. The coordinator loop waits on a notifier signalled by article
//! completions, edits and stop; a once-per-second tick drives
//! hanging-download detection and the at-most-once-per-second flush of
//! changed state.

use std::collections::HashMap;
use std::io::{Seek, SeekFrom, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::dupe;
use crate::history;
use crate::model::{DownloadQueue, NzbInfo};
use crate::queue::editor;
use crate::rename::{DirectRenamer, RenameContentAnalyzer};
use crate::services::Services;
use crate::transport::{ArticleRequest, ArticleTransport, FetchOutcome};
use crate::types::{
    ArticleStatus, CompletedFileStatus, DeleteStatus, FileId, HealthCheckAction, MessageKind,
    NzbId, NzbKind, QueueEvent, TaskStatus,
};
use crate::utils;

/// Grace added on top of the article timeout before a download counts as
/// hanging
const HANGING_GRACE: Duration = Duration::from_secs(10);

/// One running article fetch
pub(crate) struct ActiveDownload {
    pub(crate) nzb_id: NzbId,
    pub(crate) cancel: CancellationToken,
    pub(crate) last_update: Instant,
}

/// Registry of running fetches, keyed by file id and part number
pub(crate) type ActiveMap = HashMap<(FileId, i32), ActiveDownload>;

/// A completion reported by a transport task
struct CompletionMsg {
    nzb_id: NzbId,
    file_id: FileId,
    part_number: i32,
    raw_size: i64,
    outcome: FetchOutcome,
}

/// The coordinator: owns scheduling, completion processing and the
/// persistence policy.
pub struct QueueCoordinator {
    queue: Arc<Mutex<DownloadQueue>>,
    services: Services,
    transport: Arc<dyn ArticleTransport>,
    renamer: DirectRenamer,
    notify: Arc<Notify>,
    shutdown: CancellationToken,
    paused: AtomicBool,
    active: Arc<StdMutex<ActiveMap>>,
    completion_tx: mpsc::UnboundedSender<CompletionMsg>,
    completion_rx: Mutex<Option<mpsc::UnboundedReceiver<CompletionMsg>>>,
}

impl QueueCoordinator {
    /// Create a coordinator over the shared queue
    pub fn new(
        queue: Arc<Mutex<DownloadQueue>>,
        services: Services,
        transport: Arc<dyn ArticleTransport>,
        shutdown: CancellationToken,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let renamer = DirectRenamer::new(
            queue.clone(),
            services.events.clone(),
            services.config.clone(),
        );
        Self {
            queue,
            services,
            transport,
            renamer,
            notify: Arc::new(Notify::new()),
            shutdown,
            paused: AtomicBool::new(false),
            active: Arc::new(StdMutex::new(ActiveMap::new())),
            completion_tx,
            completion_rx: Mutex::new(Some(completion_rx)),
        }
    }

    /// The shared queue lock
    pub fn queue(&self) -> Arc<Mutex<DownloadQueue>> {
        self.queue.clone()
    }

    /// Wake the scheduling loop after an external queue mutation
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Pause or resume global downloading. Jobs at or above the
    /// force-priority threshold keep downloading while paused.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Whether global downloading is paused
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// True while any unfinished work remains, post-processing included
    pub async fn has_more_jobs(&self) -> bool {
        let queue = self.queue.lock().await;
        queue.has_remaining_work() || queue.queue.iter().any(|nzb| nzb.post_processing)
    }

    /// Insert a fully-parsed job into the queue.
    ///
    /// The duplicate coordinator is consulted first; a candidate marked for
    /// deletion goes straight to history as a backup, and lower-scored
    /// queued duplicates are edited out.
    pub async fn add_nzb_to_queue(&self, mut nzb: NzbInfo, add_first: bool) -> NzbId {
        let mut queue = self.queue.lock().await;
        let queue = &mut *queue;

        nzb.id = queue.id_gen.next_nzb_id();
        for file in &mut nzb.file_list {
            file.id = queue.id_gen.next_file_id();
            file.nzb_id = nzb.id;
        }
        nzb.message_limit = self.services.config.download.log_buffer;
        nzb.build_dest_dir_name(&self.services.config);

        if self.services.config.download.direct_rename && nzb.kind == NzbKind::Nzb {
            nzb.direct_rename_status = TaskStatus::Running;
        }

        let id = nzb.id;
        let name = nzb.name.clone();
        self.services.emit(QueueEvent::NzbFound {
            id,
            name: name.clone(),
        });

        let decision = if self.services.config.duplicates.dupe_check
            && nzb.delete_status == DeleteStatus::None
        {
            dupe::nzb_found(&self.services, queue, &mut nzb)
        } else {
            Default::default()
        };

        for file in &nzb.file_list {
            if let Err(e) = self.services.disk_state.save_file(file) {
                tracing::error!(file_id = file.id.get(), error = %e, "could not save article list");
            }
        }

        let skipped = nzb.delete_status != DeleteStatus::None;
        queue.add_nzb(nzb, add_first);

        if skipped {
            // the duplicate check refused the candidate; it becomes a
            // history entry right away
            history::add_to_history(&self.services, queue, id);
            dupe::nzb_completed(&self.services, queue, id);
        } else {
            if let Some(index) = queue.find_nzb_index(id) {
                editor::pause_extra_pars_for_nzb(&mut queue.queue[index]);
            }
            self.services.emit(QueueEvent::NzbAdded { id, name });
        }

        // lower-scored queued duplicates leave the queue as backups
        for evict_id in decision.evict_from_queue {
            self.delete_group_inner(queue, evict_id, editor::EditAction::GroupDelete);
        }

        queue.queue_changed();
        self.notify.notify_one();
        id
    }

    /// Apply one edit to a single queue, post or history entry
    pub async fn edit_entry(&self, id: i32, action: editor::EditAction, args: &str) -> bool {
        self.edit_list(&[id], &[], editor::MatchMode::Ids, action, args)
            .await
    }

    /// Apply one edit to a list of entries addressed by id or name
    pub async fn edit_list(
        &self,
        ids: &[i32],
        names: &[String],
        match_mode: editor::MatchMode,
        action: editor::EditAction,
        args: &str,
    ) -> bool {
        let mut queue = self.queue.lock().await;
        let ok = editor::edit_list(self, &mut queue, ids, names, match_mode, action, args);
        drop(queue);
        self.notify.notify_one();
        ok
    }

    /// The shared service bundle
    pub(crate) fn services(&self) -> &Services {
        &self.services
    }

    /// The coordinator loop. Runs until the shutdown token fires.
    pub async fn run(&self) {
        let mut completion_rx = match self.completion_rx.lock().await.take() {
            Some(rx) => rx,
            None => return,
        };

        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_flush = Instant::now();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                completion = completion_rx.recv() => {
                    if let Some(completion) = completion {
                        self.article_completed(completion).await;
                    }
                }
                _ = self.notify.notified() => {}
                _ = tick.tick() => {
                    self.reset_hanging_downloads().await;
                    if last_flush.elapsed() >= self.services.config.persistence.flush_interval {
                        self.flush_if_changed().await;
                        last_flush = Instant::now();
                    }
                }
            }

            self.schedule().await;
        }

        // final flush so a clean shutdown leaves consistent state
        self.flush_if_changed().await;
        self.cancel_all_active();
    }

    /// Start article fetches until the connection limit is reached
    async fn schedule(&self) {
        loop {
            let active_count = self.active.lock().unwrap_or_else(|e| e.into_inner()).len();
            if active_count >= self.services.config.download.max_article_downloads {
                return;
            }

            let mut queue = self.queue.lock().await;
            let picked = self.get_next_article(&mut queue);
            let (nzb_id, file_id, part_number, request) = match picked {
                Some(parts) => parts,
                None => return,
            };

            // bookkeeping under the lock, before the fetch starts
            if let Some((nzb_index, file_index)) = queue
                .find_nzb_index(nzb_id)
                .and_then(|n| queue.queue[n].find_file(file_id).map(|f| (n, f)))
            {
                let nzb = &mut queue.queue[nzb_index];
                nzb.file_list[file_index].active_downloads += 1;
                let active = nzb.active_downloads + 1;
                nzb.set_active_downloads(active);
            }
            drop(queue);

            let cancel = request.cancel.clone();
            {
                let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
                active.insert(
                    (file_id, part_number),
                    ActiveDownload {
                        nzb_id,
                        cancel,
                        last_update: Instant::now(),
                    },
                );
            }

            let transport = self.transport.clone();
            let completion_tx = self.completion_tx.clone();
            let raw_size = request.expected_size;
            tokio::spawn(async move {
                let outcome = transport.fetch(request).await;
                completion_tx
                    .send(CompletionMsg {
                        nzb_id,
                        file_id,
                        part_number,
                        raw_size,
                        outcome,
                    })
                    .ok();
            });
        }
    }

    /// Choose the next article to fetch.
    ///
    /// Jobs are considered by priority descending then queue order; within
    /// a job the first-article pass runs while the direct renamer still
    /// needs fingerprints, then boosted files, then files and articles in
    /// order.
    fn get_next_article(
        &self,
        queue: &mut DownloadQueue,
    ) -> Option<(NzbId, FileId, i32, ArticleRequest)> {
        let paused = self.is_paused();
        let force_priority = self.services.config.download.force_priority;

        let mut order: Vec<usize> = (0..queue.queue.len()).collect();
        order.sort_by(|&a, &b| queue.queue[b].priority.cmp(&queue.queue[a].priority));

        for nzb_index in order {
            let nzb = &queue.queue[nzb_index];
            if nzb.deleting
                || nzb.health_paused
                || nzb.kind != NzbKind::Nzb
                || (paused && nzb.priority < force_priority)
            {
                continue;
            }

            // first-articles pass: fetch the first article of every file
            // still missing its fingerprint, pause state notwithstanding
            let direct_rename = self.services.config.download.direct_rename
                && nzb.direct_rename_status == TaskStatus::Running
                && !nzb.all_first;
            if direct_rename {
                let nzb = &mut queue.queue[nzb_index];
                let mut found = None;
                for (file_index, file) in nzb.file_list.iter().enumerate() {
                    if !file.deleted
                        && file.hash16k.is_none()
                        && !file.articles.is_empty()
                        && file.articles[0].status == ArticleStatus::Undefined
                        && !file
                            .articles
                            .iter()
                            .any(|a| a.status != ArticleStatus::Undefined)
                    {
                        found = Some(file_index);
                        break;
                    }
                }

                match found {
                    Some(file_index) => {
                        return Some(Self::make_request(nzb, file_index, 0));
                    }
                    None => {
                        queue.queue[nzb_index].all_first = true;
                    }
                }
            }

            let nzb = &mut queue.queue[nzb_index];

            // boosted par-index files jump the queue within the job
            if nzb.extra_priority_count > 0 {
                for file_index in 0..nzb.file_list.len() {
                    let file = &nzb.file_list[file_index];
                    if file.extra_priority && !file.paused && !file.deleted {
                        if let Some(article_index) = file.next_undefined_article() {
                            return Some(Self::make_request(nzb, file_index, article_index));
                        }
                    }
                }
            }

            for file_index in 0..nzb.file_list.len() {
                let file = &nzb.file_list[file_index];
                if file.paused || file.deleted {
                    continue;
                }
                if let Some(article_index) = file.next_undefined_article() {
                    return Some(Self::make_request(nzb, file_index, article_index));
                }
            }
        }

        None
    }

    fn make_request(
        nzb: &mut NzbInfo,
        file_index: usize,
        article_index: usize,
    ) -> (NzbId, FileId, i32, ArticleRequest) {
        let nzb_id = nzb.id;
        let file = &mut nzb.file_list[file_index];
        let file_id = file.id;
        let article = &mut file.articles[article_index];
        article.status = ArticleStatus::Running;

        let request = ArticleRequest {
            nzb_id,
            file_id,
            part_number: article.part_number,
            message_id: article.message_id.clone(),
            groups: Vec::new(),
            expected_size: article.size,
            cancel: CancellationToken::new(),
        };
        (nzb_id, file_id, article.part_number, request)
    }

    /// Process one completed article fetch: update counters, feed the
    /// analyzer, write the segment, finalize file and job when done.
    async fn article_completed(&self, completion: CompletionMsg) {
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.remove(&(completion.file_id, completion.part_number));
        }

        let mut queue = self.queue.lock().await;
        let queue = &mut *queue;

        let (nzb_index, file_index) = match queue
            .find_nzb_index(completion.nzb_id)
            .and_then(|n| queue.queue[n].find_file(completion.file_id).map(|f| (n, f)))
        {
            Some(indices) => indices,
            None => return,
        };

        let first_article;
        let file_done;
        {
            let nzb = &mut queue.queue[nzb_index];
            let article_index = match nzb.file_list[file_index]
                .articles
                .iter()
                .position(|a| a.part_number == completion.part_number)
            {
                Some(index) => index,
                None => return,
            };
            first_article = article_index == 0;

            let article_size = nzb.file_list[file_index].articles[article_index].size;
            let was_paused = nzb.file_list[file_index].paused;
            let is_par = nzb.file_list[file_index].par_file;

            {
                let file = &mut nzb.file_list[file_index];
                file.completed_articles += 1;
                file.remaining_size -= article_size;
            }
            if was_paused {
                nzb.paused_size -= article_size;
            }

            match &completion.outcome {
                FetchOutcome::Finished(body) => {
                    {
                        let file = &mut nzb.file_list[file_index];
                        let article = &mut file.articles[article_index];
                        article.status = ArticleStatus::Finished;
                        article.crc = body.crc;
                        article.segment_offset = body.offset;
                        article.segment_size = body.data.len() as i32;

                        file.success_articles += 1;
                        file.success_size += article_size;
                        file.server_stats
                            .stat_op(body.server_id, 1, 0, crate::model::StatOp::Add);
                    }

                    nzb.current_success_articles += 1;
                    nzb.current_success_size += article_size;
                    if is_par {
                        nzb.par_current_success_size += article_size;
                    }
                    nzb.downloaded_size += completion.raw_size;
                }
                FetchOutcome::Failed { server_id, reason } => {
                    {
                        let file = &mut nzb.file_list[file_index];
                        file.articles[article_index].status = ArticleStatus::Failed;
                        file.failed_articles += 1;
                        file.failed_size += article_size;
                        file.server_stats
                            .stat_op(*server_id, 0, 1, crate::model::StatOp::Add);
                    }

                    nzb.current_failed_articles += 1;
                    nzb.current_failed_size += article_size;
                    if is_par {
                        nzb.par_current_failed_size += article_size;
                    }

                    let filename = nzb.file_list[file_index].filename.clone();
                    let part = completion.part_number;
                    let reason = reason.clone();
                    nzb.add_message(
                        MessageKind::Warning,
                        format!("Download of article {part} for {filename} failed: {reason}"),
                    );
                }
            }

            // write the decoded segment to the output file
            if let FetchOutcome::Finished(body) = &completion.outcome {
                let dest_dir = nzb.dest_dir.clone();
                let output = {
                    let file = &mut nzb.file_list[file_index];
                    if file.output_filename.is_none() {
                        let output = dest_dir.join(format!("{}.out.tmp", file.filename));
                        file.output_filename = Some(output.to_string_lossy().into_owned());
                    }
                    file.output_filename.clone().unwrap_or_default()
                };
                if let Err(e) = write_segment(&dest_dir, &output, body.offset, &body.data) {
                    let filename = nzb.file_list[file_index].filename.clone();
                    nzb.add_message(
                        MessageKind::Error,
                        format!("Could not write segment of {filename}: {e}"),
                    );
                    nzb.file_list[file_index].partial_state = crate::types::PartialState::Partial;
                } else {
                    nzb.file_list[file_index].output_initialized = true;
                }
            }

            file_done = {
                let file = &mut nzb.file_list[file_index];
                file.active_downloads = file.active_downloads.saturating_sub(1);
                file.active_downloads == 0 && file.no_more_articles()
            };
            let active = (nzb.active_downloads - 1).max(0);
            nzb.set_active_downloads(active);
        }

        // first-article fingerprint for the direct renamer
        if first_article && self.services.config.download.direct_rename {
            if let FetchOutcome::Finished(body) = &completion.outcome {
                if queue.queue[nzb_index].direct_rename_status == TaskStatus::Running {
                    let mut analyzer = RenameContentAnalyzer::new();
                    analyzer.append(&body.data);
                    let fingerprint = analyzer.finish();
                    self.renamer.article_downloaded(
                        queue,
                        nzb_index,
                        file_index,
                        completion.raw_size,
                        &fingerprint,
                    );
                }
            }
        }

        if matches!(completion.outcome, FetchOutcome::Failed { .. }) {
            self.check_health(queue, nzb_index);
        }

        if file_done {
            self.finalize_file(queue, nzb_index, file_index);
        }

        self.check_job_completed(queue, completion.nzb_id);

        queue.queue_changed();
        self.notify.notify_one();
    }

    /// Convert a finished file into a completed record and emit the aspect
    fn finalize_file(&self, queue: &mut DownloadQueue, nzb_index: usize, file_index: usize) {
        let nzb = &mut queue.queue[nzb_index];
        let file = nzb.file_list.remove(file_index);
        let nzb_id = nzb.id;

        if file.deleted {
            nzb.update_deleted_stats(&file);
            self.services
                .disk_state
                .discard_file(file.id, true, true);
            if let Some(output) = &file.output_filename {
                std::fs::remove_file(output).ok();
            }
            self.services.emit(QueueEvent::FileDeleted {
                id: nzb_id,
                file_id: file.id,
            });
            return;
        }

        let status = if file.failed_size == 0 && file.missed_size == 0 {
            CompletedFileStatus::Success
        } else if file.success_size > 0 {
            CompletedFileStatus::Partial
        } else {
            CompletedFileStatus::Failure
        };

        // move the temp output to its final name
        if file.output_initialized {
            if let Some(output) = &file.output_filename {
                let target = nzb.dest_dir.join(&file.filename);
                if let Err(e) =
                    utils::move_file_no_replace(std::path::Path::new(output), &target)
                {
                    let filename = file.filename.clone();
                    nzb.add_message(
                        MessageKind::Error,
                        format!("Could not finalize output of {filename}: {e}"),
                    );
                }
            }
        }

        nzb.update_completed_stats(&file);
        nzb.completed_files.push(file.to_completed(status));

        // keep retry material for anything not fully successful
        if status != CompletedFileStatus::Success {
            self.services
                .disk_state
                .save_file_state(&file, status == CompletedFileStatus::Partial)
                .ok();
        } else {
            self.services.disk_state.discard_file(file.id, false, true);
        }

        let filename = file.filename.clone();
        self.services.emit(QueueEvent::FileCompleted {
            id: nzb_id,
            file_id: file.id,
            filename,
        });

        self.renamer.file_downloaded(queue, nzb_id);
    }

    /// Hand a fully-terminated job to post-processing or finalize its
    /// deletion
    fn check_job_completed(&self, queue: &mut DownloadQueue, nzb_id: NzbId) {
        let (deleting, active_downloads, post_processing, completed) = match queue.find_nzb(nzb_id)
        {
            // paused par files do not block completion; they were held
            // back on purpose and the par stage decides whether to fetch
            // them
            Some(nzb) => (
                nzb.deleting,
                nzb.active_downloads,
                nzb.post_processing,
                nzb.is_download_completed(true),
            ),
            None => return,
        };

        if deleting && active_downloads == 0 {
            self.finalize_deleted_job(queue, nzb_id);
            return;
        }

        if post_processing || active_downloads > 0 || !completed {
            return;
        }

        if let Some(nzb) = queue.find_nzb_mut(nzb_id) {
            nzb.post_processing = true;
        }
        self.services.emit(QueueEvent::NzbDownloaded { id: nzb_id });
        self.services.enqueue_post(nzb_id);
    }

    /// Move a deleted job to history (or drop it outright) once its last
    /// download reported in
    pub(crate) fn finalize_deleted_job(&self, queue: &mut DownloadQueue, nzb_id: NzbId) {
        let avoid_history = match queue.find_nzb(nzb_id) {
            Some(nzb) => nzb.avoid_history,
            None => return,
        };

        if let Some(nzb) = queue.find_nzb_mut(nzb_id) {
            if nzb.cleanup_disk {
                let dest_dir = nzb.dest_dir.clone();
                if dest_dir.is_dir() {
                    if let Err(e) = std::fs::remove_dir_all(&dest_dir) {
                        tracing::error!(
                            dir = %dest_dir.display(),
                            error = %e,
                            "could not delete download directory"
                        );
                    }
                }
            }
        }

        if avoid_history {
            if let Some(mut nzb) = queue.remove_nzb(nzb_id) {
                history::delete_disk_files(&self.services, &mut nzb);
            }
        } else {
            history::add_to_history(&self.services, queue, nzb_id);
            dupe::nzb_completed(&self.services, queue, nzb_id);
        }

        self.services.emit(QueueEvent::NzbDeleted { id: nzb_id });
        queue.queue_changed();
    }

    /// Pause or delete a job whose health dropped below critical
    fn check_health(&self, queue: &mut DownloadQueue, nzb_index: usize) {
        let action = self.services.config.download.health_check;
        if action == HealthCheckAction::None {
            return;
        }

        let (id, no_active) = {
            let nzb = &mut queue.queue[nzb_index];
            if nzb.health_paused
                || nzb.deleting
                || nzb.calc_health() >= nzb.calc_critical_health(true)
            {
                return;
            }
            let id = nzb.id;
            let name = nzb.name.clone();

            match action {
                HealthCheckAction::Pause => {
                    nzb.add_message(
                        MessageKind::Warning,
                        format!("Pausing {name} due to health of the collection"),
                    );
                    nzb.health_paused = true;
                    for file_index in 0..nzb.file_list.len() {
                        nzb.set_file_paused(file_index, true);
                    }
                    return;
                }
                HealthCheckAction::Delete | HealthCheckAction::Park => {
                    nzb.add_message(
                        MessageKind::Warning,
                        format!(
                            "Cancelling download and deleting {name} due to health of the collection"
                        ),
                    );
                    nzb.delete_status = DeleteStatus::Health;
                    nzb.deleting = true;
                    nzb.parking = action == HealthCheckAction::Park;
                    nzb.cleanup_disk = action != HealthCheckAction::Park;
                }
                HealthCheckAction::None => return,
            }

            (id, nzb.active_downloads == 0)
        };

        self.cancel_job_downloads(id);
        if no_active {
            self.finalize_deleted_job(queue, id);
        }
    }

    /// Cancel downloads stuck past the article timeout plus grace.
    ///
    /// The transport is asked to stop; its eventual completion arrives as
    /// a failure and is processed normally.
    async fn reset_hanging_downloads(&self) {
        let timeout = self.services.config.download.article_timeout + HANGING_GRACE;
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        for ((file_id, part_number), download) in active.iter() {
            if download.last_update.elapsed() > timeout && !download.cancel.is_cancelled() {
                tracing::warn!(
                    file_id = file_id.get(),
                    part = part_number,
                    "cancelling hanging download"
                );
                download.cancel.cancel();
            }
        }
    }

    /// Cancel every running fetch of one job
    pub(crate) fn cancel_job_downloads(&self, nzb_id: NzbId) {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        for download in active.values() {
            if download.nzb_id == nzb_id {
                download.cancel.cancel();
            }
        }
    }

    fn cancel_all_active(&self) {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        for download in active.values() {
            download.cancel.cancel();
        }
    }

    /// Flush changed queue state: snapshot under the lock, write without it
    async fn flush_if_changed(&self) {
        let snapshot = {
            let mut queue = self.queue.lock().await;
            if !queue.queue_changed && !queue.history_changed {
                return;
            }
            queue.queue_changed = false;
            queue.history_changed = false;
            crate::diskstate::DiskState::serialize_queue(&queue)
        };

        if let Err(e) = self.services.disk_state.write_queue_data(&snapshot) {
            // retried on the next tick; the dirty flag is re-armed
            tracing::error!(error = %e, "could not save queue state");
            let mut queue = self.queue.lock().await;
            queue.queue_changed = true;
        }
    }

    /// Delete one file from the queue, cancelling its running fetches
    pub(crate) fn delete_queue_entry(
        &self,
        queue: &mut DownloadQueue,
        nzb_index: usize,
        file_index: usize,
    ) {
        let nzb = &mut queue.queue[nzb_index];
        let file_id = nzb.file_list[file_index].id;
        let nzb_id = nzb.id;
        nzb.file_list[file_index].deleted = true;
        if nzb.file_list[file_index].paused {
            nzb.set_file_paused(file_index, false);
        }

        let has_active = nzb.file_list[file_index].active_downloads > 0;
        if has_active {
            // the completion path finalizes the file once the last fetch
            // reports in
            let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            for ((active_file, _), download) in active.iter() {
                if *active_file == file_id {
                    download.cancel.cancel();
                }
            }
        } else {
            self.finalize_file(queue, nzb_index, file_index);
            self.check_job_completed(queue, nzb_id);
        }
        queue.queue_changed();
    }

    /// Editor entry: delete a whole group with the chosen flavor
    pub(crate) fn delete_group_inner(
        &self,
        queue: &mut DownloadQueue,
        nzb_id: NzbId,
        action: editor::EditAction,
    ) {
        let nzb_index = match queue.find_nzb_index(nzb_id) {
            Some(index) => index,
            None => return,
        };

        let keep_history = self.services.config.duplicates.keep_history_days > 0;
        {
            let nzb = &mut queue.queue[nzb_index];
            let all_paused =
                !nzb.file_list.is_empty() && nzb.file_list.iter().all(|f| f.paused);
            nzb.deleting = true;
            nzb.parking = action == editor::EditAction::GroupParkDelete
                && keep_history
                && !nzb.unpack_cleaned_up_disk
                && nzb.current_success_articles > 0;
            nzb.avoid_history = action == editor::EditAction::GroupFinalDelete;
            nzb.delete_paused = all_paused;
            if action == editor::EditAction::GroupDupeDelete {
                nzb.delete_status = DeleteStatus::Dupe;
            }
            nzb.cleanup_disk = action != editor::EditAction::GroupParkDelete;
        }

        self.cancel_job_downloads(nzb_id);

        let no_active = queue.queue[nzb_index].active_downloads == 0;
        if no_active {
            self.finalize_deleted_job(queue, nzb_id);
        }
    }

    /// Merge `src` into `dst`: files, completed records and aggregates
    pub async fn merge_queue_entries(&self, dst_id: NzbId, src_id: NzbId) -> bool {
        let mut queue = self.queue.lock().await;
        let ok = self.merge_inner(&mut queue, dst_id, src_id);
        drop(queue);
        self.notify.notify_one();
        ok
    }

    pub(crate) fn merge_inner(
        &self,
        queue: &mut DownloadQueue,
        dst_id: NzbId,
        src_id: NzbId,
    ) -> bool {
        if dst_id == src_id || queue.find_nzb_index(dst_id).is_none() {
            return false;
        }
        let mut src = match queue.remove_nzb(src_id) {
            Some(src) => src,
            None => return false,
        };
        let dst = match queue.find_nzb_mut(dst_id) {
            Some(dst) => dst,
            None => return false,
        };

        for mut file in src.file_list.drain(..) {
            file.nzb_id = dst.id;
            dst.file_list.push(file);
        }
        dst.completed_files.append(&mut src.completed_files);

        dst.file_count += src.file_count;
        dst.total_articles += src.total_articles;
        dst.success_articles += src.success_articles;
        dst.failed_articles += src.failed_articles;
        dst.size += src.size;
        dst.success_size += src.success_size;
        dst.failed_size += src.failed_size;
        dst.par_size += src.par_size;
        dst.par_success_size += src.par_success_size;
        dst.par_failed_size += src.par_failed_size;
        dst.downloaded_size += src.downloaded_size;

        if !src.queued_filename.is_empty() {
            if dst.queued_filename.is_empty() {
                dst.queued_filename = src.queued_filename.clone();
            } else {
                dst.queued_filename = format!("{}|{}", dst.queued_filename, src.queued_filename);
            }
        }

        dst.update_current_stats();
        dst.update_min_max_time();

        let name = dst.name.clone();
        dst.add_message(MessageKind::Info, format!("Collection merged into {name}"));
        queue.queue_changed();
        true
    }

    /// Split files out of their job into a new one named `name`
    pub async fn split_queue_entries(&self, file_ids: &[FileId], name: &str) -> Option<NzbId> {
        let mut queue = self.queue.lock().await;
        let new_id = self.split_inner(&mut queue, file_ids, name);
        drop(queue);
        self.notify.notify_one();
        new_id
    }

    pub(crate) fn split_inner(
        &self,
        queue: &mut DownloadQueue,
        file_ids: &[FileId],
        name: &str,
    ) -> Option<NzbId> {
        let (nzb_index, _) = queue.find_file(*file_ids.first()?)?;
        let src_id = queue.queue[nzb_index].id;

        let mut new_nzb = NzbInfo::new();
        new_nzb.id = queue.id_gen.next_nzb_id();
        new_nzb.name = name.to_string();
        new_nzb.message_limit = self.services.config.download.log_buffer;
        {
            let src = &queue.queue[nzb_index];
            new_nzb.kind = src.kind;
            new_nzb.filename = src.filename.clone();
            new_nzb.queued_filename = src.queued_filename.clone();
            new_nzb.category = src.category.clone();
            new_nzb.priority = src.priority;
            new_nzb.dupe_mode = src.dupe_mode;
            new_nzb.parameters = src.parameters.clone();
        }
        new_nzb.build_dest_dir_name(&self.services.config);

        for file_id in file_ids {
            let src = &mut queue.queue[nzb_index];
            let file_index = match src.find_file(*file_id) {
                Some(index) => index,
                None => continue,
            };
            // files in progress cannot move between jobs
            if src.file_list[file_index].active_downloads > 0 {
                continue;
            }

            let mut file = src.file_list.remove(file_index);
            src.update_deleted_stats(&file);

            file.nzb_id = new_nzb.id;
            new_nzb.file_count += 1;
            new_nzb.total_articles += file.total_articles;
            new_nzb.size += file.size;
            new_nzb.failed_size += file.missed_size;
            new_nzb.failed_articles += file.missed_articles;
            if file.par_file {
                new_nzb.par_size += file.size;
                new_nzb.par_failed_size += file.missed_size;
            }
            new_nzb.file_list.push(file);
        }

        if new_nzb.file_list.is_empty() {
            return None;
        }

        new_nzb.update_current_stats();
        new_nzb.update_min_max_time();
        queue.queue[nzb_index].update_min_max_time();

        let new_id = new_nzb.id;
        let insert_at = queue.find_nzb_index(src_id).map(|i| i + 1).unwrap_or(0);
        queue.queue.insert(insert_at, new_nzb);
        queue.queue_changed();

        self.services.emit(QueueEvent::NzbAdded {
            id: new_id,
            name: name.to_string(),
        });
        self.notify.notify_one();
        Some(new_id)
    }

    /// Change a job's category and rebuild its destination when nothing
    /// was downloaded yet
    pub(crate) fn set_queue_entry_category(
        &self,
        queue: &mut DownloadQueue,
        nzb_index: usize,
        category: &str,
    ) {
        let nzb = &mut queue.queue[nzb_index];
        nzb.category = category.to_string();
        if nzb.success_articles == 0 && nzb.completed_files.is_empty() {
            nzb.build_dest_dir_name(&self.services.config);
        }
        queue.queue_changed();
    }

    /// Rename a job and rebuild its destination when nothing was
    /// downloaded yet
    pub(crate) fn set_queue_entry_name(
        &self,
        queue: &mut DownloadQueue,
        nzb_index: usize,
        name: &str,
    ) {
        let nzb = &mut queue.queue[nzb_index];
        nzb.name = utils::make_valid_filename(name);
        if nzb.success_articles == 0 && nzb.completed_files.is_empty() {
            nzb.build_dest_dir_name(&self.services.config);
        }
        let id = nzb.id;
        let name = nzb.name.clone();
        queue.queue_changed();
        self.services.emit(QueueEvent::NzbNamed { id, name });
    }

}

/// Write one decoded segment at its offset within the output file
fn write_segment(
    dest_dir: &std::path::Path,
    output: &str,
    offset: i64,
    data: &[u8],
) -> std::io::Result<()> {
    std::fs::create_dir_all(dest_dir)?;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(output)?;
    file.seek(SeekFrom::Start(offset.max(0) as u64))?;
    file.write_all(data)?;
    Ok(())
}
