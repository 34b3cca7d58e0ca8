//! The job: one NZB collection with its files, counters and status vector

use std::collections::VecDeque;
use std::path::PathBuf;

use crate::config::Config;
use crate::model::file::{CompletedFile, FileInfo};
use crate::model::stats::{NzbParameterList, ScriptStatusList, ServerStatList, StatOp};
use crate::types::{
    CleanupStatus, DeleteStatus, DupeHint, DupeMode, MarkStatus, Message, MessageKind, MoveStatus,
    NzbId, NzbKind, ParStatus, PostRenameStatus, ScriptStatus, TaskStatus, UnpackStatus, UrlStatus,
};
use crate::utils;

/// A download job: an NZB collection owning its files.
///
/// All aggregate counters come in two flavors. The plain counters
/// (`success_size`, `failed_articles`, ...) account only for files that
/// already completed; the `current_*` counters additionally include the
/// progress of live files and are recomputed on demand, never trusted from
/// persistence.
#[derive(Clone, Debug)]
pub struct NzbInfo {
    /// Job id, assigned when the job enters the queue
    pub id: NzbId,
    /// Nzb or Url; a Url job becomes Nzb once its NZB was fetched
    pub kind: NzbKind,
    /// Source URL for Url jobs
    pub url: String,
    /// Source NZB filename as submitted
    pub filename: String,
    /// Path of the renamed `*.queued` source file, used for redownload
    pub queued_filename: String,
    /// Display name
    pub name: String,
    /// Directory articles are written into
    pub dest_dir: PathBuf,
    /// Directory the finished job is moved to
    pub final_dir: PathBuf,
    /// Category name
    pub category: String,
    /// Feed id when the job came from a feed, 0 otherwise
    pub feed_id: i32,
    /// Scheduling priority; higher downloads first
    pub priority: i32,

    /// Total number of files at parse time (including completed)
    pub file_count: i32,
    /// Currently paused live files
    pub paused_file_count: i32,
    /// Live (not deleted) par files
    pub remaining_par_count: i32,
    /// Files parked in history that can be retried
    pub parked_file_count: i32,
    /// Running article fetches across all files
    pub active_downloads: i32,
    /// Live files carrying the extra-priority boost
    pub extra_priority_count: i32,

    /// Total articles in the job
    pub total_articles: i32,
    /// Successful articles of completed files
    pub success_articles: i32,
    /// Failed articles of completed files
    pub failed_articles: i32,
    /// Successful articles including live files (recomputed)
    pub current_success_articles: i32,
    /// Failed articles including live files (recomputed)
    pub current_failed_articles: i32,

    /// Total size of all files
    pub size: i64,
    /// Bytes not yet downloaded
    pub remaining_size: i64,
    /// Remaining bytes of paused files
    pub paused_size: i64,
    /// Successful bytes of completed files
    pub success_size: i64,
    /// Failed bytes of completed files
    pub failed_size: i64,
    /// Successful bytes including live files (recomputed)
    pub current_success_size: i64,
    /// Failed bytes including live files (recomputed)
    pub current_failed_size: i64,

    /// Total size of par files
    pub par_size: i64,
    /// Successful par bytes of completed files
    pub par_success_size: i64,
    /// Failed par bytes of completed files
    pub par_failed_size: i64,
    /// Successful par bytes including live files (recomputed)
    pub par_current_success_size: i64,
    /// Failed par bytes including live files (recomputed)
    pub par_current_failed_size: i64,

    /// Content fingerprint over all article message-ids
    pub full_content_hash: u32,
    /// Content fingerprint excluding par and ignorable files
    pub filtered_content_hash: u32,
    /// Duplicate key; empty means "match by name"
    pub dupe_key: String,
    /// Duplicate preference; higher wins in score mode
    pub dupe_score: i32,
    /// Duplicate resolution mode
    pub dupe_mode: DupeMode,
    /// Set when the job re-entered the queue through redownload
    pub dupe_hint: DupeHint,

    /// Par-check outcome
    pub par_status: ParStatus,
    /// Unpack outcome
    pub unpack_status: UnpackStatus,
    /// Move-to-final-dir outcome
    pub move_status: MoveStatus,
    /// Cleanup outcome
    pub cleanup_status: CleanupStatus,
    /// Why the job was deleted, if it was
    pub delete_status: DeleteStatus,
    /// User verdict from history
    pub mark_status: MarkStatus,
    /// URL-fetch progress for Url jobs
    pub url_status: UrlStatus,
    /// In-flight rename progress
    pub direct_rename_status: TaskStatus,
    /// Post-download par-rename outcome
    pub par_rename_status: PostRenameStatus,
    /// Post-download rar-rename outcome
    pub rar_rename_status: PostRenameStatus,
    /// Unpack-during-download progress
    pub direct_unpack_status: TaskStatus,

    /// Delete requested; active fetches are being cancelled
    pub deleting: bool,
    /// Keep completed files on disk when moving to history
    pub parking: bool,
    /// Delete without creating a history entry
    pub avoid_history: bool,
    /// Paused automatically because health dropped below critical
    pub health_paused: bool,
    /// All files were paused when the job was dupe-deleted
    pub delete_paused: bool,
    /// Remove downloaded files from disk after the delete
    pub cleanup_disk: bool,
    /// Unpack already removed the downloaded archives from disk
    pub unpack_cleaned_up_disk: bool,
    /// First articles of all files were scheduled
    pub all_first: bool,
    /// Direct rename is waiting for the boosted par files
    pub waiting_par: bool,
    /// Direct rename is parsing the downloaded par files
    pub loading_par: bool,
    /// Subject parsing produced mostly duplicate names
    pub many_dupe_files: bool,
    /// The job is in the post-processing pipeline
    pub post_processing: bool,
    /// Restart post-processing after returning from history
    pub reprocess: bool,
    /// Dirty flag for the persistence layer
    pub changed: bool,

    /// Oldest article post time
    pub min_time: i64,
    /// Newest article post time
    pub max_time: i64,
    /// Wall clock when the current download burst started, 0 when idle
    pub download_start_time: i64,
    /// Accumulated download seconds
    pub download_sec: i64,
    /// download_sec value when the current burst started
    download_start_sec: i64,
    /// Total bytes handed to the writer
    pub downloaded_size: i64,
    /// Total post-processing seconds
    pub post_total_sec: i64,
    /// Par-check seconds
    pub par_sec: i64,
    /// Repair seconds
    pub repair_sec: i64,
    /// Unpack seconds
    pub unpack_sec: i64,

    /// Live files in download order
    pub file_list: Vec<FileInfo>,
    /// Completed and parked files
    pub completed_files: Vec<CompletedFile>,
    /// Post-processing parameters
    pub parameters: NzbParameterList,
    /// Script outcomes
    pub script_statuses: ScriptStatusList,
    /// Per-server counts over completed files
    pub server_stats: ServerStatList,
    /// Per-server counts including live files (recomputed)
    pub current_server_stats: ServerStatList,

    /// Bounded message ring
    pub messages: VecDeque<Message>,
    /// Ring capacity, from the log-buffer setting
    pub message_limit: usize,
    message_id_gen: u32,
}

impl Default for NzbInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl NzbInfo {
    /// Create an empty job; the parser fills files and counters
    pub fn new() -> Self {
        Self {
            id: NzbId(0),
            kind: NzbKind::Nzb,
            url: String::new(),
            filename: String::new(),
            queued_filename: String::new(),
            name: String::new(),
            dest_dir: PathBuf::new(),
            final_dir: PathBuf::new(),
            category: String::new(),
            feed_id: 0,
            priority: 0,
            file_count: 0,
            paused_file_count: 0,
            remaining_par_count: 0,
            parked_file_count: 0,
            active_downloads: 0,
            extra_priority_count: 0,
            total_articles: 0,
            success_articles: 0,
            failed_articles: 0,
            current_success_articles: 0,
            current_failed_articles: 0,
            size: 0,
            remaining_size: 0,
            paused_size: 0,
            success_size: 0,
            failed_size: 0,
            current_success_size: 0,
            current_failed_size: 0,
            par_size: 0,
            par_success_size: 0,
            par_failed_size: 0,
            par_current_success_size: 0,
            par_current_failed_size: 0,
            full_content_hash: 0,
            filtered_content_hash: 0,
            dupe_key: String::new(),
            dupe_score: 0,
            dupe_mode: DupeMode::Score,
            dupe_hint: DupeHint::None,
            par_status: ParStatus::None,
            unpack_status: UnpackStatus::None,
            move_status: MoveStatus::None,
            cleanup_status: CleanupStatus::None,
            delete_status: DeleteStatus::None,
            mark_status: MarkStatus::None,
            url_status: UrlStatus::None,
            direct_rename_status: TaskStatus::None,
            par_rename_status: PostRenameStatus::None,
            rar_rename_status: PostRenameStatus::None,
            direct_unpack_status: TaskStatus::None,
            deleting: false,
            parking: false,
            avoid_history: false,
            health_paused: false,
            delete_paused: false,
            cleanup_disk: false,
            unpack_cleaned_up_disk: false,
            all_first: false,
            waiting_par: false,
            loading_par: false,
            many_dupe_files: false,
            post_processing: false,
            reprocess: false,
            changed: false,
            min_time: 0,
            max_time: 0,
            download_start_time: 0,
            download_sec: 0,
            download_start_sec: 0,
            downloaded_size: 0,
            post_total_sec: 0,
            par_sec: 0,
            repair_sec: 0,
            unpack_sec: 0,
            file_list: Vec::new(),
            completed_files: Vec::new(),
            parameters: NzbParameterList::default(),
            script_statuses: ScriptStatusList::default(),
            server_stats: ServerStatList::default(),
            current_server_stats: ServerStatList::default(),
            messages: VecDeque::new(),
            message_limit: 100,
            message_id_gen: 0,
        }
    }

    /// Derive the display name from the source filename when none is set
    pub fn set_filename(&mut self, filename: &str) {
        let had_filename = !self.filename.is_empty();
        self.filename = filename.to_string();
        if (self.name.is_empty() || !had_filename) && !filename.is_empty() {
            self.name = utils::nice_nzb_name(filename);
        }
    }

    /// Compute the download directory per the intermediate-directory setting
    pub fn build_dest_dir_name(&mut self, config: &Config) {
        match &config.paths.inter_dir {
            Some(inter_dir) => {
                self.dest_dir = inter_dir.join(format!("{}.#{}", self.name, self.id));
            }
            None => {
                self.dest_dir = self.build_final_dir_name(config);
            }
        }
    }

    /// Compute the final directory from destination, category and name
    pub fn build_final_dir_name(&self, config: &Config) -> PathBuf {
        let mut final_dir = config.paths.dest_dir.clone();
        let mut use_category = !self.category.is_empty();

        if use_category {
            if let Some(category) = config.find_category(&self.category) {
                if let Some(dest_dir) = &category.dest_dir {
                    final_dir = dest_dir.clone();
                    use_category = false;
                }
            }
        }

        if config.append_category_dir && use_category {
            final_dir = final_dir.join(utils::make_valid_filename(&self.category));
        }

        final_dir.join(&self.name)
    }

    /// Health in 0..=1000 over non-par bytes
    pub fn calc_health(&self) -> i32 {
        if self.current_failed_size == 0 || self.size == self.par_size {
            return 1000;
        }

        let health = ((self.size - self.par_size
            - (self.current_failed_size - self.par_current_failed_size))
            * 1000
            / (self.size - self.par_size)) as i32;

        if health == 1000 && self.current_failed_size - self.par_current_failed_size > 0 {
            return 999;
        }

        health
    }

    /// Health threshold below which repair is mathematically impossible
    /// given the par size. With `allow_estimation` an absent par set falls
    /// back to an empirical 85%.
    pub fn calc_critical_health(&self, allow_estimation: bool) -> i32 {
        if self.size == 0 {
            return 1000;
        }
        if self.size == self.par_size {
            return 0;
        }

        let good_par_size = self.par_size - self.par_current_failed_size;
        let mut critical_health =
            ((self.size - good_par_size * 2) * 1000 / (self.size - good_par_size)) as i32;

        if good_par_size * 2 > self.size {
            critical_health = 0;
        } else if critical_health == 1000 && self.par_size > 0 {
            critical_health = 999;
        }

        if critical_health == 1000 && allow_estimation {
            critical_health = 850;
        }

        critical_health
    }

    /// True when the job counts as a successful download for duplicate
    /// bookkeeping
    pub fn is_dupe_success(&self) -> bool {
        let failure = self.mark_status != MarkStatus::Success
            && self.mark_status != MarkStatus::Good
            && (self.delete_status != DeleteStatus::None
                || self.mark_status == MarkStatus::Bad
                || self.par_status == ParStatus::Failure
                || self.unpack_status == UnpackStatus::Failure
                || self.unpack_status == UnpackStatus::Password
                || self.url_status == UrlStatus::Failed
                || self.url_status == UrlStatus::ScanSkipped
                || self.url_status == UrlStatus::ScanFailed
                || (self.par_status == ParStatus::Skipped
                    && self.unpack_status == UnpackStatus::Skipped
                    && self.calc_health() < self.calc_critical_health(true)));
        !failure
    }

    /// Deterministic mapping of the status vector to a short status text.
    ///
    /// The branch order decides which status wins when several are set; it
    /// must not be reordered.
    pub fn make_text_status(&self, ignore_script_status: bool) -> &'static str {
        if self.kind == NzbKind::Url {
            if self.delete_status == DeleteStatus::Manual {
                return "DELETED/MANUAL";
            }
            if self.delete_status == DeleteStatus::Dupe {
                return "DELETED/DUPE";
            }
            if self.delete_status == DeleteStatus::Good {
                return "DELETED/GOOD";
            }
            return match self.url_status {
                UrlStatus::Failed => "FAILURE/FETCH",
                UrlStatus::ScanSkipped => "WARNING/SKIPPED",
                UrlStatus::ScanFailed => "FAILURE/SCAN",
                _ => "FAILURE/INTERNAL_ERROR",
            };
        }

        let health = self.calc_health();
        let critical_health = self.calc_critical_health(false);
        let script_status = if ignore_script_status {
            ScriptStatus::Success
        } else {
            self.script_statuses.calc_total_status()
        };

        let par_idle = self.par_status == ParStatus::None || self.par_status == ParStatus::Skipped;
        let unpack_idle =
            self.unpack_status == UnpackStatus::None || self.unpack_status == UnpackStatus::Skipped;

        if self.mark_status == MarkStatus::Bad {
            "FAILURE/BAD"
        } else if self.mark_status == MarkStatus::Good {
            "SUCCESS/GOOD"
        } else if self.mark_status == MarkStatus::Success {
            "SUCCESS/MARK"
        } else if self.delete_status == DeleteStatus::Health {
            "FAILURE/HEALTH"
        } else if self.delete_status == DeleteStatus::Manual {
            "DELETED/MANUAL"
        } else if self.delete_status == DeleteStatus::Dupe {
            "DELETED/DUPE"
        } else if self.delete_status == DeleteStatus::Bad {
            "FAILURE/BAD"
        } else if self.delete_status == DeleteStatus::Good {
            "DELETED/GOOD"
        } else if self.delete_status == DeleteStatus::Copy {
            "DELETED/COPY"
        } else if self.delete_status == DeleteStatus::Scan {
            "FAILURE/SCAN"
        } else if self.par_status == ParStatus::Failure {
            "FAILURE/PAR"
        } else if self.unpack_status == UnpackStatus::Failure {
            "FAILURE/UNPACK"
        } else if self.move_status == MoveStatus::Failure {
            "FAILURE/MOVE"
        } else if self.par_status == ParStatus::Manual {
            "WARNING/DAMAGED"
        } else if self.par_status == ParStatus::RepairPossible {
            "WARNING/REPAIRABLE"
        } else if par_idle && unpack_idle && health < critical_health {
            "FAILURE/HEALTH"
        } else if par_idle && unpack_idle && health < 1000 && health >= critical_health {
            "WARNING/HEALTH"
        } else if par_idle
            && unpack_idle
            && script_status != ScriptStatus::Failure
            && health == 1000
        {
            "SUCCESS/HEALTH"
        } else if self.unpack_status == UnpackStatus::Space {
            "WARNING/SPACE"
        } else if self.unpack_status == UnpackStatus::Password {
            "WARNING/PASSWORD"
        } else if (self.unpack_status == UnpackStatus::Success
            || (unpack_idle && self.par_status == ParStatus::Success))
            && script_status == ScriptStatus::Success
        {
            "SUCCESS/ALL"
        } else if self.unpack_status == UnpackStatus::Success && script_status == ScriptStatus::None
        {
            "SUCCESS/UNPACK"
        } else if self.par_status == ParStatus::Success && script_status == ScriptStatus::None {
            "SUCCESS/PAR"
        } else if script_status == ScriptStatus::Failure {
            "WARNING/SCRIPT"
        } else {
            "FAILURE/INTERNAL_ERROR"
        }
    }

    /// True when no live file can still download.
    ///
    /// With `ignore_paused_pars` a job whose only remaining files are
    /// paused par files also counts as complete (they were held back
    /// deliberately).
    pub fn is_download_completed(&self, ignore_paused_pars: bool) -> bool {
        if self.active_downloads > 0 {
            return false;
        }

        for file in &self.file_list {
            if (!file.paused || !ignore_paused_pars || !file.par_file) && !file.deleted {
                return false;
            }
        }

        true
    }

    /// Recompute every `current_*` aggregate and derived count from the
    /// live files. The plain counters stay untouched.
    pub fn update_current_stats(&mut self) {
        self.paused_file_count = 0;
        self.remaining_par_count = 0;
        self.remaining_size = 0;
        self.paused_size = 0;
        self.current_success_articles = self.success_articles;
        self.current_failed_articles = self.failed_articles;
        self.current_success_size = self.success_size;
        self.current_failed_size = self.failed_size;
        self.par_current_success_size = self.par_success_size;
        self.par_current_failed_size = self.par_failed_size;
        self.extra_priority_count = 0;

        self.current_server_stats = ServerStatList::default();
        let server_stats = self.server_stats.clone();
        self.current_server_stats.list_op(&server_stats, StatOp::Set);

        for file in &self.file_list {
            self.remaining_size += file.remaining_size;
            self.current_success_articles += file.success_articles;
            self.current_failed_articles += file.failed_articles;
            self.current_success_size += file.success_size;
            self.current_failed_size += file.failed_size;
            if file.extra_priority {
                self.extra_priority_count += 1;
            }

            if file.paused {
                self.paused_file_count += 1;
                self.paused_size += file.remaining_size;
            }
            if file.par_file {
                self.remaining_par_count += 1;
                self.par_current_success_size += file.success_size;
                self.par_current_failed_size += file.failed_size;
            }

            self.current_server_stats.list_op(&file.server_stats, StatOp::Add);
        }
    }

    /// Fold a finishing file into the completed aggregates
    pub fn update_completed_stats(&mut self, file: &FileInfo) {
        self.success_size += file.success_size;
        self.failed_size += file.failed_size;
        self.failed_articles += file.failed_articles;
        self.success_articles += file.success_articles;
        if file.extra_priority {
            self.extra_priority_count -= 1;
        }

        if file.par_file {
            self.par_success_size += file.success_size;
            self.par_failed_size += file.failed_size;
            self.remaining_par_count -= 1;
        }

        if file.paused {
            self.paused_file_count -= 1;
        }

        self.server_stats.list_op(&file.server_stats, StatOp::Add);
    }

    /// Remove a deleted file from every aggregate
    pub fn update_deleted_stats(&mut self, file: &FileInfo) {
        self.file_count -= 1;
        self.size -= file.size;
        self.current_success_size -= file.success_size;
        self.failed_size -= file.missed_size;
        self.failed_articles -= file.missed_articles;
        self.current_failed_size -= file.failed_size + file.missed_size;
        self.total_articles -= file.total_articles;
        self.current_success_articles -= file.success_articles;
        self.current_failed_articles -= file.failed_articles + file.missed_articles;
        self.remaining_size -= file.remaining_size;
        if file.extra_priority {
            self.extra_priority_count -= 1;
        }

        if file.par_file {
            self.remaining_par_count -= 1;
            self.par_size -= file.size;
            self.par_current_success_size -= file.success_size;
            self.par_failed_size -= file.missed_size;
            self.par_current_failed_size -= file.failed_size + file.missed_size;
        }

        if file.paused {
            self.paused_file_count -= 1;
            self.paused_size -= file.remaining_size;
        }

        self.current_server_stats
            .list_op(&file.server_stats, StatOp::Subtract);
    }

    /// Recompute the min/max article post times from the live files
    pub fn update_min_max_time(&mut self) {
        self.min_time = 0;
        self.max_time = 0;

        let mut first = true;
        for file in &self.file_list {
            if first {
                self.min_time = file.time;
                self.max_time = file.time;
                first = false;
            }
            if file.time > 0 {
                if file.time < self.min_time {
                    self.min_time = file.time;
                }
                if file.time > self.max_time {
                    self.max_time = file.time;
                }
            }
        }
    }

    /// Pause or resume a live file, keeping the pause aggregates in sync
    pub fn set_file_paused(&mut self, file_index: usize, paused: bool) {
        let file = &mut self.file_list[file_index];
        if file.paused != paused {
            self.paused_file_count += if paused { 1 } else { -1 };
            self.paused_size += if paused {
                file.remaining_size
            } else {
                -file.remaining_size
            };
            file.paused = paused;
        }
    }

    /// Flip a live file's extra-priority boost, keeping the count in sync
    pub fn set_file_extra_priority(&mut self, file_index: usize, extra: bool) {
        let file = &mut self.file_list[file_index];
        if file.extra_priority != extra {
            self.extra_priority_count += if extra { 1 } else { -1 };
            file.extra_priority = extra;
        }
    }

    /// Track download time across 0↔1 transitions of the active count
    pub fn set_active_downloads(&mut self, active_downloads: i32) {
        let now = utils::current_time();
        if ((self.active_downloads == 0 && active_downloads > 0)
            || (self.active_downloads > 0 && active_downloads == 0))
            && self.kind == NzbKind::Nzb
        {
            if active_downloads > 0 {
                self.download_start_time = now;
                self.download_start_sec = self.download_sec;
            } else {
                self.download_sec = self.download_start_sec + (now - self.download_start_time);
                self.download_start_time = 0;
                self.changed = true;
            }
        } else if active_downloads > 0 && self.download_start_time > 0 {
            self.download_sec = self.download_start_sec + (now - self.download_start_time);
        }
        self.active_downloads = active_downloads;
    }

    /// Take the file list and content fingerprints from a freshly parsed
    /// job; used by redownload to replace a parked job's content.
    pub fn move_file_list(&mut self, src: &mut NzbInfo) {
        self.file_list = std::mem::take(&mut src.file_list);
        let id = self.id;
        for file in &mut self.file_list {
            file.nzb_id = id;
        }

        self.full_content_hash = src.full_content_hash;
        self.filtered_content_hash = src.filtered_content_hash;

        self.file_count = src.file_count;
        self.paused_file_count = src.paused_file_count;
        self.remaining_par_count = src.remaining_par_count;

        self.size = src.size;
        self.remaining_size = src.remaining_size;
        self.paused_size = src.paused_size;
        self.success_size = src.success_size;
        self.current_success_size = src.current_success_size;
        self.failed_size = src.failed_size;
        self.current_failed_size = src.current_failed_size;

        self.par_size = src.par_size;
        self.par_success_size = src.par_success_size;
        self.par_current_success_size = src.par_current_success_size;
        self.par_failed_size = src.par_failed_size;
        self.par_current_failed_size = src.par_current_failed_size;

        self.total_articles = src.total_articles;
        self.success_articles = src.success_articles;
        self.failed_articles = src.failed_articles;
        self.current_success_articles = src.success_articles;
        self.current_failed_articles = src.failed_articles;

        self.min_time = src.min_time;
        self.max_time = src.max_time;
    }

    /// Append a message to the bounded ring and log it
    pub fn add_message(&mut self, kind: MessageKind, text: String) {
        match kind {
            MessageKind::Debug => tracing::debug!(nzb = %self.name, "{text}"),
            MessageKind::Detail => tracing::debug!(nzb = %self.name, "{text}"),
            MessageKind::Info => tracing::info!(nzb = %self.name, "{text}"),
            MessageKind::Warning => tracing::warn!(nzb = %self.name, "{text}"),
            MessageKind::Error => tracing::error!(nzb = %self.name, "{text}"),
        }

        self.message_id_gen += 1;
        self.messages.push_back(Message {
            id: self.message_id_gen,
            kind,
            time: utils::current_time(),
            text,
        });

        while self.messages.len() > self.message_limit {
            self.messages.pop_front();
        }
    }

    /// Drop all buffered messages
    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }

    /// Position of a live file by id
    pub fn find_file(&self, id: crate::types::FileId) -> Option<usize> {
        self.file_list.iter().position(|f| f.id == id)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileId;

    fn job_with_sizes(size: i64, par_size: i64, failed: i64, par_failed: i64) -> NzbInfo {
        NzbInfo {
            size,
            par_size,
            current_failed_size: failed,
            par_current_failed_size: par_failed,
            ..NzbInfo::new()
        }
    }

    #[test]
    fn health_is_1000_without_failures() {
        let nzb = job_with_sizes(1000, 100, 0, 0);
        assert_eq!(nzb.calc_health(), 1000);
    }

    #[test]
    fn health_is_1000_when_all_bytes_are_par() {
        let nzb = job_with_sizes(500, 500, 100, 100);
        assert_eq!(nzb.calc_health(), 1000);
    }

    #[test]
    fn health_formula_matches_definition() {
        // (size - par - (failed - parFailed)) * 1000 / (size - par)
        let nzb = job_with_sizes(1000, 200, 80, 0);
        assert_eq!(nzb.calc_health(), (800 - 80) * 1000 / 800);
    }

    #[test]
    fn tiny_non_par_failure_caps_health_at_999() {
        let nzb = job_with_sizes(10_000_000, 0, 1, 0);
        assert_eq!(
            nzb.calc_health(),
            999,
            "a strictly positive non-par failed fraction must not round up to 1000"
        );
    }

    #[test]
    fn critical_health_zero_when_pars_cover_half() {
        let nzb = job_with_sizes(1000, 600, 0, 0);
        assert_eq!(nzb.calc_critical_health(false), 0);
    }

    #[test]
    fn critical_health_estimation_kicks_in_without_pars() {
        let nzb = job_with_sizes(1000, 0, 0, 0);
        assert_eq!(nzb.calc_critical_health(true), 850);
        assert_eq!(nzb.calc_critical_health(false), 1000);
    }

    #[test]
    fn text_status_prefers_mark_over_delete() {
        let mut nzb = NzbInfo::new();
        nzb.mark_status = MarkStatus::Bad;
        nzb.delete_status = DeleteStatus::Copy;
        assert_eq!(nzb.make_text_status(true), "FAILURE/BAD");
    }

    #[test]
    fn text_status_copy_before_par_failure() {
        let mut nzb = NzbInfo::new();
        nzb.delete_status = DeleteStatus::Copy;
        nzb.par_status = ParStatus::Failure;
        assert_eq!(nzb.make_text_status(true), "DELETED/COPY");
    }

    #[test]
    fn text_status_success_all_for_par_success() {
        let mut nzb = NzbInfo::new();
        nzb.par_status = ParStatus::Success;
        assert_eq!(nzb.make_text_status(true), "SUCCESS/ALL");
    }

    #[test]
    fn text_status_health_for_untouched_job() {
        let mut nzb = job_with_sizes(1000, 200, 0, 0);
        assert_eq!(nzb.make_text_status(true), "SUCCESS/HEALTH");

        nzb.current_failed_size = 10;
        let health = nzb.calc_health();
        assert!(health < 1000 && health >= nzb.calc_critical_health(false));
        assert_eq!(nzb.make_text_status(true), "WARNING/HEALTH");
    }

    #[test]
    fn url_job_text_status_uses_url_table() {
        let mut nzb = NzbInfo::new();
        nzb.kind = NzbKind::Url;
        nzb.url_status = UrlStatus::Failed;
        assert_eq!(nzb.make_text_status(true), "FAILURE/FETCH");

        nzb.url_status = UrlStatus::ScanSkipped;
        assert_eq!(nzb.make_text_status(true), "WARNING/SKIPPED");
    }

    #[test]
    fn set_file_paused_keeps_aggregates_in_sync() {
        let mut nzb = NzbInfo::new();
        nzb.file_list.push(FileInfo {
            id: FileId(1),
            remaining_size: 500,
            ..Default::default()
        });

        nzb.set_file_paused(0, true);
        assert_eq!(nzb.paused_file_count, 1);
        assert_eq!(nzb.paused_size, 500);

        // pausing again must not double-count
        nzb.set_file_paused(0, true);
        assert_eq!(nzb.paused_file_count, 1);

        nzb.set_file_paused(0, false);
        assert_eq!(nzb.paused_file_count, 0);
        assert_eq!(nzb.paused_size, 0);
    }

    #[test]
    fn update_current_stats_recomputes_from_files() {
        let mut nzb = NzbInfo::new();
        nzb.success_size = 100;
        nzb.file_list.push(FileInfo {
            id: FileId(1),
            remaining_size: 400,
            success_size: 50,
            par_file: true,
            paused: true,
            ..Default::default()
        });

        nzb.update_current_stats();
        assert_eq!(nzb.current_success_size, 150);
        assert_eq!(nzb.remaining_size, 400);
        assert_eq!(nzb.paused_size, 400);
        assert_eq!(nzb.paused_file_count, 1);
        assert_eq!(nzb.remaining_par_count, 1);
    }

    #[test]
    fn message_ring_is_bounded() {
        let mut nzb = NzbInfo::new();
        nzb.message_limit = 3;
        for i in 0..5 {
            nzb.add_message(MessageKind::Info, format!("message {i}"));
        }
        assert_eq!(nzb.messages.len(), 3);
        assert_eq!(nzb.messages.front().unwrap().text, "message 2");
        assert_eq!(nzb.messages.back().unwrap().id, 5);
    }

    #[test]
    fn download_completed_ignores_paused_pars_when_asked() {
        let mut nzb = NzbInfo::new();
        nzb.file_list.push(FileInfo {
            id: FileId(1),
            par_file: true,
            paused: true,
            ..Default::default()
        });

        assert!(!nzb.is_download_completed(false));
        assert!(nzb.is_download_completed(true));
    }
}
