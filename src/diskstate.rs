//! File-backed queue state.
//!
//! One versioned text-line file holds the queue and history with nested
//! sections per job (statuses, parameters, server stats, script statuses,
//! messages, completed files). Per-file side files hold the article lists
//! (`file-<id>`) and resumable partial-download progress (`state-<id>`) so
//! large article vectors need not live in the top-level file. A sentinel
//! flag file marks that the write cache is enabled; finding it at startup
//! means the last shutdown may not have flushed.
//!
//! Writes snapshot under the queue lock, then go to a temp file which is
//! atomically renamed, so the on-disk image is always a consistent
//! point-in-time view.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::model::{
    ArticleInfo, CompletedFile, DownloadQueue, DupInfo, FileInfo, HistoryContent, HistoryEntry,
    NzbInfo, NzbParameter, ScriptStatusEntry, ServerStat,
};
use crate::types::{
    ArticleStatus, CleanupStatus, CompletedFileStatus, DeleteStatus, DupStatus, DupeHint, DupeMode,
    FileId, MarkStatus, Message, MessageKind, MoveStatus, NzbId, NzbKind, ParStatus, PartialState,
    PostRenameStatus, ScriptStatus, TaskStatus, UnpackStatus, UrlStatus,
};

/// Format version of the top-level queue file
const QUEUE_FORMAT_VERSION: u32 = 1;
/// Format version of the per-file side files
const FILE_FORMAT_VERSION: u32 = 1;

const QUEUE_FILE: &str = "queue";
const CACHE_FLAG_FILE: &str = "cache.flag";

/// Persistence store rooted at the configured queue directory
pub struct DiskState {
    queue_dir: PathBuf,
}

impl DiskState {
    /// Open the store, creating the queue directory when missing
    pub fn new(queue_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&queue_dir)?;
        Ok(Self { queue_dir })
    }

    fn queue_file(&self) -> PathBuf {
        self.queue_dir.join(QUEUE_FILE)
    }

    fn file_path(&self, id: FileId) -> PathBuf {
        self.queue_dir.join(format!("file-{}", id.get()))
    }

    fn state_path(&self, id: FileId) -> PathBuf {
        self.queue_dir.join(format!("state-{}", id.get()))
    }

    /// True when a persisted queue exists
    pub fn queue_exists(&self) -> bool {
        self.queue_file().is_file()
    }

    /// Create the write-cache sentinel
    pub fn set_cache_flag(&self) {
        std::fs::write(self.queue_dir.join(CACHE_FLAG_FILE), b"").ok();
    }

    /// Remove the write-cache sentinel on clean shutdown
    pub fn clear_cache_flag(&self) {
        std::fs::remove_file(self.queue_dir.join(CACHE_FLAG_FILE)).ok();
    }

    /// A leftover sentinel implies a possibly-unflushed shutdown
    pub fn cache_flag_exists(&self) -> bool {
        self.queue_dir.join(CACHE_FLAG_FILE).is_file()
    }

    // ----- top-level queue file -----

    /// Serialize the queue into the text-line format.
    ///
    /// Split from the write so the snapshot can be taken under the queue
    /// lock while the disk I/O happens without it.
    pub fn serialize_queue(queue: &DownloadQueue) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "NZBQUEUE {QUEUE_FORMAT_VERSION}");

        let (nzb_max, file_max) = max_ids(queue);
        let _ = writeln!(out, "IDGEN {nzb_max} {file_max}");

        let _ = writeln!(out, "QUEUE {}", queue.queue.len());
        for nzb in &queue.queue {
            write_nzb(&mut out, nzb);
        }

        let _ = writeln!(out, "HISTORY {}", queue.history.len());
        for entry in &queue.history {
            match &entry.content {
                HistoryContent::Nzb(nzb) => {
                    let _ = writeln!(out, "TIME {}", entry.time);
                    write_nzb(&mut out, nzb);
                }
                HistoryContent::Dup(dup) => {
                    let _ = writeln!(out, "TIME {}", entry.time);
                    write_dup(&mut out, dup);
                }
            }
        }
        let _ = writeln!(out, "END");
        out
    }

    /// Write a serialized queue snapshot to the temp file and atomically
    /// rename it into place
    pub fn write_queue_data(&self, data: &str) -> Result<()> {
        let temp = self.queue_dir.join(format!("{QUEUE_FILE}.new"));
        std::fs::write(&temp, data.as_bytes())?;
        std::fs::rename(&temp, self.queue_file())?;
        Ok(())
    }

    /// Write the queue and history to disk atomically
    pub fn save_queue(&self, queue: &DownloadQueue) -> Result<()> {
        self.write_queue_data(&Self::serialize_queue(queue))
    }

    /// Load the queue and history, restoring article lists and partial
    /// state from the side files.
    pub fn load_queue(&self) -> Result<DownloadQueue> {
        let content = std::fs::read_to_string(self.queue_file())?;
        let mut lines = Lines::new(&content);

        let header = lines.next_line()?;
        let version: u32 = match header.strip_prefix("NZBQUEUE ") {
            Some(version) => version
                .trim()
                .parse()
                .map_err(|_| Error::DiskState(format!("bad version line: {header}")))?,
            None => return Err(Error::DiskState(format!("bad signature: {header}"))),
        };
        if version > QUEUE_FORMAT_VERSION {
            return Err(Error::DiskState(format!(
                "unsupported queue format version {version}"
            )));
        }

        let mut queue = DownloadQueue::new();

        let (nzb_max, file_max) = {
            let line = lines.next_line()?;
            let rest = line
                .strip_prefix("IDGEN ")
                .ok_or_else(|| Error::DiskState(format!("expected IDGEN, got {line}")))?;
            let mut parts = rest.split_whitespace();
            let nzb_max: i32 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            let file_max: i32 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            (nzb_max, file_max)
        };

        let queue_count = lines.expect_count("QUEUE")?;
        for _ in 0..queue_count {
            let mut nzb = read_nzb(&mut lines)?;
            self.load_live_files(&mut nzb)?;
            nzb.update_current_stats();
            queue.queue.push(nzb);
        }

        let history_count = lines.expect_count("HISTORY")?;
        for _ in 0..history_count {
            let line = lines.next_line()?;
            let time: i64 = line
                .strip_prefix("TIME ")
                .and_then(|v| v.trim().parse().ok())
                .ok_or_else(|| Error::DiskState(format!("expected TIME, got {line}")))?;

            let marker = lines.peek()?;
            if marker == "DUP" {
                let dup = read_dup(&mut lines)?;
                queue.history.push(HistoryEntry::from_dup(dup, time));
            } else {
                let nzb = read_nzb(&mut lines)?;
                queue.history.push(HistoryEntry::from_nzb(nzb, time));
            }
        }

        queue.id_gen.track_nzb_id(NzbId(nzb_max));
        queue.id_gen.track_file_id(FileId(file_max));
        for nzb in &queue.queue {
            queue.id_gen.track_nzb_id(nzb.id);
            for file in &nzb.file_list {
                queue.id_gen.track_file_id(file.id);
            }
        }
        for entry in &queue.history {
            queue.id_gen.track_nzb_id(NzbId(entry.id().get()));
        }
        queue.id_gen.reset_to_max();

        queue.queue_changed = false;
        queue.history_changed = false;
        Ok(queue)
    }

    fn load_live_files(&self, nzb: &mut NzbInfo) -> Result<()> {
        for file in &mut nzb.file_list {
            if !self.load_file(file, true, false) {
                tracing::error!(
                    file_id = file.id.get(),
                    "missing article file, the file cannot be downloaded"
                );
                continue;
            }
            self.load_file_state(file);
        }
        Ok(())
    }

    // ----- per-file side files -----

    /// Write a file's static description and article list
    pub fn save_file(&self, file: &FileInfo) -> Result<()> {
        let mut out = String::new();
        let _ = writeln!(out, "NZBFILE {FILE_FORMAT_VERSION}");
        let _ = writeln!(out, "SU {}", file.subject);
        let _ = writeln!(out, "FN {}", file.filename);
        let _ = writeln!(out, "TM {}", file.time);
        let _ = writeln!(out, "SZ {} {}", file.size, file.missed_size);
        let _ = writeln!(out, "AR {} {}", file.total_articles, file.missed_articles);
        let _ = writeln!(out, "PF {}", file.par_file as u8);
        let _ = writeln!(out, "ARTICLES {}", file.articles.len());
        for article in &file.articles {
            let _ = writeln!(
                out,
                "{} {} {}",
                article.part_number, article.size, article.message_id
            );
        }

        let path = self.file_path(file.id);
        let temp = path.with_extension("new");
        std::fs::write(&temp, out.as_bytes())?;
        std::fs::rename(&temp, path)?;
        Ok(())
    }

    /// Load a file's description and (optionally) its article list.
    /// Returns false when no side file exists or it cannot be parsed.
    pub fn load_file(&self, file: &mut FileInfo, load_articles: bool, _load_state: bool) -> bool {
        let content = match std::fs::read_to_string(self.file_path(file.id)) {
            Ok(content) => content,
            Err(_) => return false,
        };

        let mut articles = Vec::new();
        let mut in_articles = false;
        for line in content.lines() {
            if in_articles {
                let mut parts = line.splitn(3, ' ');
                let part_number: i32 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                let size: i64 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                let message_id = parts.next().unwrap_or("").to_string();
                articles.push(ArticleInfo {
                    part_number,
                    size,
                    message_id,
                    ..Default::default()
                });
            } else if let Some(value) = line.strip_prefix("SU ") {
                file.subject = value.to_string();
            } else if let Some(value) = line.strip_prefix("FN ") {
                if file.filename.is_empty() {
                    file.filename = value.to_string();
                }
            } else if let Some(value) = line.strip_prefix("TM ") {
                file.time = value.trim().parse().unwrap_or(0);
            } else if let Some(value) = line.strip_prefix("SZ ") {
                let mut parts = value.split_whitespace();
                file.size = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                file.missed_size = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                file.remaining_size = file.size - file.missed_size;
            } else if let Some(value) = line.strip_prefix("AR ") {
                let mut parts = value.split_whitespace();
                file.total_articles = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                file.missed_articles = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            } else if let Some(value) = line.strip_prefix("PF ") {
                file.par_file = value.trim() == "1";
            } else if line.starts_with("ARTICLES ") {
                in_articles = true;
            }
        }

        if load_articles {
            file.articles = articles;
        }
        true
    }

    /// Write a file's partial-download progress
    pub fn save_file_state(&self, file: &FileInfo, completed: bool) -> Result<()> {
        let mut out = String::new();
        let _ = writeln!(out, "NZBFILESTATE {FILE_FORMAT_VERSION}");
        let _ = writeln!(
            out,
            "CNT {} {} {}",
            file.success_articles, file.failed_articles, file.completed_articles
        );
        let _ = writeln!(
            out,
            "SZ {} {} {}",
            file.success_size, file.failed_size, file.remaining_size
        );
        let _ = writeln!(
            out,
            "PS {}",
            if completed {
                PartialState::Completed.to_i32()
            } else {
                PartialState::Partial.to_i32()
            }
        );
        let _ = writeln!(out, "SERVERSTATS {}", file.server_stats.0.len());
        for stat in &file.server_stats.0 {
            let _ = writeln!(
                out,
                "{} {} {}",
                stat.server_id, stat.success_articles, stat.failed_articles
            );
        }
        let _ = writeln!(out, "ASTAT {}", file.articles.len());
        for article in &file.articles {
            let _ = writeln!(
                out,
                "{} {} {} {}",
                article.status.to_i32(),
                article.crc,
                article.segment_offset,
                article.segment_size
            );
        }

        let path = self.state_path(file.id);
        let temp = path.with_extension("new");
        std::fs::write(&temp, out.as_bytes())?;
        std::fs::rename(&temp, path)?;
        Ok(())
    }

    /// Load a file's partial-download progress into its article slots.
    /// Returns false when no state file exists.
    pub fn load_file_state(&self, file: &mut FileInfo) -> bool {
        let content = match std::fs::read_to_string(self.state_path(file.id)) {
            Ok(content) => content,
            Err(_) => return false,
        };

        enum Section {
            Head,
            ServerStats(usize),
            Articles(usize),
        }
        let mut section = Section::Head;
        let mut article_index = 0usize;

        for line in content.lines() {
            match section {
                Section::Head => {
                    if let Some(value) = line.strip_prefix("CNT ") {
                        let mut parts = value.split_whitespace();
                        file.success_articles =
                            parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                        file.failed_articles =
                            parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                        file.completed_articles =
                            parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                    } else if let Some(value) = line.strip_prefix("SZ ") {
                        let mut parts = value.split_whitespace();
                        file.success_size = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                        file.failed_size = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                        file.remaining_size =
                            parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                    } else if let Some(value) = line.strip_prefix("PS ") {
                        file.partial_state =
                            PartialState::from_i32(value.trim().parse().unwrap_or(0));
                    } else if let Some(value) = line.strip_prefix("SERVERSTATS ") {
                        section = Section::ServerStats(value.trim().parse().unwrap_or(0));
                    } else if let Some(value) = line.strip_prefix("ASTAT ") {
                        let _ = value;
                        section = Section::Articles(file.articles.len());
                    }
                }
                Section::ServerStats(remaining) => {
                    let mut parts = line.split_whitespace();
                    let server_id: i32 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                    let success: i32 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                    let failed: i32 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                    file.server_stats.0.push(ServerStat {
                        server_id,
                        success_articles: success,
                        failed_articles: failed,
                    });
                    if remaining <= 1 {
                        section = Section::Head;
                    } else {
                        section = Section::ServerStats(remaining - 1);
                    }
                }
                Section::Articles(total) => {
                    if article_index < total && article_index < file.articles.len() {
                        let mut parts = line.split_whitespace();
                        let article = &mut file.articles[article_index];
                        article.status = ArticleStatus::from_i32(
                            parts.next().and_then(|v| v.parse().ok()).unwrap_or(0),
                        );
                        // interrupted fetches restart from scratch
                        if article.status == ArticleStatus::Running {
                            article.status = ArticleStatus::Undefined;
                        }
                        article.crc = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                        article.segment_offset =
                            parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                        article.segment_size =
                            parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                        article_index += 1;
                    }
                }
            }
        }

        true
    }

    /// Remove a file's side files
    pub fn discard_file(&self, id: FileId, delete_articles: bool, delete_state: bool) {
        if delete_articles {
            std::fs::remove_file(self.file_path(id)).ok();
        }
        if delete_state {
            std::fs::remove_file(self.state_path(id)).ok();
        }
    }

    /// Remove the side files of every live and parked file of a job
    pub fn discard_files(&self, nzb: &NzbInfo, delete_articles: bool) {
        for file in &nzb.file_list {
            self.discard_file(file.id, delete_articles, true);
        }
        for completed in &nzb.completed_files {
            self.discard_file(completed.id, delete_articles, true);
        }
    }
}

fn max_ids(queue: &DownloadQueue) -> (i32, i32) {
    let mut nzb_max = 0;
    let mut file_max = 0;
    for nzb in &queue.queue {
        nzb_max = nzb_max.max(nzb.id.get());
        for file in &nzb.file_list {
            file_max = file_max.max(file.id.get());
        }
        for completed in &nzb.completed_files {
            file_max = file_max.max(completed.id.get());
        }
    }
    for entry in &queue.history {
        nzb_max = nzb_max.max(entry.id().get());
        if let Some(nzb) = entry.nzb() {
            for completed in &nzb.completed_files {
                file_max = file_max.max(completed.id.get());
            }
        }
    }
    (nzb_max, file_max)
}

// ----- writing -----

fn write_nzb(out: &mut String, nzb: &NzbInfo) {
    let _ = writeln!(out, "NZB");
    let _ = writeln!(
        out,
        "ID {} {} {} {}",
        nzb.id,
        nzb.kind.to_i32(),
        nzb.priority,
        nzb.feed_id
    );
    let _ = writeln!(out, "NM {}", nzb.name);
    let _ = writeln!(out, "FN {}", nzb.filename);
    let _ = writeln!(out, "QF {}", nzb.queued_filename);
    let _ = writeln!(out, "UR {}", nzb.url);
    let _ = writeln!(out, "DD {}", nzb.dest_dir.display());
    let _ = writeln!(out, "FD {}", nzb.final_dir.display());
    let _ = writeln!(out, "CT {}", nzb.category);
    let _ = writeln!(
        out,
        "SZ {} {} {} {} {} {}",
        nzb.size,
        nzb.success_size,
        nzb.failed_size,
        nzb.par_size,
        nzb.par_success_size,
        nzb.par_failed_size
    );
    let _ = writeln!(
        out,
        "AR {} {} {} {} {}",
        nzb.total_articles,
        nzb.success_articles,
        nzb.failed_articles,
        nzb.file_count,
        nzb.parked_file_count
    );
    let _ = writeln!(out, "CH {} {}", nzb.full_content_hash, nzb.filtered_content_hash);
    let _ = writeln!(out, "DK {}", nzb.dupe_key);
    let _ = writeln!(
        out,
        "DP {} {} {}",
        nzb.dupe_score,
        nzb.dupe_mode.to_i32(),
        nzb.dupe_hint.to_i32()
    );
    let _ = writeln!(
        out,
        "ST {} {} {} {} {} {} {} {} {} {} {}",
        nzb.par_status.to_i32(),
        nzb.unpack_status.to_i32(),
        nzb.move_status.to_i32(),
        nzb.cleanup_status.to_i32(),
        nzb.delete_status.to_i32(),
        nzb.mark_status.to_i32(),
        nzb.url_status.to_i32(),
        nzb.direct_rename_status.to_i32(),
        nzb.par_rename_status.to_i32(),
        nzb.rar_rename_status.to_i32(),
        nzb.direct_unpack_status.to_i32()
    );
    let _ = writeln!(
        out,
        "FL {} {} {} {} {}",
        nzb.health_paused as u8,
        nzb.delete_paused as u8,
        nzb.unpack_cleaned_up_disk as u8,
        nzb.many_dupe_files as u8,
        nzb.all_first as u8
    );
    let _ = writeln!(
        out,
        "TM {} {} {} {} {} {} {} {}",
        nzb.min_time,
        nzb.max_time,
        nzb.download_sec,
        nzb.post_total_sec,
        nzb.par_sec,
        nzb.repair_sec,
        nzb.unpack_sec,
        nzb.downloaded_size
    );

    let _ = writeln!(out, "PARAMS {}", nzb.parameters.0.len());
    for param in &nzb.parameters.0 {
        let _ = writeln!(out, "{}={}", param.name, param.value);
    }

    let _ = writeln!(out, "SCRIPTS {}", nzb.script_statuses.0.len());
    for script in &nzb.script_statuses.0 {
        let _ = writeln!(out, "{} {}", script.status.to_i32(), script.name);
    }

    let _ = writeln!(out, "SERVERSTATS {}", nzb.server_stats.0.len());
    for stat in &nzb.server_stats.0 {
        let _ = writeln!(
            out,
            "{} {} {}",
            stat.server_id, stat.success_articles, stat.failed_articles
        );
    }

    let _ = writeln!(out, "MSGS {}", nzb.messages.len());
    for message in &nzb.messages {
        let _ = writeln!(
            out,
            "{} {} {}",
            message.kind.to_i32(),
            message.time,
            message.text
        );
    }

    let _ = writeln!(out, "COMPLETED {}", nzb.completed_files.len());
    for completed in &nzb.completed_files {
        let _ = writeln!(
            out,
            "CF {} {} {} {}",
            completed.id,
            completed.status.to_i32(),
            completed.crc,
            completed.par_file as u8
        );
        let _ = writeln!(out, "CN {}", completed.filename);
        let _ = writeln!(out, "CO {}", completed.origname);
        let _ = writeln!(out, "CH {}", completed.hash16k.as_deref().unwrap_or("-"));
        let _ = writeln!(out, "CS {}", completed.par_set_id.as_deref().unwrap_or("-"));
    }

    let _ = writeln!(out, "FILES {}", nzb.file_list.len());
    for file in &nzb.file_list {
        let _ = writeln!(
            out,
            "FI {} {} {} {} {}",
            file.id,
            file.paused as u8,
            file.extra_priority as u8,
            file.filename_confirmed as u8,
            file.dupe_deleted as u8
        );
        let _ = writeln!(out, "FF {}", file.filename);
        let _ = writeln!(out, "FO {}", file.origname);
        let _ = writeln!(out, "FH {}", file.hash16k.as_deref().unwrap_or("-"));
        let _ = writeln!(out, "FS {}", file.par_set_id.as_deref().unwrap_or("-"));
    }
}

fn write_dup(out: &mut String, dup: &DupInfo) {
    let _ = writeln!(out, "DUP");
    let _ = writeln!(
        out,
        "ID {} {} {} {}",
        dup.id,
        dup.status.to_i32(),
        dup.dupe_mode.to_i32(),
        dup.dupe_score
    );
    let _ = writeln!(out, "NM {}", dup.name);
    let _ = writeln!(out, "DK {}", dup.dupe_key);
    let _ = writeln!(out, "SZ {}", dup.size);
    let _ = writeln!(out, "CH {} {}", dup.full_content_hash, dup.filtered_content_hash);
}

// ----- reading -----

struct Lines<'a> {
    iter: std::iter::Peekable<std::str::Lines<'a>>,
}

impl<'a> Lines<'a> {
    fn new(content: &'a str) -> Self {
        Self {
            iter: content.lines().peekable(),
        }
    }

    fn next_line(&mut self) -> Result<&'a str> {
        self.iter
            .next()
            .ok_or_else(|| Error::DiskState("unexpected end of file".to_string()))
    }

    fn peek(&mut self) -> Result<&'a str> {
        self.iter
            .peek()
            .copied()
            .ok_or_else(|| Error::DiskState("unexpected end of file".to_string()))
    }

    fn expect_count(&mut self, keyword: &str) -> Result<usize> {
        let line = self.next_line()?;
        line.strip_prefix(keyword)
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| Error::DiskState(format!("expected {keyword} <count>, got {line}")))
    }
}

fn opt_string(value: &str) -> Option<String> {
    if value == "-" || value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn read_nzb(lines: &mut Lines) -> Result<NzbInfo> {
    let marker = lines.next_line()?;
    if marker != "NZB" {
        return Err(Error::DiskState(format!("expected NZB, got {marker}")));
    }

    let mut nzb = NzbInfo::new();

    loop {
        let line = lines.next_line()?;
        if let Some(value) = line.strip_prefix("ID ") {
            let mut parts = value.split_whitespace();
            nzb.id = NzbId(parts.next().and_then(|v| v.parse().ok()).unwrap_or(0));
            nzb.kind = NzbKind::from_i32(parts.next().and_then(|v| v.parse().ok()).unwrap_or(0));
            nzb.priority = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            nzb.feed_id = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
        } else if let Some(value) = line.strip_prefix("NM ") {
            nzb.name = value.to_string();
        } else if let Some(value) = line.strip_prefix("FN ") {
            nzb.filename = value.to_string();
        } else if let Some(value) = line.strip_prefix("QF ") {
            nzb.queued_filename = value.to_string();
        } else if let Some(value) = line.strip_prefix("UR ") {
            nzb.url = value.to_string();
        } else if let Some(value) = line.strip_prefix("DD ") {
            nzb.dest_dir = PathBuf::from(value);
        } else if let Some(value) = line.strip_prefix("FD ") {
            nzb.final_dir = PathBuf::from(value);
        } else if let Some(value) = line.strip_prefix("CT ") {
            nzb.category = value.to_string();
        } else if let Some(value) = line.strip_prefix("SZ ") {
            let mut parts = value.split_whitespace();
            nzb.size = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            nzb.success_size = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            nzb.failed_size = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            nzb.par_size = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            nzb.par_success_size = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            nzb.par_failed_size = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
        } else if let Some(value) = line.strip_prefix("AR ") {
            let mut parts = value.split_whitespace();
            nzb.total_articles = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            nzb.success_articles = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            nzb.failed_articles = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            nzb.file_count = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            nzb.parked_file_count = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
        } else if let Some(value) = line.strip_prefix("CH ") {
            let mut parts = value.split_whitespace();
            nzb.full_content_hash = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            nzb.filtered_content_hash = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
        } else if let Some(value) = line.strip_prefix("DK ") {
            nzb.dupe_key = value.to_string();
        } else if let Some(value) = line.strip_prefix("DP ") {
            let mut parts = value.split_whitespace();
            nzb.dupe_score = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            nzb.dupe_mode =
                DupeMode::from_i32(parts.next().and_then(|v| v.parse().ok()).unwrap_or(0));
            nzb.dupe_hint =
                DupeHint::from_i32(parts.next().and_then(|v| v.parse().ok()).unwrap_or(0));
        } else if let Some(value) = line.strip_prefix("ST ") {
            let mut parts = value.split_whitespace();
            let mut next = || parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            nzb.par_status = ParStatus::from_i32(next());
            nzb.unpack_status = UnpackStatus::from_i32(next());
            nzb.move_status = MoveStatus::from_i32(next());
            nzb.cleanup_status = CleanupStatus::from_i32(next());
            nzb.delete_status = DeleteStatus::from_i32(next());
            nzb.mark_status = MarkStatus::from_i32(next());
            nzb.url_status = UrlStatus::from_i32(next());
            nzb.direct_rename_status = TaskStatus::from_i32(next());
            nzb.par_rename_status = PostRenameStatus::from_i32(next());
            nzb.rar_rename_status = PostRenameStatus::from_i32(next());
            nzb.direct_unpack_status = TaskStatus::from_i32(next());
        } else if let Some(value) = line.strip_prefix("FL ") {
            let mut parts = value.split_whitespace();
            let mut next = || parts.next().map(|v| v == "1").unwrap_or(false);
            nzb.health_paused = next();
            nzb.delete_paused = next();
            nzb.unpack_cleaned_up_disk = next();
            nzb.many_dupe_files = next();
            nzb.all_first = next();
        } else if let Some(value) = line.strip_prefix("TM ") {
            let mut parts = value.split_whitespace();
            let mut next = || parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            nzb.min_time = next();
            nzb.max_time = next();
            nzb.download_sec = next();
            nzb.post_total_sec = next();
            nzb.par_sec = next();
            nzb.repair_sec = next();
            nzb.unpack_sec = next();
            nzb.downloaded_size = next();
        } else if let Some(value) = line.strip_prefix("PARAMS ") {
            let count: usize = value.trim().parse().unwrap_or(0);
            for _ in 0..count {
                let param_line = lines.next_line()?;
                if let Some((name, param_value)) = param_line.split_once('=') {
                    nzb.parameters.0.push(NzbParameter {
                        name: name.to_string(),
                        value: param_value.to_string(),
                    });
                }
            }
        } else if let Some(value) = line.strip_prefix("SCRIPTS ") {
            let count: usize = value.trim().parse().unwrap_or(0);
            for _ in 0..count {
                let script_line = lines.next_line()?;
                if let Some((status, name)) = script_line.split_once(' ') {
                    nzb.script_statuses.0.push(ScriptStatusEntry {
                        name: name.to_string(),
                        status: ScriptStatus::from_i32(status.parse().unwrap_or(0)),
                    });
                }
            }
        } else if let Some(value) = line.strip_prefix("SERVERSTATS ") {
            let count: usize = value.trim().parse().unwrap_or(0);
            for _ in 0..count {
                let stat_line = lines.next_line()?;
                let mut parts = stat_line.split_whitespace();
                nzb.server_stats.0.push(ServerStat {
                    server_id: parts.next().and_then(|v| v.parse().ok()).unwrap_or(0),
                    success_articles: parts.next().and_then(|v| v.parse().ok()).unwrap_or(0),
                    failed_articles: parts.next().and_then(|v| v.parse().ok()).unwrap_or(0),
                });
            }
        } else if let Some(value) = line.strip_prefix("MSGS ") {
            let count: usize = value.trim().parse().unwrap_or(0);
            for _ in 0..count {
                let message_line = lines.next_line()?;
                let mut parts = message_line.splitn(3, ' ');
                let kind =
                    MessageKind::from_i32(parts.next().and_then(|v| v.parse().ok()).unwrap_or(2));
                let time: i64 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                let text = parts.next().unwrap_or("").to_string();
                let id = nzb.messages.len() as u32 + 1;
                nzb.messages.push_back(Message { id, kind, time, text });
            }
        } else if let Some(value) = line.strip_prefix("COMPLETED ") {
            let count: usize = value.trim().parse().unwrap_or(0);
            for _ in 0..count {
                nzb.completed_files.push(read_completed_file(lines)?);
            }
        } else if let Some(value) = line.strip_prefix("FILES ") {
            let count: usize = value.trim().parse().unwrap_or(0);
            for _ in 0..count {
                nzb.file_list.push(read_live_file(lines, nzb.id)?);
            }
            // FILES is the last section of a job
            return Ok(nzb);
        } else {
            return Err(Error::DiskState(format!("unexpected line: {line}")));
        }
    }
}

fn read_completed_file(lines: &mut Lines) -> Result<CompletedFile> {
    let mut completed = CompletedFile::default();

    let line = lines.next_line()?;
    let value = line
        .strip_prefix("CF ")
        .ok_or_else(|| Error::DiskState(format!("expected CF, got {line}")))?;
    let mut parts = value.split_whitespace();
    completed.id = FileId(parts.next().and_then(|v| v.parse().ok()).unwrap_or(0));
    completed.status =
        CompletedFileStatus::from_i32(parts.next().and_then(|v| v.parse().ok()).unwrap_or(0));
    completed.crc = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
    completed.par_file = parts.next().map(|v| v == "1").unwrap_or(false);

    for _ in 0..4 {
        let line = lines.next_line()?;
        if let Some(value) = line.strip_prefix("CN ") {
            completed.filename = value.to_string();
        } else if let Some(value) = line.strip_prefix("CO ") {
            completed.origname = value.to_string();
        } else if let Some(value) = line.strip_prefix("CH ") {
            completed.hash16k = opt_string(value);
        } else if let Some(value) = line.strip_prefix("CS ") {
            completed.par_set_id = opt_string(value);
        }
    }

    Ok(completed)
}

fn read_live_file(lines: &mut Lines, nzb_id: NzbId) -> Result<FileInfo> {
    let mut file = FileInfo {
        nzb_id,
        ..Default::default()
    };

    let line = lines.next_line()?;
    let value = line
        .strip_prefix("FI ")
        .ok_or_else(|| Error::DiskState(format!("expected FI, got {line}")))?;
    let mut parts = value.split_whitespace();
    file.id = FileId(parts.next().and_then(|v| v.parse().ok()).unwrap_or(0));
    let mut next_flag = || parts.next().map(|v| v == "1").unwrap_or(false);
    file.paused = next_flag();
    file.extra_priority = next_flag();
    file.filename_confirmed = next_flag();
    file.dupe_deleted = next_flag();

    for _ in 0..4 {
        let line = lines.next_line()?;
        if let Some(value) = line.strip_prefix("FF ") {
            file.filename = value.to_string();
        } else if let Some(value) = line.strip_prefix("FO ") {
            file.origname = value.to_string();
        } else if let Some(value) = line.strip_prefix("FH ") {
            file.hash16k = opt_string(value);
        } else if let Some(value) = line.strip_prefix("FS ") {
            file.par_set_id = opt_string(value);
        }
    }

    Ok(file)
}

fn read_dup(lines: &mut Lines) -> Result<DupInfo> {
    let marker = lines.next_line()?;
    if marker != "DUP" {
        return Err(Error::DiskState(format!("expected DUP, got {marker}")));
    }

    let mut dup = DupInfo::default();

    let line = lines.next_line()?;
    let value = line
        .strip_prefix("ID ")
        .ok_or_else(|| Error::DiskState(format!("expected ID, got {line}")))?;
    let mut parts = value.split_whitespace();
    dup.id = NzbId(parts.next().and_then(|v| v.parse().ok()).unwrap_or(0));
    dup.status = DupStatus::from_i32(parts.next().and_then(|v| v.parse().ok()).unwrap_or(0));
    dup.dupe_mode = DupeMode::from_i32(parts.next().and_then(|v| v.parse().ok()).unwrap_or(0));
    dup.dupe_score = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);

    for _ in 0..4 {
        let line = lines.next_line()?;
        if let Some(value) = line.strip_prefix("NM ") {
            dup.name = value.to_string();
        } else if let Some(value) = line.strip_prefix("DK ") {
            dup.dupe_key = value.to_string();
        } else if let Some(value) = line.strip_prefix("SZ ") {
            dup.size = value.trim().parse().unwrap_or(0);
        } else if let Some(value) = line.strip_prefix("CH ") {
            let mut parts = value.split_whitespace();
            dup.full_content_hash = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
            dup.filtered_content_hash = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0);
        }
    }

    Ok(dup)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NzbParameterList;

    fn sample_queue(disk: &DiskState) -> DownloadQueue {
        let mut queue = DownloadQueue::new();

        let mut nzb = NzbInfo::new();
        nzb.id = queue.id_gen.next_nzb_id();
        nzb.name = "Some.Release".to_string();
        nzb.filename = "/in/Some.Release.nzb".to_string();
        nzb.queued_filename = "/in/Some.Release.nzb.queued".to_string();
        nzb.dest_dir = PathBuf::from("/dst/Some.Release");
        nzb.category = "movies".to_string();
        nzb.dupe_key = "imdb:123".to_string();
        nzb.dupe_score = 50;
        nzb.size = 3000;
        nzb.par_size = 1000;
        nzb.total_articles = 3;
        nzb.file_count = 2;
        nzb.full_content_hash = 0xCAFE;
        nzb.filtered_content_hash = 0xBEEF;
        nzb.parameters = NzbParameterList::default();
        nzb.parameters.set_parameter("*Unpack:", "yes");

        let mut file = FileInfo {
            id: queue.id_gen.next_file_id(),
            nzb_id: nzb.id,
            subject: "subject with spaces \"a.rar\"".to_string(),
            filename: "a.rar".to_string(),
            size: 2000,
            remaining_size: 2000,
            total_articles: 2,
            time: 1_700_000_000,
            ..Default::default()
        };
        file.articles.push(ArticleInfo {
            part_number: 1,
            message_id: "m1@example".to_string(),
            size: 1000,
            ..Default::default()
        });
        file.articles.push(ArticleInfo {
            part_number: 2,
            message_id: "m2@example".to_string(),
            size: 1000,
            ..Default::default()
        });
        disk.save_file(&file).unwrap();
        nzb.file_list.push(file);

        let mut par = FileInfo {
            id: queue.id_gen.next_file_id(),
            nzb_id: nzb.id,
            subject: "par subject".to_string(),
            filename: "a.par2".to_string(),
            size: 1000,
            remaining_size: 1000,
            total_articles: 1,
            par_file: true,
            paused: true,
            hash16k: Some("ab".repeat(16)),
            par_set_id: Some("cd".repeat(16)),
            ..Default::default()
        };
        par.articles.push(ArticleInfo {
            part_number: 1,
            message_id: "p1@example".to_string(),
            size: 1000,
            ..Default::default()
        });
        disk.save_file(&par).unwrap();
        nzb.file_list.push(par);
        nzb.paused_file_count = 1;
        nzb.remaining_par_count = 1;
        nzb.update_current_stats();

        queue.queue.push(nzb);

        // one finished job in history
        let mut done = NzbInfo::new();
        done.id = queue.id_gen.next_nzb_id();
        done.name = "Finished.Job".to_string();
        done.par_status = ParStatus::Success;
        done.completed_files.push(CompletedFile {
            id: queue.id_gen.next_file_id(),
            filename: "done.mkv".to_string(),
            origname: "obf123".to_string(),
            status: CompletedFileStatus::Success,
            crc: 0xDEAD,
            par_file: false,
            hash16k: Some("11".repeat(16)),
            par_set_id: None,
        });
        queue.history.push(HistoryEntry::from_nzb(done, 1_700_000_100));

        // and one hidden duplicate shadow
        queue.history.push(HistoryEntry::from_dup(
            DupInfo {
                id: queue.id_gen.next_nzb_id(),
                name: "Old.Dupe".to_string(),
                dupe_key: "imdb:123".to_string(),
                dupe_score: 10,
                dupe_mode: DupeMode::Score,
                size: 777,
                full_content_hash: 1,
                filtered_content_hash: 2,
                status: DupStatus::Success,
            },
            1_600_000_000,
        ));

        queue
    }

    #[test]
    fn queue_round_trips_through_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskState::new(dir.path().to_path_buf()).unwrap();
        let queue = sample_queue(&disk);

        disk.save_queue(&queue).unwrap();
        let loaded = disk.load_queue().unwrap();

        assert_eq!(loaded.queue.len(), 1);
        assert_eq!(loaded.history.len(), 2);

        let nzb = &loaded.queue[0];
        let original = &queue.queue[0];
        assert_eq!(nzb.id, original.id);
        assert_eq!(nzb.name, original.name);
        assert_eq!(nzb.category, original.category);
        assert_eq!(nzb.dupe_key, original.dupe_key);
        assert_eq!(nzb.dupe_score, original.dupe_score);
        assert_eq!(nzb.size, original.size);
        assert_eq!(nzb.par_size, original.par_size);
        assert_eq!(nzb.full_content_hash, original.full_content_hash);
        assert_eq!(nzb.filtered_content_hash, original.filtered_content_hash);
        assert_eq!(nzb.parameters.0, original.parameters.0);

        assert_eq!(nzb.file_list.len(), 2);
        assert_eq!(nzb.file_list[0].filename, "a.rar");
        assert_eq!(nzb.file_list[0].articles.len(), 2);
        assert_eq!(nzb.file_list[0].articles[1].message_id, "m2@example");
        assert_eq!(nzb.file_list[0].subject, "subject with spaces \"a.rar\"");
        assert!(nzb.file_list[1].paused);
        assert!(nzb.file_list[1].par_file);
        assert_eq!(nzb.file_list[1].hash16k, Some("ab".repeat(16)));
        assert_eq!(nzb.paused_file_count, 1);
        assert_eq!(nzb.remaining_par_count, 1);
        assert_eq!(nzb.remaining_size, original.remaining_size);

        let history_nzb = loaded.history[0].nzb().unwrap();
        assert_eq!(history_nzb.name, "Finished.Job");
        assert_eq!(history_nzb.par_status, ParStatus::Success);
        assert_eq!(history_nzb.completed_files.len(), 1);
        assert_eq!(history_nzb.completed_files[0].filename, "done.mkv");
        assert_eq!(history_nzb.completed_files[0].origname, "obf123");
        assert_eq!(history_nzb.completed_files[0].status, CompletedFileStatus::Success);
        assert_eq!(loaded.history[0].time, 1_700_000_100);

        let dup = loaded.history[1].dup().unwrap();
        assert_eq!(dup.name, "Old.Dupe");
        assert_eq!(dup.status, DupStatus::Success);
        assert_eq!(dup.dupe_score, 10);
    }

    #[test]
    fn id_generator_continues_past_loaded_ids() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskState::new(dir.path().to_path_buf()).unwrap();
        let queue = sample_queue(&disk);
        let max_nzb = queue.history.iter().map(|e| e.id().get()).max().unwrap();

        disk.save_queue(&queue).unwrap();
        let mut loaded = disk.load_queue().unwrap();

        let next = loaded.id_gen.next_nzb_id();
        assert!(
            next.get() > max_nzb,
            "fresh id {next} must not collide with loaded ids (max {max_nzb})"
        );
    }

    #[test]
    fn partial_state_round_trips_and_resets_running_articles() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskState::new(dir.path().to_path_buf()).unwrap();

        let mut file = FileInfo {
            id: FileId(7),
            size: 3000,
            success_articles: 1,
            success_size: 1000,
            remaining_size: 1000,
            failed_articles: 1,
            failed_size: 1000,
            completed_articles: 2,
            ..Default::default()
        };
        for (number, status) in [
            (1, ArticleStatus::Finished),
            (2, ArticleStatus::Failed),
            (3, ArticleStatus::Running),
        ] {
            file.articles.push(ArticleInfo {
                part_number: number,
                size: 1000,
                status,
                crc: 42,
                ..Default::default()
            });
        }
        disk.save_file(&file).unwrap();
        disk.save_file_state(&file, false).unwrap();

        let mut loaded = FileInfo {
            id: FileId(7),
            ..Default::default()
        };
        assert!(disk.load_file(&mut loaded, true, false));
        assert!(disk.load_file_state(&mut loaded));

        assert_eq!(loaded.partial_state, PartialState::Partial);
        assert_eq!(loaded.success_articles, 1);
        assert_eq!(loaded.articles[0].status, ArticleStatus::Finished);
        assert_eq!(loaded.articles[1].status, ArticleStatus::Failed);
        assert_eq!(
            loaded.articles[2].status,
            ArticleStatus::Undefined,
            "a fetch interrupted by shutdown must restart from scratch"
        );
    }

    #[test]
    fn discard_file_removes_side_files() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskState::new(dir.path().to_path_buf()).unwrap();

        let file = FileInfo {
            id: FileId(3),
            ..Default::default()
        };
        disk.save_file(&file).unwrap();
        disk.save_file_state(&file, true).unwrap();

        disk.discard_file(FileId(3), true, true);
        let mut reload = FileInfo {
            id: FileId(3),
            ..Default::default()
        };
        assert!(!disk.load_file(&mut reload, true, false));
        assert!(!disk.load_file_state(&mut reload));
    }

    #[test]
    fn cache_flag_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskState::new(dir.path().to_path_buf()).unwrap();

        assert!(!disk.cache_flag_exists());
        disk.set_cache_flag();
        assert!(disk.cache_flag_exists());
        disk.clear_cache_flag();
        assert!(!disk.cache_flag_exists());
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let disk = DiskState::new(dir.path().to_path_buf()).unwrap();
        std::fs::write(dir.path().join("queue"), "NZBQUEUE 99\n").unwrap();

        let result = disk.load_queue();
        assert!(result.is_err(), "a future format version must not load silently");
    }
}
