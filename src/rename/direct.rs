//! Direct renamer: identify files from their first articles and rename
//! them while the download is still running.
//!
//! The flow per job: every file's first article is analyzed for its
//! 16 KiB fingerprint and PAR2 magic. Once all fingerprints are in, the
//! smallest par file of each recovery set is unpaused with an extra
//! priority boost so the scheduler fetches the par indexes first. When
//! those finish, a one-shot loader parses their description packets off
//! the queue lock and a rename pass maps fingerprints to real names —
//! in memory for files whose output was not written yet, on disk for the
//! rest.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::model::{DownloadQueue, NzbInfo};
use crate::par2::{self, Par2FileEntry};
use crate::rename::analyzer::ContentFingerprint;
use crate::types::{MessageKind, NzbId, QueueEvent, TaskStatus};
use crate::utils;

/// Raw article sizes below this cannot carry a full fingerprint
const MIN_ANALYZABLE_SIZE: i64 = 16 * 1024;

/// One par file of a job, live or completed
struct ParFile {
    file_index: Option<usize>,
    filename: String,
    set_id: String,
    size: i64,
    completed: bool,
}

/// Drives in-flight renaming for all jobs. Shared by the coordinator and
/// the transient par-loader tasks.
#[derive(Clone)]
pub struct DirectRenamer {
    queue: Arc<Mutex<DownloadQueue>>,
    events: broadcast::Sender<QueueEvent>,
    config: Arc<Config>,
}

impl DirectRenamer {
    /// Create a renamer bound to the shared queue
    pub fn new(
        queue: Arc<Mutex<DownloadQueue>>,
        events: broadcast::Sender<QueueEvent>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            queue,
            events,
            config,
        }
    }

    /// Apply a first-article fingerprint to its file and advance the state
    /// machine. Called under the queue lock from the completion path.
    pub fn article_downloaded(
        &self,
        queue: &mut DownloadQueue,
        nzb_index: usize,
        file_index: usize,
        raw_article_size: i64,
        fingerprint: &ContentFingerprint,
    ) {
        let nzb = &mut queue.queue[nzb_index];
        let single_article = nzb.file_list[file_index].articles.len() == 1;

        // splits below 16 KiB cannot be fingerprinted reliably; the raw
        // article size decides, not the decoded length
        if raw_article_size >= MIN_ANALYZABLE_SIZE || single_article {
            nzb.file_list[file_index].hash16k = Some(fingerprint.hash16k.clone());
        }

        let filename = nzb.file_list[file_index].filename.clone();
        nzb.add_message(
            MessageKind::Detail,
            format!(
                "Detected {} {}",
                if fingerprint.par_file {
                    "par2-file"
                } else {
                    "non-par2-file"
                },
                filename
            ),
        );

        if nzb.file_list[file_index].par_file != fingerprint.par_file {
            Self::flip_par_flag(nzb, file_index, fingerprint.par_file);
            queue.queue_changed();
        }

        let nzb = &mut queue.queue[nzb_index];
        if nzb.file_list[file_index].par_file {
            nzb.file_list[file_index].par_set_id = fingerprint.par_set_id.clone();
        }

        self.check_state(queue, nzb_index);
    }

    /// Advance the state machine after a file finished
    pub fn file_downloaded(&self, queue: &mut DownloadQueue, nzb_id: NzbId) {
        if let Some(nzb_index) = queue.find_nzb_index(nzb_id) {
            self.check_state(queue, nzb_index);
        }
    }

    /// The subject-derived par classification was wrong; move the file's
    /// contribution between the par and non-par aggregates.
    fn flip_par_flag(nzb: &mut NzbInfo, file_index: usize, par_file: bool) {
        let delta: i64 = if par_file { 1 } else { -1 };
        let (size, success_size, failed_size, missed_size, paused) = {
            let file = &nzb.file_list[file_index];
            (
                file.size,
                file.success_size,
                file.failed_size,
                file.missed_size,
                file.paused,
            )
        };

        nzb.file_list[file_index].par_file = par_file;
        nzb.par_size += size * delta;
        nzb.par_current_success_size += success_size * delta;
        nzb.par_current_failed_size += (failed_size + missed_size) * delta;
        nzb.par_failed_size += missed_size * delta;
        nzb.remaining_par_count += delta as i32;

        if !par_file && paused {
            let filename = nzb.file_list[file_index].filename.clone();
            nzb.add_message(
                MessageKind::Info,
                format!("Resuming non-par2-file {filename}"),
            );
            nzb.set_file_paused(file_index, false);
        }

        nzb.changed = true;
    }

    /// The state machine: fingerprints → boosted pars → loader
    pub fn check_state(&self, queue: &mut DownloadQueue, nzb_index: usize) {
        let nzb = &mut queue.queue[nzb_index];

        if nzb.direct_rename_status > TaskStatus::Running {
            return;
        }

        // every live and completed file needs its fingerprint (and par
        // files their set id) before par selection makes sense
        let live_ready = nzb.file_list.iter().all(|f| {
            f.hash16k.as_deref().map_or(false, |h| !h.is_empty())
                && (!f.par_file || f.par_set_id.as_deref().map_or(false, |s| !s.is_empty()))
        });
        let completed_ready = nzb.completed_files.iter().all(|f| {
            f.hash16k.as_deref().map_or(false, |h| !h.is_empty())
                && (!f.par_file || f.par_set_id.as_deref().map_or(false, |s| !s.is_empty()))
        });
        if !live_ready || !completed_ready {
            return;
        }

        if !nzb.waiting_par {
            Self::unpause_pars(nzb);
            nzb.waiting_par = true;
            nzb.changed = true;
            queue.queue_changed();
        }

        let nzb = &mut queue.queue[nzb_index];
        if nzb.waiting_par && !nzb.loading_par {
            let boosted_remaining = nzb.file_list.iter().any(|f| f.extra_priority);
            if !boosted_remaining {
                nzb.loading_par = true;
                let name = nzb.name.clone();
                nzb.add_message(
                    MessageKind::Info,
                    format!("Directly checking renamed files for {name}"),
                );

                let par_files: Vec<std::path::PathBuf> = nzb
                    .completed_files
                    .iter()
                    .filter(|f| f.par_file)
                    .map(|f| nzb.dest_dir.join(&f.filename))
                    .collect();
                let nzb_id = nzb.id;

                let renamer = self.clone();
                tokio::spawn(async move {
                    renamer.run_par_loader(nzb_id, par_files).await;
                });
            }
        }
    }

    /// Unpause the smallest par file of each recovery set and boost it
    fn unpause_pars(nzb: &mut NzbInfo) {
        let mut par_files = Self::collect_pars(nzb);

        // completed par files sort first, live ones by size ascending
        par_files.sort_by(|a, b| match (a.completed, b.completed) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.size.cmp(&b.size),
        });

        let mut parsets: Vec<String> = par_files
            .iter()
            .filter(|p| p.completed)
            .map(|p| p.set_id.clone())
            .collect();

        for par_file in &par_files {
            if parsets.iter().any(|s| s == &par_file.set_id) {
                continue;
            }
            parsets.push(par_file.set_id.clone());

            if let Some(file_index) = par_file.file_index {
                nzb.add_message(
                    MessageKind::Info,
                    format!("Increasing priority for par2-file {}", par_file.filename),
                );
                nzb.set_file_paused(file_index, false);
                nzb.set_file_extra_priority(file_index, true);
            }
        }
    }

    fn collect_pars(nzb: &NzbInfo) -> Vec<ParFile> {
        let mut par_files = Vec::new();

        for (file_index, file) in nzb.file_list.iter().enumerate() {
            if file.par_file {
                par_files.push(ParFile {
                    file_index: Some(file_index),
                    filename: file.filename.clone(),
                    set_id: file.par_set_id.clone().unwrap_or_default(),
                    size: file.size,
                    completed: false,
                });
            }
        }

        for completed in &nzb.completed_files {
            if completed.par_file {
                par_files.push(ParFile {
                    file_index: None,
                    filename: completed.filename.clone(),
                    set_id: completed.par_set_id.clone().unwrap_or_default(),
                    size: 0,
                    completed: true,
                });
            }
        }

        par_files
    }

    /// One-shot loader: parse the downloaded par files without holding the
    /// queue lock, then re-acquire it and run the rename pass if the job
    /// is still in the queue.
    async fn run_par_loader(&self, nzb_id: NzbId, par_files: Vec<std::path::PathBuf>) {
        tracing::debug!(nzb_id = %nzb_id, files = par_files.len(), "direct par loader started");

        let mut par_hashes: Vec<Par2FileEntry> = Vec::new();
        let mut loaded_any = false;

        for par_file in par_files {
            let path = par_file.clone();
            let entries =
                tokio::task::spawn_blocking(move || par2::parse_file_entries(&path)).await;

            let mut queue = self.queue.lock().await;
            let nzb = match queue.find_nzb_mut(nzb_id) {
                Some(nzb) => nzb,
                // job left the queue while we were parsing
                None => return,
            };

            match entries {
                Ok(Ok(entries)) if !entries.is_empty() => {
                    loaded_any = true;
                    nzb.add_message(
                        MessageKind::Info,
                        format!(
                            "Loaded par2-file {} for direct-rename",
                            utils::base_file_name(&par_file.to_string_lossy())
                        ),
                    );
                    for entry in entries {
                        if !par_hashes.iter().any(|e| e.hash16k == entry.hash16k) {
                            par_hashes.push(entry);
                        }
                    }
                }
                _ => {
                    nzb.add_message(
                        MessageKind::Warning,
                        format!("Could not load par2-file {}", par_file.display()),
                    );
                }
            }
        }

        let mut queue = self.queue.lock().await;
        if let Some(nzb_index) = queue.find_nzb_index(nzb_id) {
            self.rename_files(&mut queue, nzb_index, &par_hashes, loaded_any);
        }
    }

    /// Apply the loaded `{filename, hash16k}` pairs to the job's live and
    /// completed files. Called under the queue lock.
    pub fn rename_files(
        &self,
        queue: &mut DownloadQueue,
        nzb_index: usize,
        par_hashes: &[Par2FileEntry],
        loaded_ok: bool,
    ) {
        let nzb = &mut queue.queue[nzb_index];
        let mut renamed_count = 0usize;

        let rename_pars = Self::need_rename_pars(nzb);
        let mut vol = 1;

        // live files first: a file whose output is still pending renames
        // in memory, the final write then uses the new name
        for file_index in 0..nzb.file_list.len() {
            let (par_file, filename, set_id, hash16k) = {
                let file = &nzb.file_list[file_index];
                (
                    file.par_file,
                    file.filename.clone(),
                    file.par_set_id.clone().unwrap_or_default(),
                    file.hash16k.clone(),
                )
            };

            let new_name = if par_file && rename_pars {
                Some(Self::build_new_par_name(
                    &filename,
                    &nzb.dest_dir,
                    &set_id,
                    &mut vol,
                ))
            } else if !par_file {
                Self::build_new_regular_name(&filename, par_hashes, hash16k.as_deref())
            } else {
                None
            };

            let new_name = match new_name {
                Some(name) => name,
                None => continue,
            };

            if nzb.file_list[file_index].output_pending() {
                nzb.add_message(
                    MessageKind::Info,
                    format!("Renaming in-progress file {filename} to {new_name}"),
                );
                let file = &mut nzb.file_list[file_index];
                if file.origname.is_empty() {
                    file.origname = file.filename.clone();
                }
                file.filename = new_name;
                file.filename_confirmed = true;
                renamed_count += 1;
            } else if Self::rename_completed_file(nzb, &filename, &new_name) {
                let file = &mut nzb.file_list[file_index];
                if file.origname.is_empty() {
                    file.origname = file.filename.clone();
                }
                file.filename = new_name;
                file.filename_confirmed = true;
                renamed_count += 1;
            }
        }

        // completed files always rename on disk
        for completed_index in 0..nzb.completed_files.len() {
            let (par_file, filename, set_id, hash16k) = {
                let completed = &nzb.completed_files[completed_index];
                (
                    completed.par_file,
                    completed.filename.clone(),
                    completed.par_set_id.clone().unwrap_or_default(),
                    completed.hash16k.clone(),
                )
            };

            let new_name = if par_file && rename_pars {
                Some(Self::build_new_par_name(
                    &filename,
                    &nzb.dest_dir,
                    &set_id,
                    &mut vol,
                ))
            } else if !par_file {
                Self::build_new_regular_name(&filename, par_hashes, hash16k.as_deref())
            } else {
                None
            };

            if let Some(new_name) = new_name {
                if Self::rename_completed_file(nzb, &filename, &new_name) {
                    let completed = &mut nzb.completed_files[completed_index];
                    if completed.origname.is_empty() {
                        completed.origname = completed.filename.clone();
                    }
                    completed.filename = new_name;
                    renamed_count += 1;
                }
            }
        }

        let name = nzb.name.clone();
        if renamed_count > 0 {
            nzb.add_message(
                MessageKind::Info,
                format!("Successfully renamed {renamed_count} file(s) for {name}"),
            );
        } else {
            nzb.add_message(MessageKind::Info, format!("No renamed files found for {name}"));
        }

        nzb.direct_rename_status = if loaded_ok {
            TaskStatus::Success
        } else {
            TaskStatus::Failure
        };
        nzb.changed = true;
        let id = nzb.id;
        queue.queue_changed();

        self.events
            .send(QueueEvent::RenameCompleted {
                id,
                renamed: renamed_count,
            })
            .ok();
    }

    /// The recorded name for a fingerprint, when it differs from the
    /// current one
    fn build_new_regular_name(
        old_name: &str,
        par_hashes: &[Par2FileEntry],
        hash16k: Option<&str>,
    ) -> Option<String> {
        let hash16k = hash16k.filter(|h| !h.is_empty())?;

        let entry = par_hashes.iter().find(|e| e.hash16k == hash16k)?;
        if !utils::str_eq_ignore_case(old_name, &entry.filename) {
            return Some(entry.filename.clone());
        }
        None
    }

    /// A canonical par name: preserve a `.volNNN+NN.par2` suffix on the
    /// set id, else synthesize `<setid>.volNNN+01.PAR2` avoiding on-disk
    /// collisions
    fn build_new_par_name(old_name: &str, dest_dir: &Path, set_id: &str, vol: &mut i32) -> String {
        let lower = old_name.to_ascii_lowercase();
        if let Some(suffix_pos) = lower.find(".vol") {
            let suffix = &old_name[suffix_pos..];
            if utils::ends_with_ignore_case(suffix, ".par2") {
                let new_name = format!("{set_id}{suffix}");
                if !dest_dir.join(&new_name).exists() {
                    return new_name;
                }
            }
        }

        loop {
            let new_name = format!("{set_id}.vol{:03}+01.PAR2", *vol);
            *vol += 1;
            if !dest_dir.join(&new_name).exists() {
                return new_name;
            }
        }
    }

    /// Par files need renaming when any of them lacks the `.par2`
    /// extension or two files of one set follow different base-name
    /// conventions
    fn need_rename_pars(nzb: &NzbInfo) -> bool {
        let par_files = Self::collect_pars(nzb);

        for par_file in &par_files {
            if !par2::has_par2_extension(&par_file.filename) {
                return true;
            }

            for par_file2 in &par_files {
                if !std::ptr::eq(par_file, par_file2)
                    && par_file.set_id == par_file2.set_id
                    && !par2::same_par_collection(&par_file.filename, &par_file2.filename)
                {
                    return true;
                }
            }
        }

        false
    }

    /// Move an already-written file; an existing target fails this rename
    /// but the pass continues with other files
    fn rename_completed_file(nzb: &mut NzbInfo, old_name: &str, new_name: &str) -> bool {
        let old_path = nzb.dest_dir.join(old_name);
        let new_path = nzb.dest_dir.join(new_name);
        nzb.add_message(
            MessageKind::Info,
            format!("Renaming completed file {old_name} to {new_name}"),
        );
        if let Err(e) = utils::move_file_no_replace(&old_path, &new_path) {
            nzb.add_message(
                MessageKind::Error,
                format!("Could not rename completed file {old_name} to {new_name}: {e}"),
            );
            return false;
        }
        true
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompletedFile, FileInfo};
    use crate::types::FileId;

    fn renamer_with_queue() -> (DirectRenamer, Arc<Mutex<DownloadQueue>>) {
        let queue = Arc::new(Mutex::new(DownloadQueue::new()));
        let (events, _) = broadcast::channel(64);
        let renamer = DirectRenamer::new(queue.clone(), events, Arc::new(Config::default()));
        (renamer, queue)
    }

    fn job_with_files(files: Vec<FileInfo>) -> NzbInfo {
        let mut nzb = NzbInfo::new();
        nzb.id = NzbId(1);
        nzb.name = "job".to_string();
        nzb.direct_rename_status = TaskStatus::Running;
        nzb.file_list = files;
        nzb
    }

    fn par(id: i32, name: &str, set_id: &str, size: i64, paused: bool) -> FileInfo {
        FileInfo {
            id: FileId(id),
            filename: name.to_string(),
            par_file: true,
            par_set_id: Some(set_id.to_string()),
            hash16k: Some("00".repeat(16)),
            size,
            paused,
            ..Default::default()
        }
    }

    #[test]
    fn unpause_pars_boosts_smallest_per_set() {
        let mut nzb = job_with_files(vec![
            par(1, "a.vol00+1.par2", "set1", 5000, true),
            par(2, "a.par2", "set1", 700, true),
            par(3, "b.par2", "set2", 900, true),
        ]);
        nzb.paused_file_count = 3;
        nzb.paused_size = 0;

        DirectRenamer::unpause_pars(&mut nzb);

        assert!(!nzb.file_list[1].paused, "smallest of set1 unpaused");
        assert!(nzb.file_list[1].extra_priority);
        assert!(!nzb.file_list[2].paused, "smallest of set2 unpaused");
        assert!(nzb.file_list[2].extra_priority);
        assert!(nzb.file_list[0].paused, "bigger vol of set1 stays paused");
        assert!(!nzb.file_list[0].extra_priority);
    }

    #[test]
    fn unpause_pars_skips_sets_already_completed() {
        let mut nzb = job_with_files(vec![par(1, "a.vol01+2.par2", "set1", 5000, true)]);
        nzb.completed_files.push(CompletedFile {
            id: FileId(9),
            filename: "a.par2".to_string(),
            par_file: true,
            hash16k: Some("00".repeat(16)),
            par_set_id: Some("set1".to_string()),
            ..Default::default()
        });

        DirectRenamer::unpause_pars(&mut nzb);
        assert!(
            nzb.file_list[0].paused,
            "set already has a completed par file, nothing to boost"
        );
    }

    #[test]
    fn need_rename_pars_on_missing_extension() {
        let nzb = job_with_files(vec![par(1, "obfuscated123", "set1", 100, false)]);
        assert!(DirectRenamer::need_rename_pars(&nzb));
    }

    #[test]
    fn need_rename_pars_on_mixed_collections_in_one_set() {
        let nzb = job_with_files(vec![
            par(1, "abc.par2", "set1", 100, false),
            par(2, "xyz.vol00+1.par2", "set1", 100, false),
        ]);
        assert!(DirectRenamer::need_rename_pars(&nzb));
    }

    #[test]
    fn need_rename_pars_false_for_consistent_set() {
        let nzb = job_with_files(vec![
            par(1, "abc.par2", "set1", 100, false),
            par(2, "abc.vol00+1.par2", "set1", 100, false),
        ]);
        assert!(!DirectRenamer::need_rename_pars(&nzb));
    }

    #[test]
    fn build_par_name_reuses_vol_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let mut vol = 1;
        let name =
            DirectRenamer::build_new_par_name("junk.vol003+04.PAR2", dir.path(), "cafe", &mut vol);
        assert_eq!(name, "cafe.vol003+04.PAR2");
        assert_eq!(vol, 1, "synthesis counter untouched when suffix reused");
    }

    #[test]
    fn build_par_name_synthesizes_avoiding_collisions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cafe.vol001+01.PAR2"), b"x").unwrap();

        let mut vol = 1;
        let name = DirectRenamer::build_new_par_name("junk", dir.path(), "cafe", &mut vol);
        assert_eq!(name, "cafe.vol002+01.PAR2");
    }

    #[test]
    fn regular_name_lookup_matches_hash_and_differs() {
        let hashes = vec![Par2FileEntry {
            filename: "real.mkv".to_string(),
            hash16k: "aa".to_string(),
        }];

        assert_eq!(
            DirectRenamer::build_new_regular_name("obf.bin", &hashes, Some("aa")),
            Some("real.mkv".to_string())
        );
        assert_eq!(
            DirectRenamer::build_new_regular_name("REAL.mkv", &hashes, Some("aa")),
            None,
            "case-insensitively equal names do not rename"
        );
        assert_eq!(
            DirectRenamer::build_new_regular_name("obf.bin", &hashes, Some("bb")),
            None
        );
        assert_eq!(DirectRenamer::build_new_regular_name("obf.bin", &hashes, None), None);
    }

    #[tokio::test]
    async fn rename_files_updates_in_progress_files_in_memory() {
        let (renamer, queue_arc) = renamer_with_queue();
        let dir = tempfile::tempdir().unwrap();

        let mut nzb = job_with_files(vec![FileInfo {
            id: FileId(1),
            filename: "obfuscated.bin".to_string(),
            hash16k: Some("aa".to_string()),
            output_filename: Some(
                dir.path().join("obfuscated.bin.out.tmp").to_string_lossy().into_owned(),
            ),
            ..Default::default()
        }]);
        nzb.dest_dir = dir.path().to_path_buf();

        let hashes = vec![Par2FileEntry {
            filename: "movie.mkv".to_string(),
            hash16k: "aa".to_string(),
        }];

        let mut queue = queue_arc.lock().await;
        queue.add_nzb(nzb, false);
        renamer.rename_files(&mut queue, 0, &hashes, true);

        let file = &queue.queue[0].file_list[0];
        assert_eq!(file.filename, "movie.mkv");
        assert_eq!(file.origname, "obfuscated.bin");
        assert!(file.filename_confirmed);
        assert_eq!(queue.queue[0].direct_rename_status, TaskStatus::Success);
    }

    #[tokio::test]
    async fn rename_files_moves_completed_files_on_disk() {
        let (renamer, queue_arc) = renamer_with_queue();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("123456"), b"data").unwrap();

        let mut nzb = job_with_files(vec![]);
        nzb.dest_dir = dir.path().to_path_buf();
        nzb.completed_files.push(CompletedFile {
            id: FileId(1),
            filename: "123456".to_string(),
            hash16k: Some("aa".to_string()),
            ..Default::default()
        });

        let hashes = vec![Par2FileEntry {
            filename: "testfile.dat".to_string(),
            hash16k: "aa".to_string(),
        }];

        let mut queue = queue_arc.lock().await;
        queue.add_nzb(nzb, false);
        renamer.rename_files(&mut queue, 0, &hashes, true);

        assert!(dir.path().join("testfile.dat").exists());
        assert!(!dir.path().join("123456").exists());
        assert_eq!(queue.queue[0].completed_files[0].filename, "testfile.dat");
        assert_eq!(queue.queue[0].completed_files[0].origname, "123456");
    }

    #[tokio::test]
    async fn rename_files_never_clobbers_existing_target() {
        let (renamer, queue_arc) = renamer_with_queue();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("123456"), b"data").unwrap();
        std::fs::write(dir.path().join("testfile.dat"), b"already here").unwrap();

        let mut nzb = job_with_files(vec![]);
        nzb.dest_dir = dir.path().to_path_buf();
        nzb.completed_files.push(CompletedFile {
            id: FileId(1),
            filename: "123456".to_string(),
            hash16k: Some("aa".to_string()),
            ..Default::default()
        });

        let hashes = vec![Par2FileEntry {
            filename: "testfile.dat".to_string(),
            hash16k: "aa".to_string(),
        }];

        let mut queue = queue_arc.lock().await;
        queue.add_nzb(nzb, false);
        renamer.rename_files(&mut queue, 0, &hashes, true);

        assert_eq!(
            std::fs::read(dir.path().join("testfile.dat")).unwrap(),
            b"already here",
            "existing target must stay untouched"
        );
        assert_eq!(
            queue.queue[0].completed_files[0].filename, "123456",
            "failed rename leaves the record unchanged"
        );
    }

    #[tokio::test]
    async fn check_state_waits_for_all_fingerprints() {
        let (renamer, queue_arc) = renamer_with_queue();

        let mut file = FileInfo {
            id: FileId(1),
            filename: "a.bin".to_string(),
            ..Default::default()
        };
        file.hash16k = None;
        let nzb = job_with_files(vec![file]);

        let mut queue = queue_arc.lock().await;
        queue.add_nzb(nzb, false);
        renamer.check_state(&mut queue, 0);
        assert!(
            !queue.queue[0].waiting_par,
            "missing fingerprint must hold the state machine"
        );

        queue.queue[0].file_list[0].hash16k = Some("aa".to_string());
        renamer.check_state(&mut queue, 0);
        assert!(queue.queue[0].waiting_par, "all fingerprints present");
    }
}
