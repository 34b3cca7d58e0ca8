//! The download queue: live jobs, history and the id generators

use crate::model::history::HistoryEntry;
use crate::model::nzb_info::NzbInfo;
use crate::types::{FileId, NzbId};

/// Monotonic id generators for jobs and files.
///
/// Ids are never reused within a run. The generator state is persisted so
/// reloaded jobs keep their ids; after a load the generators continue one
/// past the maximum id seen.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdGenerators {
    nzb_gen: i32,
    nzb_max: i32,
    file_gen: i32,
    file_max: i32,
}

impl IdGenerators {
    /// Next fresh job id
    pub fn next_nzb_id(&mut self) -> NzbId {
        self.nzb_gen += 1;
        if self.nzb_max < self.nzb_gen {
            self.nzb_max = self.nzb_gen;
        }
        NzbId(self.nzb_gen)
    }

    /// Next fresh file id
    pub fn next_file_id(&mut self) -> FileId {
        self.file_gen += 1;
        if self.file_max < self.file_gen {
            self.file_max = self.file_gen;
        }
        FileId(self.file_gen)
    }

    /// Record an id loaded from disk so the generator never collides
    pub fn track_nzb_id(&mut self, id: NzbId) {
        if self.nzb_max < id.0 {
            self.nzb_max = id.0;
        }
    }

    /// Record a file id loaded from disk
    pub fn track_file_id(&mut self, id: FileId) {
        if self.file_max < id.0 {
            self.file_max = id.0;
        }
    }

    /// Continue generation past the maximum tracked ids
    pub fn reset_to_max(&mut self) {
        self.nzb_gen = self.nzb_max;
        self.file_gen = self.file_max;
    }
}

/// The queue and history, guarded as one unit by the single queue lock.
///
/// Insertion order is display order; priority is a separate field consulted
/// at scheduling time. The queue exclusively owns live jobs, the history
/// exclusively owns its entries.
#[derive(Debug, Default)]
pub struct DownloadQueue {
    /// Live jobs in display order
    pub queue: Vec<NzbInfo>,
    /// History entries, newest first
    pub history: Vec<HistoryEntry>,
    /// Id generators, persisted with the queue
    pub id_gen: IdGenerators,
    /// Queue state diverged from the persisted snapshot
    pub queue_changed: bool,
    /// History state diverged from the persisted snapshot
    pub history_changed: bool,
}

impl DownloadQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a live job by id
    pub fn find_nzb(&self, id: NzbId) -> Option<&NzbInfo> {
        self.queue.iter().find(|nzb| nzb.id == id)
    }

    /// Find a live job by id, mutably
    pub fn find_nzb_mut(&mut self, id: NzbId) -> Option<&mut NzbInfo> {
        self.queue.iter_mut().find(|nzb| nzb.id == id)
    }

    /// Position of a live job by id
    pub fn find_nzb_index(&self, id: NzbId) -> Option<usize> {
        self.queue.iter().position(|nzb| nzb.id == id)
    }

    /// Locate a file across all live jobs
    pub fn find_file(&self, id: FileId) -> Option<(usize, usize)> {
        for (nzb_index, nzb) in self.queue.iter().enumerate() {
            if let Some(file_index) = nzb.find_file(id) {
                return Some((nzb_index, file_index));
            }
        }
        None
    }

    /// Remove a live job, transferring ownership to the caller
    pub fn remove_nzb(&mut self, id: NzbId) -> Option<NzbInfo> {
        let index = self.find_nzb_index(id)?;
        self.queue_changed = true;
        Some(self.queue.remove(index))
    }

    /// Insert a job at the chosen end of the queue
    pub fn add_nzb(&mut self, nzb: NzbInfo, add_first: bool) {
        self.queue_changed = true;
        if add_first {
            self.queue.insert(0, nzb);
        } else {
            self.queue.push(nzb);
        }
    }

    /// Find a history entry by id
    pub fn find_history(&self, id: NzbId) -> Option<&HistoryEntry> {
        self.history.iter().find(|entry| entry.id() == id)
    }

    /// Position of a history entry by id
    pub fn find_history_index(&self, id: NzbId) -> Option<usize> {
        self.history.iter().position(|entry| entry.id() == id)
    }

    /// Mark the queue dirty for the persistence flusher
    pub fn queue_changed(&mut self) {
        self.queue_changed = true;
    }

    /// Mark the history dirty for the persistence flusher
    pub fn history_changed(&mut self) {
        self.history_changed = true;
    }

    /// True while any job still has unfinished download work
    pub fn has_remaining_work(&self) -> bool {
        self.queue.iter().any(|nzb| {
            nzb.active_downloads > 0
                || nzb
                    .file_list
                    .iter()
                    .any(|f| !f.deleted && !f.paused && !f.no_more_articles())
        })
    }

    /// Remaining unpaused bytes, total and for force-priority jobs
    pub fn calc_remaining_size(&self, force_priority: i32) -> (i64, i64) {
        let mut remaining = 0;
        let mut remaining_forced = 0;

        for nzb in &self.queue {
            for file in &nzb.file_list {
                if !file.paused && !file.deleted {
                    remaining += file.remaining_size;
                    if nzb.priority >= force_priority {
                        remaining_forced += file.remaining_size;
                    }
                }
            }
        }

        (remaining, remaining_forced)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::file::FileInfo;

    fn job(id: i32) -> NzbInfo {
        let mut nzb = NzbInfo::new();
        nzb.id = NzbId(id);
        nzb.name = format!("job-{id}");
        nzb
    }

    #[test]
    fn id_generators_never_reuse_after_load() {
        let mut gen = IdGenerators::default();
        gen.track_nzb_id(NzbId(41));
        gen.track_file_id(FileId(100));
        gen.reset_to_max();

        assert_eq!(gen.next_nzb_id(), NzbId(42));
        assert_eq!(gen.next_file_id(), FileId(101));
    }

    #[test]
    fn add_first_inserts_at_front() {
        let mut queue = DownloadQueue::new();
        queue.add_nzb(job(1), false);
        queue.add_nzb(job(2), true);
        queue.add_nzb(job(3), false);

        let ids: Vec<i32> = queue.queue.iter().map(|n| n.id.0).collect();
        assert_eq!(ids, [2, 1, 3]);
    }

    #[test]
    fn remove_transfers_ownership_and_marks_dirty() {
        let mut queue = DownloadQueue::new();
        queue.add_nzb(job(1), false);
        queue.queue_changed = false;

        let removed = queue.remove_nzb(NzbId(1)).unwrap();
        assert_eq!(removed.name, "job-1");
        assert!(queue.queue.is_empty());
        assert!(queue.queue_changed);

        assert!(queue.remove_nzb(NzbId(1)).is_none(), "second remove finds nothing");
    }

    #[test]
    fn find_file_searches_all_jobs() {
        let mut queue = DownloadQueue::new();
        let mut nzb = job(1);
        nzb.file_list.push(FileInfo {
            id: FileId(10),
            ..Default::default()
        });
        queue.add_nzb(nzb, false);
        queue.add_nzb(job(2), false);

        assert_eq!(queue.find_file(FileId(10)), Some((0, 0)));
        assert_eq!(queue.find_file(FileId(11)), None);
    }

    #[test]
    fn remaining_work_sees_undefined_articles() {
        let mut queue = DownloadQueue::new();
        let mut nzb = job(1);
        let mut file = FileInfo::default();
        file.articles.push(crate::model::article::ArticleInfo::default());
        nzb.file_list.push(file);
        queue.add_nzb(nzb, false);

        assert!(queue.has_remaining_work());

        queue.queue[0].file_list[0].paused = true;
        assert!(!queue.has_remaining_work(), "paused files do not count as work");
    }
}
