//! Files within a job: live downloads and completed records

use crate::model::article::ArticleInfo;
use crate::model::stats::ServerStatList;
use crate::types::{ArticleStatus, CompletedFileStatus, FileId, NzbId, PartialState};

/// A posted file within a job, while it still has articles to download.
///
/// Created by the NZB parser; its remaining size drops as articles finish.
/// When all non-deleted articles terminate the file is converted to a
/// [`CompletedFile`] and removed from the live list. Retry and redownload
/// re-create live files from completed records.
#[derive(Clone, Debug, Default)]
pub struct FileInfo {
    /// File id, unique across all jobs
    pub id: FileId,
    /// Owning job id (back-reference; the job owns the file)
    pub nzb_id: NzbId,
    /// Raw subject line from the NZB
    pub subject: String,
    /// Filename parsed from the subject, possibly replaced by a rename
    pub filename: String,
    /// Name the file had before its first rename
    pub origname: String,
    /// Set once the filename was confirmed against PAR2 metadata
    pub filename_confirmed: bool,
    /// Article post time (Unix), used for age sorting
    pub time: i64,

    /// Sum of all article sizes
    pub size: i64,
    /// Bytes not yet fetched
    pub remaining_size: i64,
    /// Bytes fetched successfully
    pub success_size: i64,
    /// Bytes of failed articles
    pub failed_size: i64,
    /// Bytes of articles missing from the NZB (gaps in part numbers)
    pub missed_size: i64,

    /// Number of articles listed in the NZB plus detected gaps
    pub total_articles: i32,
    /// Articles missing from the NZB
    pub missed_articles: i32,
    /// Articles that failed to download
    pub failed_articles: i32,
    /// Articles downloaded successfully
    pub success_articles: i32,
    /// Articles in a terminal state
    pub completed_articles: i32,

    /// Excluded from scheduling by the user
    pub paused: bool,
    /// Marked for removal; articles are cancelled and the file finalizes
    pub deleted: bool,
    /// Classified as a PAR2 file
    pub par_file: bool,
    /// Scheduler boost used to hoist small par-index files to the front
    pub extra_priority: bool,
    /// Output file was created on disk
    pub output_initialized: bool,
    /// Deleted because a parked duplicate already holds this content
    pub dupe_deleted: bool,

    /// MD5 of the first 16 KiB, reconstructed from the first article
    pub hash16k: Option<String>,
    /// PAR2 recovery-set id, present when `par_file` is set
    pub par_set_id: Option<String>,
    /// CRC32 of the completed file
    pub crc: u32,

    /// Resumable partial-download state on disk
    pub partial_state: PartialState,
    /// On-disk temp name while the output is being written
    pub output_filename: Option<String>,
    /// Number of article fetches currently running for this file
    pub active_downloads: u32,

    /// Articles, ordered by part number
    pub articles: Vec<ArticleInfo>,
    /// Per-server success/failure counts
    pub server_stats: ServerStatList,
}

impl FileInfo {
    /// True when the file has no articles left worth scheduling
    pub fn no_more_articles(&self) -> bool {
        self.articles
            .iter()
            .all(|a| a.status != ArticleStatus::Undefined && a.status != ArticleStatus::Running)
    }

    /// First article not yet attempted, if any
    pub fn next_undefined_article(&self) -> Option<usize> {
        self.articles
            .iter()
            .position(|a| a.status == ArticleStatus::Undefined)
    }

    /// True while the output temp file has not been finalized yet.
    ///
    /// The direct renamer uses this to decide between an in-memory rename
    /// (the final write picks up the new name) and an on-disk move.
    pub fn output_pending(&self) -> bool {
        match &self.output_filename {
            Some(name) => crate::utils::ends_with_ignore_case(name, ".out.tmp"),
            None => true,
        }
    }

    /// Convert to a completed-file record, dropping the article vector
    pub fn to_completed(&self, status: CompletedFileStatus) -> CompletedFile {
        CompletedFile {
            id: self.id,
            filename: self.filename.clone(),
            origname: self.origname.clone(),
            status,
            crc: self.crc,
            par_file: self.par_file,
            hash16k: self.hash16k.clone(),
            par_set_id: self.par_set_id.clone(),
        }
    }
}

/// Record of a file that finished downloading (or was parked).
///
/// Immutable after the final commit, except for renames which update
/// `filename` and preserve the first `origname`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompletedFile {
    /// File id the record was created from
    pub id: FileId,
    /// Current on-disk name
    pub filename: String,
    /// Name before the first rename, empty when never renamed
    pub origname: String,
    /// Download outcome; `None` marks a parked, not-yet-tried file
    pub status: CompletedFileStatus,
    /// CRC32 of the file content
    pub crc: u32,
    /// Classified as a PAR2 file
    pub par_file: bool,
    /// MD5 of the first 16 KiB
    pub hash16k: Option<String>,
    /// PAR2 recovery-set id
    pub par_set_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_with_articles(statuses: &[ArticleStatus]) -> FileInfo {
        let articles = statuses
            .iter()
            .enumerate()
            .map(|(i, status)| ArticleInfo {
                part_number: i as i32 + 1,
                status: *status,
                size: 1000,
                ..Default::default()
            })
            .collect();
        FileInfo {
            articles,
            ..Default::default()
        }
    }

    #[test]
    fn no_more_articles_requires_all_terminal() {
        let running = file_with_articles(&[ArticleStatus::Finished, ArticleStatus::Running]);
        assert!(!running.no_more_articles());

        let done = file_with_articles(&[ArticleStatus::Finished, ArticleStatus::Failed]);
        assert!(done.no_more_articles());
    }

    #[test]
    fn next_undefined_article_picks_first_slot() {
        let file = file_with_articles(&[
            ArticleStatus::Finished,
            ArticleStatus::Undefined,
            ArticleStatus::Undefined,
        ]);
        assert_eq!(file.next_undefined_article(), Some(1));
    }

    #[test]
    fn output_pending_follows_temp_suffix() {
        let mut file = FileInfo::default();
        assert!(file.output_pending(), "no output yet means still pending");

        file.output_filename = Some("/d/abc.out.tmp".to_string());
        assert!(file.output_pending());

        file.output_filename = Some("/d/movie.mkv".to_string());
        assert!(!file.output_pending());
    }

    #[test]
    fn to_completed_preserves_fingerprints() {
        let file = FileInfo {
            id: FileId(7),
            filename: "data.bin".to_string(),
            par_file: true,
            hash16k: Some("abcd".to_string()),
            par_set_id: Some("ef01".to_string()),
            ..Default::default()
        };
        let completed = file.to_completed(CompletedFileStatus::Success);
        assert_eq!(completed.id, FileId(7));
        assert_eq!(completed.hash16k.as_deref(), Some("abcd"));
        assert_eq!(completed.par_set_id.as_deref(), Some("ef01"));
        assert!(completed.par_file);
    }
}
