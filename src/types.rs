//! Core identifiers, status enums and the queue event bus.
//!
//! Every per-job status is a small closed enum with a stable integer
//! encoding used by the disk-state format. The encodings round-trip through
//! `to_i32`/`from_i32`; unknown values decode to the variant that makes a
//! corrupted state surface visibly rather than silently look healthy.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier of a job (an NZB collection) in the queue or history.
///
/// Ids are assigned monotonically, never reused within a run, and the
/// generator state survives restarts (reloaded jobs keep their ids and the
/// generator continues past the maximum seen).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NzbId(pub i32);

impl NzbId {
    /// Get the inner i32 value
    pub fn get(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for NzbId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for NzbId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Unique identifier of a file within a job.
///
/// File ids share one monotonic generator across all jobs so that edit
/// commands can address files without naming the owning job.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FileId(pub i32);

impl FileId {
    /// Get the inner i32 value
    pub fn get(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Declares a status enum with a stable integer encoding.
///
/// Produces `to_i32` and `from_i32`; unknown integers decode to the first
/// listed fallback variant.
macro_rules! status_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident = $value:literal),+ $(,)? }
        fallback = $fallback:ident
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $(
                #[allow(missing_docs)]
                $variant = $value,
            )+
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$fallback
            }
        }

        impl $name {
            /// Convert the stable integer encoding to the enum
            pub fn from_i32(value: i32) -> Self {
                match value {
                    $($value => Self::$variant,)+
                    _ => Self::$fallback,
                }
            }

            /// Convert the enum to its stable integer encoding
            pub fn to_i32(self) -> i32 {
                self as i32
            }
        }
    };
}

status_enum! {
    /// Kind of a queued job
    NzbKind { Nzb = 0, Url = 1 }
    fallback = Nzb
}

status_enum! {
    /// Par-check outcome for a job
    ParStatus { None = 0, Skipped = 1, Failure = 2, Success = 3, RepairPossible = 4, Manual = 5 }
    fallback = None
}

status_enum! {
    /// Unpack outcome for a job
    UnpackStatus { None = 0, Skipped = 1, Failure = 2, Success = 3, Space = 4, Password = 5 }
    fallback = None
}

status_enum! {
    /// Progress of a background task attached to a job (direct rename,
    /// direct unpack)
    TaskStatus { None = 0, Running = 1, Failure = 2, Success = 3 }
    fallback = None
}

status_enum! {
    /// Outcome of a post-download rename pass (par-rename, rar-rename)
    PostRenameStatus { None = 0, Skipped = 1, Nothing = 2, Success = 3 }
    fallback = None
}

status_enum! {
    /// Outcome of the cleanup stage
    CleanupStatus { None = 0, Failure = 1, Success = 2 }
    fallback = None
}

status_enum! {
    /// Outcome of the move-to-final-directory stage
    MoveStatus { None = 0, Failure = 1, Success = 2 }
    fallback = None
}

status_enum! {
    /// Why a job was deleted from the queue
    DeleteStatus { None = 0, Manual = 1, Health = 2, Dupe = 3, Bad = 4, Good = 5, Copy = 6, Scan = 7 }
    fallback = None
}

status_enum! {
    /// User verdict on a history entry
    MarkStatus { None = 0, Bad = 1, Good = 2, Success = 3 }
    fallback = None
}

status_enum! {
    /// Progress of a URL-fetch job
    UrlStatus { None = 0, Running = 1, Finished = 2, Failed = 3, Retry = 4, ScanSkipped = 5, ScanFailed = 6 }
    fallback = None
}

status_enum! {
    /// How duplicates with the same key are resolved
    DupeMode { Score = 0, All = 1, Force = 2 }
    fallback = Score
}

status_enum! {
    /// Marks a job that re-entered the queue via redownload
    DupeHint { None = 0, RedownloadManual = 1, RedownloadAuto = 2 }
    fallback = None
}

status_enum! {
    /// Final status of a hidden duplicate (DupInfo) in history
    DupStatus { Undefined = 0, Success = 1, Failed = 2, Deleted = 3, Dupe = 4, Bad = 5, Good = 6 }
    fallback = Undefined
}

status_enum! {
    /// State of a single article fetch
    ArticleStatus { Undefined = 0, Running = 1, Finished = 2, Failed = 3 }
    fallback = Undefined
}

status_enum! {
    /// Whether a file carries resumable partial-download state on disk
    PartialState { None = 0, Partial = 1, Completed = 2 }
    fallback = None
}

status_enum! {
    /// Final status of a completed (or parked) file
    CompletedFileStatus { None = 0, Success = 1, Partial = 2, Failure = 3 }
    fallback = None
}

status_enum! {
    /// Outcome of one post-processing script
    ScriptStatus { None = 0, Failure = 1, Success = 2 }
    fallback = None
}

status_enum! {
    /// Severity of a job message
    MessageKind { Debug = 0, Detail = 1, Info = 2, Warning = 3, Error = 4 }
    fallback = Info
}

/// What to do with a job whose health drops below critical
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckAction {
    /// Keep downloading regardless of health
    #[default]
    None,
    /// Pause the job and leave the decision to the user
    Pause,
    /// Cancel the download and delete the job
    Delete,
    /// Cancel the download and park it in history
    Park,
}

/// Result of handing a file to the scanner
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddStatus {
    /// File was not processed (still size-unstable, wrong extension, ...)
    #[default]
    Skipped,
    /// File was parsed and queued
    Success,
    /// File could not be parsed or queued
    Failed,
}

/// One entry of a job's bounded message ring
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Monotonic message id within the job
    pub id: u32,
    /// Severity
    pub kind: MessageKind,
    /// Unix timestamp of the message
    pub time: i64,
    /// Message text
    pub text: String,
}

/// Aspect notifications emitted by the queue under its lock.
///
/// Observers see events in the order the corresponding state mutation
/// committed. Delivery uses a broadcast channel; slow subscribers may lag
/// and lose events, never block the queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A parsed job is about to be inserted (duplicate checks already ran)
    NzbFound {
        /// Job id
        id: NzbId,
        /// Job name
        name: String,
    },

    /// A job was inserted into the queue
    NzbAdded {
        /// Job id
        id: NzbId,
        /// Job name
        name: String,
    },

    /// A job was deleted from the queue
    NzbDeleted {
        /// Job id
        id: NzbId,
    },

    /// A job was renamed
    NzbNamed {
        /// Job id
        id: NzbId,
        /// New job name
        name: String,
    },

    /// All segments of one file finished and the file left the live list
    FileCompleted {
        /// Owning job id
        id: NzbId,
        /// File id
        file_id: FileId,
        /// Filename at completion time
        filename: String,
    },

    /// A file was deleted from a job
    FileDeleted {
        /// Owning job id
        id: NzbId,
        /// File id
        file_id: FileId,
    },

    /// All files of a job terminated; the job enters post-processing
    NzbDownloaded {
        /// Job id
        id: NzbId,
    },

    /// A job returned from history back to the queue
    NzbReturned {
        /// Job id
        id: NzbId,
    },

    /// A URL job returned from history back to the queue
    UrlReturned {
        /// Job id
        id: NzbId,
    },

    /// The direct or par renamer finished a pass over a job
    RenameCompleted {
        /// Job id
        id: NzbId,
        /// Number of files renamed in the pass
        renamed: usize,
    },

    /// A job moved from the queue into history
    HistoryAdded {
        /// Job id
        id: NzbId,
    },

    /// Post-processing finished and the final status is known
    NzbCompleted {
        /// Job id
        id: NzbId,
        /// Deterministic status text, e.g. `SUCCESS/ALL`
        status: String,
        /// Final directory containing the files
        path: PathBuf,
    },

    /// Graceful shutdown initiated
    Shutdown,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn delete_status_round_trips_through_i32_for_all_variants() {
        let cases = [
            (DeleteStatus::None, 0),
            (DeleteStatus::Manual, 1),
            (DeleteStatus::Health, 2),
            (DeleteStatus::Dupe, 3),
            (DeleteStatus::Bad, 4),
            (DeleteStatus::Good, 5),
            (DeleteStatus::Copy, 6),
            (DeleteStatus::Scan, 7),
        ];
        for (variant, expected) in cases {
            assert_eq!(variant.to_i32(), expected, "{variant:?} should encode to {expected}");
            assert_eq!(
                DeleteStatus::from_i32(expected),
                variant,
                "{expected} should decode to {variant:?}"
            );
        }
    }

    #[test]
    fn unknown_status_integers_fall_back_to_initial_variant() {
        assert_eq!(ParStatus::from_i32(99), ParStatus::None);
        assert_eq!(ArticleStatus::from_i32(-1), ArticleStatus::Undefined);
        assert_eq!(DupStatus::from_i32(42), DupStatus::Undefined);
    }

    #[test]
    fn url_status_encoding_is_stable() {
        assert_eq!(UrlStatus::ScanFailed.to_i32(), 6);
        assert_eq!(UrlStatus::from_i32(5), UrlStatus::ScanSkipped);
    }

    #[test]
    fn nzb_id_parses_and_displays() {
        let id = NzbId::from_str("37").unwrap();
        assert_eq!(id.get(), 37);
        assert_eq!(id.to_string(), "37");
        assert!(NzbId::from_str("x").is_err(), "non-numeric id must not parse");
    }

    #[test]
    fn status_enums_default_to_initial_state() {
        assert_eq!(ParStatus::default(), ParStatus::None);
        assert_eq!(MarkStatus::default(), MarkStatus::None);
        assert_eq!(PartialState::default(), PartialState::None);
        assert_eq!(DupeMode::default(), DupeMode::Score);
    }
}
