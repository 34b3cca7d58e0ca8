//! Shadow record of a hidden duplicate in history

use crate::types::{DupStatus, DupeMode, NzbId};

/// The duplicate memory kept after a full history entry is hidden.
///
/// Holds just enough of the original job for the duplicate coordinator to
/// keep recognizing the same logical item across runs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DupInfo {
    /// Id inherited from the hidden job
    pub id: NzbId,
    /// Name of the hidden job
    pub name: String,
    /// Duplicate key
    pub dupe_key: String,
    /// Duplicate score
    pub dupe_score: i32,
    /// Duplicate mode
    pub dupe_mode: DupeMode,
    /// Total size of the hidden job
    pub size: i64,
    /// Content fingerprint over all articles
    pub full_content_hash: u32,
    /// Content fingerprint excluding par and ignorable files
    pub filtered_content_hash: u32,
    /// Final status derived from the hidden job's mark/delete statuses
    pub status: DupStatus,
}
