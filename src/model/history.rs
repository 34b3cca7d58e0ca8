//! History entries: finished jobs and hidden duplicate shadows

use crate::model::dup_info::DupInfo;
use crate::model::nzb_info::NzbInfo;
use crate::types::{NzbId, NzbKind};

/// What a history entry holds
#[derive(Clone, Debug)]
pub enum HistoryContent {
    /// A finished, failed or parked job (Nzb and Url jobs alike)
    Nzb(Box<NzbInfo>),
    /// The shadow of a hidden duplicate
    Dup(Box<DupInfo>),
}

/// One entry of the history list, stamped with the time it entered
#[derive(Clone, Debug)]
pub struct HistoryEntry {
    /// Unix timestamp of the move to history
    pub time: i64,
    /// Payload
    pub content: HistoryContent,
}

impl HistoryEntry {
    /// Wrap a job
    pub fn from_nzb(nzb: NzbInfo, time: i64) -> Self {
        Self {
            time,
            content: HistoryContent::Nzb(Box::new(nzb)),
        }
    }

    /// Wrap a duplicate shadow
    pub fn from_dup(dup: DupInfo, time: i64) -> Self {
        Self {
            time,
            content: HistoryContent::Dup(Box::new(dup)),
        }
    }

    /// Id of the contained job or shadow
    pub fn id(&self) -> NzbId {
        match &self.content {
            HistoryContent::Nzb(nzb) => nzb.id,
            HistoryContent::Dup(dup) => dup.id,
        }
    }

    /// Name of the contained job or shadow
    pub fn name(&self) -> &str {
        match &self.content {
            HistoryContent::Nzb(nzb) => &nzb.name,
            HistoryContent::Dup(dup) => &dup.name,
        }
    }

    /// True for hidden duplicate shadows
    pub fn is_dup(&self) -> bool {
        matches!(self.content, HistoryContent::Dup(_))
    }

    /// True for Url-kind jobs
    pub fn is_url(&self) -> bool {
        matches!(&self.content, HistoryContent::Nzb(nzb) if nzb.kind == NzbKind::Url)
    }

    /// Contained job, when the entry holds one
    pub fn nzb(&self) -> Option<&NzbInfo> {
        match &self.content {
            HistoryContent::Nzb(nzb) => Some(nzb),
            HistoryContent::Dup(_) => None,
        }
    }

    /// Mutable contained job
    pub fn nzb_mut(&mut self) -> Option<&mut NzbInfo> {
        match &mut self.content {
            HistoryContent::Nzb(nzb) => Some(nzb),
            HistoryContent::Dup(_) => None,
        }
    }

    /// Contained duplicate shadow, when the entry holds one
    pub fn dup(&self) -> Option<&DupInfo> {
        match &self.content {
            HistoryContent::Nzb(_) => None,
            HistoryContent::Dup(dup) => Some(dup),
        }
    }

    /// Mutable contained duplicate shadow
    pub fn dup_mut(&mut self) -> Option<&mut DupInfo> {
        match &mut self.content {
            HistoryContent::Nzb(_) => None,
            HistoryContent::Dup(dup) => Some(dup),
        }
    }
}
