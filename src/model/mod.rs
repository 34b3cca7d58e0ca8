//! Data model: jobs, files, articles, history and the queue itself.
//!
//! Ownership is strictly tree-shaped: the queue owns jobs, a job owns its
//! files and completed-file records, a file owns its articles. References
//! across the tree are ids resolved under the queue lock, never pointers.

pub mod article;
pub mod dup_info;
pub mod file;
pub mod history;
pub mod nzb_info;
pub mod queue;
pub mod stats;

pub use article::ArticleInfo;
pub use dup_info::DupInfo;
pub use file::{CompletedFile, FileInfo};
pub use history::{HistoryContent, HistoryEntry};
pub use nzb_info::NzbInfo;
pub use queue::{DownloadQueue, IdGenerators};
pub use stats::{
    NzbParameter, NzbParameterList, ScriptStatusEntry, ScriptStatusList, ServerStat,
    ServerStatList, StatOp,
};
