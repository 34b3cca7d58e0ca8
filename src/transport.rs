//! Article transport interface.
//!
//! The queue never speaks NNTP itself. It asks a transport to download one
//! article and receives the decoded bytes back; connection pooling, server
//! selection and retry-on-alternate-server all live behind this trait.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::types::{FileId, NzbId};

/// A request to download one article
#[derive(Clone, Debug)]
pub struct ArticleRequest {
    /// Owning job
    pub nzb_id: NzbId,
    /// Owning file
    pub file_id: FileId,
    /// 1-based part number within the file
    pub part_number: i32,
    /// Message-id to fetch
    pub message_id: String,
    /// Newsgroups the article was posted to
    pub groups: Vec<String>,
    /// Raw article size from the NZB, for progress accounting
    pub expected_size: i64,
    /// Cancelled when the queue no longer wants this article (job delete,
    /// hanging-download cutoff, shutdown)
    pub cancel: CancellationToken,
}

/// Decoded article content returned by the transport
#[derive(Clone, Debug, Default)]
pub struct ArticleBody {
    /// Decoded segment bytes
    pub data: Vec<u8>,
    /// Offset of this segment within the target file
    pub offset: i64,
    /// CRC32 of the decoded bytes as announced by the encoding
    pub crc: u32,
    /// Id of the server the article was fetched from
    pub server_id: i32,
}

/// What the transport reports back for one request
#[derive(Clone, Debug)]
pub enum FetchOutcome {
    /// The article was fetched and decoded
    Finished(ArticleBody),
    /// The article could not be fetched on any server
    Failed {
        /// Id of the last server tried
        server_id: i32,
        /// Failure description for the job log
        reason: String,
    },
}

/// External collaborator that downloads articles.
///
/// Implementations must honor `request.cancel`: once cancelled, return as
/// soon as practical with a `Failed` outcome. The queue processes that
/// completion through the normal path.
#[async_trait]
pub trait ArticleTransport: Send + Sync {
    /// Fetch and decode one article
    async fn fetch(&self, request: ArticleRequest) -> FetchOutcome;
}
