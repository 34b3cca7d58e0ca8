//! A single article (segment) of a posted file

use crate::types::ArticleStatus;

/// One part of a posted file — a message on a news server.
///
/// `part_number` identifies a unique slot within the owning file's article
/// vector; completed articles keep their status until the file finalizes.
#[derive(Clone, Debug, Default)]
pub struct ArticleInfo {
    /// 1-based part number from the NZB segment element
    pub part_number: i32,
    /// Message-id used to request the article from the transport
    pub message_id: String,
    /// Raw (encoded) article size from the NZB
    pub size: i64,
    /// Offset of the decoded segment within the output file
    pub segment_offset: i64,
    /// Decoded segment size, known after the fetch
    pub segment_size: i32,
    /// CRC32 of the decoded segment
    pub crc: u32,
    /// Per-article tempfile holding the decoded segment, when the segment
    /// was flushed to disk instead of kept in memory
    pub result_filename: Option<String>,
    /// Fetch state
    pub status: ArticleStatus,
    /// Decoded segment kept in memory while the write cache is enabled
    pub segment_content: Option<Vec<u8>>,
}

impl ArticleInfo {
    /// Attach a decoded segment buffer
    pub fn attach_segment(&mut self, content: Vec<u8>, offset: i64, size: i32) {
        self.segment_content = Some(content);
        self.segment_offset = offset;
        self.segment_size = size;
    }

    /// Drop the in-memory segment buffer
    pub fn discard_segment(&mut self) {
        self.segment_content = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_and_discard_segment() {
        let mut article = ArticleInfo {
            part_number: 1,
            message_id: "msg@host".to_string(),
            size: 1000,
            ..Default::default()
        };

        article.attach_segment(vec![1, 2, 3], 0, 3);
        assert_eq!(article.segment_size, 3);
        assert!(article.segment_content.is_some());

        article.discard_segment();
        assert!(article.segment_content.is_none());
        assert_eq!(article.segment_size, 3, "metadata survives the discard");
    }
}
