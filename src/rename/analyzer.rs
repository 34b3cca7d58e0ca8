//! Per-article content analyzer feeding the direct renamer.
//!
//! One analyzer exists per article fetch. The transport appends decoded
//! bytes as they arrive; the analyzer keeps a rolling MD5 over the first
//! 16 KiB only and sniffs the first packet-header-sized chunk for the PAR2
//! magic. The result is meaningful only for a file's first article, and
//! only when that article is at least 16 KiB raw or the file has a single
//! article — smaller splits cannot be fingerprinted reliably.

use crate::par2;

/// Bytes covered by the rolling fingerprint
const HASH_WINDOW: usize = 16 * 1024;

/// Result of analyzing one article's content
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContentFingerprint {
    /// Hex MD5 of the first 16 KiB
    pub hash16k: String,
    /// The content starts with a PAR2 packet header
    pub par_file: bool,
    /// Recovery-set id when `par_file` is set
    pub par_set_id: Option<String>,
}

/// Streaming analyzer over one article's decoded bytes
pub struct RenameContentAnalyzer {
    md5: md5::Context,
    signature: [u8; par2::PAR2_HEADER_SIZE],
    data_size: usize,
    par_file: bool,
    par_set_id: Option<String>,
}

impl Default for RenameContentAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl RenameContentAnalyzer {
    /// Create a fresh analyzer
    pub fn new() -> Self {
        Self {
            md5: md5::Context::new(),
            signature: [0; par2::PAR2_HEADER_SIZE],
            data_size: 0,
            par_file: false,
            par_set_id: None,
        }
    }

    /// Reset to the initial state for reuse
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Feed the next chunk of decoded article bytes
    pub fn append(&mut self, buffer: &[u8]) {
        if self.data_size < self.signature.len() {
            let copy = buffer.len().min(self.signature.len() - self.data_size);
            self.signature[self.data_size..self.data_size + copy].copy_from_slice(&buffer[..copy]);
        }

        if self.data_size + buffer.len() >= self.signature.len() && !self.par_file {
            if let Some(header) = par2::parse_packet_header(&self.signature) {
                self.par_file = true;
                self.par_set_id = Some(header.set_id);
            }
        }

        if self.data_size < HASH_WINDOW {
            let rem = (HASH_WINDOW - self.data_size).min(buffer.len());
            self.md5.consume(&buffer[..rem]);
        }

        self.data_size += buffer.len();
    }

    /// Finish and produce the fingerprint
    pub fn finish(self) -> ContentFingerprint {
        let digest = self.md5.compute();
        ContentFingerprint {
            hash16k: format!("{digest:x}"),
            par_file: self.par_file,
            par_set_id: self.par_set_id,
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_covers_only_first_16k() {
        let mut short = RenameContentAnalyzer::new();
        short.append(&vec![5u8; HASH_WINDOW]);
        let short_print = short.finish();

        let mut long = RenameContentAnalyzer::new();
        long.append(&vec![5u8; HASH_WINDOW]);
        long.append(b"trailing data beyond the window");
        let long_print = long.finish();

        assert_eq!(short_print.hash16k, long_print.hash16k);
    }

    #[test]
    fn chunked_append_matches_single_append() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();

        let mut whole = RenameContentAnalyzer::new();
        whole.append(&data);

        let mut chunked = RenameContentAnalyzer::new();
        for chunk in data.chunks(777) {
            chunked.append(chunk);
        }

        assert_eq!(whole.finish().hash16k, chunked.finish().hash16k);
    }

    #[test]
    fn hash_matches_md5_of_prefix() {
        let data = vec![9u8; 1000];
        let mut analyzer = RenameContentAnalyzer::new();
        analyzer.append(&data);
        let print = analyzer.finish();
        assert_eq!(print.hash16k, format!("{:x}", md5::compute(&data)));
    }

    #[test]
    fn par2_magic_is_detected_with_set_id() {
        let packet = crate::par2::tests::build_file_desc_packet("x.rar", [0u8; 16], [0x42u8; 16]);

        let mut analyzer = RenameContentAnalyzer::new();
        // feed in small chunks so the signature buffer fills gradually
        for chunk in packet.chunks(7) {
            analyzer.append(chunk);
        }
        let print = analyzer.finish();

        assert!(print.par_file);
        assert_eq!(print.par_set_id.as_deref(), Some("42".repeat(16).as_str()));
    }

    #[test]
    fn non_par_content_is_not_flagged() {
        let mut analyzer = RenameContentAnalyzer::new();
        analyzer.append(&vec![0x33u8; 256]);
        let print = analyzer.finish();
        assert!(!print.par_file);
        assert!(print.par_set_id.is_none());
    }
}
