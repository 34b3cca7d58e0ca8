//! Shared fixtures for the end-to-end tests: an in-memory transport, NZB
//! builders and PAR2 packet builders.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nzbqueue::transport::{ArticleBody, ArticleRequest, ArticleTransport, FetchOutcome};

/// One article the mock transport can serve
#[derive(Clone, Debug)]
pub struct MockArticle {
    pub data: Vec<u8>,
    pub offset: i64,
}

/// Deterministic in-memory transport: serves registered message-ids,
/// fails everything else.
#[derive(Default)]
pub struct MockTransport {
    articles: Mutex<HashMap<String, MockArticle>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an article body under its message-id
    pub fn add_article(&self, message_id: &str, data: Vec<u8>, offset: i64) {
        let mut articles = self.articles.lock().unwrap();
        articles.insert(message_id.to_string(), MockArticle { data, offset });
    }
}

#[async_trait]
impl ArticleTransport for MockTransport {
    async fn fetch(&self, request: ArticleRequest) -> FetchOutcome {
        if request.cancel.is_cancelled() {
            return FetchOutcome::Failed {
                server_id: 1,
                reason: "cancelled".to_string(),
            };
        }

        let article = {
            let articles = self.articles.lock().unwrap();
            articles.get(&request.message_id).cloned()
        };

        match article {
            Some(article) => {
                let mut hasher = crc32fast::Hasher::new();
                hasher.update(&article.data);
                FetchOutcome::Finished(ArticleBody {
                    crc: hasher.finalize(),
                    offset: article.offset,
                    data: article.data,
                    server_id: 1,
                })
            }
            None => FetchOutcome::Failed {
                server_id: 1,
                reason: "article not found".to_string(),
            },
        }
    }
}

/// Build an NZB document from `(subject, [(number, bytes, message_id)])`
/// tuples.
pub fn nzb_xml(files: &[(&str, Vec<(u32, u64, String)>)]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <nzb xmlns=\"http://www.newzbin.com/DTD/2003/nzb\">\n",
    );
    for (subject, segments) in files {
        xml.push_str(&format!(
            "  <file poster=\"tester@example.com\" date=\"1234567890\" subject=\"{subject}\">\n\
             \x20   <groups><group>alt.binaries.test</group></groups>\n\
             \x20   <segments>\n"
        ));
        for (number, bytes, message_id) in segments {
            xml.push_str(&format!(
                "      <segment bytes=\"{bytes}\" number=\"{number}\">{message_id}</segment>\n"
            ));
        }
        xml.push_str("    </segments>\n  </file>\n");
    }
    xml.push_str("</nzb>\n");
    xml
}

/// Build a minimal PAR2 File Description packet describing `filename`
/// with the given 16 KiB fingerprint.
pub fn par2_file_desc_packet(filename: &str, hash16k: [u8; 16], set_id: [u8; 16]) -> Vec<u8> {
    const HEADER_SIZE: usize = 64;
    const FIXED_BODY: usize = 56;

    let name_bytes = filename.as_bytes();
    let padded_len = (name_bytes.len() + 3) & !3;
    let mut padded_name = vec![0u8; padded_len];
    padded_name[..name_bytes.len()].copy_from_slice(name_bytes);

    let packet_len = (HEADER_SIZE + FIXED_BODY + padded_len) as u64;

    let mut packet = Vec::with_capacity(packet_len as usize);
    packet.extend_from_slice(b"PAR2\0PKT");
    packet.extend_from_slice(&packet_len.to_le_bytes());
    packet.extend_from_slice(&[0u8; 16]); // packet hash, unchecked
    packet.extend_from_slice(&set_id);
    packet.extend_from_slice(b"PAR 2.0\0FileDesc");
    packet.extend_from_slice(&[0u8; 16]); // file id
    packet.extend_from_slice(&[0u8; 16]); // md5 of the whole file
    packet.extend_from_slice(&hash16k);
    packet.extend_from_slice(&1024u64.to_le_bytes());
    packet.extend_from_slice(&padded_name);
    packet
}

/// MD5 of a buffer as the byte array PAR2 stores
pub fn md5_bytes(data: &[u8]) -> [u8; 16] {
    md5::compute(data).0
}
