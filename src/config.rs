//! Configuration types for nzbqueue

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Directory layout configuration
///
/// Groups the filesystem locations the queue works with. Used as a nested
/// sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Final destination directory for completed jobs (default: "./downloads")
    #[serde(default = "default_dest_dir")]
    pub dest_dir: PathBuf,

    /// Intermediate download directory. When set, jobs download into
    /// `<inter_dir>/<name>.#<id>` and move to the final directory during
    /// post-processing; when `None`, jobs download straight into the final
    /// directory.
    #[serde(default)]
    pub inter_dir: Option<PathBuf>,

    /// Incoming directory watched for new `.nzb` files (default: "./nzb")
    #[serde(default = "default_nzb_dir")]
    pub nzb_dir: PathBuf,

    /// Directory holding the persisted queue state (default: "./queue")
    #[serde(default = "default_queue_dir")]
    pub queue_dir: PathBuf,

    /// Temporary directory for external-file intake (default: "./temp")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            dest_dir: default_dest_dir(),
            inter_dir: None,
            nzb_dir: default_nzb_dir(),
            queue_dir: default_queue_dir(),
            temp_dir: default_temp_dir(),
        }
    }
}

/// Download behavior configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Maximum simultaneous article downloads (default: 4)
    #[serde(default = "default_max_article_downloads")]
    pub max_article_downloads: usize,

    /// Per-article fetch timeout; a download stuck past this plus a 10 s
    /// grace is cancelled (default: 60 s)
    #[serde(default = "default_article_timeout", with = "duration_secs")]
    pub article_timeout: Duration,

    /// Jobs with priority at or above this value keep downloading while the
    /// global pause is on (default: 900)
    #[serde(default = "default_force_priority")]
    pub force_priority: i32,

    /// Identify files from their first articles and rename them while the
    /// download is still running (default: true)
    #[serde(default = "default_true")]
    pub direct_rename: bool,

    /// How many messages each job keeps in its in-memory ring (default: 100)
    #[serde(default = "default_log_buffer")]
    pub log_buffer: usize,

    /// File extensions excluded from the filtered content hash, separated
    /// with `,` or `;` (default: ".par2,.sfv")
    #[serde(default = "default_par_ignore_ext")]
    pub par_ignore_ext: String,

    /// Reaction to a job whose health drops below critical (default: none)
    #[serde(default)]
    pub health_check: crate::types::HealthCheckAction,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_article_downloads: default_max_article_downloads(),
            article_timeout: default_article_timeout(),
            force_priority: default_force_priority(),
            direct_rename: true,
            log_buffer: default_log_buffer(),
            par_ignore_ext: default_par_ignore_ext(),
            health_check: crate::types::HealthCheckAction::default(),
        }
    }
}

/// Duplicate handling configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DuplicateConfig {
    /// Detect duplicates at add-time and keep duplicate memory in history
    /// (default: true)
    #[serde(default = "default_true")]
    pub dupe_check: bool,

    /// Days to keep history entries before aging them out (default: 30)
    #[serde(default = "default_keep_history_days")]
    pub keep_history_days: u32,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            dupe_check: true,
            keep_history_days: default_keep_history_days(),
        }
    }
}

/// Incoming-directory scanner configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Interval between scans of the incoming directory (default: 5 s)
    #[serde(default = "default_nzb_dir_interval", with = "duration_secs")]
    pub nzb_dir_interval: Duration,

    /// A file is processed only after its size stayed stable this long,
    /// so half-copied files are not picked up (default: 60 s)
    #[serde(default = "default_nzb_dir_file_age", with = "duration_secs")]
    pub nzb_dir_file_age: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            nzb_dir_interval: default_nzb_dir_interval(),
            nzb_dir_file_age: default_nzb_dir_file_age(),
        }
    }
}

/// Persistence configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Minimum interval between flushes of changed queue state (default: 1 s)
    #[serde(default = "default_flush_interval", with = "duration_secs")]
    pub flush_interval: Duration,

    /// Keep article vectors in a write cache and flush them lazily. A
    /// sentinel flag file marks the cache as possibly unflushed; its
    /// presence at startup triggers a consistency re-scan (default: true)
    #[serde(default = "default_true")]
    pub write_cache: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            flush_interval: default_flush_interval(),
            write_cache: true,
        }
    }
}

/// Per-category settings applied when a job is assigned the category
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CategoryConfig {
    /// Category name (matched case-insensitively)
    pub name: String,

    /// Destination directory override for this category
    #[serde(default)]
    pub dest_dir: Option<PathBuf>,

    /// Whether jobs in this category are unpacked
    #[serde(default = "default_true")]
    pub unpack: bool,

    /// Post-processing script names enabled for this category, separated
    /// with `,` or `;`
    #[serde(default)]
    pub extensions: String,
}

impl Default for CategoryConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            dest_dir: None,
            unpack: true,
            extensions: String::new(),
        }
    }
}

/// Main configuration for the queue server
///
/// Fields are organized into logical sub-configs. Every field carries a
/// serde default, so partial configuration files work and
/// `Config::default()` is a fully usable in-memory setup.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Filesystem locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Download behavior
    #[serde(default)]
    pub download: DownloadConfig,

    /// Duplicate handling
    #[serde(default)]
    pub duplicates: DuplicateConfig,

    /// Incoming-directory scanning
    #[serde(default)]
    pub scan: ScanConfig,

    /// Queue state persistence
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Category definitions
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,

    /// Append the category name to the destination directory when the
    /// category has no dest-dir override
    #[serde(default)]
    pub append_category_dir: bool,

    /// Global unpack default, used when the category does not decide
    #[serde(default = "default_true")]
    pub unpack: bool,

    /// Globally enabled post-processing script names, separated with `,`
    /// or `;`
    #[serde(default)]
    pub extensions: String,

    /// Delete the saved source NZB file when its history entry goes away
    #[serde(default)]
    pub nzb_cleanup_disk: bool,

    /// Extensions deleted from the destination directory after successful
    /// par-check/unpack, separated with `,` or `;` (empty disables the
    /// cleanup stage)
    #[serde(default)]
    pub ext_cleanup_disk: String,
}

impl Config {
    /// Find a category definition by name (case-insensitive)
    pub fn find_category(&self, name: &str) -> Option<&CategoryConfig> {
        self.categories
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

fn default_dest_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_nzb_dir() -> PathBuf {
    PathBuf::from("./nzb")
}

fn default_queue_dir() -> PathBuf {
    PathBuf::from("./queue")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_max_article_downloads() -> usize {
    4
}

fn default_article_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_force_priority() -> i32 {
    900
}

fn default_log_buffer() -> usize {
    100
}

fn default_par_ignore_ext() -> String {
    ".par2,.sfv".to_string()
}

fn default_keep_history_days() -> u32 {
    30
}

fn default_nzb_dir_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_nzb_dir_file_age() -> Duration {
    Duration::from_secs(60)
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_true() -> bool {
    true
}

/// Serialize durations as whole seconds so config files stay readable
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_usable() {
        let config = Config::default();
        assert_eq!(config.download.max_article_downloads, 4);
        assert!(config.duplicates.dupe_check);
        assert_eq!(config.duplicates.keep_history_days, 30);
        assert!(config.download.direct_rename);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"download": {"max_article_downloads": 12}}"#).unwrap();
        assert_eq!(config.download.max_article_downloads, 12);
        assert_eq!(
            config.download.article_timeout,
            Duration::from_secs(60),
            "unspecified fields must keep their defaults"
        );
    }

    #[test]
    fn durations_round_trip_as_seconds() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.scan.nzb_dir_file_age, config.scan.nzb_dir_file_age);
    }

    #[test]
    fn find_category_is_case_insensitive() {
        let config = Config {
            categories: vec![CategoryConfig {
                name: "Movies".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(config.find_category("movies").is_some());
        assert!(config.find_category("MOVIES").is_some());
        assert!(config.find_category("tv").is_none());
    }
}
