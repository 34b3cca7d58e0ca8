//! Post-download rename fallback.
//!
//! When direct rename was not possible or left files uncovered, this pass
//! walks the destination directory, loads the main par file of each
//! directory, fingerprints every unknown file by its first 16 KiB and
//! moves matches to the name the par descriptors record.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::par2::{self, Par2FileEntry};
use crate::utils;

/// Outcome of one rename pass
#[derive(Clone, Debug, Default)]
pub struct ParRenameResult {
    /// Files moved to their recorded names
    pub renamed_count: usize,
    /// Descriptor filenames still absent after the pass (only filled when
    /// missing-detection was requested)
    pub missing_files: Vec<String>,
    /// The pass was cancelled between files
    pub cancelled: bool,
}

/// Directory-scan renamer for one job.
///
/// Single-threaded; the caller runs it on a blocking task. Cancellation is
/// checked between files.
pub struct ParRenamer {
    dest_dir: PathBuf,
    detect_missing: bool,
    cancel: CancellationToken,
}

impl ParRenamer {
    /// Create a renamer over a destination directory
    pub fn new(dest_dir: PathBuf, detect_missing: bool, cancel: CancellationToken) -> Self {
        Self {
            dest_dir,
            detect_missing,
            cancel,
        }
    }

    /// Run the pass over the destination directory and every subdirectory
    pub fn run(&self) -> ParRenameResult {
        let mut result = ParRenameResult::default();

        for dir in self.build_dir_list() {
            if self.cancel.is_cancelled() {
                break;
            }
            tracing::debug!(dir = %dir.display(), "checking directory for renamed files");

            let hashes = self.load_par_files(&dir);
            if hashes.is_empty() {
                continue;
            }
            self.check_files(&dir, &hashes, &mut result);

            if self.detect_missing {
                for entry in &hashes {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    if !dir.join(&entry.filename).exists() {
                        result.missing_files.push(entry.filename.clone());
                    }
                }
            }
        }

        result.cancelled = self.cancel.is_cancelled();
        if result.cancelled {
            tracing::warn!(dir = %self.dest_dir.display(), "renaming cancelled");
        } else if result.renamed_count > 0 {
            tracing::info!(
                dir = %self.dest_dir.display(),
                count = result.renamed_count,
                "successfully renamed files"
            );
        }

        result
    }

    /// The destination directory and all subdirectories, parents first
    fn build_dir_list(&self) -> Vec<PathBuf> {
        walkdir::WalkDir::new(&self.dest_dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
            .map(|entry| entry.into_path())
            .collect()
    }

    /// Load the `{filename, hash16k}` descriptors of all main par files in
    /// one directory
    fn load_par_files(&self, dir: &Path) -> Vec<Par2FileEntry> {
        let mut hashes: Vec<Par2FileEntry> = Vec::new();

        for par_path in par2::find_main_pars(dir) {
            if self.cancel.is_cancelled() {
                break;
            }
            match par2::parse_file_entries(&par_path) {
                Ok(entries) if !entries.is_empty() => {
                    for entry in entries {
                        if !hashes.iter().any(|e| e.hash16k == entry.hash16k) {
                            hashes.push(entry);
                        }
                    }
                }
                _ => {
                    tracing::warn!(par = %par_path.display(), "could not load par2-file");
                }
            }
        }

        hashes
    }

    /// Fingerprint every regular file and move matches to their recorded
    /// names
    fn check_files(&self, dir: &Path, hashes: &[Par2FileEntry], result: &mut ParRenameResult) {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(dir = %dir.display(), error = %e, "could not list directory");
                return;
            }
        };

        for entry in entries.flatten() {
            if self.cancel.is_cancelled() {
                return;
            }
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            self.check_file(dir, &path, hashes, result);
        }
    }

    fn check_file(
        &self,
        dir: &Path,
        path: &Path,
        hashes: &[Par2FileEntry],
        result: &mut ParRenameResult,
    ) {
        let hash16k = match par2::compute_hash16k(path) {
            Ok(hash) => hash,
            Err(e) => {
                tracing::error!(file = %path.display(), error = %e, "could not read file");
                return;
            }
        };

        let entry = match hashes.iter().find(|e| e.hash16k == hash16k) {
            Some(entry) => entry,
            None => return,
        };

        let target = dir.join(&entry.filename);
        if target.exists() {
            return;
        }

        tracing::info!(
            from = %path.display(),
            to = %entry.filename,
            "renaming to name recorded in par2 metadata"
        );
        match utils::move_file_no_replace(path, &target) {
            Ok(()) => result.renamed_count += 1,
            Err(e) => {
                tracing::error!(
                    from = %path.display(),
                    to = %target.display(),
                    error = %e,
                    "could not rename file"
                );
            }
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    /// Lay out a directory with an obfuscated data file and a par set
    /// describing its real name.
    fn setup_obfuscated_dir() -> (tempfile::TempDir, Vec<u8>) {
        let dir = tempfile::tempdir().unwrap();

        // 8 KiB data file under an obfuscated name
        let content = vec![0x5Au8; 8 * 1024];
        std::fs::write(dir.path().join("123456"), &content).unwrap();

        let hash16k = format!("{:x}", md5::compute(&content));
        let mut hash_bytes = [0u8; 16];
        for (i, byte) in hash_bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hash16k[i * 2..i * 2 + 2], 16).unwrap();
        }

        let packet =
            crate::par2::tests::build_file_desc_packet("testfile.dat", hash_bytes, [1u8; 16]);
        std::fs::write(dir.path().join("testfile.par2"), &packet).unwrap();
        // the vol file must not be loaded as a descriptor source
        std::fs::write(dir.path().join("testfile.vol00+1.PAR2"), b"not a par").unwrap();

        (dir, content)
    }

    #[test]
    fn obfuscated_file_is_renamed_by_fingerprint() {
        let (dir, _content) = setup_obfuscated_dir();

        let renamer = ParRenamer::new(dir.path().to_path_buf(), true, CancellationToken::new());
        let result = renamer.run();

        assert_eq!(result.renamed_count, 1);
        assert!(dir.path().join("testfile.dat").exists());
        assert!(!dir.path().join("123456").exists());
        assert!(result.missing_files.is_empty(), "no expected file is missing");
        assert!(!result.cancelled);
    }

    #[test]
    fn existing_target_blocks_the_rename() {
        let (dir, _content) = setup_obfuscated_dir();
        std::fs::write(dir.path().join("testfile.dat"), b"occupied").unwrap();

        let renamer = ParRenamer::new(dir.path().to_path_buf(), false, CancellationToken::new());
        let result = renamer.run();

        assert_eq!(result.renamed_count, 0);
        assert!(dir.path().join("123456").exists(), "source stays in place");
        assert_eq!(std::fs::read(dir.path().join("testfile.dat")).unwrap(), b"occupied");
    }

    #[test]
    fn missing_detection_reports_undownloaded_files() {
        let dir = tempfile::tempdir().unwrap();
        let packet =
            crate::par2::tests::build_file_desc_packet("never-arrived.bin", [7u8; 16], [1u8; 16]);
        std::fs::write(dir.path().join("set.par2"), &packet).unwrap();

        let renamer = ParRenamer::new(dir.path().to_path_buf(), true, CancellationToken::new());
        let result = renamer.run();

        assert_eq!(result.renamed_count, 0);
        assert_eq!(result.missing_files, ["never-arrived.bin"]);
    }

    #[test]
    fn subdirectories_are_scanned() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("inner");
        std::fs::create_dir(&sub).unwrap();

        let content = vec![0x11u8; 4096];
        std::fs::write(sub.join("obf"), &content).unwrap();

        let hash16k = format!("{:x}", md5::compute(&content));
        let mut hash_bytes = [0u8; 16];
        for (i, byte) in hash_bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hash16k[i * 2..i * 2 + 2], 16).unwrap();
        }
        let packet = crate::par2::tests::build_file_desc_packet("inner.dat", hash_bytes, [2u8; 16]);
        std::fs::write(sub.join("inner.par2"), &packet).unwrap();

        let renamer = ParRenamer::new(dir.path().to_path_buf(), false, CancellationToken::new());
        let result = renamer.run();

        assert_eq!(result.renamed_count, 1);
        assert!(sub.join("inner.dat").exists());
    }

    #[test]
    fn cancelled_token_stops_before_any_work() {
        let (dir, _content) = setup_obfuscated_dir();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let renamer = ParRenamer::new(dir.path().to_path_buf(), false, cancel);
        let result = renamer.run();

        assert!(result.cancelled);
        assert_eq!(result.renamed_count, 0);
        assert!(dir.path().join("123456").exists());
    }
}
