//! Obfuscated-file identification and renaming.
//!
//! Two passes with one idea: match files against the 16 KiB MD5
//! fingerprints recorded in PAR2 description packets. [`direct`] runs
//! while articles stream in; [`par_renamer`] is the post-download fallback
//! over the destination directory. [`analyzer`] produces the per-article
//! fingerprints both rely on.

pub mod analyzer;
pub mod direct;
pub mod par_renamer;

pub use analyzer::{ContentFingerprint, RenameContentAnalyzer};
pub use direct::DirectRenamer;
pub use par_renamer::{ParRenameResult, ParRenamer};
