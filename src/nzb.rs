//! NZB intake: XML parsing, filename derivation and content fingerprints.
//!
//! The XML layer is `nzb-rs`; everything the queue derives from it lives
//! here: the subject→filename heuristics, the duplicate-filename fallback,
//! par-file classification, the per-job aggregates and the content hashes
//! the duplicate coordinator matches on.

use std::path::Path;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{ArticleInfo, FileInfo, NzbInfo};
use crate::utils;

/// Parse an NZB file from disk into a job.
///
/// The returned job carries no ids yet; they are assigned when it enters
/// the queue.
pub fn parse_nzb_file(path: &Path, category: &str, config: &Config) -> Result<NzbInfo> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::InvalidNzb(format!("could not read {}: {e}", path.display())))?;
    let filename = path.to_string_lossy();
    parse_nzb_str(&content, &filename, category, config)
}

/// Parse NZB content into a job
pub fn parse_nzb_str(
    content: &str,
    source_filename: &str,
    category: &str,
    config: &Config,
) -> Result<NzbInfo> {
    let parsed = nzb_rs::Nzb::parse(content)
        .map_err(|e| Error::InvalidNzb(format!("could not parse {source_filename}: {e}")))?;

    let mut nzb = NzbInfo::new();
    nzb.message_limit = config.download.log_buffer;
    nzb.category = category.to_string();
    nzb.set_filename(source_filename);

    for (index, file) in parsed.files.iter().enumerate() {
        let segments: Vec<(u32, i64, String)> = file
            .segments
            .iter()
            .map(|s| (s.number, s.size as i64, s.message_id.clone()))
            .collect();
        if let Some(file_info) = build_file_info(
            &file.subject,
            file.posted_at.timestamp(),
            segments,
            index,
        ) {
            nzb.file_list.push(file_info);
        }
    }

    if nzb.file_list.is_empty() {
        return Err(Error::InvalidNzb(format!(
            "{source_filename} contains no downloadable files"
        )));
    }

    build_filenames(&mut nzb);
    process_files(&mut nzb, config);

    for password in &parsed.meta.passwords {
        nzb.parameters.set_parameter("*Unpack:Password", password);
        break;
    }

    Ok(nzb)
}

/// Convert one NZB file element into a live file with article slots.
///
/// Gaps in the part numbering count as missed articles; their size is
/// estimated with the size of the first present article, the way posters
/// split files evenly.
fn build_file_info(
    subject: &str,
    time: i64,
    mut segments: Vec<(u32, i64, String)>,
    index: usize,
) -> Option<FileInfo> {
    segments.sort_by_key(|(number, _, _)| *number);
    segments.dedup_by_key(|(number, _, _)| *number);

    if segments.is_empty() {
        return None;
    }

    let max_part = segments.iter().map(|(number, _, _)| *number).max().unwrap_or(0) as i32;
    let present = segments.len() as i32;
    let missed_articles = (max_part - present).max(0);

    let one_size = segments.first().map(|(_, size, _)| *size).unwrap_or(0);
    let present_size: i64 = segments.iter().map(|(_, size, _)| *size).sum();
    let missed_size = missed_articles as i64 * one_size;

    let articles = segments
        .into_iter()
        .map(|(number, size, message_id)| ArticleInfo {
            part_number: number as i32,
            message_id,
            size,
            ..Default::default()
        })
        .collect();

    let subject = if subject.is_empty() {
        // malformed file element; an internal id keeps the file addressable
        format!("{}", index + 1)
    } else {
        subject.to_string()
    };

    Some(FileInfo {
        subject,
        time,
        size: present_size + missed_size,
        remaining_size: present_size,
        missed_size,
        total_articles: max_part,
        missed_articles,
        articles,
        ..Default::default()
    })
}

/// Derive filenames from subjects, falling back to raw subjects when the
/// parse produces too many duplicates
fn build_filenames(nzb: &mut NzbInfo) {
    for file in &mut nzb.file_list {
        file.filename = parse_subject(&file.subject, true);
    }

    if has_duplicate_filenames(&nzb.file_list) {
        for file in &mut nzb.file_list {
            file.filename = parse_subject(&file.subject, false);
        }
    }

    if has_duplicate_filenames(&nzb.file_list) {
        nzb.many_dupe_files = true;
        for file in &mut nzb.file_list {
            file.filename = file.subject.clone();
        }
    }
}

/// More than 5% of files sharing one parsed name (with different
/// subjects), or more than 25% duplicates overall, means the subject
/// parsing went wrong.
fn has_duplicate_filenames(files: &[FileInfo]) -> bool {
    let count = files.len();
    if count <= 2 {
        return false;
    }

    let mut total_dupes = 0usize;
    for (i, file1) in files.iter().enumerate() {
        let dupes = files[i + 1..]
            .iter()
            .filter(|file2| file2.filename == file1.filename && file2.subject != file1.subject)
            .count();

        if dupes * 100 / count > 5 {
            tracing::warn!(
                filename = %file1.filename,
                "files share one parsed name, trying alternate names"
            );
            return true;
        }
        total_dupes += dupes;
    }

    if total_dupes * 100 / count > 25 {
        tracing::warn!("too many duplicate parsed names, trying alternate names");
        return true;
    }

    false
}

/// Classify files, seed the job aggregates and compute content hashes
fn process_files(nzb: &mut NzbInfo, config: &Config) {
    for file in &mut nzb.file_list {
        file.filename = utils::make_valid_filename(&file.filename);
        let par_file = file.filename.to_ascii_lowercase().contains(".par2");

        nzb.file_count += 1;
        nzb.total_articles += file.total_articles;
        nzb.failed_articles += file.missed_articles;
        nzb.current_failed_articles += file.missed_articles;
        nzb.size += file.size;
        nzb.remaining_size += file.remaining_size;
        nzb.failed_size += file.missed_size;
        nzb.current_failed_size = nzb.failed_size;

        file.par_file = par_file;
        if par_file {
            nzb.par_size += file.size;
            nzb.par_failed_size += file.missed_size;
            nzb.par_current_failed_size = nzb.par_failed_size;
            nzb.remaining_par_count += 1;
        }
    }

    nzb.update_min_max_time();
    calc_hashes(nzb, &config.download.par_ignore_ext);
}

/// Fold the content hashes over all article message-ids.
///
/// Files are visited in descending filename order so the hash does not
/// depend on the order of `<file>` elements. The filtered hash skips par
/// files and ignorable extensions; when that leaves fewer than half the
/// files it is zeroed and only the full hash is used.
fn calc_hashes(nzb: &mut NzbInfo, par_ignore_ext: &str) {
    let mut order: Vec<usize> = (0..nzb.file_list.len()).collect();
    order.sort_by(|&a, &b| nzb.file_list[b].filename.cmp(&nzb.file_list[a].filename));

    let mut full_hash = 0u32;
    let mut filtered_hash = 0u32;
    let mut use_for_filtered = 0usize;

    for index in order {
        let file = &nzb.file_list[index];
        let skip = !file.par_file && utils::match_file_ext(&file.filename, par_ignore_ext);

        for article in &file.articles {
            full_hash = utils::hash_content(&article.message_id, full_hash);
            if !skip {
                filtered_hash = utils::hash_content(&article.message_id, filtered_hash);
                use_for_filtered += 1;
            }
        }
    }

    if use_for_filtered < nzb.file_list.len() / 2 {
        filtered_hash = 0;
    }

    nzb.full_content_hash = full_hash;
    nzb.filtered_content_hash = filtered_hash;
}

/// Extract a filename from a subject line.
///
/// Tried in order: a quoted token containing a dot, the
/// `[PRiVATE]-[WtFnZb]-` poster pattern, then the last whitespace token
/// containing a dot. The `yEnc (n/m)` suffix is stripped first.
pub fn parse_subject(subject: &str, try_quotes: bool) -> String {
    let subject = strip_yenc_suffix(subject);

    if try_quotes {
        if let Some(name) = quoted_filename(subject) {
            return name;
        }
        if let Some(name) = wtfnzb_filename(subject) {
            return name;
        }
    }

    let tokens = tokenize_subject(subject);
    if tokens.is_empty() {
        return subject.to_string();
    }

    for token in tokens.iter().rev() {
        if let Some(pos) = token.find('.') {
            if pos + 1 < token.len() {
                return token.clone();
            }
        }
    }

    tokens.last().cloned().unwrap_or_else(|| subject.to_string())
}

/// Strip a trailing `" yEnc (n/m)"` from a subject
fn strip_yenc_suffix(subject: &str) -> &str {
    let b = subject.as_bytes();
    if b.is_empty() || b[b.len() - 1] != b')' {
        return subject;
    }

    let mut end = b.len() - 1;
    if end == 0 {
        return subject;
    }
    end -= 1;
    while end > 0 && b[end].is_ascii_digit() {
        end -= 1;
    }
    if b[end] != b'/' {
        return subject;
    }
    if end == 0 {
        return subject;
    }
    end -= 1;
    while end > 0 && b[end].is_ascii_digit() {
        end -= 1;
    }

    if end > 6 && &b[end - 6..=end] == b" yEnc (" {
        return &subject[..end - 6];
    }

    subject
}

/// A non-empty quoted token whose dot is not the leading character
fn quoted_filename(subject: &str) -> Option<String> {
    let start = subject.find('"')? + 1;
    let end = start + subject[start..].find('"')?;
    let content = &subject[start..end];
    if content.len() > 1 && content[1..].contains('.') {
        return Some(content.to_string());
    }
    None
}

/// Deliberately malformed subjects of the form
/// `...[PRiVATE]-[WtFnZb]-[24]-[12/filename.ext] - "" yEnc (...` carry the
/// filename in the last bracket group before the size marker.
fn wtfnzb_filename(subject: &str) -> Option<String> {
    const SIGNATURE: &str = "[PRiVATE]-[WtFnZb]-[";

    let sig_pos = subject.find(SIGNATURE)?;
    let after = sig_pos + SIGNATURE.len();
    let sig_end = after - 1; // the final open bracket of the signature

    let dot = after + subject[after..].find('.')?;
    let end = dot + subject[dot..].find(']')?;

    let bytes = subject.as_bytes();
    let mut depth = 0u32;
    let mut start = None;
    let mut p = dot;
    loop {
        match bytes[p] {
            b']' => depth += 1,
            b'[' => {
                if depth > 0 {
                    depth -= 1;
                } else {
                    start = Some(p + 1);
                }
            }
            b'/' => start = Some(p + 1),
            _ => {}
        }
        if start.is_some() || p == sig_end {
            break;
        }
        p -= 1;
    }

    let start = start?;
    if start < end {
        Some(subject[start..end].to_string())
    } else {
        None
    }
}

/// Split a subject into tokens: whitespace separates, quotation marks
/// delimit non-separable tokens
fn tokenize_subject(subject: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;

    for ch in subject.chars() {
        match ch {
            '"' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                in_quote = !in_quote;
            }
            ' ' if !in_quote => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn nzb_xml(files: &[(&str, &[(u32, u64, &str)])]) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<nzb xmlns="http://www.newzbin.com/DTD/2003/nzb">
"#,
        );
        for (subject, segments) in files {
            xml.push_str(&format!(
                "  <file poster=\"p@example.com\" date=\"1234567890\" subject=\"{subject}\">\n"
            ));
            xml.push_str("    <groups><group>alt.binaries.test</group></groups>\n    <segments>\n");
            for (number, bytes, msgid) in *segments {
                xml.push_str(&format!(
                    "      <segment bytes=\"{bytes}\" number=\"{number}\">{msgid}</segment>\n"
                ));
            }
            xml.push_str("    </segments>\n  </file>\n");
        }
        xml.push_str("</nzb>\n");
        xml
    }

    #[test]
    fn subject_quoted_filename_wins() {
        assert_eq!(
            parse_subject(r#"some garbage "movie.mkv" yEnc (10/99)"#, true),
            "movie.mkv"
        );
    }

    #[test]
    fn subject_quoted_name_needs_a_dot() {
        // a quoted token without a dot is not a filename; the tokenizer
        // falls back to the last dotted token
        assert_eq!(
            parse_subject(r#"post "title" data.rar (1/2)"#, true),
            "data.rar"
        );
    }

    #[test]
    fn subject_yenc_suffix_is_stripped() {
        assert_eq!(parse_subject("file.rar yEnc (10/99)", true), "file.rar");
        assert_eq!(parse_subject("file.rar yEnc (1/1)", false), "file.rar");
    }

    #[test]
    fn subject_wtfnzb_pattern() {
        assert_eq!(
            parse_subject(
                r#"x [PRiVATE]-[WtFnZb]-[24]-[12/filename.ext] - "" yEnc (1/2)"#,
                true
            ),
            "filename.ext"
        );
        assert_eq!(
            parse_subject(
                r#"x [PRiVATE]-[WtFnZb]-[00101.mpls]-[163/591] - "" yEnc (1/2)"#,
                true
            ),
            "00101.mpls"
        );
    }

    #[test]
    fn subject_falls_back_to_last_dotted_token() {
        assert_eq!(parse_subject("a b file.part01.rar done", false), "file.part01.rar");
        assert_eq!(parse_subject("no dots here at all", false), "all");
    }

    #[test]
    fn parse_builds_files_and_articles() {
        let xml = nzb_xml(&[(
            r#"test [1/1] - &quot;data.bin&quot; yEnc (1/2)"#,
            &[(1, 1000, "m1@x"), (2, 1000, "m2@x")],
        )]);
        let nzb = parse_nzb_str(&xml, "/in/test.nzb", "", &Config::default()).unwrap();

        assert_eq!(nzb.name, "test");
        assert_eq!(nzb.file_list.len(), 1);
        let file = &nzb.file_list[0];
        assert_eq!(file.filename, "data.bin");
        assert_eq!(file.articles.len(), 2);
        assert_eq!(file.total_articles, 2);
        assert_eq!(file.size, 2000);
        assert_eq!(nzb.size, 2000);
        assert_eq!(nzb.total_articles, 2);
        assert!(nzb.full_content_hash != 0);
    }

    #[test]
    fn missing_parts_count_as_missed() {
        let xml = nzb_xml(&[(
            r#"test - &quot;gap.bin&quot;"#,
            &[(1, 500, "m1@x"), (3, 500, "m3@x")],
        )]);
        let nzb = parse_nzb_str(&xml, "gap.nzb", "", &Config::default()).unwrap();

        let file = &nzb.file_list[0];
        assert_eq!(file.total_articles, 3);
        assert_eq!(file.missed_articles, 1);
        assert_eq!(file.missed_size, 500, "missed size estimated from first article");
        assert_eq!(file.size, 1500);
        assert_eq!(file.remaining_size, 1000);
        assert_eq!(nzb.failed_articles, 1, "missed articles pre-fail the job");
    }

    #[test]
    fn par_files_are_classified_and_counted() {
        let xml = nzb_xml(&[
            (r#"a - &quot;data.rar&quot;"#, &[(1, 1000, "m1@x")][..]),
            (r#"a - &quot;data.PAR2&quot;"#, &[(1, 200, "m2@x")][..]),
            (
                r#"a - &quot;data.vol00+1.par2&quot;"#,
                &[(1, 400, "m3@x")][..],
            ),
        ]);
        let nzb = parse_nzb_str(&xml, "a.nzb", "", &Config::default()).unwrap();

        assert_eq!(nzb.remaining_par_count, 2);
        assert_eq!(nzb.par_size, 600);
        assert!(nzb.file_list[1].par_file);
        assert!(nzb.file_list[2].par_file);
        assert!(!nzb.file_list[0].par_file);
    }

    #[test]
    fn content_hash_is_independent_of_file_element_order() {
        let config = Config::default();
        let a = nzb_xml(&[
            (r#"s1 - &quot;one.bin&quot;"#, &[(1, 10, "m1@x")][..]),
            (r#"s2 - &quot;two.bin&quot;"#, &[(1, 10, "m2@x")][..]),
        ]);
        let b = nzb_xml(&[
            (r#"s2 - &quot;two.bin&quot;"#, &[(1, 10, "m2@x")][..]),
            (r#"s1 - &quot;one.bin&quot;"#, &[(1, 10, "m1@x")][..]),
        ]);

        let nzb_a = parse_nzb_str(&a, "a.nzb", "", &config).unwrap();
        let nzb_b = parse_nzb_str(&b, "b.nzb", "", &config).unwrap();
        assert_eq!(nzb_a.full_content_hash, nzb_b.full_content_hash);
        assert_eq!(nzb_a.filtered_content_hash, nzb_b.filtered_content_hash);
    }

    #[test]
    fn reparsing_yields_identical_hashes() {
        let config = Config::default();
        let xml = nzb_xml(&[(r#"s - &quot;re.bin&quot;"#, &[(1, 10, "m@x")][..])]);
        let first = parse_nzb_str(&xml, "re.nzb", "", &config).unwrap();
        let second = parse_nzb_str(&xml, "re.nzb", "", &config).unwrap();
        assert_eq!(first.full_content_hash, second.full_content_hash);
        assert_eq!(first.filtered_content_hash, second.filtered_content_hash);
    }

    #[test]
    fn empty_nzb_is_rejected() {
        let xml = r#"<?xml version="1.0"?><nzb xmlns="http://www.newzbin.com/DTD/2003/nzb"></nzb>"#;
        assert!(parse_nzb_str(xml, "empty.nzb", "", &Config::default()).is_err());
    }
}
