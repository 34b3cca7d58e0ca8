//! Duplicate coordinator: decides which of several identically-keyed jobs
//! actually runs.
//!
//! At add-time a candidate is checked against the queue and history; it
//! may be skipped outright (same content, known-good duplicate) or demoted
//! to a history backup. At finish-time a failed download may promote the
//! best backup duplicate back into the queue. The check order within
//! [`nzb_found`] is semantically significant and mirrors the established
//! behavior exactly.

use crate::history;
use crate::model::{DownloadQueue, HistoryContent, NzbInfo};
use crate::services::Services;
use crate::types::{DeleteStatus, DupStatus, DupeHint, DupeMode, MarkStatus, MessageKind, NzbId,
    NzbKind};

/// The duplicate identity relation.
///
/// When both dupe-keys are non-empty the keys decide; otherwise the names
/// decide. Both comparisons are case-insensitive.
pub fn same_name_or_key(name1: &str, dupe_key1: &str, name2: &str, dupe_key2: &str) -> bool {
    let has_dupe_keys = !dupe_key1.is_empty() && !dupe_key2.is_empty();
    (has_dupe_keys && dupe_key1.eq_ignore_ascii_case(dupe_key2))
        || (!has_dupe_keys && name1.eq_ignore_ascii_case(name2))
}

fn same_content(candidate: &NzbInfo, full_hash: u32, filtered_hash: u32) -> bool {
    (candidate.full_content_hash > 0 && candidate.full_content_hash == full_hash)
        || (candidate.filtered_content_hash > 0
            && candidate.filtered_content_hash == filtered_hash)
}

/// Queued jobs the caller must edit out as dupe-backups after a
/// [`nzb_found`] decision
#[derive(Debug, Default)]
pub struct DupeDecision {
    /// Lower-scored queued duplicates; already marked `Delete=Dupe`, to be
    /// moved to history by the caller
    pub evict_from_queue: Vec<NzbId>,
}

/// Add-time duplicate check for a candidate job not yet in the queue.
///
/// May set the candidate's delete-status (the caller then diverts it to
/// history instead of the queue) and may mark lower-scored queued
/// duplicates for eviction.
pub fn nzb_found(
    services: &Services,
    queue: &mut DownloadQueue,
    nzb: &mut NzbInfo,
) -> DupeDecision {
    let mut decision = DupeDecision::default();
    tracing::debug!(name = %nzb.name, "checking duplicates");

    // identical content already queued: skip the candidate
    for queued in &mut queue.queue {
        if same_content(nzb, queued.full_content_hash, queued.filtered_content_hash)
            && nzb.kind == NzbKind::Nzb
        {
            let message = if nzb.name == queued.name {
                format!("Skipping duplicate {}, already queued", nzb.name)
            } else {
                format!(
                    "Skipping duplicate {}, already queued as {}",
                    nzb.name, queued.name
                )
            };

            if nzb.feed_id != 0 {
                tracing::warn!("{message}");
                nzb.delete_status = DeleteStatus::Manual;
                history::delete_disk_files(services, nzb);
            } else {
                nzb.delete_status = DeleteStatus::Copy;
                nzb.add_message(MessageKind::Warning, message);
            }
            return decision;
        }
    }

    // a candidate without dupe identity inherits key and score from a
    // same-named queue or history item
    if nzb.dupe_key.is_empty() && nzb.dupe_score == 0 {
        for queued in &queue.queue {
            if queued.name == nzb.name && (!queued.dupe_key.is_empty() || queued.dupe_score != 0) {
                nzb.dupe_key = queued.dupe_key.clone();
                nzb.dupe_score = queued.dupe_score;
                tracing::info!(
                    name = %nzb.name,
                    dupe_key = %nzb.dupe_key,
                    dupe_score = nzb.dupe_score,
                    "assigned dupe identity from queue item with the same name"
                );
                break;
            }
        }
    }
    if nzb.dupe_key.is_empty() && nzb.dupe_score == 0 {
        for entry in &queue.history {
            match &entry.content {
                HistoryContent::Nzb(history_nzb)
                    if history_nzb.name == nzb.name
                        && (!history_nzb.dupe_key.is_empty() || history_nzb.dupe_score != 0) =>
                {
                    nzb.dupe_key = history_nzb.dupe_key.clone();
                    nzb.dupe_score = history_nzb.dupe_score;
                }
                HistoryContent::Dup(dup)
                    if dup.name == nzb.name
                        && (!dup.dupe_key.is_empty() || dup.dupe_score != 0) =>
                {
                    nzb.dupe_key = dup.dupe_key.clone();
                    nzb.dupe_score = dup.dupe_score;
                }
                _ => continue,
            }
            tracing::info!(
                name = %nzb.name,
                dupe_key = %nzb.dupe_key,
                dupe_score = nzb.dupe_score,
                "assigned dupe identity from history item with the same name"
            );
            break;
        }
    }

    // history checks: identical content, good-duplicates, dup-shadow
    // successes
    let mut skip = false;
    let mut good = false;
    let mut content_match = false;
    let mut dupe_name = String::new();

    for entry in &queue.history {
        match &entry.content {
            HistoryContent::Nzb(history_nzb) => {
                if same_content(
                    nzb,
                    history_nzb.full_content_hash,
                    history_nzb.filtered_content_hash,
                ) {
                    skip = true;
                    content_match = true;
                    dupe_name = history_nzb.name.clone();
                    break;
                }

                if history_nzb.dupe_mode != DupeMode::Force
                    && history_nzb.mark_status == MarkStatus::Good
                    && same_name_or_key(
                        &history_nzb.name,
                        &history_nzb.dupe_key,
                        &nzb.name,
                        &nzb.dupe_key,
                    )
                {
                    skip = true;
                    good = true;
                    dupe_name = history_nzb.name.clone();
                    break;
                }
            }
            HistoryContent::Dup(dup) => {
                if same_content(nzb, dup.full_content_hash, dup.filtered_content_hash) {
                    skip = true;
                    content_match = true;
                    dupe_name = dup.name.clone();
                    break;
                }

                if dup.dupe_mode != DupeMode::Force
                    && (dup.status == DupStatus::Good
                        || (nzb.dupe_mode == DupeMode::Score
                            && dup.status == DupStatus::Success
                            && nzb.dupe_score <= dup.dupe_score))
                    && same_name_or_key(&dup.name, &dup.dupe_key, &nzb.name, &nzb.dupe_key)
                {
                    skip = true;
                    good = dup.status == DupStatus::Good;
                    dupe_name = dup.name.clone();
                    break;
                }
            }
        }
    }

    // a redownload request only respects identical-content skipping
    if !content_match && nzb.dupe_hint != DupeHint::None {
        return decision;
    }

    if !content_match && !good && nzb.dupe_mode == DupeMode::Score {
        // a successful duplicate still in recent history demotes the
        // candidate to a dupe-backup
        for entry in &queue.history {
            if let HistoryContent::Nzb(history_nzb) = &entry.content {
                if history_nzb.dupe_mode != DupeMode::Force
                    && same_name_or_key(
                        &history_nzb.name,
                        &history_nzb.dupe_key,
                        &nzb.name,
                        &nzb.dupe_key,
                    )
                    && nzb.dupe_score <= history_nzb.dupe_score
                    && history_nzb.is_dupe_success()
                {
                    nzb.delete_status = DeleteStatus::Dupe;
                    tracing::info!(
                        name = %nzb.name,
                        duplicate = %history_nzb.name,
                        "collection is a duplicate"
                    );
                    return decision;
                }
            }
        }
    }

    if skip {
        let reason = if content_match {
            "exactly same content"
        } else if good {
            "good status"
        } else {
            "success status"
        };
        let message = if nzb.name == dupe_name {
            format!("Skipping duplicate {}, found in history with {reason}", nzb.name)
        } else {
            format!(
                "Skipping duplicate {}, found in history {dupe_name} with {reason}",
                nzb.name
            )
        };

        if nzb.feed_id != 0 && nzb.dupe_hint == DupeHint::None {
            tracing::warn!("{message}");
            nzb.delete_status = DeleteStatus::Manual;
            history::delete_disk_files(services, nzb);
        } else {
            nzb.delete_status = if content_match {
                DeleteStatus::Copy
            } else {
                DeleteStatus::Good
            };
            nzb.add_message(MessageKind::Warning, message);
        }

        return decision;
    }

    // score-mode queue resolution: exactly one of the candidate and each
    // keyed queue duplicate survives in the queue
    if nzb.dupe_mode == DupeMode::Score {
        for queued in &mut queue.queue {
            let comparable = queued.delete_status == DeleteStatus::None
                && (queued.kind == NzbKind::Nzb
                    || (queued.kind == NzbKind::Url && nzb.kind == NzbKind::Url))
                && queued.dupe_mode != DupeMode::Force
                && same_name_or_key(&queued.name, &queued.dupe_key, &nzb.name, &nzb.dupe_key);
            if !comparable {
                continue;
            }

            if nzb.dupe_score <= queued.dupe_score {
                // queued item wins, the candidate becomes a backup
                nzb.delete_status = DeleteStatus::Dupe;
                tracing::info!(
                    name = %nzb.name,
                    duplicate = %queued.name,
                    "collection is a duplicate"
                );
                return decision;
            }

            // candidate wins; evict the queued item unless it already
            // reached post-processing
            if !queued.post_processing {
                tracing::info!(
                    name = %queued.name,
                    "moving collection with lower duplicate score to history"
                );
                queued.delete_status = DeleteStatus::Dupe;
                decision.evict_from_queue.push(queued.id);
            }
        }
    }

    decision
}

/// Finish-time duplicate handling: an unsuccessful score-mode job tries to
/// promote the best backup duplicate from history.
pub fn nzb_completed(services: &Services, queue: &mut DownloadQueue, nzb_id: NzbId) {
    let (dupe_mode, dupe_success, name, dupe_key) = match queue.find_nzb(nzb_id) {
        Some(nzb) => (
            nzb.dupe_mode,
            nzb.is_dupe_success(),
            nzb.name.clone(),
            nzb.dupe_key.clone(),
        ),
        None => match queue.find_history(nzb_id).and_then(|e| e.nzb()) {
            Some(nzb) => (
                nzb.dupe_mode,
                nzb.is_dupe_success(),
                nzb.name.clone(),
                nzb.dupe_key.clone(),
            ),
            None => return,
        },
    };

    if dupe_mode == DupeMode::Score && !dupe_success {
        return_best_dupe(services, queue, Some(nzb_id), &name, &dupe_key);
    }
}

/// Promote the best dupe-backup from history back to the queue.
///
/// The backup must beat every in-history success and every still-queued
/// duplicate on score, be healthy enough to repair, and not be marked bad.
/// An existing good duplicate suppresses any promotion.
pub fn return_best_dupe(
    services: &Services,
    queue: &mut DownloadQueue,
    exclude_id: Option<NzbId>,
    nzb_name: &str,
    dupe_key: &str,
) {
    // history successes fence the score; a good duplicate ends the search
    let mut dupe_found = false;
    let mut history_score = 0;
    for entry in &queue.history {
        let mut good_dupe = false;

        match &entry.content {
            HistoryContent::Nzb(nzb) => {
                if nzb.dupe_mode != DupeMode::Force
                    && nzb.is_dupe_success()
                    && same_name_or_key(&nzb.name, &nzb.dupe_key, nzb_name, dupe_key)
                {
                    if !dupe_found || nzb.dupe_score > history_score {
                        history_score = nzb.dupe_score;
                    }
                    dupe_found = true;
                    good_dupe = nzb.mark_status == MarkStatus::Good;
                }
            }
            HistoryContent::Dup(dup) => {
                if dup.dupe_mode != DupeMode::Force
                    && (dup.status == DupStatus::Success || dup.status == DupStatus::Good)
                    && same_name_or_key(&dup.name, &dup.dupe_key, nzb_name, dupe_key)
                {
                    if !dupe_found || dup.dupe_score > history_score {
                        history_score = dup.dupe_score;
                    }
                    dupe_found = true;
                    good_dupe = dup.status == DupStatus::Good;
                }
            }
        }

        if good_dupe {
            return;
        }
    }

    // still-queued duplicates fence the score as well
    let mut queue_dupe = false;
    let mut queue_score = 0;
    for queued in &queue.queue {
        if Some(queued.id) != exclude_id
            && queued.kind == NzbKind::Nzb
            && queued.dupe_mode != DupeMode::Force
            && same_name_or_key(&queued.name, &queued.dupe_key, nzb_name, dupe_key)
            && (!queue_dupe || queued.dupe_score > queue_score)
        {
            queue_score = queued.dupe_score;
            queue_dupe = true;
        }
    }

    // best backup above both fences
    let mut best: Option<(usize, i32)> = None;
    for (index, entry) in queue.history.iter().enumerate() {
        if let HistoryContent::Nzb(nzb) = &entry.content {
            if nzb.dupe_mode != DupeMode::Force
                && nzb.delete_status == DeleteStatus::Dupe
                && nzb.calc_health() >= nzb.calc_critical_health(true)
                && nzb.mark_status != MarkStatus::Bad
                && (!dupe_found || nzb.dupe_score > history_score)
                && (!queue_dupe || nzb.dupe_score > queue_score)
                && best.map_or(true, |(_, score)| nzb.dupe_score > score)
                && same_name_or_key(&nzb.name, &nzb.dupe_key, nzb_name, dupe_key)
            {
                best = Some((index, nzb.dupe_score));
            }
        }
    }

    if let Some((index, _)) = best {
        let id = queue.history[index].id();
        if let Some(nzb) = queue.history[index].nzb_mut() {
            tracing::info!(duplicate = %nzb.name, name = %nzb_name, "found duplicate");
            nzb.dupe_hint = DupeHint::RedownloadAuto;
        }
        history::history_redownload(services, queue, id, true);
    }
}

/// Apply a user mark to a history entry and run the duplicate follow-up:
/// a good mark hides all matching backups, a bad mark promotes the next
/// best backup.
pub fn history_mark(
    services: &Services,
    queue: &mut DownloadQueue,
    history_index: usize,
    mark_status: MarkStatus,
) {
    let entry = &mut queue.history[history_index];
    let mark_name = match mark_status {
        MarkStatus::None => "NONE",
        MarkStatus::Bad => "bad",
        MarkStatus::Good => "good",
        MarkStatus::Success => "success",
    };
    tracing::info!(name = %entry.name(), mark = mark_name, "marking history entry");

    let (dupe_mode, dupe_key, name) = match &mut entry.content {
        HistoryContent::Nzb(nzb) => {
            nzb.mark_status = mark_status;
            (nzb.dupe_mode, nzb.dupe_key.clone(), nzb.name.clone())
        }
        HistoryContent::Dup(dup) => {
            dup.status = match mark_status {
                MarkStatus::Good => DupStatus::Good,
                MarkStatus::Success => DupStatus::Success,
                _ => DupStatus::Bad,
            };
            (dup.dupe_mode, dup.dupe_key.clone(), dup.name.clone())
        }
    };
    queue.history_changed();

    if !services.config.duplicates.dupe_check || dupe_mode == DupeMode::Force {
        return;
    }

    match mark_status {
        MarkStatus::Good => {
            // move all matching backups into the dup shadow table
            history_cleanup(services, queue, history_index);
        }
        MarkStatus::Bad => {
            return_best_dupe(services, queue, None, &name, &dupe_key);
        }
        _ => {}
    }
}

/// Hide every dupe-backup matching the marked entry into its DupInfo
/// shadow
pub fn history_cleanup(services: &Services, queue: &mut DownloadQueue, mark_index: usize) {
    let (dupe_key, nzb_name, mark_id) = {
        let entry = &queue.history[mark_index];
        let (key, name) = match &entry.content {
            HistoryContent::Nzb(nzb) => (nzb.dupe_key.clone(), nzb.name.clone()),
            HistoryContent::Dup(dup) => (dup.dupe_key.clone(), dup.name.clone()),
        };
        (key, name, entry.id())
    };

    let mut changed = false;
    // oldest first, so the log reads in the order entries were added
    for index in (0..queue.history.len()).rev() {
        let hide = match &queue.history[index].content {
            HistoryContent::Nzb(nzb) => {
                nzb.dupe_mode != DupeMode::Force
                    && nzb.delete_status == DeleteStatus::Dupe
                    && queue.history[index].id() != mark_id
                    && same_name_or_key(&nzb.name, &nzb.dupe_key, &nzb_name, &dupe_key)
            }
            HistoryContent::Dup(_) => false,
        };

        if hide {
            history::history_hide(services, queue, index);
            changed = true;
        }
    }

    if changed {
        queue.history_changed();
    }
}

/// Bit set describing every duplicate of a name/key found in queue and
/// history; used by the query surface and tests
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DupeStatusSet {
    /// A duplicate is queued and has not started downloading
    pub queued: bool,
    /// A duplicate is downloading
    pub downloading: bool,
    /// A duplicate finished successfully
    pub success: bool,
    /// A duplicate finished with a warning
    pub warning: bool,
    /// A duplicate failed
    pub failure: bool,
}

/// Aggregate duplicate status of a name/key across queue and history
pub fn get_dupe_status(queue: &DownloadQueue, name: &str, dupe_key: &str) -> DupeStatusSet {
    let mut statuses = DupeStatusSet::default();

    for nzb in &queue.queue {
        if same_name_or_key(name, dupe_key, &nzb.name, &nzb.dupe_key) {
            if nzb.success_articles + nzb.failed_articles > 0 {
                statuses.downloading = true;
            } else {
                statuses.queued = true;
            }
        }
    }

    for entry in &queue.history {
        match &entry.content {
            HistoryContent::Nzb(nzb)
                if same_name_or_key(name, dupe_key, &nzb.name, &nzb.dupe_key) =>
            {
                let text_status = nzb.make_text_status(true);
                if text_status.starts_with("SUCCESS") {
                    statuses.success = true;
                } else if text_status.starts_with("FAILURE") {
                    statuses.failure = true;
                } else if text_status.starts_with("WARNING") {
                    statuses.warning = true;
                }
            }
            HistoryContent::Dup(dup)
                if same_name_or_key(name, dupe_key, &dup.name, &dup.dupe_key) =>
            {
                match dup.status {
                    DupStatus::Success | DupStatus::Good => statuses.success = true,
                    DupStatus::Failed | DupStatus::Bad => statuses.failure = true,
                    _ => {}
                }
            }
            _ => {}
        }
    }

    statuses
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_or_key_prefers_keys() {
        assert!(same_name_or_key("A", "key1", "B", "KEY1"));
        assert!(!same_name_or_key("same", "key1", "same", "key2"));
        assert!(same_name_or_key("Same", "", "sAmE", ""));
        // one empty key means names decide; differing names do not match
        assert!(!same_name_or_key("a", "key1", "b", ""));
    }

    #[test]
    fn same_name_or_key_is_symmetric() {
        let cases = [
            ("a", "k", "b", "k"),
            ("a", "", "a", ""),
            ("a", "k1", "b", "k2"),
            ("a", "k", "b", ""),
        ];
        for (n1, k1, n2, k2) in cases {
            assert_eq!(
                same_name_or_key(n1, k1, n2, k2),
                same_name_or_key(n2, k2, n1, k1),
                "symmetry for {n1}/{k1} vs {n2}/{k2}"
            );
        }
    }
}
