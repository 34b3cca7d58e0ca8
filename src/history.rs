//! History coordinator: moves finished jobs to history, ages them out and
//! supports return, redownload and retry.
//!
//! History entries are kept newest-first. Aging converts old entries into
//! duplicate shadows (when dupe-check is on) so the duplicate coordinator
//! keeps its memory across runs.

use crate::dupe;
use crate::model::{DownloadQueue, DupInfo, FileInfo, HistoryContent, HistoryEntry, NzbInfo};
use crate::nzb;
use crate::queue::editor;
use crate::services::Services;
use crate::types::{
    ArticleStatus, CleanupStatus, CompletedFileStatus, DeleteStatus, DupStatus, DupeHint,
    DupeMode, MarkStatus, MessageKind, MoveStatus, NzbId, ParStatus, PartialState, PostRenameStatus,
    QueueEvent, TaskStatus, UnpackStatus, UrlStatus,
};
use crate::utils;

/// Move a finished, failed or deleted job from the queue into history.
///
/// Remaining live files are parked as completed records; parked files are
/// additionally cleaned off disk when the job needs no retry material.
pub fn add_to_history(services: &Services, queue: &mut DownloadQueue, nzb_id: NzbId) {
    let mut nzb = match queue.remove_nzb(nzb_id) {
        Some(nzb) => nzb,
        None => return,
    };

    // park remaining files
    let files = std::mem::take(&mut nzb.file_list);
    for file in &files {
        nzb.update_completed_stats(file);
        nzb.completed_files
            .push(file.to_completed(CompletedFileStatus::None));
    }
    drop(files);

    // Cleaning up parked files if par-check was successful or unpack was
    // successful or health is 100% (if unpack and par-check were not
    // performed) or if deleted
    let mut cleanup_parked_files = ((nzb.par_status == ParStatus::Success
        || nzb.par_status == ParStatus::RepairPossible)
        && nzb.unpack_status != UnpackStatus::Failure
        && nzb.unpack_status != UnpackStatus::Space
        && nzb.unpack_status != UnpackStatus::Password)
        || (nzb.unpack_status == UnpackStatus::Success && nzb.par_status != ParStatus::Failure)
        || (nzb.unpack_status <= UnpackStatus::Skipped
            && nzb.par_status != ParStatus::Failure
            && nzb.failed_size - nzb.par_failed_size == 0)
        || nzb.delete_status != DeleteStatus::None;

    // Do not cleanup when parking
    cleanup_parked_files &= !nzb.parking;

    // Parking not possible if files were already deleted
    cleanup_parked_files |= nzb.unpack_cleaned_up_disk;

    if cleanup_parked_files {
        services.disk_state.discard_files(&nzb, false);
        nzb.completed_files.clear();
    }

    nzb.parked_file_count = 0;
    let last_index = nzb.completed_files.len().saturating_sub(1);
    let mut parked_names = Vec::new();
    for (index, completed) in nzb.completed_files.iter().enumerate() {
        if completed.status == CompletedFileStatus::None
            // a trailing partial file was not completely tried
            || (completed.status == CompletedFileStatus::Partial && index == last_index)
        {
            parked_names.push(completed.filename.clone());
            nzb.parked_file_count += 1;
        }
    }
    for name in parked_names {
        nzb.add_message(MessageKind::Detail, format!("Parking file {name}"));
    }

    nzb.remaining_par_count = 0;
    nzb.parking = false;
    nzb.post_processing = false;

    if nzb.direct_rename_status == TaskStatus::Running {
        nzb.direct_rename_status = TaskStatus::Failure;
    }

    nzb.dupe_hint = DupeHint::None;

    let name = nzb.name.clone();
    nzb.add_message(MessageKind::Info, format!("Collection {name} added to history"));

    let entry = HistoryEntry::from_nzb(nzb, utils::current_time());
    queue.history.insert(0, entry);
    queue.history_changed();

    services.emit(QueueEvent::HistoryAdded { id: nzb_id });
}

/// Periodic maintenance: remove history entries older than the configured
/// retention. With dupe-check on, Nzb entries age into duplicate shadows
/// instead of disappearing.
pub fn service_work(services: &Services, queue: &mut DownloadQueue) {
    let min_time = utils::current_time()
        - services.config.duplicates.keep_history_days as i64 * 60 * 60 * 24;
    let mut changed = false;

    // oldest first, so the log reads in insertion order
    for index in (0..queue.history.len()).rev() {
        let entry = &queue.history[index];
        if entry.is_dup() || entry.time >= min_time {
            continue;
        }

        if services.config.duplicates.dupe_check && !entry.is_url() && entry.nzb().is_some() {
            history_hide(services, queue, index);
        } else {
            if let Some(HistoryContent::Nzb(nzb)) =
                queue.history.get_mut(index).map(|e| &mut e.content)
            {
                if nzb.kind == crate::types::NzbKind::Nzb {
                    delete_disk_files(services, nzb);
                }
            }
            tracing::info!(name = %queue.history[index].name(), "collection removed from history");
            queue.history.remove(index);
        }
        changed = true;
    }

    if changed {
        queue.history_changed();
    }
}

/// Remove a job's parked file state from disk and, when configured, the
/// saved source NZB file(s).
pub fn delete_disk_files(services: &Services, nzb: &mut NzbInfo) {
    services.disk_state.discard_files(nzb, true);
    nzb.file_list.clear();

    if !services.config.nzb_cleanup_disk {
        return;
    }

    // the queued filename may list several files separated with "|"
    // (merged groups)
    for name in nzb.queued_filename.split('|') {
        if name.is_empty() {
            continue;
        }
        let path = std::path::Path::new(name);
        if path.exists() {
            tracing::info!(file = %name, "deleting file");
            if let Err(e) = std::fs::remove_file(path) {
                tracing::error!(file = %name, error = %e, "could not delete file");
            }
        }
    }
}

/// Replace a full history entry with its duplicate shadow
pub fn history_hide(services: &Services, queue: &mut DownloadQueue, index: usize) {
    let time = queue.history[index].time;
    let mut nzb = match std::mem::replace(
        &mut queue.history[index].content,
        HistoryContent::Dup(Box::default()),
    ) {
        HistoryContent::Nzb(nzb) => nzb,
        content => {
            queue.history[index].content = content;
            return;
        }
    };

    let status = if nzb.mark_status == MarkStatus::Good {
        DupStatus::Good
    } else if nzb.mark_status == MarkStatus::Bad {
        DupStatus::Bad
    } else if nzb.mark_status == MarkStatus::Success {
        DupStatus::Success
    } else if nzb.delete_status == DeleteStatus::Dupe {
        DupStatus::Dupe
    } else if nzb.delete_status == DeleteStatus::Manual
        || nzb.delete_status == DeleteStatus::Good
        || nzb.delete_status == DeleteStatus::Copy
    {
        DupStatus::Deleted
    } else if nzb.is_dupe_success() {
        DupStatus::Success
    } else {
        DupStatus::Failed
    };

    let dup = DupInfo {
        id: nzb.id,
        name: nzb.name.clone(),
        dupe_key: nzb.dupe_key.clone(),
        dupe_score: nzb.dupe_score,
        dupe_mode: nzb.dupe_mode,
        size: nzb.size,
        full_content_hash: nzb.full_content_hash,
        filtered_content_hash: nzb.filtered_content_hash,
        status,
    };

    delete_disk_files(services, &mut nzb);
    tracing::info!(name = %nzb.name, "collection removed from history");

    queue.history[index] = HistoryEntry::from_dup(dup, time);
    queue.history_changed();
}

/// Apply one history edit to a list of entries.
///
/// For `HistoryMarkBad` over several ids a first pass only sets the marks,
/// so the per-id promotion logic skips entries that are about to be marked
/// bad as well.
pub fn edit_list(
    services: &Services,
    queue: &mut DownloadQueue,
    ids: &[NzbId],
    action: editor::EditAction,
    args: &str,
) -> bool {
    use editor::EditAction;

    if action == EditAction::HistoryMarkBad {
        for id in ids {
            let index = queue.find_history_index(*id);
            if let Some(index) = index {
                if let Some(nzb) = queue.history[index].nzb_mut() {
                    nzb.mark_status = MarkStatus::Bad;
                }
            }
        }
    }

    let mut ok = false;

    for id in ids {
        let index = match queue.find_history_index(*id) {
            Some(index) => index,
            None => continue,
        };
        ok = true;

        match action {
            EditAction::HistoryDelete | EditAction::HistoryFinalDelete => {
                history_delete(services, queue, index, action == EditAction::HistoryFinalDelete);
            }
            EditAction::HistoryReturn => history_return(services, queue, index),
            EditAction::HistoryProcess => history_process(services, queue, index),
            EditAction::HistoryRedownload => {
                history_redownload(services, queue, *id, false);
            }
            EditAction::HistoryRetryFailed => {
                history_retry(services, queue, index, true, false);
            }
            EditAction::HistorySetParameter => {
                ok = history_set_parameter(queue, index, args);
            }
            EditAction::HistorySetCategory => {
                ok = history_set_category(queue, index, args);
            }
            EditAction::HistorySetName => {
                ok = history_set_name(queue, index, args);
            }
            EditAction::HistorySetDupeKey
            | EditAction::HistorySetDupeScore
            | EditAction::HistorySetDupeMode
            | EditAction::HistorySetDupeBackup => {
                history_set_dupe_param(queue, index, action, args);
            }
            EditAction::HistoryMarkBad => {
                dupe::history_mark(services, queue, index, MarkStatus::Bad);
            }
            EditAction::HistoryMarkGood => {
                dupe::history_mark(services, queue, index, MarkStatus::Good);
            }
            EditAction::HistoryMarkSuccess => {
                dupe::history_mark(services, queue, index, MarkStatus::Success);
            }
            _ => {}
        }
    }

    if ok {
        queue.history_changed();
    }

    ok
}

/// Delete a history entry; destination files of failed jobs are removed,
/// and without `final_delete` an Nzb entry hides into its shadow when
/// dupe-check is on.
pub fn history_delete(
    services: &Services,
    queue: &mut DownloadQueue,
    index: usize,
    final_delete: bool,
) {
    tracing::info!(name = %queue.history[index].name(), "deleting from history");

    let is_url = queue.history[index].is_url();
    let is_nzb_kind = queue.history[index].nzb().is_some() && !is_url;

    if is_nzb_kind {
        if let Some(HistoryContent::Nzb(nzb)) =
            queue.history.get_mut(index).map(|e| &mut e.content)
        {
            delete_disk_files(services, nzb);

            let failed = nzb.delete_status != DeleteStatus::None
                || nzb.par_status == ParStatus::Failure
                || nzb.unpack_status == UnpackStatus::Failure
                || nzb.unpack_status == UnpackStatus::Password;
            let dest_dir = nzb.dest_dir.clone();

            if failed && dest_dir.is_dir() {
                tracing::info!(dir = %dest_dir.display(), "deleting destination directory");
                if let Err(e) = std::fs::remove_dir_all(&dest_dir) {
                    tracing::error!(dir = %dest_dir.display(), error = %e, "could not delete directory");
                }
            }
        }
    }

    if final_delete || !services.config.duplicates.dupe_check || is_url {
        queue.history.remove(index);
        queue.history_changed();
    } else if is_nzb_kind {
        history_hide(services, queue, index);
    } else {
        queue.history.remove(index);
        queue.history_changed();
    }
}

/// Download the remaining (parked) files of a history entry again
pub fn history_return(services: &Services, queue: &mut DownloadQueue, index: usize) {
    let entry = &queue.history[index];
    if entry.is_url() {
        let id = entry.id();
        history_redownload(services, queue, id, false);
        return;
    }

    match entry.nzb() {
        Some(nzb) if nzb.parked_file_count == 0 => {
            tracing::warn!(
                name = %entry.name(),
                "history item does not have any files left for download"
            );
        }
        Some(_) => {
            history_retry(services, queue, index, false, false);
        }
        None => {
            tracing::error!(name = %entry.name(), "history item has wrong type");
        }
    }
}

/// Run post-processing for a history entry again
pub fn history_process(services: &Services, queue: &mut DownloadQueue, index: usize) {
    if queue.history[index].nzb().is_none() || queue.history[index].is_url() {
        tracing::error!(
            name = %queue.history[index].name(),
            "could not post-process again: history item has wrong type"
        );
        return;
    }

    history_retry(services, queue, index, false, true);
}

/// Re-parse the saved NZB and download the whole job again.
///
/// With `restore_pause_state` a job that was dupe-deleted while fully
/// paused returns to the queue paused.
pub fn history_redownload(
    services: &Services,
    queue: &mut DownloadQueue,
    id: NzbId,
    restore_pause_state: bool,
) {
    let index = match queue.find_history_index(id) {
        Some(index) => index,
        None => return,
    };

    if queue.history[index].is_url() {
        let entry = queue.history.remove(index);
        if let HistoryContent::Nzb(mut nzb) = entry.content {
            nzb.url_status = UrlStatus::None;
            nzb.delete_status = DeleteStatus::None;
            if nzb.dupe_hint == DupeHint::None {
                nzb.dupe_hint = DupeHint::RedownloadManual;
            }
            let id = nzb.id;
            queue.add_nzb(*nzb, true);
            queue.history_changed();
            services.emit(QueueEvent::UrlReturned { id });
        }
        return;
    }

    if queue.history[index].nzb().is_none() {
        tracing::error!(
            name = %queue.history[index].name(),
            "could not download again: history item has wrong type"
        );
        return;
    }

    let (name, queued_filename, category, delete_paused, dest_dir) = {
        let nzb = queue.history[index].nzb().unwrap_or_else(|| unreachable!());
        (
            nzb.name.clone(),
            nzb.queued_filename.clone(),
            nzb.category.clone(),
            nzb.delete_paused,
            nzb.dest_dir.clone(),
        )
    };
    let paused = restore_pause_state && delete_paused;

    if !std::path::Path::new(&queued_filename).is_file() {
        tracing::error!(
            name = %name,
            file = %queued_filename,
            "could not download again: could not find source nzb-file"
        );
        return;
    }

    let mut new_nzb = match nzb::parse_nzb_file(
        std::path::Path::new(&queued_filename),
        &category,
        &services.config,
    ) {
        Ok(new_nzb) => new_nzb,
        Err(e) => {
            tracing::error!(name = %name, error = %e, "could not download again: could not parse nzb-file");
            return;
        }
    };

    tracing::info!(name = %name, "downloading again");

    for file_index in 0..new_nzb.file_list.len() {
        new_nzb.set_file_paused(file_index, paused);
    }

    if dest_dir.is_dir() {
        tracing::debug!(dir = %dest_dir.display(), "deleting");
        if let Err(e) = std::fs::remove_dir_all(&dest_dir) {
            tracing::error!(dir = %dest_dir.display(), error = %e, "could not delete directory");
        }
    }

    let fresh_file_ids: Vec<crate::types::FileId> = (0..new_nzb.file_list.len())
        .map(|_| queue.id_gen.next_file_id())
        .collect();

    {
        let nzb = match queue.history[index].nzb_mut() {
            Some(nzb) => nzb,
            None => return,
        };
        let config = services.config.clone();
        nzb.build_dest_dir_name(&config);
        let dest_dir = nzb.dest_dir.clone();
        if dest_dir.is_dir() {
            tracing::debug!(dir = %dest_dir.display(), "deleting");
            if let Err(e) = std::fs::remove_dir_all(&dest_dir) {
                tracing::error!(dir = %dest_dir.display(), error = %e, "could not delete directory");
            }
        }

        services.disk_state.discard_files(nzb, true);

        // reset status fields not covered by the move back to the queue
        nzb.move_status = MoveStatus::None;
        nzb.unpack_cleaned_up_disk = false;
        nzb.par_status = ParStatus::None;
        nzb.par_rename_status = PostRenameStatus::None;
        nzb.rar_rename_status = PostRenameStatus::None;
        nzb.direct_rename_status = TaskStatus::None;
        nzb.direct_unpack_status = TaskStatus::None;
        nzb.downloaded_size = 0;
        nzb.download_sec = 0;
        nzb.post_total_sec = 0;
        nzb.par_sec = 0;
        nzb.repair_sec = 0;
        nzb.unpack_sec = 0;
        nzb.all_first = false;
        nzb.waiting_par = false;
        nzb.loading_par = false;
        nzb.completed_files.clear();
        nzb.server_stats.clear();
        nzb.current_server_stats.clear();

        nzb.move_file_list(&mut new_nzb);
        for (file, fresh_id) in nzb.file_list.iter_mut().zip(fresh_file_ids) {
            file.id = fresh_id;
        }
    }

    check_dupe_file_infos(queue, index);

    move_to_queue(services, queue, index, false);

    services.emit(QueueEvent::NzbReturned { id });
}

/// Drop files a parked same-key backup already downloaded successfully.
///
/// Run after a redownload re-parse: any file whose confirmed name matches
/// a successfully parked file of another backup duplicate is paused and
/// flagged, so the same content is not fetched twice.
pub fn check_dupe_file_infos(queue: &mut DownloadQueue, history_index: usize) {
    let (id, name, dupe_key, dupe_mode) = {
        let nzb = match queue.history[history_index].nzb() {
            Some(nzb) => nzb,
            None => return,
        };
        (nzb.id, nzb.name.clone(), nzb.dupe_key.clone(), nzb.dupe_mode)
    };

    if dupe_mode == DupeMode::Force {
        return;
    }

    let mut already_downloaded: Vec<String> = Vec::new();
    for entry in &queue.history {
        if entry.id() == id {
            continue;
        }
        if let HistoryContent::Nzb(other) = &entry.content {
            if other.dupe_mode != DupeMode::Force
                && dupe::same_name_or_key(&other.name, &other.dupe_key, &name, &dupe_key)
            {
                for completed in &other.completed_files {
                    if completed.status == CompletedFileStatus::Success {
                        already_downloaded.push(completed.filename.clone());
                    }
                }
            }
        }
    }

    if already_downloaded.is_empty() {
        return;
    }

    let nzb = match queue.history[history_index].nzb_mut() {
        Some(nzb) => nzb,
        None => return,
    };
    for file_index in 0..nzb.file_list.len() {
        let filename = nzb.file_list[file_index].filename.clone();
        let dupe = already_downloaded
            .iter()
            .any(|name| utils::str_eq_ignore_case(name, &filename));
        if dupe && !nzb.file_list[file_index].dupe_deleted {
            nzb.add_message(
                MessageKind::Detail,
                format!("File {filename} is already downloaded by a duplicate"),
            );
            nzb.file_list[file_index].dupe_deleted = true;
            nzb.set_file_paused(file_index, true);
        }
    }
}

/// Move failed parked files back into the live list and return the job to
/// the queue.
pub fn history_retry(
    services: &Services,
    queue: &mut DownloadQueue,
    index: usize,
    reset_failed: bool,
    reprocess: bool,
) {
    if queue.history[index].nzb().is_none() || queue.history[index].is_url() {
        tracing::error!(
            name = %queue.history[index].name(),
            "could not retry: history item has wrong type"
        );
        return;
    }

    let id = queue.history[index].id();
    {
        let nzb = match queue.history[index].nzb_mut() {
            Some(nzb) => nzb,
            None => return,
        };

        if !nzb.dest_dir.is_dir() {
            let dest_dir = nzb.dest_dir.clone();
            tracing::error!(
                name = %nzb.name,
                dir = %dest_dir.display(),
                "could not retry: destination directory doesn't exist"
            );
            return;
        }

        let what = if reset_failed {
            "Retrying failed articles for"
        } else if reprocess {
            "Post-processing again"
        } else {
            "Downloading remaining files for"
        };
        let name = nzb.name.clone();
        nzb.add_message(MessageKind::Info, format!("{what} {name}"));

        // move failed completed files back to the (parked) live list
        let mut completed_index = 0;
        while completed_index < nzb.completed_files.len() {
            let completed = nzb.completed_files[completed_index].clone();
            let eligible = completed.status != CompletedFileStatus::Success
                && (completed.status != CompletedFileStatus::Failure || reset_failed)
                && completed.id.get() > 0;

            if !eligible {
                completed_index += 1;
                continue;
            }

            let mut file = FileInfo {
                id: completed.id,
                nzb_id: nzb.id,
                ..Default::default()
            };

            let loaded = services.disk_state.load_file(&mut file, true, true);
            let usable = loaded
                && (completed.status == CompletedFileStatus::None
                    || (completed.status == CompletedFileStatus::Failure && reset_failed)
                    || (completed.status == CompletedFileStatus::Partial
                        && services.disk_state.load_file_state(&mut file)
                        && (reset_failed || file.remaining_size > 0)));

            if !usable {
                completed_index += 1;
                continue;
            }

            file.filename = completed.filename.clone();
            file.origname = completed.origname.clone();
            file.hash16k = completed.hash16k.clone();
            file.par_set_id = completed.par_set_id.clone();
            file.par_file = completed.par_file;

            let output_filename = nzb.dest_dir.join(&file.filename);
            let on_disk_size = std::fs::metadata(&output_filename)
                .map(|m| m.len())
                .unwrap_or(0);

            if file.success_articles == 0 || on_disk_size == 0 {
                std::fs::remove_file(&output_filename).ok();
            }

            if file.success_articles > 0 {
                if output_filename.is_file() {
                    file.partial_state = PartialState::Completed;
                } else if !reprocess {
                    let filename = file.filename.clone();
                    nzb.add_message(
                        MessageKind::Warning,
                        format!("File {filename} could not be found on disk, downloading again"),
                    );
                    file.partial_state = PartialState::None;
                }
            }

            reset_articles(
                nzb,
                &mut file,
                completed.status == CompletedFileStatus::Failure,
                reset_failed,
            );

            services.disk_state.discard_file(
                file.id,
                false,
                file.partial_state != PartialState::Completed,
            );
            if file.partial_state == PartialState::Completed {
                services.disk_state.save_file_state(&file, true).ok();
            }

            nzb.file_list.push(file);
            nzb.completed_files.remove(completed_index);
        }

        nzb.update_current_stats();
    }

    move_to_queue(services, queue, index, reprocess);

    if let Some(nzb) = queue.find_nzb_mut(id) {
        editor::pause_extra_pars_for_nzb(nzb);
    }
}

/// Per-article reset rules for a retried file.
///
/// Failed articles retry when failures are being reset or the file has no
/// partial state; undefined articles retry on a full reset of an
/// all-failed file; finished articles retry only when the partial state
/// was lost.
pub fn reset_articles(nzb: &mut NzbInfo, file: &mut FileInfo, all_failed: bool, reset_failed: bool) {
    if all_failed {
        file.failed_size = file.size - file.missed_size;
        file.failed_articles = file.total_articles - file.missed_articles;
        file.remaining_size = 0;
        file.completed_articles = file.failed_articles;
    }

    nzb.server_stats
        .list_op(&file.server_stats, crate::model::StatOp::Subtract);

    nzb.failed_size -= file.failed_size;
    nzb.success_size -= file.success_size;
    nzb.failed_articles -= file.failed_articles;
    nzb.success_articles -= file.success_articles;

    if file.par_file {
        nzb.par_failed_size -= file.failed_size;
        nzb.par_success_size -= file.success_size;
    }

    for article in &mut file.articles {
        let retry = (article.status == ArticleStatus::Failed
            && (reset_failed || file.partial_state == PartialState::None))
            || (article.status == ArticleStatus::Undefined && reset_failed && all_failed)
            || (article.status == ArticleStatus::Finished
                && file.partial_state == PartialState::None);

        if !retry {
            continue;
        }

        file.completed_articles -= 1;
        file.remaining_size += article.size;

        match article.status {
            ArticleStatus::Failed | ArticleStatus::Undefined => {
                file.failed_articles -= 1;
                file.failed_size -= article.size;
            }
            ArticleStatus::Finished => {
                file.success_articles -= 1;
                file.success_size -= article.size;
            }
            ArticleStatus::Running => {}
        }

        article.status = ArticleStatus::Undefined;
        article.crc = 0;
        article.segment_offset = 0;
        article.segment_size = 0;
    }
}

/// Return a history entry's job to the queue, resetting the
/// post-processing state that a new pass will redo.
pub fn move_to_queue(
    services: &Services,
    queue: &mut DownloadQueue,
    index: usize,
    reprocess: bool,
) {
    let entry = queue.history.remove(index);
    let mut nzb = match entry.content {
        HistoryContent::Nzb(nzb) => *nzb,
        content => {
            queue.history.insert(index, HistoryEntry { time: entry.time, content });
            return;
        }
    };
    queue.history_changed();

    tracing::debug!(name = %nzb.name, "returning from history back to download queue");

    let unparked: Vec<String> = nzb.file_list.iter().map(|f| f.filename.clone()).collect();
    for filename in unparked {
        nzb.add_message(MessageKind::Detail, format!("Unparking file {filename}"));
    }

    if !nzb.unpack_cleaned_up_disk {
        nzb.unpack_status = UnpackStatus::None;
        nzb.direct_unpack_status = TaskStatus::None;
        nzb.cleanup_status = CleanupStatus::None;
        nzb.par_rename_status = PostRenameStatus::None;
        nzb.rar_rename_status = PostRenameStatus::None;
        nzb.post_total_sec -= nzb.unpack_sec;
        nzb.unpack_sec = 0;

        if !crate::par2::find_main_pars(&nzb.dest_dir).is_empty() {
            nzb.par_status = ParStatus::None;
            nzb.post_total_sec -= nzb.par_sec;
            nzb.par_sec = 0;
            nzb.repair_sec = 0;
        }
    }
    nzb.delete_status = DeleteStatus::None;
    nzb.delete_paused = false;
    nzb.mark_status = MarkStatus::None;
    nzb.script_statuses.clear();
    nzb.parked_file_count = 0;
    if nzb.move_status == MoveStatus::Failure {
        nzb.move_status = MoveStatus::None;
    }
    nzb.reprocess = reprocess;
    nzb.final_dir = std::path::PathBuf::new();

    let id = nzb.id;
    let name = nzb.name.clone();
    nzb.add_message(
        MessageKind::Info,
        format!("{name} returned from history back to download queue"),
    );

    queue.add_nzb(nzb, true);

    if reprocess {
        tracing::debug!(name = %name, "restarting postprocessing");
        services.enqueue_post(id);
        services.emit(QueueEvent::NzbReturned { id });
    }
}

fn history_set_parameter(queue: &mut DownloadQueue, index: usize, text: &str) -> bool {
    let entry = &mut queue.history[index];
    let nzb = match entry.nzb_mut() {
        Some(nzb) => nzb,
        None => {
            tracing::error!(name = %entry.name(), "could not set parameter: wrong item type");
            return false;
        }
    };

    match text.split_once('=') {
        Some((name, value)) => {
            nzb.parameters.set_parameter(name, value);
            true
        }
        None => {
            tracing::error!(name = %nzb.name, argument = %text, "invalid parameter argument");
            true
        }
    }
}

fn history_set_category(queue: &mut DownloadQueue, index: usize, category: &str) -> bool {
    let entry = &mut queue.history[index];
    match entry.nzb_mut() {
        Some(nzb) => {
            nzb.category = category.to_string();
            true
        }
        None => {
            tracing::error!(name = %entry.name(), "could not set category: wrong item type");
            false
        }
    }
}

fn history_set_name(queue: &mut DownloadQueue, index: usize, name: &str) -> bool {
    if name.is_empty() {
        tracing::error!("could not rename: the new name cannot be empty");
        return false;
    }

    let entry = &mut queue.history[index];
    match &mut entry.content {
        HistoryContent::Nzb(nzb) => nzb.name = name.to_string(),
        HistoryContent::Dup(dup) => dup.name = name.to_string(),
    }
    true
}

fn history_set_dupe_param(
    queue: &mut DownloadQueue,
    index: usize,
    action: editor::EditAction,
    text: &str,
) {
    use editor::EditAction;

    let mode = if action == EditAction::HistorySetDupeMode {
        match editor::parse_dupe_mode(text) {
            Some(mode) => Some(mode),
            None => {
                tracing::error!(mode = %text, "could not set duplicate mode: incorrect mode");
                return;
            }
        }
    } else {
        None
    };

    let entry = &mut queue.history[index];
    match &mut entry.content {
        HistoryContent::Nzb(nzb) => match action {
            EditAction::HistorySetDupeKey => nzb.dupe_key = text.to_string(),
            EditAction::HistorySetDupeScore => nzb.dupe_score = text.parse().unwrap_or(0),
            EditAction::HistorySetDupeMode => {
                if let Some(mode) = mode {
                    nzb.dupe_mode = mode;
                }
            }
            EditAction::HistorySetDupeBackup => {
                if nzb.kind == crate::types::NzbKind::Url {
                    tracing::error!(name = %nzb.name, "wrong item type for dupe-backup");
                    return;
                }
                if nzb.delete_status != DeleteStatus::Dupe
                    && nzb.delete_status != DeleteStatus::Manual
                {
                    tracing::error!(name = %nzb.name, "wrong delete status for dupe-backup");
                    return;
                }
                let backup = text.eq_ignore_ascii_case("YES")
                    || text.eq_ignore_ascii_case("TRUE")
                    || text == "1";
                nzb.delete_status = if backup {
                    DeleteStatus::Dupe
                } else {
                    DeleteStatus::Manual
                };
            }
            _ => {}
        },
        HistoryContent::Dup(dup) => match action {
            EditAction::HistorySetDupeKey => dup.dupe_key = text.to_string(),
            EditAction::HistorySetDupeScore => dup.dupe_score = text.parse().unwrap_or(0),
            EditAction::HistorySetDupeMode => {
                if let Some(mode) = mode {
                    dup.dupe_mode = mode;
                }
            }
            EditAction::HistorySetDupeBackup => {
                tracing::error!(name = %dup.name, "wrong item type for dupe-backup");
            }
            _ => {}
        },
    }
}
