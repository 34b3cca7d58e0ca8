//! Queue editor: the stable edit contract over queue, post-processing and
//! history.
//!
//! Every operation is a pure transformation over the locked queue. Moves
//! convert top/bottom/offset semantics into clamped relative offsets that
//! preserve the relative order of multi-id selections; sorting is stable
//! with an automatic direction flip when an unsuffixed criterion leaves
//! the order unchanged.

use crate::history;
use crate::model::{DownloadQueue, NzbInfo};
use crate::queue::coordinator::QueueCoordinator;
use crate::types::{DupeMode, FileId, MessageKind, NzbId};
use crate::utils;

/// Offset magnitude that guarantees a clamp to top or bottom
const MAX_ID: i32 = 1_000_000_000;

/// Every supported edit operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum EditAction {
    // file actions
    FileMoveOffset,
    FileMoveTop,
    FileMoveBottom,
    FilePause,
    FileResume,
    FileDelete,
    FilePauseAllPars,
    FilePauseExtraPars,
    FileReorder,
    FileSplit,
    // group (job) actions
    GroupMoveOffset,
    GroupMoveTop,
    GroupMoveBottom,
    GroupMoveBefore,
    GroupMoveAfter,
    GroupPause,
    GroupResume,
    GroupDelete,
    GroupParkDelete,
    GroupDupeDelete,
    GroupFinalDelete,
    GroupPauseAllPars,
    GroupPauseExtraPars,
    GroupSetPriority,
    GroupSetCategory,
    GroupApplyCategory,
    GroupSetName,
    GroupSetParameter,
    GroupSetDupeKey,
    GroupSetDupeScore,
    GroupSetDupeMode,
    GroupMerge,
    GroupSort,
    GroupSortFiles,
    // post-processing actions
    PostDelete,
    // history actions
    HistoryDelete,
    HistoryFinalDelete,
    HistoryReturn,
    HistoryProcess,
    HistoryRedownload,
    HistoryRetryFailed,
    HistorySetParameter,
    HistorySetCategory,
    HistorySetName,
    HistorySetDupeKey,
    HistorySetDupeScore,
    HistorySetDupeMode,
    HistorySetDupeBackup,
    HistoryMarkBad,
    HistoryMarkGood,
    HistoryMarkSuccess,
}

impl EditAction {
    fn is_file_action(self) -> bool {
        matches!(
            self,
            EditAction::FileMoveOffset
                | EditAction::FileMoveTop
                | EditAction::FileMoveBottom
                | EditAction::FilePause
                | EditAction::FileResume
                | EditAction::FileDelete
                | EditAction::FilePauseAllPars
                | EditAction::FilePauseExtraPars
                | EditAction::FileReorder
                | EditAction::FileSplit
        )
    }

    fn is_history_action(self) -> bool {
        matches!(
            self,
            EditAction::HistoryDelete
                | EditAction::HistoryFinalDelete
                | EditAction::HistoryReturn
                | EditAction::HistoryProcess
                | EditAction::HistoryRedownload
                | EditAction::HistoryRetryFailed
                | EditAction::HistorySetParameter
                | EditAction::HistorySetCategory
                | EditAction::HistorySetName
                | EditAction::HistorySetDupeKey
                | EditAction::HistorySetDupeScore
                | EditAction::HistorySetDupeMode
                | EditAction::HistorySetDupeBackup
                | EditAction::HistoryMarkBad
                | EditAction::HistoryMarkGood
                | EditAction::HistoryMarkSuccess
        )
    }
}

/// How ids are derived for an edit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchMode {
    /// The id list addresses entries directly
    Ids,
    /// Names match exactly (`JobName` or `JobName/BaseFilename`)
    Names,
    /// Names are regular expressions
    RegEx,
}

/// Parse a dupe-mode argument
pub fn parse_dupe_mode(text: &str) -> Option<DupeMode> {
    if text.eq_ignore_ascii_case("SCORE") {
        Some(DupeMode::Score)
    } else if text.eq_ignore_ascii_case("ALL") {
        Some(DupeMode::All)
    } else if text.eq_ignore_ascii_case("FORCE") {
        Some(DupeMode::Force)
    } else {
        None
    }
}

/// Apply one edit action to the addressed entries. Returns false for
/// unknown ids or invalid arguments, without side effects in that case.
#[allow(clippy::too_many_arguments)]
pub fn edit_list(
    coordinator: &QueueCoordinator,
    queue: &mut DownloadQueue,
    ids: &[i32],
    names: &[String],
    match_mode: MatchMode,
    action: EditAction,
    args: &str,
) -> bool {
    if action == EditAction::PostDelete {
        let services = coordinator.services();
        let mut ok = false;
        for id in ids {
            ok |= services.cancel_post(NzbId(*id));
        }
        return ok;
    }

    if action.is_history_action() {
        let history_ids: Vec<NzbId> = ids.iter().map(|id| NzbId(*id)).collect();
        return history::edit_list(coordinator.services(), queue, &history_ids, action, args);
    }

    let ids = if match_mode == MatchMode::Ids {
        ids.to_vec()
    } else {
        match build_id_list_from_names(queue, names, match_mode, action) {
            Some(ids) => ids,
            None => return false,
        }
    };

    let ok = intern_edit_list(coordinator, queue, &ids, action, args);
    queue.queue_changed();

    ok || match_mode == MatchMode::RegEx
}

/// Resolve names to ids: file actions match `JobName/BaseFilename`, group
/// actions the job name. In exact mode an unmatched name fails the edit.
fn build_id_list_from_names(
    queue: &DownloadQueue,
    names: &[String],
    match_mode: MatchMode,
    action: EditAction,
) -> Option<Vec<i32>> {
    let mut ids = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for name in names {
        let regex = if match_mode == MatchMode::RegEx {
            match regex::Regex::new(name) {
                Ok(regex) => Some(regex),
                Err(_) => return None,
            }
        } else {
            None
        };

        let mut found = false;

        for nzb in &queue.queue {
            if action.is_file_action() {
                for file in &nzb.file_list {
                    let filename =
                        format!("{}/{}", nzb.name, utils::base_file_name(&file.filename));
                    let matched = match &regex {
                        Some(regex) => regex.is_match(&filename),
                        None => filename == *name,
                    };
                    if matched && seen.insert(file.id.get()) {
                        ids.push(file.id.get());
                        found = true;
                    }
                }
            } else {
                let matched = match &regex {
                    Some(regex) => regex.is_match(&nzb.name),
                    None => nzb.name == *name,
                };
                if matched && seen.insert(nzb.id.get()) {
                    ids.push(nzb.id.get());
                    found = true;
                }
            }
        }

        if !found && match_mode == MatchMode::Names {
            return None;
        }
    }

    Some(ids)
}

fn intern_edit_list(
    coordinator: &QueueCoordinator,
    queue: &mut DownloadQueue,
    ids: &[i32],
    action: EditAction,
    args: &str,
) -> bool {
    match action {
        EditAction::GroupSort => return sort_groups(queue, ids, args),
        EditAction::GroupMerge => return merge_groups(coordinator, queue, ids),
        EditAction::FileSplit => return split_group(coordinator, queue, ids, args),
        EditAction::GroupMoveBefore | EditAction::GroupMoveAfter => {
            return move_groups_to(queue, ids, action == EditAction::GroupMoveBefore, args);
        }
        EditAction::FileReorder => {
            reorder_files(queue, ids);
            return !ids.is_empty();
        }
        EditAction::FilePauseAllPars | EditAction::FilePauseExtraPars => {
            pause_pars_for_files(queue, ids, action == EditAction::FilePauseExtraPars);
            return !ids.is_empty();
        }
        _ => {}
    }

    if action.is_file_action() {
        let items = prepare_file_items(queue, ids, action, parse_offset(action, args));
        let edited = !items.is_empty();
        for (file_id, offset) in items {
            apply_file_action(coordinator, queue, file_id, action, offset);
        }
        edited
    } else {
        let items = prepare_group_items(queue, ids, action, parse_offset(action, args));
        let edited = !items.is_empty();
        for (nzb_id, offset) in items {
            apply_group_action(coordinator, queue, nzb_id, action, offset, args);
        }
        edited
    }
}

fn parse_offset(action: EditAction, args: &str) -> i32 {
    match action {
        EditAction::FileMoveOffset | EditAction::GroupMoveOffset => args.parse().unwrap_or(0),
        EditAction::FileMoveTop | EditAction::GroupMoveTop => -MAX_ID,
        EditAction::FileMoveBottom | EditAction::GroupMoveBottom => MAX_ID,
        _ => 0,
    }
}

/// Clamp per-item offsets so multi-id moves keep the selection's relative
/// order and never run past the ends.
fn clamp_offsets(positions: &[usize], total: usize, offset: i32) -> Vec<(usize, i32)> {
    let mut items = Vec::with_capacity(positions.len());
    let total = total as i32;
    let mut last_dest: Option<i32> = None;

    // moving up processes top-down, moving down bottom-up, so earlier
    // items claim the boundary slots first
    let ordered: Vec<usize> = if offset < 0 {
        positions.to_vec()
    } else {
        positions.iter().rev().copied().collect()
    };

    for index in ordered {
        let index = index as i32;
        let mut work_offset = offset;
        let dest = index + work_offset;
        match last_dest {
            None => {
                if dest < 0 {
                    work_offset = -index;
                } else if dest > total - 1 {
                    work_offset = total - 1 - index;
                }
            }
            Some(last) => {
                if work_offset < 0 && dest <= last {
                    work_offset = last - index + 1;
                } else if work_offset > 0 && dest >= last {
                    work_offset = last - index - 1;
                }
            }
        }
        last_dest = Some(index + work_offset);
        items.push((index as usize, work_offset));
    }

    items
}

fn is_move_action(action: EditAction) -> bool {
    matches!(
        action,
        EditAction::FileMoveOffset
            | EditAction::FileMoveTop
            | EditAction::FileMoveBottom
            | EditAction::GroupMoveOffset
            | EditAction::GroupMoveTop
            | EditAction::GroupMoveBottom
    )
}

fn prepare_file_items(
    queue: &DownloadQueue,
    ids: &[i32],
    action: EditAction,
    offset: i32,
) -> Vec<(FileId, i32)> {
    if is_move_action(action) && offset != 0 {
        // visit files in queue order so clamping resolves consistently
        let mut items = Vec::new();
        for nzb in &queue.queue {
            let positions: Vec<usize> = nzb
                .file_list
                .iter()
                .enumerate()
                .filter(|(_, file)| ids.contains(&file.id.get()))
                .map(|(index, _)| index)
                .collect();
            for (index, work_offset) in clamp_offsets(&positions, nzb.file_list.len(), offset) {
                items.push((nzb.file_list[index].id, work_offset));
            }
        }
        items
    } else {
        // ids apply in the order they were transmitted
        ids.iter()
            .filter_map(|id| {
                queue
                    .find_file(FileId(*id))
                    .map(|(nzb_index, file_index)| {
                        (queue.queue[nzb_index].file_list[file_index].id, offset)
                    })
            })
            .collect()
    }
}

fn prepare_group_items(
    queue: &DownloadQueue,
    ids: &[i32],
    action: EditAction,
    offset: i32,
) -> Vec<(NzbId, i32)> {
    if is_move_action(action) && offset != 0 {
        let positions: Vec<usize> = queue
            .queue
            .iter()
            .enumerate()
            .filter(|(_, nzb)| ids.contains(&nzb.id.get()))
            .map(|(index, _)| index)
            .collect();
        clamp_offsets(&positions, queue.queue.len(), offset)
            .into_iter()
            .map(|(index, work_offset)| (queue.queue[index].id, work_offset))
            .collect()
    } else {
        ids.iter()
            .filter_map(|id| queue.find_nzb(NzbId(*id)).map(|nzb| (nzb.id, offset)))
            .collect()
    }
}

fn apply_file_action(
    coordinator: &QueueCoordinator,
    queue: &mut DownloadQueue,
    file_id: FileId,
    action: EditAction,
    offset: i32,
) {
    let (nzb_index, file_index) = match queue.find_file(file_id) {
        Some(indices) => indices,
        None => return,
    };

    match action {
        EditAction::FilePause => queue.queue[nzb_index].set_file_paused(file_index, true),
        EditAction::FileResume => queue.queue[nzb_index].set_file_paused(file_index, false),
        EditAction::FileMoveOffset | EditAction::FileMoveTop | EditAction::FileMoveBottom => {
            move_entry_in_vec(&mut queue.queue[nzb_index].file_list, file_index, offset);
        }
        EditAction::FileDelete => {
            if !queue.queue[nzb_index].file_list[file_index].deleted {
                let filename = queue.queue[nzb_index].file_list[file_index].filename.clone();
                let kind = if queue.queue[nzb_index].deleting {
                    MessageKind::Detail
                } else {
                    MessageKind::Info
                };
                queue.queue[nzb_index]
                    .add_message(kind, format!("Deleting file {filename} from download queue"));
                coordinator.delete_queue_entry(queue, nzb_index, file_index);
            }
        }
        _ => {}
    }
}

fn apply_group_action(
    coordinator: &QueueCoordinator,
    queue: &mut DownloadQueue,
    nzb_id: NzbId,
    action: EditAction,
    offset: i32,
    args: &str,
) {
    let nzb_index = match queue.find_nzb_index(nzb_id) {
        Some(index) => index,
        None => return,
    };

    match action {
        EditAction::GroupMoveOffset | EditAction::GroupMoveTop | EditAction::GroupMoveBottom => {
            move_entry_in_vec(&mut queue.queue, nzb_index, offset);
        }
        EditAction::GroupPause => {
            let nzb = &mut queue.queue[nzb_index];
            for file_index in 0..nzb.file_list.len() {
                nzb.set_file_paused(file_index, true);
            }
        }
        EditAction::GroupResume => {
            let nzb = &mut queue.queue[nzb_index];
            nzb.health_paused = false;
            for file_index in 0..nzb.file_list.len() {
                nzb.set_file_paused(file_index, false);
            }
        }
        EditAction::GroupDelete
        | EditAction::GroupParkDelete
        | EditAction::GroupDupeDelete
        | EditAction::GroupFinalDelete => {
            coordinator.delete_group_inner(queue, nzb_id, action);
        }
        EditAction::GroupPauseAllPars | EditAction::GroupPauseExtraPars => {
            pause_pars(
                &mut queue.queue[nzb_index],
                None,
                action == EditAction::GroupPauseExtraPars,
            );
        }
        EditAction::GroupSetPriority => {
            queue.queue[nzb_index].priority = args.parse().unwrap_or(0);
        }
        EditAction::GroupSetCategory | EditAction::GroupApplyCategory => {
            set_category(
                coordinator,
                queue,
                nzb_index,
                args,
                action == EditAction::GroupApplyCategory,
            );
        }
        EditAction::GroupSetName => {
            if !args.is_empty() {
                coordinator.set_queue_entry_name(queue, nzb_index, args);
            }
        }
        EditAction::GroupSetParameter => {
            let nzb = &mut queue.queue[nzb_index];
            match args.split_once('=') {
                Some((name, value)) => nzb.parameters.set_parameter(name, value),
                None => {
                    let name = nzb.name.clone();
                    tracing::error!(nzb = %name, argument = %args, "invalid parameter argument");
                }
            }
        }
        EditAction::GroupSetDupeKey => {
            queue.queue[nzb_index].dupe_key = args.to_string();
        }
        EditAction::GroupSetDupeScore => {
            queue.queue[nzb_index].dupe_score = args.parse().unwrap_or(0);
        }
        EditAction::GroupSetDupeMode => match parse_dupe_mode(args) {
            Some(mode) => queue.queue[nzb_index].dupe_mode = mode,
            None => {
                tracing::error!(mode = %args, "could not set duplicate mode: incorrect mode");
            }
        },
        EditAction::GroupSortFiles => sort_group_files(&mut queue.queue[nzb_index]),
        _ => {}
    }
}

/// Unpack decision and script list effective for a category
fn category_params(coordinator: &QueueCoordinator, category: &str) -> (bool, String) {
    let config = &coordinator.services().config;
    let mut unpack = config.unpack;
    let mut extensions = config.extensions.clone();
    if !category.is_empty() {
        if let Some(category) = config.find_category(category) {
            unpack = category.unpack;
            if !category.extensions.is_empty() {
                extensions = category.extensions.clone();
            }
        }
    }
    (unpack, extensions)
}

/// Change a job's category; with `apply_params` the category's
/// post-processing parameters replace the previous category's.
fn set_category(
    coordinator: &QueueCoordinator,
    queue: &mut DownloadQueue,
    nzb_index: usize,
    category: &str,
    apply_params: bool,
) {
    let old_category = queue.queue[nzb_index].category.clone();
    let (old_unpack, old_extensions) = category_params(coordinator, &old_category);

    coordinator.set_queue_entry_category(queue, nzb_index, category);

    if !apply_params {
        return;
    }

    let (new_unpack, new_extensions) = category_params(coordinator, category);
    let nzb = &mut queue.queue[nzb_index];

    if old_unpack != new_unpack {
        nzb.parameters
            .set_parameter("*Unpack:", if new_unpack { "yes" } else { "no" });
    }

    if !old_extensions.eq_ignore_ascii_case(&new_extensions) {
        // enable scripts new to this category
        for new_script in utils::split_ext_list(&new_extensions) {
            let known = utils::split_ext_list(&old_extensions)
                .any(|old_script| old_script.eq_ignore_ascii_case(new_script));
            if !known {
                nzb.parameters.set_parameter(&format!("{new_script}:"), "yes");
            }
        }
        // disable scripts the old category had and the new one lacks
        for old_script in utils::split_ext_list(&old_extensions) {
            let kept = utils::split_ext_list(&new_extensions)
                .any(|new_script| new_script.eq_ignore_ascii_case(old_script));
            if !kept {
                nzb.parameters.set_parameter(&format!("{old_script}:"), "no");
            }
        }
    }
}

/// Move one element of a vec by a clamped offset
fn move_entry_in_vec<T>(list: &mut Vec<T>, index: usize, offset: i32) {
    let size = list.len() as i32;
    if size == 0 {
        return;
    }
    let new_index = (index as i32 + offset).clamp(0, size - 1);
    if new_index != index as i32 {
        let entry = list.remove(index);
        list.insert(new_index as usize, entry);
    }
}

/// Pause par files of a group.
///
/// Without `extra_only` every par file pauses. With it, vol-suffixed pars
/// pause while the plain "main" pars stay; when only vols exist, the
/// smallest one stays unpaused.
pub fn pause_pars(nzb: &mut NzbInfo, only_indices: Option<&[usize]>, extra_only: bool) {
    let indices: Vec<usize> = match only_indices {
        Some(indices) => indices.to_vec(),
        None => (0..nzb.file_list.len()).collect(),
    };

    let mut pars = Vec::new();
    let mut vols = Vec::new();

    for &file_index in &indices {
        let file = &nzb.file_list[file_index];
        if !file.par_file {
            continue;
        }
        if !extra_only {
            nzb.set_file_paused(file_index, true);
        } else if file.filename.to_ascii_lowercase().contains(".vol") {
            vols.push(file_index);
        } else {
            pars.push(file_index);
        }
    }

    if !extra_only {
        return;
    }

    if !pars.is_empty() {
        for file_index in vols {
            nzb.set_file_paused(file_index, true);
        }
    } else {
        // no main par present; keep only the smallest vol unpaused
        let mut smallest: Option<usize> = None;
        for file_index in vols {
            match smallest {
                None => smallest = Some(file_index),
                Some(current) => {
                    if nzb.file_list[current].size > nzb.file_list[file_index].size {
                        nzb.set_file_paused(current, true);
                        smallest = Some(file_index);
                    } else {
                        nzb.set_file_paused(file_index, true);
                    }
                }
            }
        }
    }
}

/// Pause the extra pars of one job (used when a job enters or re-enters
/// the queue)
pub fn pause_extra_pars_for_nzb(nzb: &mut NzbInfo) {
    pause_pars(nzb, None, true);
}

/// File-level par pausing: selected files are grouped per job
fn pause_pars_for_files(queue: &mut DownloadQueue, ids: &[i32], extra_only: bool) {
    let mut per_nzb: std::collections::HashMap<usize, Vec<usize>> =
        std::collections::HashMap::new();
    for id in ids {
        if let Some((nzb_index, file_index)) = queue.find_file(FileId(*id)) {
            per_nzb.entry(nzb_index).or_default().push(file_index);
        }
    }
    for (nzb_index, indices) in per_nzb {
        pause_pars(&mut queue.queue[nzb_index], Some(&indices), extra_only);
    }
}

/// Move the selected files to the front of their job, in selection order
fn reorder_files(queue: &mut DownloadQueue, ids: &[i32]) {
    let first = match ids.first().and_then(|id| queue.find_file(FileId(*id))) {
        Some((nzb_index, _)) => nzb_index,
        None => return,
    };

    let nzb = &mut queue.queue[first];
    let mut insert_pos = 0;
    for id in ids {
        if let Some(file_index) = nzb.find_file(FileId(*id)) {
            let file = nzb.file_list.remove(file_index);
            nzb.file_list.insert(insert_pos, file);
            insert_pos += 1;
        }
    }
}

fn merge_groups(coordinator: &QueueCoordinator, queue: &mut DownloadQueue, ids: &[i32]) -> bool {
    let dst = match ids.first() {
        Some(id) => NzbId(*id),
        None => return false,
    };
    let mut ok = true;
    for id in &ids[1..] {
        ok &= coordinator.merge_inner(queue, dst, NzbId(*id));
    }
    ok
}

fn split_group(
    coordinator: &QueueCoordinator,
    queue: &mut DownloadQueue,
    ids: &[i32],
    name: &str,
) -> bool {
    if ids.is_empty() || name.is_empty() {
        return false;
    }
    let file_ids: Vec<FileId> = ids.iter().map(|id| FileId(*id)).collect();
    coordinator.split_inner(queue, &file_ids, name).is_some()
}

// ----- sorting -----

#[derive(Clone, Copy, PartialEq, Eq)]
enum SortCriteria {
    Name,
    Size,
    RemainingSize,
    Age,
    Category,
    Priority,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SortOrder {
    Ascending,
    Descending,
    Auto,
}

/// Stable sort over the selected jobs (all jobs when the selection is
/// empty). A bare criterion sorts ascending and flips to descending when
/// that leaves the order unchanged; `priority` starts descending.
fn sort_groups(queue: &mut DownloadQueue, ids: &[i32], sort: &str) -> bool {
    let base = sort.trim_end_matches(['+', '-']);
    let criteria = match base.to_ascii_lowercase().as_str() {
        "name" => SortCriteria::Name,
        "size" => SortCriteria::Size,
        "left" => SortCriteria::RemainingSize,
        "age" => SortCriteria::Age,
        "category" => SortCriteria::Category,
        "priority" => SortCriteria::Priority,
        _ => {
            tracing::error!(sort = %sort, "could not sort groups: incorrect sort order");
            return false;
        }
    };

    let order = if sort.ends_with('+') {
        SortOrder::Ascending
    } else if sort.ends_with('-') {
        SortOrder::Descending
    } else {
        SortOrder::Auto
    };

    let positions: Vec<usize> = if ids.is_empty() {
        (0..queue.queue.len()).collect()
    } else {
        queue
            .queue
            .iter()
            .enumerate()
            .filter(|(_, nzb)| ids.contains(&nzb.id.get()))
            .map(|(index, _)| index)
            .collect()
    };
    if positions.is_empty() {
        return false;
    }

    let effective = match order {
        SortOrder::Auto if criteria == SortCriteria::Priority => SortOrder::Descending,
        SortOrder::Auto => SortOrder::Ascending,
        other => other,
    };

    let before: Vec<NzbId> = positions.iter().map(|&i| queue.queue[i].id).collect();
    apply_sort(queue, &positions, criteria, effective);
    let after: Vec<NzbId> = positions.iter().map(|&i| queue.queue[i].id).collect();

    // the toggle: an unsuffixed sort that changed nothing runs again in
    // the opposite direction
    if order == SortOrder::Auto && before == after {
        let flipped = match effective {
            SortOrder::Ascending => SortOrder::Descending,
            _ => SortOrder::Ascending,
        };
        apply_sort(queue, &positions, criteria, flipped);
    }

    true
}

fn apply_sort(
    queue: &mut DownloadQueue,
    positions: &[usize],
    criteria: SortCriteria,
    order: SortOrder,
) {
    // lift the selected jobs out, sort them, put them back into the same
    // slots; unselected jobs never move
    let mut selected: Vec<NzbInfo> = Vec::with_capacity(positions.len());
    for &index in positions.iter().rev() {
        selected.push(queue.queue.remove(index));
    }
    selected.reverse();

    selected.sort_by(|a, b| {
        let (a, b) = match order {
            SortOrder::Descending => (b, a),
            _ => (a, b),
        };
        match criteria {
            SortCriteria::Name => a.name.cmp(&b.name),
            SortCriteria::Size => a.size.cmp(&b.size),
            SortCriteria::RemainingSize => {
                (a.remaining_size - a.paused_size).cmp(&(b.remaining_size - b.paused_size))
            }
            // older posts sort first under the age criterion
            SortCriteria::Age => b.min_time.cmp(&a.min_time),
            SortCriteria::Category => a.category.cmp(&b.category),
            SortCriteria::Priority => a.priority.cmp(&b.priority),
        }
    });

    for (&index, nzb) in positions.iter().zip(selected) {
        queue.queue.insert(index, nzb);
    }
}

/// Move the selected groups before or after a target group
fn move_groups_to(queue: &mut DownloadQueue, ids: &[i32], before: bool, args: &str) -> bool {
    if ids.is_empty() || args.is_empty() {
        return false;
    }
    let mut target_id: i32 = match args.parse() {
        Ok(id) => id,
        Err(_) => return false,
    };
    let mut before = before;
    let mut offset = 0i32;

    // a target inside the selection re-targets to the next job after it
    if ids.contains(&target_id) {
        let mut found = false;
        let mut target_set = false;
        for nzb in &queue.queue {
            if found {
                if !ids.contains(&nzb.id.get()) {
                    target_id = nzb.id.get();
                    before = true;
                    target_set = true;
                    break;
                }
            } else if nzb.id.get() == target_id {
                found = true;
            }
        }
        if !target_set {
            offset = MAX_ID;
        }
    }

    align_groups(queue, ids);

    if offset == 0 {
        let move_id = ids[0];
        let mut progress = false;
        let mut step = 0i32;
        for nzb in &queue.queue {
            let id = nzb.id.get();
            if id == target_id || id == move_id {
                if !progress {
                    step = if id == target_id { -1 } else { 1 };
                    offset = (if before { 0 } else { 1 })
                        - (if step > 0 { ids.len() as i32 } else { 0 });
                    progress = true;
                } else {
                    break;
                }
            }
            if progress {
                offset += step;
            }
        }
    }

    let items = prepare_group_items(queue, ids, EditAction::GroupMoveOffset, offset);
    for (nzb_id, work_offset) in items {
        if let Some(index) = queue.find_nzb_index(nzb_id) {
            move_entry_in_vec(&mut queue.queue, index, work_offset);
        }
    }
    true
}

/// Pull the selected groups together behind the first selected one
fn align_groups(queue: &mut DownloadQueue, ids: &[i32]) {
    let mut last_selected: Option<usize> = None;
    let mut index = 0;
    while index < queue.queue.len() {
        let selected = ids.contains(&queue.queue[index].id.get());
        if selected {
            if let Some(last) = last_selected {
                if index - last > 1 {
                    let nzb = queue.queue.remove(index);
                    queue.queue.insert(last + 1, nzb);
                    last_selected = Some(last + 1);
                    index += 1;
                    continue;
                }
            }
            last_selected = Some(index);
        }
        index += 1;
    }
}

/// Order a job's files for downloading: data files before par files,
/// `.rar` before its numbered continuations, par sets by size ascending.
fn sort_group_files(nzb: &mut NzbInfo) {
    nzb.file_list.sort_by(|file1, file2| {
        use std::cmp::Ordering;

        if !file1.par_file && !file2.par_file {
            // ".rar" files order before ".r01" etc. of the same base name
            let name1 = &file1.filename;
            let name2 = &file2.filename;
            let ext1 = name1.rfind('.').map(|p| &name1[p + 1..]).unwrap_or("");
            let ext2 = name2.rfind('.').map(|p| &name2[p + 1..]).unwrap_or("");
            let same_base = name1.len() == name2.len()
                && name1.len() > 4
                && ext1.len() == 3
                && ext2.len() == 3
                && name1[..name1.len() - 4].eq_ignore_ascii_case(&name2[..name2.len() - 4]);
            if same_base {
                let r_num = |ext: &str| {
                    ext.starts_with('r') && ext[1..].chars().all(|c| c.is_ascii_digit())
                };
                if ext1.eq_ignore_ascii_case("rar") && r_num(ext2) {
                    return Ordering::Less;
                }
                if ext2.eq_ignore_ascii_case("rar") && r_num(ext1) {
                    return Ordering::Greater;
                }
            }
        } else if file1.par_file
            && file2.par_file
            && crate::par2::same_par_collection(&file1.filename, &file2.filename)
        {
            return file1.size.cmp(&file2.size);
        } else if !file1.par_file && file2.par_file {
            return Ordering::Less;
        } else if file1.par_file && !file2.par_file {
            return Ordering::Greater;
        }

        file1.filename.cmp(&file2.filename)
    });
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileInfo;

    fn job(id: i32, name: &str) -> NzbInfo {
        let mut nzb = NzbInfo::new();
        nzb.id = NzbId(id);
        nzb.name = name.to_string();
        nzb
    }

    fn queue_of(names: &[(i32, &str)]) -> DownloadQueue {
        let mut queue = DownloadQueue::new();
        for (id, name) in names {
            queue.queue.push(job(*id, name));
        }
        queue
    }

    fn order(queue: &DownloadQueue) -> Vec<i32> {
        queue.queue.iter().map(|n| n.id.get()).collect()
    }

    #[test]
    fn move_entry_clamps_at_ends() {
        let mut list = vec![1, 2, 3];
        move_entry_in_vec(&mut list, 0, -5);
        assert_eq!(list, [1, 2, 3]);
        move_entry_in_vec(&mut list, 0, 100);
        assert_eq!(list, [2, 3, 1]);
        move_entry_in_vec(&mut list, 2, -1);
        assert_eq!(list, [2, 1, 3]);
    }

    #[test]
    fn clamped_multi_move_preserves_relative_order() {
        // moving items at 0 and 1 to the bottom of a 4-element list must
        // land them at 2 and 3, still in order
        let items = clamp_offsets(&[0, 1], 4, MAX_ID);
        let mut result: Vec<(usize, i32)> = items;
        result.sort_by_key(|(index, _)| *index);
        assert_eq!(result[0], (0, 2), "first item moves to slot 2");
        assert_eq!(result[1], (1, 2), "second item moves to slot 3");
    }

    #[test]
    fn sort_groups_by_name_ascending() {
        let mut queue = queue_of(&[(1, "bbb"), (2, "aaa"), (3, "ccc")]);
        assert!(sort_groups(&mut queue, &[], "name+"));
        assert_eq!(order(&queue), [2, 1, 3]);
    }

    #[test]
    fn sort_auto_flips_when_already_sorted() {
        let mut queue = queue_of(&[(1, "aaa"), (2, "bbb"), (3, "ccc")]);
        // already ascending; the unsuffixed sort must toggle to descending
        assert!(sort_groups(&mut queue, &[], "name"));
        assert_eq!(order(&queue), [3, 2, 1]);

        // and a second bare sort toggles back
        assert!(sort_groups(&mut queue, &[], "name"));
        assert_eq!(order(&queue), [1, 2, 3]);
    }

    #[test]
    fn sort_priority_defaults_to_descending() {
        let mut queue = queue_of(&[(1, "a"), (2, "b"), (3, "c")]);
        queue.queue[0].priority = 10;
        queue.queue[1].priority = 30;
        queue.queue[2].priority = 20;
        assert!(sort_groups(&mut queue, &[], "priority"));
        assert_eq!(order(&queue), [2, 3, 1]);
    }

    #[test]
    fn sort_only_touches_selected_jobs() {
        let mut queue = queue_of(&[(1, "zzz"), (2, "yyy"), (3, "aaa")]);
        // job 2 is not part of the selection and must keep its slot
        assert!(sort_groups(&mut queue, &[1, 3], "name+"));
        assert_eq!(order(&queue), [3, 2, 1]);
    }

    #[test]
    fn sort_rejects_unknown_criterion() {
        let mut queue = queue_of(&[(1, "a")]);
        assert!(!sort_groups(&mut queue, &[], "bogus"));
    }

    #[test]
    fn pause_extra_pars_keeps_main_par() {
        let mut nzb = job(1, "x");
        for (id, name, size, par) in [
            (1, "a.rar", 100, false),
            (2, "a.par2", 10, true),
            (3, "a.vol00+1.par2", 20, true),
            (4, "a.vol01+2.par2", 40, true),
        ] {
            nzb.file_list.push(FileInfo {
                id: FileId(id),
                filename: name.to_string(),
                size,
                par_file: par,
                ..Default::default()
            });
        }

        pause_extra_pars_for_nzb(&mut nzb);

        assert!(!nzb.file_list[0].paused, "data file untouched");
        assert!(!nzb.file_list[1].paused, "main par stays unpaused");
        assert!(nzb.file_list[2].paused);
        assert!(nzb.file_list[3].paused);
    }

    #[test]
    fn pause_extra_pars_without_main_keeps_smallest_vol() {
        let mut nzb = job(1, "x");
        for (id, name, size) in [
            (1, "a.vol00+1.par2", 30),
            (2, "a.vol01+2.par2", 10),
            (3, "a.vol03+4.par2", 50),
        ] {
            nzb.file_list.push(FileInfo {
                id: FileId(id),
                filename: name.to_string(),
                size,
                par_file: true,
                ..Default::default()
            });
        }

        pause_extra_pars_for_nzb(&mut nzb);

        assert!(nzb.file_list[0].paused);
        assert!(!nzb.file_list[1].paused, "smallest vol stays unpaused");
        assert!(nzb.file_list[2].paused);
    }

    #[test]
    fn sort_group_files_orders_rar_before_numbered_and_data_before_pars() {
        let mut nzb = job(1, "x");
        for (id, name, size, par) in [
            (1, "x.r01", 100, false),
            (2, "x.par2", 5, true),
            (3, "x.rar", 100, false),
            (4, "x.vol00+1.par2", 50, true),
            (5, "x.r00", 100, false),
        ] {
            nzb.file_list.push(FileInfo {
                id: FileId(id),
                filename: name.to_string(),
                size,
                par_file: par,
                ..Default::default()
            });
        }

        sort_group_files(&mut nzb);

        let names: Vec<&str> = nzb.file_list.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, ["x.rar", "x.r00", "x.r01", "x.par2", "x.vol00+1.par2"]);
    }

    #[test]
    fn align_groups_pulls_selection_together() {
        let mut queue = queue_of(&[(1, "a"), (2, "b"), (3, "c"), (4, "d")]);
        align_groups(&mut queue, &[1, 3]);
        assert_eq!(order(&queue), [1, 3, 2, 4]);
    }
}
