//! End-to-end scenarios over the in-memory transport: duplicate handling,
//! in-flight renaming, retry and dupe-backup promotion.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{md5_bytes, nzb_xml, par2_file_desc_packet, MockTransport};
use nzbqueue::model::{CompletedFile, DownloadQueue, FileInfo, HistoryEntry, NzbInfo};
use nzbqueue::services::Services;
use nzbqueue::types::{
    ArticleStatus, CompletedFileStatus, DeleteStatus, DupeHint, FileId, MessageKind, NzbId,
    ParStatus, QueueEvent,
};
use nzbqueue::{Collaborators, Config, QueueServer};
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.paths.dest_dir = dir.path().join("downloads");
    config.paths.nzb_dir = dir.path().join("nzb");
    config.paths.queue_dir = dir.path().join("queue");
    config.paths.temp_dir = dir.path().join("temp");
    config.scan.nzb_dir_file_age = Duration::from_secs(0);
    config.scan.nzb_dir_interval = Duration::from_millis(200);
    config
}

async fn make_server(transport: Arc<MockTransport>) -> (QueueServer, TempDir) {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let server = QueueServer::new(config, Collaborators::new(transport))
        .await
        .unwrap();
    (server, dir)
}

fn make_services(dir: &TempDir) -> Services {
    let (events, _) = tokio::sync::broadcast::channel(256);
    let (post_tx, _post_rx) = tokio::sync::mpsc::unbounded_channel();
    Services {
        config: Arc::new(test_config(dir)),
        events,
        disk_state: Arc::new(
            nzbqueue::diskstate::DiskState::new(dir.path().join("queue")).unwrap(),
        ),
        post_tx,
        post_cancel: Arc::default(),
    }
}

async fn wait_for_completion(
    events: &mut tokio::sync::broadcast::Receiver<QueueEvent>,
    id: NzbId,
) -> String {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv())
            .await
            .expect("timed out waiting for job completion")
            .expect("event channel closed");
        if let QueueEvent::NzbCompleted {
            id: event_id,
            status,
            ..
        } = event
        {
            if event_id == id {
                return status;
            }
        }
    }
}

// --- Scenario: duplicate by content ---

#[tokio::test]
async fn duplicate_by_content_is_skipped_to_history() {
    let transport = MockTransport::new();
    let (server, dir) = make_server(transport).await;

    let xml = nzb_xml(&[(
        "post [1/1] - &quot;data.bin&quot; yEnc (1/1)",
        vec![(1, 1000, "same-content@example".to_string())],
    )]);
    let path_a = dir.path().join("a.nzb");
    let path_b = dir.path().join("b.nzb");
    std::fs::write(&path_a, &xml).unwrap();
    std::fs::write(&path_b, &xml).unwrap();

    let id_a = server.add_nzb_file(&path_a, "").await.unwrap();
    let id_b = server.add_nzb_file(&path_b, "").await.unwrap();

    let queue = server.download_queue();
    let queue = queue.lock().await;

    assert!(queue.find_nzb(id_a).is_some(), "first job stays in the queue");
    assert!(
        queue.find_nzb(id_b).is_none(),
        "second job must not stay in the queue"
    );

    let entry = queue.find_history(id_b).expect("second job lands in history");
    let nzb = entry.nzb().unwrap();
    assert_eq!(
        nzb.delete_status,
        DeleteStatus::Copy,
        "identical content marks the candidate as a copy"
    );
    assert!(
        nzb.messages
            .iter()
            .any(|m| m.kind == MessageKind::Warning && m.text.contains("duplicate")),
        "the skip leaves a warning in the job log"
    );
}

// --- Scenario: score-based queue preemption ---

#[tokio::test]
async fn lower_scored_queue_duplicate_is_evicted() {
    let transport = MockTransport::new();
    let (server, dir) = make_server(transport).await;

    let xml_a = nzb_xml(&[(
        "a [1/1] - &quot;one.bin&quot; yEnc (1/1)",
        vec![(1, 1000, "content-a@example".to_string())],
    )]);
    let xml_b = nzb_xml(&[(
        "b [1/1] - &quot;two.bin&quot; yEnc (1/1)",
        vec![(1, 1000, "content-b@example".to_string())],
    )]);
    let path_a = dir.path().join("a.nzb");
    let path_b = dir.path().join("b.nzb");
    std::fs::write(&path_a, &xml_a).unwrap();
    std::fs::write(&path_b, &xml_b).unwrap();

    let coordinator = server.coordinator();

    let mut nzb_a =
        nzbqueue::nzb::parse_nzb_str(&xml_a, "a.nzb", "", &Config::default()).unwrap();
    nzb_a.dupe_key = "key-k".to_string();
    nzb_a.dupe_score = 10;
    let id_a = coordinator.add_nzb_to_queue(nzb_a, false).await;

    let mut nzb_b =
        nzbqueue::nzb::parse_nzb_str(&xml_b, "b.nzb", "", &Config::default()).unwrap();
    nzb_b.dupe_key = "key-k".to_string();
    nzb_b.dupe_score = 20;
    let id_b = coordinator.add_nzb_to_queue(nzb_b, false).await;

    let queue = server.download_queue();
    let queue = queue.lock().await;

    assert!(queue.find_nzb(id_b).is_some(), "higher score stays queued");
    assert!(queue.find_nzb(id_a).is_none(), "lower score leaves the queue");

    let entry = queue.find_history(id_a).expect("evicted job lands in history");
    assert_eq!(
        entry.nzb().unwrap().delete_status,
        DeleteStatus::Dupe,
        "the evicted job is a dupe-backup"
    );
}

// --- Scenario: download with direct rename ---

#[tokio::test]
async fn obfuscated_files_are_renamed_during_download() {
    let transport = MockTransport::new();

    // two data files, single article each, large enough to fingerprint
    let content1 = vec![0x11u8; 20 * 1024];
    let content2 = vec![0x22u8; 20 * 1024];
    transport.add_article("data1@example", content1.clone(), 0);
    transport.add_article("data2@example", content2.clone(), 0);

    // a par index describing the real names of both files
    let set_id = [9u8; 16];
    let mut par_content = par2_file_desc_packet(
        "movie.mkv",
        md5_bytes(&content1[..16 * 1024]),
        set_id,
    );
    par_content.extend_from_slice(&par2_file_desc_packet(
        "movie.nfo",
        md5_bytes(&content2[..16 * 1024]),
        set_id,
    ));
    transport.add_article("par@example", par_content.clone(), 0);

    let (server, dir) = make_server(transport).await;
    let mut events = server.subscribe();
    server.start();

    let xml = nzb_xml(&[
        (
            "x [1/3] - &quot;abc123&quot; yEnc (1/1)",
            vec![(1, 20 * 1024, "data1@example".to_string())],
        ),
        (
            "x [2/3] - &quot;xyz789&quot; yEnc (1/1)",
            vec![(1, 20 * 1024, "data2@example".to_string())],
        ),
        (
            "x [3/3] - &quot;obscure.par2&quot; yEnc (1/1)",
            vec![(1, par_content.len() as u64, "par@example".to_string())],
        ),
    ]);
    let nzb_path = dir.path().join("job.nzb");
    std::fs::write(&nzb_path, &xml).unwrap();

    let id = server.add_nzb_file(&nzb_path, "").await.unwrap();
    let status = wait_for_completion(&mut events, id).await;

    assert!(
        status.starts_with("SUCCESS"),
        "expected a successful download, got {status}"
    );

    let dest_dir = {
        let queue = server.download_queue();
        let queue = queue.lock().await;
        let entry = queue.find_history(id).expect("job moved to history");
        let nzb = entry.nzb().unwrap();
        assert_eq!(
            nzb.direct_rename_status,
            nzbqueue::types::TaskStatus::Success,
            "the par index was loaded and applied"
        );
        nzb.dest_dir.clone()
    };

    assert_eq!(
        std::fs::read(dest_dir.join("movie.mkv")).unwrap(),
        content1,
        "first obfuscated file carries its recorded name and content"
    );
    assert_eq!(
        std::fs::read(dest_dir.join("movie.nfo")).unwrap(),
        content2,
        "second obfuscated file carries its recorded name and content"
    );

    server.shutdown().await.unwrap();
}

// --- Scenario: par-renamer on an obfuscated directory ---

#[test]
fn par_renamer_restores_name_from_fingerprint() {
    let dir = TempDir::new().unwrap();

    let content = vec![0x5Au8; 8 * 1024];
    std::fs::write(dir.path().join("123456"), &content).unwrap();
    std::fs::write(
        dir.path().join("testfile.par2"),
        par2_file_desc_packet("testfile.dat", md5_bytes(&content), [1u8; 16]),
    )
    .unwrap();
    std::fs::write(dir.path().join("testfile.vol00+1.PAR2"), b"junk").unwrap();

    let renamer = nzbqueue::rename::ParRenamer::new(
        dir.path().to_path_buf(),
        true,
        tokio_util::sync::CancellationToken::new(),
    );
    let result = renamer.run();

    assert_eq!(result.renamed_count, 1);
    assert!(dir.path().join("testfile.dat").exists());
    assert!(result.missing_files.is_empty(), "no expected file is missing");
}

// --- Scenario: retry failed articles ---

#[tokio::test]
async fn retry_failed_restores_failed_file_to_queue() {
    let dir = TempDir::new().unwrap();
    let services = make_services(&dir);

    let dest_dir = dir.path().join("downloads").join("job");
    std::fs::create_dir_all(&dest_dir).unwrap();

    let mut queue = DownloadQueue::new();
    let nzb_id = queue.id_gen.next_nzb_id();
    let f1_id = queue.id_gen.next_file_id();
    let f2_id = queue.id_gen.next_file_id();

    // f2's article list is persisted, as it would be after a real add
    let mut f2 = FileInfo {
        id: f2_id,
        nzb_id,
        subject: "f2 subject".to_string(),
        filename: "f2.bin".to_string(),
        size: 2000,
        total_articles: 2,
        ..Default::default()
    };
    for part in 1..=2 {
        f2.articles.push(nzbqueue::model::ArticleInfo {
            part_number: part,
            message_id: format!("f2-{part}@example"),
            size: 1000,
            ..Default::default()
        });
    }
    services.disk_state.save_file(&f2).unwrap();

    let mut nzb = NzbInfo::new();
    nzb.id = nzb_id;
    nzb.name = "job".to_string();
    nzb.dest_dir = dest_dir.clone();
    nzb.file_count = 2;
    nzb.size = 3000;
    nzb.total_articles = 3;
    nzb.success_articles = 1;
    nzb.failed_articles = 2;
    nzb.success_size = 1000;
    nzb.failed_size = 2000;
    nzb.parked_file_count = 1;
    nzb.completed_files.push(CompletedFile {
        id: f1_id,
        filename: "f1.bin".to_string(),
        status: CompletedFileStatus::Success,
        ..Default::default()
    });
    nzb.completed_files.push(CompletedFile {
        id: f2_id,
        filename: "f2.bin".to_string(),
        status: CompletedFileStatus::Failure,
        ..Default::default()
    });
    queue
        .history
        .push(HistoryEntry::from_nzb(nzb, nzbqueue::utils::current_time()));

    nzbqueue::history::history_retry(&services, &mut queue, 0, true, false);

    assert!(queue.history.is_empty(), "the entry returned to the queue");
    let nzb = queue.find_nzb(nzb_id).expect("job back in the queue");

    assert_eq!(nzb.file_list.len(), 1, "only the failed file goes live again");
    let f2 = &nzb.file_list[0];
    assert_eq!(f2.id, f2_id);
    assert!(
        f2.articles
            .iter()
            .all(|a| a.status == ArticleStatus::Undefined),
        "all articles of the failed file retry"
    );
    assert_eq!(f2.remaining_size, 2000, "remaining size restored");
    assert_eq!(f2.failed_size, 0, "failed size zeroed");

    assert_eq!(nzb.completed_files.len(), 1);
    assert_eq!(nzb.completed_files[0].id, f1_id);
    assert_eq!(
        nzb.completed_files[0].status,
        CompletedFileStatus::Success,
        "the successful file stays parked"
    );
}

// --- Scenario: dupe-backup promotion ---

#[tokio::test]
async fn failed_download_promotes_best_backup_duplicate() {
    let dir = TempDir::new().unwrap();
    let services = make_services(&dir);

    // the backup's source NZB must be parseable for the redownload
    let backup_xml = nzb_xml(&[(
        "h1 [1/1] - &quot;backup.bin&quot; yEnc (1/1)",
        vec![(1, 1000, "backup@example".to_string())],
    )]);
    let backup_path = dir.path().join("h1.nzb.queued");
    std::fs::write(&backup_path, &backup_xml).unwrap();

    let mut queue = DownloadQueue::new();

    // H1: dupe-backup, score 20, healthy
    let mut h1 = NzbInfo::new();
    h1.id = queue.id_gen.next_nzb_id();
    h1.name = "H1".to_string();
    h1.dupe_key = "key-k".to_string();
    h1.dupe_score = 20;
    h1.delete_status = DeleteStatus::Dupe;
    h1.queued_filename = backup_path.to_string_lossy().into_owned();
    h1.size = 1000;
    h1.current_failed_size = 50; // health 950, critical 850
    let h1_id = h1.id;
    queue.history.push(HistoryEntry::from_nzb(h1, 1000));

    // H2: successful duplicate, score 10
    let mut h2 = NzbInfo::new();
    h2.id = queue.id_gen.next_nzb_id();
    h2.name = "H2".to_string();
    h2.dupe_key = "key-k".to_string();
    h2.dupe_score = 10;
    let h2_id = h2.id;
    queue.history.push(HistoryEntry::from_nzb(h2, 1000));

    // the active job completes unsuccessfully
    let mut j = NzbInfo::new();
    j.id = queue.id_gen.next_nzb_id();
    j.name = "J".to_string();
    j.dupe_key = "key-k".to_string();
    j.dupe_score = 5;
    j.par_status = ParStatus::Failure;
    let j_id = j.id;
    queue.queue.push(j);

    nzbqueue::dupe::nzb_completed(&services, &mut queue, j_id);

    let promoted = queue.find_nzb(h1_id).expect("H1 promoted back to the queue");
    assert_eq!(
        promoted.dupe_hint,
        DupeHint::RedownloadAuto,
        "promotion marks the job as an automatic redownload"
    );
    assert_eq!(
        promoted.file_list.len(),
        1,
        "the backup was re-parsed from its source NZB"
    );
    assert_eq!(promoted.delete_status, DeleteStatus::None);

    assert!(
        queue.find_history(h2_id).is_some(),
        "the successful duplicate stays in history"
    );
    assert!(queue.find_history(h1_id).is_none());
}

// --- Persistence: the queue file round-trips after edits ---

#[tokio::test]
async fn queue_state_survives_save_and_load_after_edits() {
    let transport = MockTransport::new();
    let (server, dir) = make_server(transport).await;

    let xml = nzb_xml(&[(
        "p [1/1] - &quot;persist.bin&quot; yEnc (1/1)",
        vec![(1, 1000, "persist@example".to_string())],
    )]);
    let nzb_path = dir.path().join("p.nzb");
    std::fs::write(&nzb_path, &xml).unwrap();

    let id = server.add_nzb_file(&nzb_path, "tv").await.unwrap();

    // an edit that must survive the round-trip
    server
        .coordinator()
        .edit_entry(
            id.get(),
            nzbqueue::EditAction::GroupSetDupeKey,
            "series-key",
        )
        .await;

    {
        let queue = server.download_queue();
        let queue = queue.lock().await;
        let services_disk = nzbqueue::diskstate::DiskState::new(dir.path().join("queue")).unwrap();
        services_disk.save_queue(&queue).unwrap();
        let reloaded = services_disk.load_queue().unwrap();

        let original = queue.find_nzb(id).unwrap();
        let restored = reloaded.find_nzb(id).expect("job survives the round-trip");
        assert_eq!(restored.name, original.name);
        assert_eq!(restored.category, "tv");
        assert_eq!(restored.dupe_key, "series-key");
        assert_eq!(restored.file_list.len(), original.file_list.len());
        assert_eq!(
            restored.file_list[0].articles.len(),
            original.file_list[0].articles.len(),
            "article lists reload from the side files"
        );
    }
}
