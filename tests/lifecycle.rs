mod support;

use base64::Engine;
use support::{png_bytes, TestDir, TASK_KEY};
use td::error::{BlobStage, Error};
use td::task::{FilterMode, SortMode, LEGACY_KEYS};

#[tokio::test]
async fn attachment_is_deleted_with_its_task() {
    let dir = TestDir::new();
    let mut service = dir.service();

    let task = service
        .create_task("With picture", None, Some(&[0xAB, 0xCD]))
        .await
        .unwrap();
    let blob_id = task.attachment_ref.clone().expect("attachment linked");
    assert!(dir.blob_file(&blob_id).exists());

    let report = service.remove_task(&task.id).await.unwrap();
    assert_eq!(report.removed, vec![task.id.clone()]);
    assert_eq!(report.blobs_deleted, 1);
    assert!(report.blob_failures.is_empty());

    assert!(service.records().get(&task.id).is_none());
    assert!(service.blobs().get_image(&blob_id).await.unwrap().is_none());
}

#[tokio::test]
async fn saved_image_round_trips() {
    let dir = TestDir::new();
    let mut service = dir.service();
    let bytes = png_bytes();

    let task = service.create_task("Photo", None, Some(&bytes)).await.unwrap();
    let lease = service.image(&task.id).await.unwrap().expect("image stored");
    assert_eq!(lease.bytes(), bytes.as_slice());
    assert_eq!(lease.mime(), "image/png");
    assert!(lease.url().starts_with("blob:td/"));
    assert!(service.release(&lease));
    assert!(!service.release(&lease));
}

#[tokio::test]
async fn delete_image_twice_is_same_as_once() {
    let dir = TestDir::new();
    let blobs = dir.blobs();
    let id = blobs.save_image(b"bytes").await.unwrap();

    blobs.delete_image(&id).await.unwrap();
    blobs.delete_image(&id).await.unwrap();
    assert!(blobs.get_image(&id).await.unwrap().is_none());
    assert!(!blobs.contains(&id).await.unwrap());
}

#[tokio::test]
async fn lease_outlives_deletion_until_released() {
    let dir = TestDir::new();
    let blobs = dir.blobs();
    let id = blobs.save_image(b"keep me").await.unwrap();

    let lease = blobs.get_image(&id).await.unwrap().unwrap();
    blobs.delete_image(&id).await.unwrap();
    assert_eq!(blobs.resolve(lease.url()).as_deref(), Some(&b"keep me"[..]));

    blobs.release(&lease);
    assert!(blobs.resolve(lease.url()).is_none());
    assert_eq!(blobs.outstanding_leases(), 0);
}

#[tokio::test]
async fn oversized_image_writes_nothing() {
    let dir = TestDir::new();
    let mut service = dir.service();
    let huge = vec![0u8; 1024 * 1024 + 1];

    let err = service.create_task("Too big", None, Some(&huge)).await.unwrap_err();
    assert!(matches!(err, Error::PayloadTooLarge { .. }));
    assert!(service.records().is_empty());
    assert!(service.blobs().list_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_text_is_rejected_before_blob_write() {
    let dir = TestDir::new();
    let mut service = dir.service();

    let err = service.create_task("", None, Some(&[1, 2, 3])).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(service.blobs().list_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn newer_container_version_fails_setup() {
    let dir = TestDir::new();
    std::fs::write(dir.storage().blobs_dir().join("VERSION"), "99").unwrap();
    let mut service = dir.service();

    let err = service.create_task("Photo", None, Some(&[1])).await.unwrap_err();
    assert!(matches!(
        err,
        Error::BlobStore {
            stage: BlobStage::Setup,
            ..
        }
    ));
    assert!(service.records().is_empty());
}

#[tokio::test]
async fn clear_completed_removes_their_images() {
    let dir = TestDir::new();
    let mut service = dir.service();
    let done = service.create_task("done", None, Some(&[1])).await.unwrap();
    let open = service.create_task("open", None, Some(&[2])).await.unwrap();
    service.toggle(&done.id).unwrap();

    let report = service.clear_completed().await.unwrap();
    assert_eq!(report.removed, vec![done.id.clone()]);
    assert_eq!(report.blobs_deleted, 1);

    let remaining = service.blobs().list_ids().await.unwrap();
    assert_eq!(remaining, vec![open.attachment_ref.clone().unwrap()]);
    assert_eq!(service.query(FilterMode::All, SortMode::InsertionOrder).len(), 1);
}

#[tokio::test]
async fn missing_blob_does_not_block_removal() {
    let dir = TestDir::new();
    let mut service = dir.service();
    let task = service.create_task("orphan ref", None, Some(&[7])).await.unwrap();
    std::fs::remove_file(dir.blob_file(task.attachment_ref.as_deref().unwrap())).unwrap();

    let report = service.remove_task(&task.id).await.unwrap();
    assert_eq!(report.removed.len(), 1);
    assert!(service.records().is_empty());
}

#[tokio::test]
async fn failed_blob_delete_is_reported_and_record_still_removed() {
    let dir = TestDir::new();
    let mut service = dir.service();
    let task = service.create_task("stuck image", None, Some(&[9, 9])).await.unwrap();
    let blob_id = task.attachment_ref.clone().unwrap();

    // A non-empty directory where the blob file was cannot be unlinked.
    let path = dir.blob_file(&blob_id);
    std::fs::remove_file(&path).unwrap();
    std::fs::create_dir(&path).unwrap();
    std::fs::write(path.join("keep"), b"x").unwrap();

    let report = service.remove_task(&task.id).await.unwrap();
    assert_eq!(report.removed, vec![task.id.clone()]);
    assert_eq!(report.blobs_deleted, 0);
    assert_eq!(report.blob_failures.len(), 1);
    assert_eq!(report.blob_failures[0].blob_id, blob_id);
    assert_eq!(report.blob_failures[0].task_id, task.id);
    assert!(service.records().is_empty());
    assert!(dir.records().is_empty());
}

#[tokio::test]
async fn sweep_deletes_unreferenced_blobs_only() {
    let dir = TestDir::new();
    let mut service = dir.service();
    let kept = service.create_task("kept", None, Some(&[1])).await.unwrap();
    let orphan = service.blobs().save_image(&[2]).await.unwrap();

    let swept = service.sweep_orphans().await.unwrap();
    assert_eq!(swept, vec![orphan.clone()]);
    let kept_id = kept.attachment_ref.unwrap();
    assert!(service.blobs().contains(&kept_id).await.unwrap());
    assert!(!service.blobs().contains(&orphan).await.unwrap());
}

#[tokio::test]
async fn legacy_inline_images_move_into_blob_store() {
    let dir = TestDir::new();
    let payload = base64::engine::general_purpose::STANDARD.encode(png_bytes());
    let legacy = format!(
        r#"[{{"id": 1700000000000, "text": "Pic", "completed": false, "image": "data:image/png;base64,{payload}"}}]"#
    );
    dir.write_slot(LEGACY_KEYS[1], &legacy);

    let mut service = dir.service();
    let report = service.adopt_legacy_images().await;
    assert_eq!(report.adopted, 1);
    assert!(report.failed.is_empty());

    let task = service.query(FilterMode::All, SortMode::InsertionOrder).remove(0);
    let lease = service.image(&task.id).await.unwrap().expect("adopted image");
    assert_eq!(lease.bytes(), png_bytes().as_slice());

    assert!(dir.read_slot(LEGACY_KEYS[1]).is_none());
    let raw = dir.read_slot(TASK_KEY).unwrap();
    assert!(raw.contains(lease.blob_id()));
}

#[tokio::test]
async fn prefix_ids_resolve_through_service() {
    let dir = TestDir::new();
    let mut service = dir.service();
    let task = service.create_task("prefix me", None, None).await.unwrap();

    let toggled = service.toggle(&task.id[..8]).unwrap();
    assert!(toggled.completed);
    assert!(matches!(service.get("zzzz"), Err(Error::TaskNotFound(_))));
}
