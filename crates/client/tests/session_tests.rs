//! Resume session persistence tests.

use stemwell_client::SessionStore;
use stemwell_core::{JobId, ResumeRecord, resume::now_epoch_ms};
use tempfile::tempdir;

#[tokio::test]
async fn save_then_resume_roundtrip() {
    let temp = tempdir().unwrap();
    let store = SessionStore::new(temp.path().join("session.json"));

    let job_id = JobId::new();
    store.save(job_id).await.unwrap();
    assert_eq!(store.resume().await.unwrap(), Some(job_id));

    // Resuming does not consume the record.
    assert_eq!(store.resume().await.unwrap(), Some(job_id));
}

#[tokio::test]
async fn resume_without_record_is_none() {
    let temp = tempdir().unwrap();
    let store = SessionStore::new(temp.path().join("session.json"));
    assert_eq!(store.resume().await.unwrap(), None);
}

#[tokio::test]
async fn clear_removes_record() {
    let temp = tempdir().unwrap();
    let store = SessionStore::new(temp.path().join("session.json"));

    store.save(JobId::new()).await.unwrap();
    store.clear().await.unwrap();
    assert_eq!(store.resume().await.unwrap(), None);

    // Clearing twice is fine.
    store.clear().await.unwrap();
}

#[tokio::test]
async fn expired_record_is_cleared_on_resume() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("session.json");
    let store = SessionStore::new(&path);

    // Write a record stamped past the TTL.
    let record = ResumeRecord {
        job_id: JobId::new(),
        timestamp: now_epoch_ms().saturating_sub(stemwell_core::RESUME_TTL_MS + 1000),
    };
    tokio::fs::write(&path, serde_json::to_vec(&record).unwrap())
        .await
        .unwrap();

    assert_eq!(store.resume().await.unwrap(), None);
    assert!(!path.exists(), "expired record cleared");
}

#[tokio::test]
async fn corrupt_record_is_cleared_on_resume() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("session.json");
    let store = SessionStore::new(&path);

    tokio::fs::write(&path, b"{not json").await.unwrap();
    assert_eq!(store.resume().await.unwrap(), None);
    assert!(!path.exists());
}

#[tokio::test]
async fn save_creates_parent_directories() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("nested/dir/session.json");
    let store = SessionStore::new(&path);

    let job_id = JobId::new();
    store.save(job_id).await.unwrap();
    assert_eq!(store.resume().await.unwrap(), Some(job_id));
}
