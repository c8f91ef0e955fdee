//! Durability tests for the JSON snapshot store.

use std::sync::Arc;

use grievance::{
    ComplaintLifecycle, ComplaintStatus, ComplaintStore, Delay, DepartmentCode,
    DepartmentDirectory, EscalationPolicy, EscalationRule, GrievanceError, Identity, NewComplaint,
    NewDepartment, RetryPolicy, StoreError, StoreSnapshot, UserId,
};
use store::{FileStoreError, JsonFileStore};

fn code(value: &str) -> DepartmentCode {
    DepartmentCode::new(value).unwrap()
}

fn department(c: &str, parent: Option<&str>) -> NewDepartment {
    NewDepartment {
        code: code(c),
        name: format!("{c} department"),
        parent: parent.map(code),
        policy: None,
    }
}

#[tokio::test]
async fn test_missing_file_opens_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(dir.path().join("grievance.json"))
        .await
        .unwrap();
    assert!(store.snapshot().await.unwrap().departments.is_empty());
    assert!(!store.path().exists());
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("grievance.json");

    let (complaint_id, reference) = {
        let store = Arc::new(JsonFileStore::open(&path).await.unwrap());
        let directory = Arc::new(DepartmentDirectory::load(store.clone()).await.unwrap());
        directory.register(department("HQ", None)).await.unwrap();
        directory.register(department("PD", Some("HQ"))).await.unwrap();
        directory
            .set_policy(
                &code("PD"),
                Some(EscalationPolicy::new(vec![EscalationRule::escalate_after(
                    Delay::from_days(7),
                )])),
            )
            .await
            .unwrap();

        let lifecycle = ComplaintLifecycle::new(directory, store);
        let complaint = lifecycle
            .create(
                &Identity::citizen(UserId::new_random()),
                NewComplaint::new("Broken signal", "Signal at 5th cross is dark", code("PD")),
            )
            .await
            .unwrap();
        lifecycle
            .transition(
                complaint.id,
                ComplaintStatus::Triaged,
                &Identity::department(UserId::new_random(), code("PD")),
            )
            .await
            .unwrap();
        (complaint.id, complaint.reference)
    };

    let store = Arc::new(JsonFileStore::open(&path).await.unwrap());
    let directory = DepartmentDirectory::load(store.clone()).await.unwrap();
    assert_eq!(directory.list().len(), 2);
    assert!(directory.resolve_policy(&code("PD")).unwrap().is_some());

    let stored = store.get_complaint(complaint_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ComplaintStatus::Triaged);
    assert_eq!(stored.version, 1);
    assert_eq!(stored.history.len(), 1);

    // Reloaded references stay reserved.
    assert!(!store.reserve_reference(&reference).await.unwrap());
}

#[tokio::test]
async fn test_duplicate_department_code_is_not_persisted_twice() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grievance.json");
    let store = Arc::new(JsonFileStore::open(&path).await.unwrap());
    let directory = DepartmentDirectory::load(store.clone()).await.unwrap();

    directory.register(department("PW", None)).await.unwrap();
    assert!(directory.register(department("PW", None)).await.is_err());

    let reopened = JsonFileStore::open(&path).await.unwrap();
    assert_eq!(reopened.snapshot().await.unwrap().departments.len(), 1);
}

#[tokio::test]
async fn test_corrupt_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grievance.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = JsonFileStore::open(&path).await.err().unwrap();
    assert!(matches!(err, FileStoreError::Corrupt { .. }));
}

#[tokio::test]
async fn test_newer_snapshot_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grievance.json");
    let snapshot = StoreSnapshot {
        version: StoreSnapshot::CURRENT_VERSION + 1,
        ..StoreSnapshot::default()
    };
    std::fs::write(&path, serde_json::to_string(&snapshot).unwrap()).unwrap();

    let err = JsonFileStore::open(&path).await.err().unwrap();
    assert!(matches!(err, FileStoreError::Corrupt { reason, .. } if reason.contains("newer")));
}

/// A directory and lifecycle over their own handle on `path`.
async fn desk(path: &std::path::Path) -> (Arc<DepartmentDirectory>, ComplaintLifecycle) {
    let store = Arc::new(JsonFileStore::open(path).await.unwrap());
    let directory = Arc::new(DepartmentDirectory::load(store.clone()).await.unwrap());
    (directory.clone(), ComplaintLifecycle::new(directory, store))
}

fn noise() -> NewComplaint {
    NewComplaint::new("Noise", "Loudspeakers past midnight", code("PD"))
}

#[tokio::test]
async fn test_handles_sharing_a_file_do_not_lose_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grievance.json");
    let (directory, _) = desk(&path).await;
    directory.register(department("PD", None)).await.unwrap();

    let (_, first) = desk(&path).await;
    let (_, second) = desk(&path).await;
    let filer = Identity::citizen(UserId::new_random());
    let (a, b) = tokio::join!(first.create(&filer, noise()), second.create(&filer, noise()));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.reference, b.reference);

    let stored = JsonFileStore::open(&path).await.unwrap().snapshot().await.unwrap();
    assert_eq!(stored.complaints.len(), 2);
    assert_eq!(stored.departments.len(), 1);
}

#[tokio::test]
async fn test_stale_handle_revalidates_against_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grievance.json");
    let (directory, first) = desk(&path).await;
    directory.register(department("PD", None)).await.unwrap();
    let complaint = first
        .create(&Identity::citizen(UserId::new_random()), noise())
        .await
        .unwrap();

    let (_, second) = desk(&path).await;
    let officer = Identity::department(UserId::new_random(), code("PD"));
    first
        .transition(complaint.id, ComplaintStatus::Triaged, &officer)
        .await
        .unwrap();

    // The second handle sees the triage instead of overwriting it.
    let err = second
        .transition(complaint.id, ComplaintStatus::Triaged, &officer)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GrievanceError::InvalidTransition { from: ComplaintStatus::Triaged, .. }
    ));
    let moved = second
        .transition(complaint.id, ComplaintStatus::InProgress, &officer)
        .await
        .unwrap();
    assert_eq!(moved.version, 2);
    assert_eq!(moved.history.len(), 2);
}

#[tokio::test]
async fn test_reload_sees_departments_added_through_another_handle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grievance.json");
    let (ours, _) = desk(&path).await;
    let (theirs, _) = desk(&path).await;

    theirs.register(department("HQ", None)).await.unwrap();
    assert!(ours.get(&code("HQ")).is_err());

    ours.reload().await.unwrap();
    assert_eq!(ours.get(&code("HQ")).unwrap().name, "HQ department");
    // The store, not the stale index, rejects the duplicate.
    let err = theirs.register(department("HQ", None)).await.unwrap_err();
    assert!(matches!(err, GrievanceError::DuplicateCode(_)));
}

#[tokio::test]
async fn test_failed_write_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grievance.json");
    let (directory, _) = desk(&path).await;
    directory.register(department("HQ", None)).await.unwrap();

    // A directory where the temporary snapshot goes makes the write fail.
    let blocker = path.with_extension("json.tmp");
    std::fs::create_dir(&blocker).unwrap();
    let err = directory.register(department("PD", Some("HQ"))).await.unwrap_err();
    assert!(matches!(err, GrievanceError::Store(StoreError::Backend(_))));
    assert!(matches!(err.retry_policy(), RetryPolicy::Retryable { .. }));
    assert!(directory.get(&code("PD")).is_err());

    std::fs::remove_dir(&blocker).unwrap();
    directory.register(department("PD", Some("HQ"))).await.unwrap();
    let stored = JsonFileStore::open(&path).await.unwrap().snapshot().await.unwrap();
    assert_eq!(stored.departments.len(), 2);
}
