//! File-backed persistence for the grievance desk.
//!
//! [`JsonFileStore`] implements the `grievance` store ports over a single JSON
//! snapshot file that several processes may share. The store keeps no cache:
//! every read loads the file, and every mutation runs as a transaction that
//! takes an exclusive lock on a sidecar `.lock` file, re-reads the snapshot,
//! applies the change and writes the result to a sibling temporary file
//! renamed over the existing one. A crash leaves either the old or the new
//! file and never a torn one; a failed write leaves the old file in place.
//!
//! ## Architectural Layer
//!
//! **Infrastructure adapter.** Contains no domain rules; uniqueness and
//! compare-and-swap semantics come from [`grievance::InMemoryStore`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs4::fs_std::FileExt;
use grievance::store::StoreResult;
use grievance::{
    Complaint, ComplaintFilter, ComplaintId, ComplaintStore, Department, DepartmentStore,
    InMemoryStore, ReferenceNumber, StoreError, StoreSnapshot,
};
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};

/// Errors raised while reading a snapshot file.
#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot {path} is not valid: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl From<FileStoreError> for StoreError {
    fn from(error: FileStoreError) -> Self {
        StoreError::Backend(error.to_string())
    }
}

/// A store persisted as one JSON document.
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    /// Queues this handle's writers so they do not each park a blocking
    /// thread on the file lock.
    writers: Mutex<()>,
}

/// An in-progress mutation: the file lock is held and `state` is the
/// snapshot as read under it.
struct Transaction<'a> {
    _writer: MutexGuard<'a, ()>,
    _lock: std::fs::File,
    state: InMemoryStore,
}

impl JsonFileStore {
    /// Opens the store at `path`, validating any existing snapshot.
    ///
    /// A missing file is an empty store; it is created by the first write.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, FileStoreError> {
        let path = path.as_ref().to_path_buf();
        let store = Self {
            lock_path: path.with_extension("json.lock"),
            path,
            writers: Mutex::new(()),
        };

        let snapshot = store.read().await?.snapshot();
        info!(
            departments = snapshot.departments.len(),
            complaints = snapshot.complaints.len(),
            "Store opened"
        );
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents of the file.
    pub async fn snapshot(&self) -> StoreResult<StoreSnapshot> {
        Ok(self.read().await?.snapshot())
    }

    /// Loads the snapshot file; a missing file is an empty store.
    async fn read(&self) -> Result<InMemoryStore, FileStoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(InMemoryStore::new()),
            Err(source) => {
                return Err(FileStoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let corrupt = |reason: String| FileStoreError::Corrupt {
            path: self.path.clone(),
            reason,
        };
        let snapshot: StoreSnapshot =
            serde_json::from_str(&contents).map_err(|e| corrupt(e.to_string()))?;
        InMemoryStore::from_snapshot(snapshot).map_err(|e| corrupt(e.to_string()))
    }

    /// Takes the file lock and reads the snapshot under it.
    async fn begin(&self) -> StoreResult<Transaction<'_>> {
        let writer = self.writers.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| backend("create store directory", parent, e))?;
        }
        let lock_path = self.lock_path.clone();
        let lock = tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&lock_path)?;
            file.lock_exclusive()?;
            Ok::<_, std::io::Error>(file)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("lock task failed: {e}")))?
        .map_err(|e| backend("lock", &self.lock_path, e))?;

        let state = self.read().await?;
        Ok(Transaction {
            _writer: writer,
            _lock: lock,
            state,
        })
    }

    /// Writes the transaction's state and releases the lock.
    ///
    /// Dropping a transaction without committing leaves the file untouched.
    async fn commit(&self, transaction: Transaction<'_>) -> StoreResult<()> {
        let snapshot = transaction.state.snapshot();
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| StoreError::Backend(format!("serialize snapshot: {e}")))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| backend("write", &tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| backend("rename", &self.path, e))?;

        debug!(
            path = %self.path.display(),
            bytes = json.len(),
            complaints = snapshot.complaints.len(),
            "Snapshot written"
        );
        Ok(())
    }
}

fn backend(action: &str, path: &Path, error: std::io::Error) -> StoreError {
    StoreError::Backend(format!("{action} {}: {error}", path.display()))
}

#[async_trait]
impl DepartmentStore for JsonFileStore {
    async fn insert_department(&self, department: &Department) -> StoreResult<()> {
        let transaction = self.begin().await?;
        transaction.state.insert_department(department).await?;
        self.commit(transaction).await
    }

    async fn update_department(&self, department: &Department) -> StoreResult<()> {
        let transaction = self.begin().await?;
        transaction.state.update_department(department).await?;
        self.commit(transaction).await
    }

    async fn list_departments(&self) -> StoreResult<Vec<Department>> {
        self.read().await?.list_departments().await
    }
}

#[async_trait]
impl ComplaintStore for JsonFileStore {
    async fn reserve_reference(&self, reference: &ReferenceNumber) -> StoreResult<bool> {
        let transaction = self.begin().await?;
        if !transaction.state.reserve_reference(reference).await? {
            return Ok(false);
        }
        self.commit(transaction).await?;
        Ok(true)
    }

    async fn insert_complaint(&self, complaint: &Complaint) -> StoreResult<()> {
        let transaction = self.begin().await?;
        transaction.state.insert_complaint(complaint).await?;
        self.commit(transaction).await
    }

    async fn get_complaint(&self, id: ComplaintId) -> StoreResult<Option<Complaint>> {
        self.read().await?.get_complaint(id).await
    }

    async fn find_by_reference(
        &self,
        reference: &ReferenceNumber,
    ) -> StoreResult<Option<Complaint>> {
        self.read().await?.find_by_reference(reference).await
    }

    async fn compare_and_swap(
        &self,
        complaint: &Complaint,
        expected_version: u64,
    ) -> StoreResult<()> {
        let transaction = self.begin().await?;
        transaction
            .state
            .compare_and_swap(complaint, expected_version)
            .await?;
        self.commit(transaction).await
    }

    async fn list_complaints(&self, filter: &ComplaintFilter) -> StoreResult<Vec<Complaint>> {
        self.read().await?.list_complaints(filter).await
    }

    async fn list_open(&self) -> StoreResult<Vec<Complaint>> {
        self.read().await?.list_open().await
    }
}
