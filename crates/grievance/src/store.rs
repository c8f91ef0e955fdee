//! Persistence ports and the in-memory store.
//!
//! The core consumes persistence through [`DepartmentStore`] and
//! [`ComplaintStore`]. Implementations must enforce:
//!
//! - uniqueness of department codes and complaint reference numbers;
//! - an atomic insert-if-absent for reference reservations;
//! - an atomic compare-and-swap on the complaint version.
//!
//! [`InMemoryStore`] satisfies all three with a single lock and backs both the
//! tests and the file-backed adapter in the `store` crate.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Complaint, ComplaintFilter, ComplaintId, Department, ReferenceNumber};

/// Errors reported by store implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("Duplicate {entity} key: {key}")]
    DuplicateKey {
        entity: &'static str,
        key: String,
    },

    /// The stored complaint no longer has the version the writer read.
    #[error("Version conflict on complaint {id}: expected {expected}, found {found}")]
    VersionConflict {
        id: ComplaintId,
        expected: u64,
        found: u64,
    },

    /// An update targeted a record that does not exist.
    #[error("Missing {entity}: {key}")]
    Missing {
        entity: &'static str,
        key: String,
    },

    /// The underlying storage failed (I/O, serialisation).
    #[error("Store backend failure: {0}")]
    Backend(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Persistence for the department hierarchy.
#[async_trait]
pub trait DepartmentStore: Send + Sync {
    /// Inserts a department. Fails with [`StoreError::DuplicateKey`] if the
    /// code or id is already present.
    async fn insert_department(&self, department: &Department) -> StoreResult<()>;

    /// Replaces a stored department, matched by id.
    async fn update_department(&self, department: &Department) -> StoreResult<()>;

    /// All departments in insertion order.
    async fn list_departments(&self) -> StoreResult<Vec<Department>>;
}

/// Persistence for complaints and reference reservations.
#[async_trait]
pub trait ComplaintStore: Send + Sync {
    /// Atomically reserves `reference`. Returns `false` if it was already taken.
    async fn reserve_reference(&self, reference: &ReferenceNumber) -> StoreResult<bool>;

    /// Inserts a new complaint. Fails with [`StoreError::DuplicateKey`] if the
    /// id or reference number belongs to another stored complaint.
    async fn insert_complaint(&self, complaint: &Complaint) -> StoreResult<()>;

    async fn get_complaint(&self, id: ComplaintId) -> StoreResult<Option<Complaint>>;

    async fn find_by_reference(&self, reference: &ReferenceNumber)
        -> StoreResult<Option<Complaint>>;

    /// Replaces the stored complaint only if its version still equals
    /// `expected_version`.
    async fn compare_and_swap(&self, complaint: &Complaint, expected_version: u64)
        -> StoreResult<()>;

    /// Complaints matching `filter`, oldest first.
    async fn list_complaints(&self, filter: &ComplaintFilter) -> StoreResult<Vec<Complaint>>;

    /// Complaints not in a terminal status, oldest first.
    async fn list_open(&self) -> StoreResult<Vec<Complaint>>;
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Serialisable image of an [`InMemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Schema version for forward compatibility.
    pub version: u32,
    pub departments: Vec<Department>,
    pub complaints: Vec<Complaint>,
    pub reserved_references: Vec<ReferenceNumber>,
}

impl StoreSnapshot {
    /// Current schema version.
    pub const CURRENT_VERSION: u32 = 1;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    departments: Vec<Department>,
    complaints: HashMap<ComplaintId, Complaint>,
    by_reference: HashMap<ReferenceNumber, ComplaintId>,
    reserved: HashSet<ReferenceNumber>,
}

impl MemoryState {
    fn sorted(&self, mut complaints: Vec<Complaint>) -> Vec<Complaint> {
        complaints.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.reference.cmp(&b.reference))
        });
        complaints
    }
}

/// Lock-protected in-memory store.
///
/// Every operation runs under one lock, so read-check-write sequences are
/// atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from a snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> StoreResult<Self> {
        if snapshot.version > StoreSnapshot::CURRENT_VERSION {
            return Err(StoreError::Backend(format!(
                "snapshot version {} is newer than supported version {}",
                snapshot.version,
                StoreSnapshot::CURRENT_VERSION
            )));
        }

        let mut state = MemoryState {
            departments: snapshot.departments,
            reserved: snapshot.reserved_references.into_iter().collect(),
            ..MemoryState::default()
        };
        for complaint in snapshot.complaints {
            state.reserved.insert(complaint.reference.clone());
            state
                .by_reference
                .insert(complaint.reference.clone(), complaint.id);
            state.complaints.insert(complaint.id, complaint);
        }
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Captures the current contents.
    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let complaints = state.sorted(state.complaints.values().cloned().collect());
        let mut reserved_references: Vec<_> = state.reserved.iter().cloned().collect();
        reserved_references.sort();
        StoreSnapshot {
            version: StoreSnapshot::CURRENT_VERSION,
            departments: state.departments.clone(),
            complaints,
            reserved_references,
        }
    }
}

#[async_trait]
impl DepartmentStore for InMemoryStore {
    async fn insert_department(&self, department: &Department) -> StoreResult<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = state
            .departments
            .iter()
            .find(|d| d.code == department.code || d.id == department.id)
        {
            return Err(StoreError::DuplicateKey {
                entity: "department",
                key: existing.code.to_string(),
            });
        }
        state.departments.push(department.clone());
        Ok(())
    }

    async fn update_department(&self, department: &Department) -> StoreResult<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let slot = state
            .departments
            .iter_mut()
            .find(|d| d.id == department.id)
            .ok_or_else(|| StoreError::Missing {
                entity: "department",
                key: department.code.to_string(),
            })?;
        *slot = department.clone();
        Ok(())
    }

    async fn list_departments(&self) -> StoreResult<Vec<Department>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(state.departments.clone())
    }
}

#[async_trait]
impl ComplaintStore for InMemoryStore {
    async fn reserve_reference(&self, reference: &ReferenceNumber) -> StoreResult<bool> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        Ok(state.reserved.insert(reference.clone()))
    }

    async fn insert_complaint(&self, complaint: &Complaint) -> StoreResult<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.complaints.contains_key(&complaint.id) {
            return Err(StoreError::DuplicateKey {
                entity: "complaint",
                key: complaint.id.to_string(),
            });
        }
        if state.by_reference.contains_key(&complaint.reference) {
            return Err(StoreError::DuplicateKey {
                entity: "reference",
                key: complaint.reference.to_string(),
            });
        }
        state.reserved.insert(complaint.reference.clone());
        state
            .by_reference
            .insert(complaint.reference.clone(), complaint.id);
        state.complaints.insert(complaint.id, complaint.clone());
        Ok(())
    }

    async fn get_complaint(&self, id: ComplaintId) -> StoreResult<Option<Complaint>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(state.complaints.get(&id).cloned())
    }

    async fn find_by_reference(
        &self,
        reference: &ReferenceNumber,
    ) -> StoreResult<Option<Complaint>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .by_reference
            .get(reference)
            .and_then(|id| state.complaints.get(id))
            .cloned())
    }

    async fn compare_and_swap(
        &self,
        complaint: &Complaint,
        expected_version: u64,
    ) -> StoreResult<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let stored = state
            .complaints
            .get_mut(&complaint.id)
            .ok_or_else(|| StoreError::Missing {
                entity: "complaint",
                key: complaint.id.to_string(),
            })?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                id: complaint.id,
                expected: expected_version,
                found: stored.version,
            });
        }
        *stored = complaint.clone();
        Ok(())
    }

    async fn list_complaints(&self, filter: &ComplaintFilter) -> StoreResult<Vec<Complaint>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let matching = state
            .complaints
            .values()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        Ok(state.sorted(matching))
    }

    async fn list_open(&self) -> StoreResult<Vec<Complaint>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let open = state
            .complaints
            .values()
            .filter(|c| c.is_open())
            .cloned()
            .collect();
        Ok(state.sorted(open))
    }
}
