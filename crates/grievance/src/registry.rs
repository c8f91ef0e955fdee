//! Department hierarchy: an arena of departments indexed by code and id.
//!
//! Parents are referenced by code and resolved through the index, never by
//! live references, so cycle detection is a plain ancestor walk.
//!
//! [`DepartmentRegistry`] is the pure index. [`DepartmentDirectory`] wraps it
//! with persistence: every hierarchy mutation is validated against the index,
//! written through the [`DepartmentStore`], and only then applied to the index.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::store::{DepartmentStore, StoreError};
use crate::{
    Department, DepartmentCode, DepartmentId, EscalationPolicy, GrievanceError, NewDepartment,
};

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// In-memory forest of departments.
#[derive(Debug, Clone, Default)]
pub struct DepartmentRegistry {
    nodes: Vec<Department>,
    by_code: HashMap<DepartmentCode, usize>,
    by_id: HashMap<DepartmentId, usize>,
}

impl DepartmentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index from stored departments, in any order.
    ///
    /// Fails if a parent is missing, a code repeats, or the parent links
    /// contain a cycle.
    pub fn from_departments(departments: Vec<Department>) -> Result<Self, GrievanceError> {
        let mut registry = Self::new();
        for department in departments {
            if registry.by_code.contains_key(&department.code) {
                return Err(GrievanceError::DuplicateCode(department.code));
            }
            registry.push(department);
        }
        for department in &registry.nodes {
            if let Some(parent) = &department.parent {
                if !registry.by_code.contains_key(parent) {
                    return Err(GrievanceError::UnknownParent(parent.clone()));
                }
                registry.check_acyclic(&department.code, parent)?;
            }
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Departments in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Department> {
        self.nodes.iter()
    }

    pub fn get(&self, code: &DepartmentCode) -> Option<&Department> {
        self.by_code.get(code).map(|&i| &self.nodes[i])
    }

    pub fn get_by_id(&self, id: DepartmentId) -> Option<&Department> {
        self.by_id.get(&id).map(|&i| &self.nodes[i])
    }

    fn require(&self, code: &DepartmentCode) -> Result<&Department, GrievanceError> {
        self.get(code)
            .ok_or_else(|| GrievanceError::UnknownDepartment(code.clone()))
    }

    /// Validates a registration and builds the department it would insert.
    pub fn prepare(&self, new: NewDepartment) -> Result<Department, GrievanceError> {
        if self.by_code.contains_key(&new.code) {
            return Err(GrievanceError::DuplicateCode(new.code));
        }
        if let Some(parent) = &new.parent {
            if *parent == new.code {
                return Err(GrievanceError::CycleDetected {
                    code: new.code,
                    parent: parent.clone(),
                });
            }
            if !self.by_code.contains_key(parent) {
                return Err(GrievanceError::UnknownParent(parent.clone()));
            }
        }
        Ok(Department {
            id: DepartmentId::new_random(),
            code: new.code,
            name: new.name,
            parent: new.parent,
            policy: new.policy,
        })
    }

    /// Validates moving `code` under `parent` and returns the updated department.
    pub fn prepare_reparent(
        &self,
        code: &DepartmentCode,
        parent: Option<&DepartmentCode>,
    ) -> Result<Department, GrievanceError> {
        let mut department = self.require(code)?.clone();
        if let Some(parent) = parent {
            if !self.by_code.contains_key(parent) {
                return Err(GrievanceError::UnknownParent(parent.clone()));
            }
            self.check_acyclic(code, parent)?;
        }
        department.parent = parent.cloned();
        Ok(department)
    }

    /// Inserts a department produced by [`Self::prepare`].
    pub fn insert(&mut self, department: Department) {
        debug_assert!(!self.by_code.contains_key(&department.code));
        self.push(department);
    }

    /// Replaces the stored department with the same id.
    pub fn replace(&mut self, department: Department) {
        if let Some(&i) = self.by_id.get(&department.id) {
            self.nodes[i] = department;
        }
    }

    fn push(&mut self, department: Department) {
        let index = self.nodes.len();
        self.by_code.insert(department.code.clone(), index);
        self.by_id.insert(department.id, index);
        self.nodes.push(department);
    }

    /// Rejects `parent` if `code` appears anywhere in its lineage.
    fn check_acyclic(
        &self,
        code: &DepartmentCode,
        parent: &DepartmentCode,
    ) -> Result<(), GrievanceError> {
        let cycle = || GrievanceError::CycleDetected {
            code: code.clone(),
            parent: parent.clone(),
        };
        let mut current = Some(parent);
        // Any walk longer than the node count has revisited a node.
        for _ in 0..=self.nodes.len() {
            match current {
                None => return Ok(()),
                Some(c) if c == code => return Err(cycle()),
                Some(c) => current = self.get(c).and_then(|d| d.parent.as_ref()),
            }
        }
        Err(cycle())
    }

    /// Departments from `code` up to its root, inclusive.
    pub fn lineage(&self, code: &DepartmentCode) -> Result<Vec<&Department>, GrievanceError> {
        let mut current = self.require(code)?;
        let mut lineage = vec![current];
        while let Some(parent) = current.parent.as_ref() {
            if lineage.len() > self.nodes.len() {
                break;
            }
            match self.get(parent) {
                Some(department) => {
                    lineage.push(department);
                    current = department;
                }
                None => break,
            }
        }
        Ok(lineage)
    }

    /// The nearest ancestor of `code`, or `None` for a root.
    pub fn parent_of(&self, code: &DepartmentCode) -> Result<Option<&Department>, GrievanceError> {
        Ok(self.lineage(code)?.get(1).copied())
    }

    /// The policy that governs `code`: its own, else the nearest ancestor's.
    ///
    /// `Ok(None)` means no department in the lineage defines one.
    pub fn resolve_policy(
        &self,
        code: &DepartmentCode,
    ) -> Result<Option<&EscalationPolicy>, GrievanceError> {
        Ok(self
            .lineage(code)?
            .into_iter()
            .find_map(|d| d.policy.as_ref()))
    }
}

// ---------------------------------------------------------------------------
// Persistent service
// ---------------------------------------------------------------------------

/// The department registry service.
///
/// Reads go to the in-memory index. Mutations are serialised by an async gate,
/// written through the store (whose unique constraint on code is
/// authoritative), and then applied to the index, so the index never holds a
/// department the store rejected.
pub struct DepartmentDirectory {
    store: Arc<dyn DepartmentStore>,
    index: RwLock<DepartmentRegistry>,
    gate: Mutex<()>,
}

impl DepartmentDirectory {
    /// Loads the hierarchy from `store`.
    #[instrument(skip(store))]
    pub async fn load(store: Arc<dyn DepartmentStore>) -> Result<Self, GrievanceError> {
        let registry = DepartmentRegistry::from_departments(store.list_departments().await?)?;
        info!(departments = registry.len(), "Department registry loaded");
        Ok(Self {
            store,
            index: RwLock::new(registry),
            gate: Mutex::new(()),
        })
    }

    /// Rebuilds the index from the store, discarding the cached hierarchy.
    #[instrument(skip(self))]
    pub async fn reload(&self) -> Result<(), GrievanceError> {
        let _guard = self.gate.lock().await;
        let registry = DepartmentRegistry::from_departments(self.store.list_departments().await?)?;
        *self.index.write().unwrap_or_else(|e| e.into_inner()) = registry;
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, DepartmentRegistry> {
        self.index.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a new department.
    #[instrument(skip(self, new), fields(code = %new.code))]
    pub async fn register(&self, new: NewDepartment) -> Result<Department, GrievanceError> {
        let _guard = self.gate.lock().await;
        let department = self.read().prepare(new)?;

        match self.store.insert_department(&department).await {
            Ok(()) => {}
            Err(StoreError::DuplicateKey { .. }) => {
                return Err(GrievanceError::DuplicateCode(department.code));
            }
            Err(e) => return Err(e.into()),
        }

        self.index
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(department.clone());
        info!(
            code = %department.code,
            parent = ?department.parent.as_ref().map(DepartmentCode::as_str),
            has_policy = department.policy.is_some(),
            "Department registered"
        );
        Ok(department)
    }

    /// Moves `code` under `parent` (or makes it a root).
    #[instrument(skip(self))]
    pub async fn reparent(
        &self,
        code: &DepartmentCode,
        parent: Option<&DepartmentCode>,
    ) -> Result<Department, GrievanceError> {
        let _guard = self.gate.lock().await;
        let department = self.read().prepare_reparent(code, parent)?;
        self.store.update_department(&department).await?;
        self.index
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .replace(department.clone());
        info!(code = %code, parent = ?parent.map(DepartmentCode::as_str), "Department re-parented");
        Ok(department)
    }

    /// Sets or clears the department's own escalation policy.
    #[instrument(skip(self, policy))]
    pub async fn set_policy(
        &self,
        code: &DepartmentCode,
        policy: Option<EscalationPolicy>,
    ) -> Result<Department, GrievanceError> {
        let _guard = self.gate.lock().await;
        let mut department = self.get(code)?;
        department.policy = policy;
        self.store.update_department(&department).await?;
        self.index
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .replace(department.clone());
        debug!(code = %code, has_policy = department.policy.is_some(), "Department policy updated");
        Ok(department)
    }

    pub fn get(&self, code: &DepartmentCode) -> Result<Department, GrievanceError> {
        self.read()
            .get(code)
            .cloned()
            .ok_or_else(|| GrievanceError::UnknownDepartment(code.clone()))
    }

    /// The department with internal id `id`, if registered.
    pub fn get_by_id(&self, id: DepartmentId) -> Option<Department> {
        self.read().get_by_id(id).cloned()
    }

    /// All departments in registration order.
    pub fn list(&self) -> Vec<Department> {
        self.read().iter().cloned().collect()
    }

    /// Departments from `code` up to its root, inclusive.
    pub fn lineage(&self, code: &DepartmentCode) -> Result<Vec<Department>, GrievanceError> {
        Ok(self.read().lineage(code)?.into_iter().cloned().collect())
    }

    /// The nearest ancestor of `code`, or `None` for a root.
    pub fn parent_of(&self, code: &DepartmentCode) -> Result<Option<Department>, GrievanceError> {
        Ok(self.read().parent_of(code)?.cloned())
    }

    /// The policy governing `code`, looked up through the current hierarchy.
    pub fn resolve_policy(
        &self,
        code: &DepartmentCode,
    ) -> Result<Option<EscalationPolicy>, GrievanceError> {
        Ok(self.read().resolve_policy(code)?.cloned())
    }
}
