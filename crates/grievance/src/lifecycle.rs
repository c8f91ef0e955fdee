//! Complaint creation and every subsequent mutation.
//!
//! All mutations are read, validate, compare-and-swap on the complaint
//! version. When another writer got there first the mutation is re-validated
//! against the fresh record, so a transition either applies on top of the
//! winner's result or fails with the error that state dictates. Nothing is
//! silently dropped.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::permissions::{self, Actor};
use crate::reference::ReferenceAllocator;
use crate::registry::DepartmentDirectory;
use crate::store::{ComplaintStore, StoreError};
use crate::{
    Complaint, ComplaintFilter, ComplaintId, ComplaintStatistics, ComplaintStatus, DepartmentCode,
    GrievanceError, Identity, NewComplaint, ReferenceNumber, Role, RuleTarget, Timestamp,
};

/// Attempts at a compare-and-swap before reporting [`GrievanceError::Conflict`].
pub const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Default intake channel.
pub const DEFAULT_SOURCE: &str = "web";

/// Result of moving a complaint to `escalated`.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationOutcome {
    pub complaint: Complaint,
    /// `true` when there was no department to escalate to; the complaint kept
    /// its department and carries the `escalation_exhausted` marker.
    pub exhausted: bool,
}

/// The complaint lifecycle service.
pub struct ComplaintLifecycle {
    directory: Arc<DepartmentDirectory>,
    store: Arc<dyn ComplaintStore>,
    allocator: ReferenceAllocator,
}

impl ComplaintLifecycle {
    /// A lifecycle over `store`, allocating references at random.
    pub fn new(directory: Arc<DepartmentDirectory>, store: Arc<dyn ComplaintStore>) -> Self {
        Self {
            directory,
            store,
            allocator: ReferenceAllocator::random(),
        }
    }

    /// Replaces the reference allocator.
    #[must_use]
    pub fn with_allocator(mut self, allocator: ReferenceAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    /// The department registry this lifecycle resolves codes against.
    pub fn directory(&self) -> &Arc<DepartmentDirectory> {
        &self.directory
    }

    pub(crate) fn store(&self) -> &dyn ComplaintStore {
        self.store.as_ref()
    }

    /// Resolves an identity-provider assertion into an [`Actor`].
    ///
    /// An officer whose affiliation is missing or unknown resolves to an
    /// officer of no department, who can act on nothing.
    pub fn resolve_actor(&self, identity: &Identity) -> Actor {
        match identity.role {
            Role::Citizen => Actor::Citizen {
                user: identity.user_id,
            },
            Role::Admin => Actor::Admin {
                user: identity.user_id,
            },
            Role::Department => Actor::Officer {
                user: identity.user_id,
                department: identity
                    .department
                    .as_ref()
                    .and_then(|code| self.directory.get(code).ok())
                    .map(|d| d.id),
            },
        }
    }

    // -----------------------------------------------------------------------
    // Creation and queries
    // -----------------------------------------------------------------------

    /// Files a new complaint against `new.department`.
    #[instrument(skip(self, filer, new), fields(department = %new.department, filer = %filer.user_id))]
    pub async fn create(
        &self,
        filer: &Identity,
        new: NewComplaint,
    ) -> Result<Complaint, GrievanceError> {
        let department = self.directory.get(&new.department)?;
        let reference = self.allocator.allocate(self.store.as_ref()).await?;
        let now = Timestamp::now();

        let complaint = Complaint {
            id: ComplaintId::new_random(),
            reference,
            filer: filer.user_id,
            title: new.title,
            description: new.description,
            transcript: new.transcript,
            language: new.language,
            translated_text: new.translated_text,
            category: new.category,
            subcategory: new.subcategory,
            source: new.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            created_at: now,
            status: ComplaintStatus::New,
            department: department.id,
            metadata: new.metadata.unwrap_or_default(),
            last_transition_at: now,
            version: 0,
            applied_rules: Vec::new(),
            history: Vec::new(),
        };
        // A failed insert leaves the reference reserved; it is never reissued.
        self.store.insert_complaint(&complaint).await?;

        info!(
            complaint = %complaint.id,
            reference = %complaint.reference,
            department = %department.code,
            "Complaint filed"
        );
        Ok(complaint)
    }

    /// The complaint with id `id`.
    pub async fn get(&self, id: ComplaintId) -> Result<Complaint, GrievanceError> {
        self.store
            .get_complaint(id)
            .await?
            .ok_or_else(|| GrievanceError::complaint_not_found(id))
    }

    /// The complaint carrying `reference`.
    pub async fn find_by_reference(
        &self,
        reference: &ReferenceNumber,
    ) -> Result<Complaint, GrievanceError> {
        self.store
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| GrievanceError::complaint_not_found(reference))
    }

    /// Complaints matching `filter`, oldest first.
    pub async fn list(&self, filter: &ComplaintFilter) -> Result<Vec<Complaint>, GrievanceError> {
        Ok(self.store.list_complaints(filter).await?)
    }

    /// Statuses the caller may move the complaint to right now.
    pub async fn permitted_transitions(
        &self,
        id: ComplaintId,
        identity: &Identity,
    ) -> Result<Vec<ComplaintStatus>, GrievanceError> {
        let complaint = self.get(id).await?;
        Ok(permissions::permitted_transitions(
            &self.resolve_actor(identity),
            &complaint,
        ))
    }

    /// Complaint counts per status and per department. Admin only.
    #[instrument(skip(self, identity), fields(user = %identity.user_id))]
    pub async fn statistics(
        &self,
        identity: &Identity,
    ) -> Result<ComplaintStatistics, GrievanceError> {
        if identity.role != Role::Admin {
            return Err(GrievanceError::forbidden(
                "only admins can view complaint statistics",
            ));
        }
        let complaints = self.store.list_complaints(&ComplaintFilter::default()).await?;
        Ok(ComplaintStatistics::collect(&complaints, |id| {
            self.directory.get_by_id(id).map(|d| d.code)
        }))
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Moves the complaint to `target` on behalf of `identity`.
    ///
    /// A move to `escalated` also reassigns the complaint to the parent of its
    /// current department; see [`Self::escalate`].
    #[instrument(skip(self, identity), fields(user = %identity.user_id, role = %identity.role))]
    pub async fn transition(
        &self,
        id: ComplaintId,
        target: ComplaintStatus,
        identity: &Identity,
    ) -> Result<Complaint, GrievanceError> {
        let actor = self.resolve_actor(identity);
        self.transition_as(id, target, &actor, Timestamp::now())
            .await
    }

    /// [`Self::transition`] for an already-resolved actor at a given time.
    pub async fn transition_as(
        &self,
        id: ComplaintId,
        target: ComplaintStatus,
        actor: &Actor,
        at: Timestamp,
    ) -> Result<Complaint, GrievanceError> {
        let complaint = self
            .mutate(id, |complaint| {
                permissions::authorize(actor, complaint, target)?;
                if target == ComplaintStatus::Escalated {
                    self.apply_escalation(complaint, actor, &RuleTarget::Parent, at)?;
                } else {
                    let department = complaint.department;
                    complaint.apply_change(target, department, actor.describe(), at);
                }
                Ok(true)
            })
            .await?;

        info!(
            complaint = %complaint.id,
            reference = %complaint.reference,
            status = %complaint.status,
            actor = %actor.describe(),
            "Complaint transitioned"
        );
        Ok(complaint)
    }

    /// Escalates the complaint to the parent of its current department.
    ///
    /// Escalating from a root department is not an error: the outcome reports
    /// `exhausted` instead.
    #[instrument(skip(self, identity), fields(user = %identity.user_id, role = %identity.role))]
    pub async fn escalate(
        &self,
        id: ComplaintId,
        identity: &Identity,
    ) -> Result<EscalationOutcome, GrievanceError> {
        let actor = self.resolve_actor(identity);
        let complaint = self
            .transition_as(id, ComplaintStatus::Escalated, &actor, Timestamp::now())
            .await?;
        Ok(EscalationOutcome {
            exhausted: complaint.escalation_exhausted()
                && complaint
                    .history
                    .last()
                    .is_some_and(|h| h.department_before == h.department_after),
            complaint,
        })
    }

    /// Assigns the complaint to another department without changing status.
    /// Admin only.
    #[instrument(skip(self, identity), fields(user = %identity.user_id, role = %identity.role))]
    pub async fn reassign(
        &self,
        id: ComplaintId,
        department: &DepartmentCode,
        identity: &Identity,
    ) -> Result<Complaint, GrievanceError> {
        let actor = self.resolve_actor(identity);
        if !actor.is_admin() {
            return Err(GrievanceError::forbidden(format!(
                "{} may not reassign complaints",
                actor.describe()
            )));
        }
        let destination = self.directory.get(department)?;
        let at = Timestamp::now();

        let complaint = self
            .mutate(id, |complaint| {
                let status = complaint.status;
                complaint.apply_change(status, destination.id, actor.describe(), at);
                Ok(true)
            })
            .await?;

        info!(
            complaint = %complaint.id,
            department = %destination.code,
            "Complaint reassigned"
        );
        Ok(complaint)
    }

    /// Moves `complaint` to `escalated`, reassigning it per `target`.
    ///
    /// Returns `true` when no destination exists and the complaint was marked
    /// `escalation_exhausted` instead.
    pub(crate) fn apply_escalation(
        &self,
        complaint: &mut Complaint,
        actor: &Actor,
        target: &RuleTarget,
        at: Timestamp,
    ) -> Result<bool, GrievanceError> {
        let current = self
            .directory
            .get_by_id(complaint.department)
            .ok_or_else(|| GrievanceError::NotFound {
                entity: "department",
                key: complaint.department.to_string(),
            })?;

        let destination = match target {
            RuleTarget::Parent => self.directory.parent_of(&current.code)?,
            RuleTarget::Department(code) => Some(self.directory.get(code)?),
        };

        match destination {
            Some(destination) => {
                complaint.apply_change(
                    ComplaintStatus::Escalated,
                    destination.id,
                    actor.describe(),
                    at,
                );
                info!(
                    complaint = %complaint.id,
                    from = %current.code,
                    to = %destination.code,
                    "Complaint escalated"
                );
                Ok(false)
            }
            None => {
                let department = complaint.department;
                complaint.apply_change(ComplaintStatus::Escalated, department, actor.describe(), at);
                complaint.mark_escalation_exhausted();
                warn!(
                    complaint = %complaint.id,
                    department = %current.code,
                    "Escalation exhausted: department has no parent"
                );
                Ok(true)
            }
        }
    }

    /// Read, change, compare-and-swap; re-reading on version conflicts.
    ///
    /// `change` returns `Ok(false)` to leave the complaint untouched, in which
    /// case the current record is returned without a write.
    pub(crate) async fn mutate<F>(
        &self,
        id: ComplaintId,
        mut change: F,
    ) -> Result<Complaint, GrievanceError>
    where
        F: FnMut(&mut Complaint) -> Result<bool, GrievanceError> + Send,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let mut complaint = self.get(id).await?;
            let expected = complaint.version;
            if !change(&mut complaint)? {
                return Ok(complaint);
            }
            complaint.version = expected + 1;

            match self.store.compare_and_swap(&complaint, expected).await {
                Ok(()) => return Ok(complaint),
                Err(StoreError::VersionConflict { found, .. }) => {
                    debug!(complaint = %id, attempt, expected, found, "Version conflict, re-validating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        warn!(complaint = %id, attempts = MAX_WRITE_ATTEMPTS, "Gave up after repeated version conflicts");
        Err(GrievanceError::Conflict { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::{format_reference, ReferenceGenerator, MAX_ALLOCATION_ATTEMPTS};
    use crate::store::InMemoryStore;
    use crate::{NewDepartment, UserId, ESCALATION_EXHAUSTED_KEY};

    /// Always proposes the same reference.
    struct Fixed(u32);

    impl ReferenceGenerator for Fixed {
        fn candidate(&self) -> ReferenceNumber {
            format_reference(self.0)
        }
    }

    fn code(value: &str) -> DepartmentCode {
        DepartmentCode::new(value).unwrap()
    }

    async fn lifecycle() -> ComplaintLifecycle {
        let store = Arc::new(InMemoryStore::new());
        let directory = Arc::new(DepartmentDirectory::load(store.clone()).await.unwrap());
        for (c, parent) in [("HQ", None), ("PD", Some("HQ"))] {
            directory
                .register(NewDepartment {
                    code: code(c),
                    name: c.to_string(),
                    parent: parent.map(code),
                    policy: None,
                })
                .await
                .unwrap();
        }
        ComplaintLifecycle::new(directory, store)
    }

    fn streetlight() -> NewComplaint {
        NewComplaint::new("Streetlight out", "Dark corner near the school", code("PD"))
    }

    #[tokio::test]
    async fn test_create_assigns_new_status_and_department() {
        let lc = lifecycle().await;
        let citizen = Identity::citizen(UserId::new_random());

        let complaint = lc.create(&citizen, streetlight()).await.unwrap();
        assert_eq!(complaint.status, ComplaintStatus::New);
        assert_eq!(complaint.department, lc.directory().get(&code("PD")).unwrap().id);
        assert_eq!(complaint.filer, citizen.user_id);
        assert_eq!(complaint.source, "web");
        assert!(complaint.reference.as_str().starts_with("COMP-"));

        let found = lc.find_by_reference(&complaint.reference).await.unwrap();
        assert_eq!(found.id, complaint.id);
    }

    #[tokio::test]
    async fn test_create_fails_when_references_run_out() {
        let store = Arc::new(InMemoryStore::new());
        let directory = Arc::new(DepartmentDirectory::load(store.clone()).await.unwrap());
        directory
            .register(NewDepartment {
                code: code("PD"),
                name: "Police".into(),
                parent: None,
                policy: None,
            })
            .await
            .unwrap();
        store.reserve_reference(&format_reference(424_242)).await.unwrap();

        let lc = ComplaintLifecycle::new(directory, store.clone())
            .with_allocator(ReferenceAllocator::new(Arc::new(Fixed(424_242))));
        let err = lc
            .create(&Identity::citizen(UserId::new_random()), streetlight())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GrievanceError::AllocationExhausted { attempts: MAX_ALLOCATION_ATTEMPTS }
        ));
        assert!(lc.list(&ComplaintFilter::default()).await.unwrap().is_empty());

        // A fresh candidate goes through.
        let lc = lc.with_allocator(ReferenceAllocator::new(Arc::new(Fixed(424_243))));
        let complaint = lc
            .create(&Identity::citizen(UserId::new_random()), streetlight())
            .await
            .unwrap();
        assert_eq!(complaint.reference.as_str(), "COMP-424243");
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_department() {
        let lc = lifecycle().await;
        let mut new = streetlight();
        new.department = code("NOPE");
        let err = lc
            .create(&Identity::citizen(UserId::new_random()), new)
            .await
            .unwrap_err();
        assert!(matches!(err, GrievanceError::UnknownDepartment(c) if c.as_str() == "NOPE"));
    }

    #[tokio::test]
    async fn test_transition_records_history_and_timestamp() {
        let lc = lifecycle().await;
        let complaint = lc
            .create(&Identity::citizen(UserId::new_random()), streetlight())
            .await
            .unwrap();
        let officer = Identity::department(UserId::new_random(), code("PD"));

        let triaged = lc
            .transition(complaint.id, ComplaintStatus::Triaged, &officer)
            .await
            .unwrap();
        assert_eq!(triaged.status, ComplaintStatus::Triaged);
        assert_eq!(triaged.version, 1);
        assert!(triaged.last_transition_at >= complaint.last_transition_at);
        assert_eq!(triaged.history.len(), 1);
        assert_eq!(triaged.history[0].from, ComplaintStatus::New);
        assert!(triaged.history[0].actor.starts_with("department:"));
    }

    #[tokio::test]
    async fn test_transition_unknown_complaint_is_not_found() {
        let lc = lifecycle().await;
        let admin = Identity::admin(UserId::new_random());
        let err = lc
            .transition(ComplaintId::new_random(), ComplaintStatus::Triaged, &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, GrievanceError::NotFound { entity: "complaint", .. }));
    }

    #[tokio::test]
    async fn test_officer_with_unknown_affiliation_is_forbidden() {
        let lc = lifecycle().await;
        let complaint = lc
            .create(&Identity::citizen(UserId::new_random()), streetlight())
            .await
            .unwrap();
        let stray = Identity::department(UserId::new_random(), code("GHOST"));
        let err = lc
            .transition(complaint.id, ComplaintStatus::Triaged, &stray)
            .await
            .unwrap_err();
        assert!(matches!(err, GrievanceError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_admin_escalation_moves_to_parent_then_exhausts_at_root() {
        let lc = lifecycle().await;
        let admin = Identity::admin(UserId::new_random());
        let complaint = lc
            .create(&Identity::citizen(UserId::new_random()), streetlight())
            .await
            .unwrap();

        let outcome = lc.escalate(complaint.id, &admin).await.unwrap();
        assert!(!outcome.exhausted);
        assert_eq!(
            outcome.complaint.department,
            lc.directory().get(&code("HQ")).unwrap().id
        );

        // Back to work at HQ, then escalate again from the root.
        let hq = Identity::department(UserId::new_random(), code("HQ"));
        lc.transition(complaint.id, ComplaintStatus::InProgress, &hq)
            .await
            .unwrap();
        let outcome = lc.escalate(complaint.id, &admin).await.unwrap();
        assert!(outcome.exhausted);
        assert_eq!(outcome.complaint.status, ComplaintStatus::Escalated);
        assert_eq!(
            outcome.complaint.department,
            lc.directory().get(&code("HQ")).unwrap().id
        );
        assert_eq!(
            outcome.complaint.metadata.get(ESCALATION_EXHAUSTED_KEY),
            Some(&serde_json::Value::Bool(true))
        );
    }

    #[tokio::test]
    async fn test_reassign_is_admin_only_and_keeps_status() {
        let lc = lifecycle().await;
        let complaint = lc
            .create(&Identity::citizen(UserId::new_random()), streetlight())
            .await
            .unwrap();
        let officer = Identity::department(UserId::new_random(), code("PD"));
        let err = lc
            .reassign(complaint.id, &code("HQ"), &officer)
            .await
            .unwrap_err();
        assert!(matches!(err, GrievanceError::Forbidden { .. }));

        let admin = Identity::admin(UserId::new_random());
        let moved = lc.reassign(complaint.id, &code("HQ"), &admin).await.unwrap();
        assert_eq!(moved.status, ComplaintStatus::New);
        assert_eq!(moved.department, lc.directory().get(&code("HQ")).unwrap().id);

        let err = lc
            .reassign(complaint.id, &code("NOPE"), &admin)
            .await
            .unwrap_err();
        assert!(matches!(err, GrievanceError::UnknownDepartment(_)));
    }

    #[tokio::test]
    async fn test_concurrent_transitions_serialize() {
        let lc = Arc::new(lifecycle().await);
        let complaint = lc
            .create(&Identity::citizen(UserId::new_random()), streetlight())
            .await
            .unwrap();
        let officer = Identity::department(UserId::new_random(), code("PD"));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let lc = lc.clone();
            let officer = officer.clone();
            handles.push(tokio::spawn(async move {
                lc.transition(complaint.id, ComplaintStatus::Triaged, &officer)
                    .await
            }));
        }

        let mut applied = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => applied += 1,
                Err(GrievanceError::InvalidTransition { from, .. }) => {
                    assert_eq!(from, ComplaintStatus::Triaged)
                }
                Err(GrievanceError::Conflict { .. }) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(applied, 1);

        let stored = lc.get(complaint.id).await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.history.len(), 1);
    }

    #[tokio::test]
    async fn test_statistics_require_admin() {
        let lc = lifecycle().await;
        let citizen = Identity::citizen(UserId::new_random());
        lc.create(&citizen, streetlight()).await.unwrap();
        lc.create(&citizen, streetlight()).await.unwrap();

        assert!(matches!(
            lc.statistics(&citizen).await,
            Err(GrievanceError::Forbidden { .. })
        ));
        let stats = lc
            .statistics(&Identity::admin(UserId::new_random()))
            .await
            .unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_status.get(&ComplaintStatus::New), Some(&2));
        assert_eq!(stats.by_department.get("PD"), Some(&2));
    }
}
