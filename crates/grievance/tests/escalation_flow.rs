//! Lifecycle and escalation scenarios against the in-memory store.

use std::collections::HashSet;
use std::sync::Arc;

use grievance::{
    ComplaintLifecycle, ComplaintStatus, Delay, DepartmentCode, DepartmentDirectory,
    EscalationEvaluator, EscalationPolicy, EscalationRule, GrievanceError, Identity,
    InMemoryStore, NewComplaint, NewDepartment, RuleAction, RuleTarget, Timestamp, UserId,
    ESCALATION_EXHAUSTED_KEY, NOTIFICATIONS_KEY,
};

fn code(value: &str) -> DepartmentCode {
    DepartmentCode::new(value).unwrap()
}

struct Desk {
    directory: Arc<DepartmentDirectory>,
    lifecycle: Arc<ComplaintLifecycle>,
    evaluator: EscalationEvaluator,
}

impl Desk {
    /// HQ <- PD, plus a standalone root PW. Only HQ defines a policy.
    async fn new(policy: EscalationPolicy) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let directory = Arc::new(DepartmentDirectory::load(store.clone()).await.unwrap());
        for (c, parent, policy) in [
            ("HQ", None, Some(policy.clone())),
            ("PD", Some("HQ"), None),
            ("PW", None, Some(policy)),
        ] {
            directory
                .register(NewDepartment {
                    code: code(c),
                    name: c.to_string(),
                    parent: parent.map(code),
                    policy,
                })
                .await
                .unwrap();
        }
        let lifecycle = Arc::new(ComplaintLifecycle::new(directory.clone(), store));
        let evaluator = EscalationEvaluator::new(lifecycle.clone());
        Self {
            directory,
            lifecycle,
            evaluator,
        }
    }

    fn id_of(&self, c: &str) -> grievance::DepartmentId {
        self.directory.get(&code(c)).unwrap().id
    }

    async fn file(&self, filer: &Identity, department: &str) -> grievance::Complaint {
        self.lifecycle
            .create(
                filer,
                NewComplaint::new("Broken signal", "Signal at 5th cross is dark", code(department)),
            )
            .await
            .unwrap()
    }
}

fn escalate_after_week() -> EscalationPolicy {
    EscalationPolicy::new(vec![EscalationRule::escalate_after(Delay::from_days(7))])
}

#[tokio::test]
async fn test_pd_complaint_end_to_end() {
    let desk = Desk::new(escalate_after_week()).await;
    let filer = Identity::citizen(UserId::new_random());
    let officer = Identity::department(UserId::new_random(), code("PD"));

    let complaint = desk.file(&filer, "PD").await;
    assert_eq!(complaint.status, ComplaintStatus::New);
    assert_eq!(complaint.department, desk.id_of("PD"));

    let triaged = desk
        .lifecycle
        .transition(complaint.id, ComplaintStatus::Triaged, &officer)
        .await
        .unwrap();
    assert_eq!(triaged.status, ComplaintStatus::Triaged);

    let err = desk
        .lifecycle
        .transition(complaint.id, ComplaintStatus::Triaged, &filer)
        .await
        .unwrap_err();
    assert!(matches!(err, GrievanceError::Forbidden { .. }), "{err}");

    // PD inherits HQ's seven-day rule.
    let now = triaged.last_transition_at.after(Delay::from_days(8));
    let report = desk.evaluator.run(now).await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.escalated, 1);
    assert!(report.failures.is_empty());

    let escalated = desk.lifecycle.get(complaint.id).await.unwrap();
    assert_eq!(escalated.status, ComplaintStatus::Escalated);
    assert_eq!(escalated.department, desk.id_of("HQ"));
    assert_eq!(escalated.last_transition_at, now);
    assert_eq!(escalated.history.last().unwrap().actor, "escalation-evaluator");

    // The old assignee has lost the complaint; HQ picks it up.
    let err = desk
        .lifecycle
        .transition(complaint.id, ComplaintStatus::InProgress, &officer)
        .await
        .unwrap_err();
    assert!(matches!(err, GrievanceError::Forbidden { .. }));
    let hq = Identity::department(UserId::new_random(), code("HQ"));
    desk.lifecycle
        .transition(complaint.id, ComplaintStatus::InProgress, &hq)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_evaluator_is_idempotent_for_same_now() {
    let desk = Desk::new(escalate_after_week()).await;
    let filer = Identity::citizen(UserId::new_random());
    let complaint = desk.file(&filer, "PD").await;
    let now = complaint.created_at.after(Delay::from_days(10));

    let first = desk.evaluator.run(now).await.unwrap();
    assert_eq!(first.escalated, 1);
    let version = desk.lifecycle.get(complaint.id).await.unwrap().version;

    let second = desk.evaluator.run(now).await.unwrap();
    assert_eq!(second.applied(), 0);
    let after = desk.lifecycle.get(complaint.id).await.unwrap();
    assert_eq!(after.version, version);
    assert_eq!(after.history.len(), 1);
}

#[tokio::test]
async fn test_root_escalation_is_exhausted_not_an_error() {
    let desk = Desk::new(escalate_after_week()).await;
    let complaint = desk
        .file(&Identity::citizen(UserId::new_random()), "PW")
        .await;

    let report = desk
        .evaluator
        .run(complaint.created_at.after(Delay::from_days(8)))
        .await
        .unwrap();
    assert_eq!(report.escalated, 1);
    assert_eq!(report.exhausted, 1);

    let stored = desk.lifecycle.get(complaint.id).await.unwrap();
    assert_eq!(stored.status, ComplaintStatus::Escalated);
    assert_eq!(stored.department, desk.id_of("PW"));
    assert_eq!(stored.metadata[ESCALATION_EXHAUSTED_KEY], serde_json::json!(true));
}

#[tokio::test]
async fn test_notify_fires_once_then_escalate_follows() {
    let policy = EscalationPolicy::new(vec![
        EscalationRule::notify_after(Delay::from_days(3)),
        EscalationRule::escalate_after(Delay::from_days(7)),
    ]);
    let desk = Desk::new(policy).await;
    let complaint = desk
        .file(&Identity::citizen(UserId::new_random()), "PD")
        .await;
    let start = complaint.created_at;

    let report = desk.evaluator.run(start.after(Delay::from_days(4))).await.unwrap();
    assert_eq!(report.notified, 1);
    let noted = desk.lifecycle.get(complaint.id).await.unwrap();
    assert_eq!(noted.status, ComplaintStatus::New);
    assert_eq!(noted.metadata[NOTIFICATIONS_KEY].as_array().unwrap().len(), 1);
    // A notification is not a transition.
    assert_eq!(noted.last_transition_at, start);

    let report = desk.evaluator.run(start.after(Delay::from_days(5))).await.unwrap();
    assert_eq!(report.applied(), 0);

    let report = desk.evaluator.run(start.after(Delay::from_days(8))).await.unwrap();
    assert_eq!(report.escalated, 1);
    let escalated = desk.lifecycle.get(complaint.id).await.unwrap();
    assert_eq!(escalated.department, desk.id_of("HQ"));
    assert!(escalated.applied_rules.is_empty());
}

#[tokio::test]
async fn test_rule_targeting_a_department() {
    let policy = EscalationPolicy::new(vec![EscalationRule {
        after: Delay::from_hours(12),
        action: RuleAction::Escalate,
        target: RuleTarget::Department(code("PW")),
    }]);
    let desk = Desk::new(policy).await;
    let complaint = desk
        .file(&Identity::citizen(UserId::new_random()), "PD")
        .await;

    desk.evaluator
        .run(complaint.created_at.after(Delay::from_days(1)))
        .await
        .unwrap();
    let stored = desk.lifecycle.get(complaint.id).await.unwrap();
    assert_eq!(stored.department, desk.id_of("PW"));
}

#[tokio::test]
async fn test_resolved_and_policyless_complaints_are_left_alone() {
    let desk = Desk::new(escalate_after_week()).await;
    let admin = Identity::admin(UserId::new_random());
    let resolved = desk
        .file(&Identity::citizen(UserId::new_random()), "PD")
        .await;
    for status in [
        ComplaintStatus::Triaged,
        ComplaintStatus::InProgress,
        ComplaintStatus::Resolved,
    ] {
        desk.lifecycle
            .transition(resolved.id, status, &admin)
            .await
            .unwrap();
    }

    desk.directory.set_policy(&code("HQ"), None).await.unwrap();
    let orphan = desk
        .file(&Identity::citizen(UserId::new_random()), "PD")
        .await;

    let report = desk
        .evaluator
        .run(Timestamp::now().after(Delay::from_days(30)))
        .await
        .unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.applied(), 0);
    assert_eq!(
        desk.lifecycle.get(orphan.id).await.unwrap().status,
        ComplaintStatus::New
    );
}

#[tokio::test]
async fn test_policy_changes_apply_without_reload() {
    let desk = Desk::new(EscalationPolicy::new(vec![EscalationRule::escalate_after(
        Delay::from_days(30),
    )]))
    .await;
    let complaint = desk
        .file(&Identity::citizen(UserId::new_random()), "PD")
        .await;
    let now = complaint.created_at.after(Delay::from_days(2));

    assert_eq!(desk.evaluator.run(now).await.unwrap().applied(), 0);

    desk.directory
        .set_policy(
            &code("HQ"),
            Some(EscalationPolicy::new(vec![EscalationRule::escalate_after(
                Delay::from_days(1),
            )])),
        )
        .await
        .unwrap();
    assert_eq!(desk.evaluator.run(now).await.unwrap().escalated, 1);
}

#[tokio::test]
async fn test_concurrent_creation_issues_unique_references() {
    let desk = Arc::new(Desk::new(escalate_after_week()).await);

    let mut handles = Vec::new();
    for _ in 0..32 {
        let desk = desk.clone();
        handles.push(tokio::spawn(async move {
            desk.lifecycle
                .create(
                    &Identity::citizen(UserId::new_random()),
                    NewComplaint::new("Noise", "Loudspeakers past midnight", code("PD")),
                )
                .await
        }));
    }

    let mut references = HashSet::new();
    for handle in handles {
        let complaint = handle.await.unwrap().unwrap();
        assert!(references.insert(complaint.reference));
    }
    assert_eq!(references.len(), 32);
}

#[tokio::test]
async fn test_single_run_applies_notification_and_escalation_together() {
    let policy = EscalationPolicy::new(vec![
        EscalationRule::notify_after(Delay::from_days(1)),
        EscalationRule::escalate_after(Delay::from_days(2)),
    ]);
    let desk = Desk::new(policy).await;
    let complaint = desk
        .file(&Identity::citizen(UserId::new_random()), "PD")
        .await;
    let now = complaint.created_at.after(Delay::from_days(3));

    let first = desk.evaluator.run(now).await.unwrap();
    assert_eq!(first.notified, 1);
    assert_eq!(first.escalated, 1);
    assert_eq!(first.applied(), 2);

    let escalated = desk.lifecycle.get(complaint.id).await.unwrap();
    assert_eq!(escalated.status, ComplaintStatus::Escalated);
    assert_eq!(escalated.department, desk.id_of("HQ"));
    assert_eq!(escalated.metadata[NOTIFICATIONS_KEY].as_array().unwrap().len(), 1);
    // Both rules landed in one write.
    assert_eq!(escalated.version, 1);

    let second = desk.evaluator.run(now).await.unwrap();
    assert_eq!(second.applied(), 0);
    assert_eq!(desk.lifecycle.get(complaint.id).await.unwrap(), escalated);
}

#[tokio::test]
async fn test_exhaustion_marker_clears_when_the_complaint_moves_on() {
    let desk = Desk::new(escalate_after_week()).await;
    let admin = Identity::admin(UserId::new_random());
    let complaint = desk
        .file(&Identity::citizen(UserId::new_random()), "PW")
        .await;

    let report = desk
        .evaluator
        .run(complaint.created_at.after(Delay::from_days(8)))
        .await
        .unwrap();
    assert_eq!(report.exhausted, 1);
    assert_eq!(desk.lifecycle.statistics(&admin).await.unwrap().escalation_exhausted, 1);

    let moved = desk
        .lifecycle
        .reassign(complaint.id, &code("PD"), &admin)
        .await
        .unwrap();
    assert!(!moved.escalation_exhausted());
    assert!(!moved.metadata.contains_key(ESCALATION_EXHAUSTED_KEY));

    let officer = Identity::department(UserId::new_random(), code("PD"));
    desk.lifecycle
        .transition(complaint.id, ComplaintStatus::InProgress, &officer)
        .await
        .unwrap();
    let outcome = desk.lifecycle.escalate(complaint.id, &admin).await.unwrap();
    assert!(!outcome.exhausted);
    assert_eq!(outcome.complaint.department, desk.id_of("HQ"));
    assert!(!outcome.complaint.escalation_exhausted());
    assert_eq!(desk.lifecycle.statistics(&admin).await.unwrap().escalation_exhausted, 0);
}
