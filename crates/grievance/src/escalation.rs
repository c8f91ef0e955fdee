//! Time-based escalation.
//!
//! [`evaluate`] is the pure rule-selection step: given a complaint, the policy
//! that governs it and the current time, it picks the next rule to apply.
//! [`EscalationEvaluator::run`] sweeps every open complaint and, through the
//! lifecycle's compare-and-swap path, applies selected rules until none is
//! left, re-selecting against the fresh record whenever a concurrent writer
//! got in first. A second run at the same `now` therefore finds nothing to do.
//!
//! Each rule fires at most once per escalation window. A window is the span
//! during which a complaint keeps the same status and department; any
//! transition or reassignment opens a new one.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::lifecycle::ComplaintLifecycle;
use crate::permissions::{self, Actor};
use crate::{
    Complaint, ComplaintId, ComplaintStatus, EscalationPolicy, EscalationRule, GrievanceError,
    ReferenceNumber, RuleAction, Timestamp,
};

/// A rule selected for application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Position of the rule in its policy.
    pub rule_index: usize,
    /// Copy of the selected rule.
    pub rule: EscalationRule,
}

/// Selects the rule to apply to `complaint` at `now`, if any.
///
/// A rule is eligible when its threshold has elapsed since the last
/// transition, it has not fired in the current window, and its action is
/// possible from the current status. The first eligible rule in list order
/// wins.
pub fn evaluate(
    complaint: &Complaint,
    policy: &EscalationPolicy,
    now: Timestamp,
) -> Option<Decision> {
    if !complaint.is_open() {
        return None;
    }
    let elapsed = now.elapsed_since(complaint.last_transition_at);

    policy
        .rules()
        .iter()
        .enumerate()
        .find(|(index, rule)| {
            elapsed >= rule.after
                && !complaint.applied_rules.contains(index)
                && match rule.action {
                    RuleAction::Escalate => permissions::can_escalate_from(complaint.status),
                    RuleAction::Notify => true,
                }
        })
        .map(|(rule_index, rule)| Decision {
            rule_index,
            rule: rule.clone(),
        })
}

/// What happened to one complaint during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Applied {
    notifications: usize,
    /// `Some(exhausted)` once the complaint has been escalated.
    escalation: Option<bool>,
}

/// A complaint the evaluator could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationFailure {
    pub complaint: ComplaintId,
    pub reference: ReferenceNumber,
    /// Rendered [`GrievanceError`].
    pub error: String,
}

/// Summary of one [`EscalationEvaluator::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvaluationReport {
    /// Open complaints looked at.
    pub examined: usize,
    /// Complaints moved to `escalated`, including exhausted ones.
    pub escalated: usize,
    /// Escalations that found no department to move to.
    pub exhausted: usize,
    /// Notifications raised by `notify` rules.
    pub notified: usize,
    /// Complaints left untouched because of an error.
    pub failures: Vec<EvaluationFailure>,
}

impl EvaluationReport {
    /// Rule applications made by the run.
    pub fn applied(&self) -> usize {
        self.escalated + self.notified
    }
}

/// Applies escalation policies to open complaints.
pub struct EscalationEvaluator {
    lifecycle: Arc<ComplaintLifecycle>,
    running: Mutex<()>,
}

impl EscalationEvaluator {
    /// An evaluator acting through `lifecycle`.
    pub fn new(lifecycle: Arc<ComplaintLifecycle>) -> Self {
        Self {
            lifecycle,
            running: Mutex::new(()),
        }
    }

    /// Evaluates every open complaint against its governing policy at `now`.
    ///
    /// Runs are serialised; a second call waits for the first to finish.
    /// Running twice with the same `now` changes nothing the second time.
    /// Failures on individual complaints are collected in the report and do
    /// not stop the sweep.
    #[instrument(skip(self, now), fields(now = %now))]
    pub async fn run(&self, now: Timestamp) -> Result<EvaluationReport, GrievanceError> {
        let _running = self.running.lock().await;
        let open = self.lifecycle.store().list_open().await?;
        let mut report = EvaluationReport::default();

        for complaint in open {
            report.examined += 1;
            match self.apply(complaint.id, now).await {
                Ok(applied) => {
                    report.notified += applied.notifications;
                    if let Some(exhausted) = applied.escalation {
                        report.escalated += 1;
                        if exhausted {
                            report.exhausted += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        complaint = %complaint.id,
                        reference = %complaint.reference,
                        error = %e,
                        "Escalation evaluation failed"
                    );
                    report.failures.push(EvaluationFailure {
                        complaint: complaint.id,
                        reference: complaint.reference,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            examined = report.examined,
            escalated = report.escalated,
            exhausted = report.exhausted,
            notified = report.notified,
            failed = report.failures.len(),
            "Escalation run complete"
        );
        Ok(report)
    }

    /// Applies every rule due on the complaint at `now`, in list order.
    async fn apply(&self, id: ComplaintId, now: Timestamp) -> Result<Applied, GrievanceError> {
        let lifecycle = self.lifecycle.as_ref();
        let directory = lifecycle.directory();
        let mut applied = Applied::default();

        lifecycle
            .mutate(id, |complaint| {
                applied = Applied::default();
                // Ends: a notify rule fires once per window, and an escalated
                // complaint has no edge back into `escalated`.
                loop {
                    let department = directory.get_by_id(complaint.department).ok_or_else(|| {
                        GrievanceError::NotFound {
                            entity: "department",
                            key: complaint.department.to_string(),
                        }
                    })?;
                    // Re-resolved each pass: an escalation changes the governing policy.
                    let Some(policy) = directory.resolve_policy(&department.code)? else {
                        break;
                    };
                    let Some(decision) = evaluate(complaint, &policy, now) else {
                        break;
                    };

                    match decision.rule.action {
                        RuleAction::Escalate => {
                            let actor = Actor::EscalationEvaluator;
                            permissions::authorize(&actor, complaint, ComplaintStatus::Escalated)?;
                            let exhausted = lifecycle.apply_escalation(
                                complaint,
                                &actor,
                                &decision.rule.target,
                                now,
                            )?;
                            applied.escalation = Some(exhausted);
                        }
                        RuleAction::Notify => {
                            let notification = json!({
                                "rule": decision.rule_index,
                                "after_secs": decision.rule.after.as_secs(),
                                "target": decision.rule.target.to_string(),
                                "department": department.code,
                                "status": complaint.status,
                                "at": now,
                            });
                            complaint.push_notification(notification);
                            complaint.applied_rules.push(decision.rule_index);
                            info!(
                                complaint = %complaint.id,
                                department = %department.code,
                                rule = decision.rule_index,
                                "Escalation notification raised"
                            );
                            applied.notifications += 1;
                        }
                    }
                }
                Ok(applied != Applied::default())
            })
            .await?;

        Ok(applied)
    }
}
