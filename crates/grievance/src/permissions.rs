//! The complaint state machine and its permission matrix.
//!
//! Every transition edge and the actors allowed to take it live in
//! [`TRANSITIONS`]. The functions here are pure: they look only at the actor
//! and the complaint, so the whole matrix can be tested without a store.

use crate::{Complaint, ComplaintStatus, DepartmentId, GrievanceError, UserId};

use crate::ComplaintStatus::{Closed, Escalated, InProgress, New, Resolved, Triaged};

/// Who is asking, after the identity provider's assertion has been resolved
/// against the department registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// A member of the public; may acknowledge complaints they filed.
    Citizen {
        user: UserId,
    },
    /// A department officer. `department` is `None` when the asserted
    /// affiliation is missing or not a registered department.
    Officer {
        user: UserId,
        department: Option<DepartmentId>,
    },
    /// May take every edge of the state machine.
    Admin {
        user: UserId,
    },
    /// The escalation evaluator acting on its own authority.
    EscalationEvaluator,
}

impl Actor {
    /// The human behind the actor; `None` for the evaluator.
    pub fn user(&self) -> Option<UserId> {
        match self {
            Self::Citizen { user } | Self::Officer { user, .. } | Self::Admin { user } => {
                Some(*user)
            }
            Self::EscalationEvaluator => None,
        }
    }

    /// Whether the actor holds the admin role.
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin { .. })
    }

    /// Short label stored in transition history.
    pub fn describe(&self) -> String {
        match self {
            Self::Citizen { user } => format!("citizen:{user}"),
            Self::Officer { user, .. } => format!("department:{user}"),
            Self::Admin { user } => format!("admin:{user}"),
            Self::EscalationEvaluator => "escalation-evaluator".to_string(),
        }
    }
}

/// A class of actor named in the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Performer {
    /// An officer of the department the complaint is currently assigned to.
    AssignedDepartment,
    /// Any admin.
    Admin,
    /// The user who filed the complaint.
    Filer,
    /// The escalation evaluator.
    EscalationEvaluator,
}

/// One edge of the state machine.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    /// Status the edge leaves.
    pub from: ComplaintStatus,
    /// Status the edge enters.
    pub to: ComplaintStatus,
    /// Who may take the edge; any one qualifying is enough.
    pub performers: &'static [Performer],
}

const WORKERS: &[Performer] = &[Performer::AssignedDepartment, Performer::Admin];
const ACKNOWLEDGERS: &[Performer] = &[
    Performer::AssignedDepartment,
    Performer::Admin,
    Performer::Filer,
];
const ESCALATORS: &[Performer] = &[Performer::EscalationEvaluator, Performer::Admin];
const ADMIN_ONLY: &[Performer] = &[Performer::Admin];

/// The complete transition table.
pub const TRANSITIONS: &[Edge] = &[
    Edge { from: New, to: Triaged, performers: WORKERS },
    Edge { from: Triaged, to: InProgress, performers: WORKERS },
    Edge { from: InProgress, to: Resolved, performers: WORKERS },
    Edge { from: Resolved, to: Closed, performers: ACKNOWLEDGERS },
    Edge { from: New, to: Escalated, performers: ESCALATORS },
    Edge { from: Triaged, to: Escalated, performers: ESCALATORS },
    Edge { from: InProgress, to: Escalated, performers: ESCALATORS },
    Edge { from: Escalated, to: InProgress, performers: WORKERS },
    Edge { from: Escalated, to: Closed, performers: ADMIN_ONLY },
];

/// The edge `from -> to`, if the state machine has one.
pub fn edge(from: ComplaintStatus, to: ComplaintStatus) -> Option<&'static Edge> {
    TRANSITIONS.iter().find(|e| e.from == from && e.to == to)
}

/// Whether `status` has an edge into [`ComplaintStatus::Escalated`].
pub fn can_escalate_from(status: ComplaintStatus) -> bool {
    edge(status, Escalated).is_some()
}

fn qualifies(actor: &Actor, complaint: &Complaint, performer: Performer) -> bool {
    match performer {
        Performer::AssignedDepartment => matches!(
            actor,
            Actor::Officer { department: Some(d), .. } if *d == complaint.department
        ),
        Performer::Admin => actor.is_admin(),
        Performer::Filer => actor.user() == Some(complaint.filer),
        Performer::EscalationEvaluator => matches!(actor, Actor::EscalationEvaluator),
    }
}

fn may_take(actor: &Actor, complaint: &Complaint, edge: &Edge) -> bool {
    edge.performers
        .iter()
        .any(|&performer| qualifies(actor, complaint, performer))
}

/// Statuses `actor` may move `complaint` to from its current status.
pub fn permitted_transitions(actor: &Actor, complaint: &Complaint) -> Vec<ComplaintStatus> {
    TRANSITIONS
        .iter()
        .filter(|e| e.from == complaint.status && may_take(actor, complaint, e))
        .map(|e| e.to)
        .collect()
}

/// Checks that `actor` may move `complaint` to `target`.
///
/// Precedence:
/// 1. a target no edge leads to is [`GrievanceError::InvalidTransition`];
/// 2. an actor who could not take *any* edge into the target for this
///    complaint is [`GrievanceError::Forbidden`];
/// 3. a missing `current -> target` edge is `InvalidTransition`;
/// 4. an edge whose performers exclude the actor is `Forbidden`.
pub fn authorize(
    actor: &Actor,
    complaint: &Complaint,
    target: ComplaintStatus,
) -> Result<(), GrievanceError> {
    let invalid = || GrievanceError::InvalidTransition {
        from: complaint.status,
        to: target,
    };
    let forbidden = || {
        GrievanceError::forbidden(format!(
            "{} may not move complaint {} to {target}",
            actor.describe(),
            complaint.reference
        ))
    };

    let mut incoming = TRANSITIONS.iter().filter(|e| e.to == target).peekable();
    if incoming.peek().is_none() {
        return Err(invalid());
    }
    if !incoming.any(|e| may_take(actor, complaint, e)) {
        return Err(forbidden());
    }

    match edge(complaint.status, target) {
        None => Err(invalid()),
        Some(e) if !may_take(actor, complaint, e) => Err(forbidden()),
        Some(_) => Ok(()),
    }
}
