//! Department nodes and their escalation policies.
//!
//! A department optionally names a parent by code; the registry in
//! [`crate::registry`] owns the hierarchy. A department's policy may be absent,
//! in which case the nearest ancestor's policy applies.

use serde::{Deserialize, Serialize};

use crate::{Delay, DepartmentCode, DepartmentId};

/// An organisational unit responsible for a subset of complaints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Department {
    /// Internal identity; complaints reference departments by this id.
    pub id: DepartmentId,
    /// Unique short code, the registry's lookup key.
    pub code: DepartmentCode,
    /// Display name.
    pub name: String,
    /// Parent department, if any. Roots have none.
    pub parent: Option<DepartmentCode>,
    /// The department's own escalation policy. `None` means inherit.
    pub policy: Option<EscalationPolicy>,
}

/// Input to [`crate::DepartmentDirectory::register`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDepartment {
    pub code: DepartmentCode,
    pub name: String,
    #[serde(default)]
    pub parent: Option<DepartmentCode>,
    #[serde(default)]
    pub policy: Option<EscalationPolicy>,
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Ordered list of escalation rules.
///
/// Rules are evaluated in list order; when several thresholds have elapsed the
/// earliest-listed rule not yet applied wins, so rules sharing the same `after`
/// resolve deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EscalationPolicy {
    rules: Vec<EscalationRule>,
}

impl EscalationPolicy {
    /// Creates a policy from rules in evaluation order.
    pub fn new(rules: Vec<EscalationRule>) -> Self {
        Self { rules }
    }

    /// The rules in evaluation order.
    pub fn rules(&self) -> &[EscalationRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// One `{after, action, target}` rule of an [`EscalationPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRule {
    /// Time that must elapse since the complaint's last transition.
    pub after: Delay,
    /// What to do once the threshold is reached.
    pub action: RuleAction,
    /// Where an `escalate` action sends the complaint.
    #[serde(default)]
    pub target: RuleTarget,
}

impl EscalationRule {
    /// An `escalate` rule targeting the parent department.
    pub fn escalate_after(after: Delay) -> Self {
        Self {
            after,
            action: RuleAction::Escalate,
            target: RuleTarget::Parent,
        }
    }

    /// A `notify` rule.
    pub fn notify_after(after: Delay) -> Self {
        Self {
            after,
            action: RuleAction::Notify,
            target: RuleTarget::Parent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    /// Move the complaint to `escalated` and reassign it.
    Escalate,
    /// Record a notification request; status and department are unchanged.
    Notify,
}

impl std::fmt::Display for RuleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Escalate => write!(f, "escalate"),
            Self::Notify => write!(f, "notify"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTarget {
    /// The nearest ancestor of the currently assigned department.
    #[default]
    Parent,
    /// A specific department, by code.
    Department(DepartmentCode),
}

impl std::fmt::Display for RuleTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parent => write!(f, "parent"),
            Self::Department(code) => write!(f, "{code}"),
        }
    }
}
