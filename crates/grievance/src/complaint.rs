//! The complaint entity and its status.
//!
//! Status changes, reassignment and escalation all go through
//! [`crate::ComplaintLifecycle`]; this module only defines the record and the
//! bookkeeping every mutation performs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ComplaintId, DepartmentCode, DepartmentId, ReferenceNumber, Timestamp, UserId};

/// Metadata key set when an escalation found no ancestor to move to.
pub const ESCALATION_EXHAUSTED_KEY: &str = "escalation_exhausted";

/// Metadata key holding notification requests raised by `notify` rules.
pub const NOTIFICATIONS_KEY: &str = "notifications";

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a complaint.
///
/// `resolved` and `closed` are terminal for the escalation evaluator; only
/// `closed` is terminal for the state machine as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplaintStatus {
    /// Filed, not yet looked at.
    New,
    /// Accepted by the assigned department.
    Triaged,
    /// Being worked on.
    InProgress,
    /// Work finished; awaiting the filer's acknowledgement.
    Resolved,
    /// Moved up the hierarchy, by an actor or by policy.
    Escalated,
    /// Done. No edges leave this status.
    Closed,
}

impl ComplaintStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [ComplaintStatus; 6] = [
        Self::New,
        Self::Triaged,
        Self::InProgress,
        Self::Resolved,
        Self::Escalated,
        Self::Closed,
    ];

    /// Wire name, as used in serialised records and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Triaged => "triaged",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Escalated => "escalated",
            Self::Closed => "closed",
        }
    }

    /// Whether the escalation evaluator ignores complaints in this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }
}

impl std::fmt::Display for ComplaintStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ComplaintStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| format!("unknown complaint status '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A filed grievance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Complaint {
    pub id: ComplaintId,
    /// Human-facing `COMP-NNNNNN` number, unique across all complaints.
    pub reference: ReferenceNumber,
    /// User who filed the complaint.
    pub filer: UserId,
    pub title: String,
    pub description: String,
    /// Speech-to-text output for voice intake.
    pub transcript: Option<String>,
    /// Language of the original submission.
    pub language: Option<String>,
    /// Description translated into the working language.
    pub translated_text: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    /// Intake channel (`"web"`, `"voice"`, ...).
    pub source: String,
    pub created_at: Timestamp,

    pub status: ComplaintStatus,
    /// Department currently responsible.
    pub department: DepartmentId,
    /// Free-form attributes, plus the evaluator's markers under
    /// [`ESCALATION_EXHAUSTED_KEY`] and [`NOTIFICATIONS_KEY`].
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// When status or department last changed. Escalation thresholds count
    /// from here.
    pub last_transition_at: Timestamp,
    /// Optimistic concurrency counter; bumped by every stored mutation.
    pub version: u64,
    /// Indexes of policy rules already applied since the last status or
    /// department change.
    #[serde(default)]
    pub applied_rules: Vec<usize>,
    #[serde(default)]
    pub history: Vec<TransitionRecord>,
}

impl Complaint {
    /// Whether the escalation evaluator should look at this complaint.
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Whether the last escalation found no department to move to.
    pub fn escalation_exhausted(&self) -> bool {
        self.metadata
            .get(ESCALATION_EXHAUSTED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Moves the complaint to `status` and `department` at `at`, recording the
    /// change in the history.
    ///
    /// The escalation window restarts whenever status or department actually
    /// changes. A move to another department clears the exhaustion marker.
    pub(crate) fn apply_change(
        &mut self,
        status: ComplaintStatus,
        department: DepartmentId,
        actor: String,
        at: Timestamp,
    ) {
        if status != self.status || department != self.department {
            self.applied_rules.clear();
        }
        if department != self.department {
            self.metadata.remove(ESCALATION_EXHAUSTED_KEY);
        }
        self.history.push(TransitionRecord {
            from: self.status,
            to: status,
            department_before: self.department,
            department_after: department,
            actor,
            at,
        });
        self.status = status;
        self.department = department;
        self.last_transition_at = at;
    }

    pub(crate) fn mark_escalation_exhausted(&mut self) {
        self.metadata
            .insert(ESCALATION_EXHAUSTED_KEY.to_string(), Value::Bool(true));
    }

    pub(crate) fn push_notification(&mut self, notification: Value) {
        let entry = self
            .metadata
            .entry(NOTIFICATIONS_KEY.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry {
            Value::Array(items) => items.push(notification),
            other => *other = Value::Array(vec![notification]),
        }
    }
}

/// One entry of a complaint's append-only history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: ComplaintStatus,
    pub to: ComplaintStatus,
    /// Assignee before the change.
    pub department_before: DepartmentId,
    /// Assignee after the change; differs from `department_before` on
    /// escalation to another department and on reassignment.
    pub department_after: DepartmentId,
    /// Who performed the change, e.g. `"admin:<uuid>"` or `"escalation-evaluator"`.
    pub actor: String,
    pub at: Timestamp,
}

/// Input to [`crate::ComplaintLifecycle::create`].
///
/// Classification output (category, transcript, translation) is accepted as
/// already present; nothing here derives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewComplaint {
    pub title: String,
    pub description: String,
    /// Code of the department the complaint is filed against.
    pub department: DepartmentCode,
    pub transcript: Option<String>,
    pub language: Option<String>,
    pub translated_text: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    /// Intake channel; `"web"` when absent.
    pub source: Option<String>,
    /// Initial metadata; empty when absent.
    pub metadata: Option<Map<String, Value>>,
}

impl NewComplaint {
    /// A complaint with only the mandatory fields set.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        department: DepartmentCode,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            department,
            transcript: None,
            language: None,
            translated_text: None,
            category: None,
            subcategory: None,
            source: None,
            metadata: None,
        }
    }
}

/// Query filter for [`crate::store::ComplaintStore::list_complaints`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComplaintFilter {
    pub status: Option<ComplaintStatus>,
    /// Current assignee.
    pub department: Option<DepartmentId>,
    pub filer: Option<UserId>,
}

impl ComplaintFilter {
    /// Whether `complaint` passes every criterion that is set.
    pub fn matches(&self, complaint: &Complaint) -> bool {
        self.status.is_none_or(|s| s == complaint.status)
            && self.department.is_none_or(|d| d == complaint.department)
            && self.filer.is_none_or(|f| f == complaint.filer)
    }
}
