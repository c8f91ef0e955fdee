//! Core domain for the grievance desk.
//!
//! This crate contains every domain concept of complaint intake: the
//! department hierarchy, the complaint lifecycle and its permission matrix,
//! reference allocation, and the time-based escalation engine. Persistence
//! crates implement the store traits defined here; they never add domain
//! rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate performs no I/O of its
//! own. The in-memory store in [`store`] is the reference implementation of the
//! ports and the backing for durable adapters.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`ComplaintId`, `DepartmentCode`, `ReferenceNumber`, etc.) |
//! | [`types`] | Shared value types (`Timestamp`, `Delay`, `Role`, `Identity`) |
//! | [`errors`] | Top-level error and retry-policy types |
//! | [`department`] | Department records and escalation policies |
//! | [`complaint`] | The complaint record, its status and history |
//! | [`store`] | Store ports, snapshot format and the in-memory store |
//! | [`registry`] | The department hierarchy and its persistent service |
//! | [`reference`] | `COMP-` reference allocation |
//! | [`permissions`] | State machine and permission matrix |
//! | [`lifecycle`] | Complaint creation and mutation |
//! | [`escalation`] | Policy evaluation and the escalation sweep |
//! | [`routing`] | Category-to-department routing |
//! | [`analytics`] | Complaint statistics |

pub mod analytics;
pub mod complaint;
pub mod department;
pub mod errors;
pub mod escalation;
pub mod identifiers;
pub mod lifecycle;
pub mod permissions;
pub mod reference;
pub mod registry;
pub mod routing;
pub mod store;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use analytics::ComplaintStatistics;
pub use complaint::{
    Complaint, ComplaintFilter, ComplaintStatus, NewComplaint, TransitionRecord,
    ESCALATION_EXHAUSTED_KEY, NOTIFICATIONS_KEY,
};
pub use department::{
    Department, EscalationPolicy, EscalationRule, NewDepartment, RuleAction, RuleTarget,
};
pub use errors::{GrievanceError, RetryPolicy};
pub use escalation::{EscalationEvaluator, EvaluationFailure, EvaluationReport};
pub use identifiers::{ComplaintId, DepartmentCode, DepartmentId, ReferenceNumber, UserId};
pub use lifecycle::{ComplaintLifecycle, EscalationOutcome};
pub use permissions::Actor;
pub use reference::{ReferenceAllocator, ReferenceGenerator};
pub use registry::{DepartmentDirectory, DepartmentRegistry};
pub use routing::CategoryRoutes;
pub use store::{ComplaintStore, DepartmentStore, InMemoryStore, StoreError, StoreSnapshot};
pub use types::{Delay, Identity, Role, Timestamp};
