//! Top-level error and retry-policy types for the grievance domain.
//!
//! [`GrievanceError`] is the single typed result returned by every core
//! operation. The surrounding service layer maps variants onto transport
//! responses; nothing in this crate swallows them.
//!
//! [`RetryPolicy`] is a cross-cutting concern: callers consult
//! [`GrievanceError::retry_policy`] to decide whether re-issuing the whole
//! request can succeed.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;
use crate::{ComplaintId, ComplaintStatus, DepartmentCode};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// ## Rules
///
/// - `Retryable` errors: reference allocation exhausted, complaint version
///   conflicts that outlasted the internal re-validation budget, store backend
///   failures.
/// - `NonRetryable` errors: every deterministic rejection (unknown entity,
///   forbidden actor, invalid transition, registry integrity violations).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means retry
        /// immediately or apply the caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried; the same input yields the same rejection.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Domain errors
// ---------------------------------------------------------------------------

/// Errors produced by the department registry, complaint lifecycle and
/// escalation evaluator.
#[derive(Debug, Error)]
pub enum GrievanceError {
    /// The requested entity does not exist.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Kind of entity (`"complaint"`, `"department"`).
        entity: &'static str,
        /// The key that was looked up.
        key: String,
    },

    /// The actor lacks permission for the requested operation.
    #[error("Forbidden: {reason}")]
    Forbidden {
        /// Human-readable description of the failed check.
        reason: String,
    },

    /// The requested status change is not an edge of the lifecycle state machine.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Status the complaint is currently in.
        from: ComplaintStatus,
        /// Status that was requested.
        to: ComplaintStatus,
    },

    /// A department with this code is already registered.
    #[error("Department code already registered: {0}")]
    DuplicateCode(DepartmentCode),

    /// The named parent department is not registered.
    #[error("Unknown parent department: {0}")]
    UnknownParent(DepartmentCode),

    /// Attaching the department to the named parent would create a cycle.
    #[error("Cycle detected: {code} cannot descend from {parent}")]
    CycleDetected {
        /// Department being registered or re-parented.
        code: DepartmentCode,
        /// Requested parent.
        parent: DepartmentCode,
    },

    /// The department code does not resolve to a registered department.
    #[error("Unknown department: {0}")]
    UnknownDepartment(DepartmentCode),

    /// Every reference-number candidate collided with an existing reservation.
    ///
    /// Fatal for the request; the caller should retry the whole creation.
    #[error("Reference allocation exhausted after {attempts} attempts")]
    AllocationExhausted {
        /// Number of candidates tried.
        attempts: u32,
    },

    /// Concurrent writers kept changing the complaint while this operation
    /// re-validated against the latest version.
    #[error("Complaint {id} is being modified concurrently")]
    Conflict {
        /// The contended complaint.
        id: ComplaintId,
    },

    /// The persistence store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl GrievanceError {
    /// Builds a [`GrievanceError::NotFound`] for a complaint id.
    pub fn complaint_not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity: "complaint",
            key: id.to_string(),
        }
    }

    /// Builds a [`GrievanceError::Forbidden`] with the given reason.
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    /// Whether the caller may retry the request that produced this error.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::AllocationExhausted { .. } | Self::Conflict { .. } => {
                RetryPolicy::Retryable { after: None }
            }
            Self::Store(StoreError::Backend(_)) => RetryPolicy::Retryable {
                after: Some(Duration::from_millis(250)),
            },
            _ => RetryPolicy::NonRetryable,
        }
    }
}
