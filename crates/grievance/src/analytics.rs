//! Complaint counts for the admin dashboard.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{Complaint, ComplaintStatus, DepartmentCode, DepartmentId};

/// Label used for complaints whose department is no longer registered.
pub const UNKNOWN_DEPARTMENT: &str = "unknown";

/// Totals across every stored complaint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComplaintStatistics {
    pub total: usize,
    /// Every status appears, with zero counts included.
    pub by_status: BTreeMap<ComplaintStatus, usize>,
    /// Keyed by department code.
    pub by_department: BTreeMap<String, usize>,
    /// Open complaints carrying the `escalation_exhausted` marker.
    pub escalation_exhausted: usize,
}

impl ComplaintStatistics {
    /// Aggregates `complaints`, naming departments through `code_of`.
    pub fn collect<F>(complaints: &[Complaint], code_of: F) -> Self
    where
        F: Fn(DepartmentId) -> Option<DepartmentCode>,
    {
        let mut stats = Self {
            by_status: ComplaintStatus::ALL.into_iter().map(|s| (s, 0)).collect(),
            ..Self::default()
        };

        for complaint in complaints {
            stats.total += 1;
            *stats.by_status.entry(complaint.status).or_default() += 1;
            let department = code_of(complaint.department)
                .map_or_else(|| UNKNOWN_DEPARTMENT.to_string(), |c| c.to_string());
            *stats.by_department.entry(department).or_default() += 1;
            if complaint.is_open() && complaint.escalation_exhausted() {
                stats.escalation_exhausted += 1;
            }
        }
        stats
    }
}
