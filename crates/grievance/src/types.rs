//! Shared value types for the grievance domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! meaningful values with invariants (e.g. delays are whole seconds, a
//! department-role identity may carry an affiliation) and participate in
//! domain computations.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{DepartmentCode, UserId};

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Parses an RFC 3339 string (e.g. `"2025-01-31T09:00:00Z"`).
    pub fn parse_rfc3339(value: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|dt| Self(dt.with_timezone(&Utc)))
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// Returns this timestamp shifted forward by `delay`.
    pub fn after(self, delay: Delay) -> Self {
        Self(self.0 + delay.as_time_delta())
    }

    /// Time elapsed from `earlier` to `self`, clamped at zero.
    ///
    /// A clock that runs backwards between writes never produces a negative
    /// elapsed time.
    pub fn elapsed_since(self, earlier: Timestamp) -> Delay {
        let secs = (self.0 - earlier.0).num_seconds();
        Delay::from_secs(u64::try_from(secs).unwrap_or(0))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------

/// A non-negative span of time with whole-second resolution.
///
/// Used for escalation rule thresholds and elapsed-time computations.
/// Serialised as a plain integer number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Delay(u64);

impl Delay {
    /// Creates a [`Delay`] of `secs` seconds.
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Creates a [`Delay`] of `hours` hours.
    pub fn from_hours(hours: u64) -> Self {
        Self(hours.saturating_mul(3_600))
    }

    /// Creates a [`Delay`] of `days` days.
    pub fn from_days(days: u64) -> Self {
        Self(days.saturating_mul(86_400))
    }

    /// Returns the delay in whole seconds.
    pub fn as_secs(self) -> u64 {
        self.0
    }

    fn as_time_delta(self) -> TimeDelta {
        // Capped well inside chrono's representable range.
        const MAX_SECS: i64 = 1_000 * 365 * 86_400;
        TimeDelta::seconds(i64::try_from(self.0).unwrap_or(MAX_SECS).min(MAX_SECS))
    }
}

impl std::fmt::Display for Delay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.0;
        if secs != 0 && secs % 86_400 == 0 {
            write!(f, "{}d", secs / 86_400)
        } else if secs != 0 && secs % 3_600 == 0 {
            write!(f, "{}h", secs / 3_600)
        } else {
            write!(f, "{}s", secs)
        }
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Role asserted for a caller by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Member of the public; files complaints and acknowledges resolutions.
    Citizen,
    /// Department officer; works complaints assigned to their own department.
    Department,
    /// Administrator; may act on any complaint.
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Citizen => write!(f, "citizen"),
            Self::Department => write!(f, "department"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "citizen" => Ok(Self::Citizen),
            "department" => Ok(Self::Department),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// An authenticated caller, as supplied per request by the identity provider.
///
/// The core treats this as trusted input; it never authenticates anyone itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// The caller's user id.
    pub user_id: UserId,
    /// The caller's role.
    pub role: Role,
    /// Department the caller belongs to. Only meaningful for [`Role::Department`].
    pub department: Option<DepartmentCode>,
}

impl Identity {
    /// Creates a citizen identity.
    pub fn citizen(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Citizen,
            department: None,
        }
    }

    /// Creates a department-officer identity affiliated with `department`.
    pub fn department(user_id: UserId, department: DepartmentCode) -> Self {
        Self {
            user_id,
            role: Role::Department,
            department: Some(department),
        }
    }

    /// Creates an administrator identity.
    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
            department: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_since_clamps_negative_spans() {
        let t0 = Timestamp::parse_rfc3339("2025-03-01T10:00:00Z").unwrap();
        let t1 = t0.after(Delay::from_hours(2));
        assert_eq!(t1.elapsed_since(t0), Delay::from_secs(7_200));
        assert_eq!(t0.elapsed_since(t1), Delay::from_secs(0));
    }

    #[test]
    fn test_delay_display_uses_largest_whole_unit() {
        assert_eq!(Delay::from_days(7).to_string(), "7d");
        assert_eq!(Delay::from_hours(5).to_string(), "5h");
        assert_eq!(Delay::from_secs(90).to_string(), "90s");
        assert_eq!(Delay::from_secs(0).to_string(), "0s");
    }

    #[test]
    fn test_role_parses_case_insensitively() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" department ".parse::<Role>().unwrap(), Role::Department);
        assert!("mayor".parse::<Role>().is_err());
    }
}
