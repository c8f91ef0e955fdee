//! Complaint reference-number allocation.
//!
//! References look like `COMP-482913`. Candidates are drawn from a
//! [`ReferenceGenerator`] and reserved through the store's atomic
//! insert-if-absent, so two concurrent allocations can never return the same
//! reference.

use std::sync::Arc;

use rand::Rng;
use tracing::{debug, warn};

use crate::store::ComplaintStore;
use crate::{GrievanceError, ReferenceNumber};

/// Prefix of every complaint reference.
pub const REFERENCE_PREFIX: &str = "COMP-";

/// Candidates tried before giving up with [`GrievanceError::AllocationExhausted`].
pub const MAX_ALLOCATION_ATTEMPTS: u32 = 5;

/// Source of reference-number candidates.
pub trait ReferenceGenerator: Send + Sync {
    /// Produces the next candidate. Candidates need not be unique.
    fn candidate(&self) -> ReferenceNumber;
}

/// Six random digits in `100000..=999999`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomDigits;

impl ReferenceGenerator for RandomDigits {
    fn candidate(&self) -> ReferenceNumber {
        let suffix: u32 = rand::thread_rng().gen_range(100_000..=999_999);
        format_reference(suffix)
    }
}

/// Formats `suffix` as a zero-padded six-digit reference.
pub fn format_reference(suffix: u32) -> ReferenceNumber {
    ReferenceNumber::from_formatted(format!("{REFERENCE_PREFIX}{suffix:06}"))
}

/// Allocates unique references against a [`ComplaintStore`].
#[derive(Clone)]
pub struct ReferenceAllocator {
    generator: Arc<dyn ReferenceGenerator>,
    max_attempts: u32,
}

impl ReferenceAllocator {
    pub fn new(generator: Arc<dyn ReferenceGenerator>) -> Self {
        Self {
            generator,
            max_attempts: MAX_ALLOCATION_ATTEMPTS,
        }
    }

    /// Allocator using [`RandomDigits`].
    pub fn random() -> Self {
        Self::new(Arc::new(RandomDigits))
    }

    /// Draws and reserves candidates until one is free.
    pub async fn allocate(
        &self,
        store: &dyn ComplaintStore,
    ) -> Result<ReferenceNumber, GrievanceError> {
        for attempt in 1..=self.max_attempts {
            let candidate = self.generator.candidate();
            if store.reserve_reference(&candidate).await? {
                debug!(reference = %candidate, attempt, "Reference reserved");
                return Ok(candidate);
            }
            debug!(reference = %candidate, attempt, "Reference collision");
        }
        warn!(attempts = self.max_attempts, "Reference allocation exhausted");
        Err(GrievanceError::AllocationExhausted {
            attempts: self.max_attempts,
        })
    }
}

impl Default for ReferenceAllocator {
    fn default() -> Self {
        Self::random()
    }
}
