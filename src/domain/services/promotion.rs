//! Promotion Planner
//!
//! Pure domain logic for choosing which replica replaces a failed primary.

/// Lag reported by one promotion candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateLag {
    /// Replica index in the current topology
    pub replica_id: usize,
    /// Replication lag reported by the engine, if any
    pub lag: Option<u64>,
}

/// Selects promotion candidates.
pub struct PromotionPlanner;

impl PromotionPlanner {
    /// Pick the candidate with the lowest replication lag.
    ///
    /// Candidates with a known lag always outrank those without one. Ties,
    /// including the case where no candidate reports lag, go to the lowest
    /// replica index so the choice is deterministic.
    pub fn select(candidates: &[CandidateLag]) -> Option<usize> {
        candidates
            .iter()
            .min_by_key(|c| (c.lag.is_none(), c.lag.unwrap_or(u64::MAX), c.replica_id))
            .map(|c| c.replica_id)
    }
}
