//! Read Balancer Service
//!
//! Pure domain logic for spreading reads over the healthy replica set.
//! This service has NO external dependencies - it's pure Rust.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-robin selector over a healthy replica set.
///
/// The cursor only ever increases; the pick is `cursor mod len(healthy)`
/// over the healthy ids in ascending order, so the rotation adapts as soon
/// as the set grows or shrinks and never lands on an id outside the set.
#[derive(Debug, Default)]
pub struct ReadBalancer {
    cursor: AtomicUsize,
}

impl ReadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the next replica id, or `None` if the set is empty.
    ///
    /// # Example
    /// ```
    /// use replica_router::domain::services::ReadBalancer;
    /// use std::collections::BTreeSet;
    ///
    /// let balancer = ReadBalancer::new();
    /// let healthy: BTreeSet<usize> = [0, 2].into_iter().collect();
    /// assert_eq!(balancer.next(&healthy), Some(0));
    /// assert_eq!(balancer.next(&healthy), Some(2));
    /// assert_eq!(balancer.next(&healthy), Some(0));
    /// ```
    pub fn next(&self, healthy: &BTreeSet<usize>) -> Option<usize> {
        if healthy.is_empty() {
            return None;
        }
        let ticket = self.cursor.fetch_add(1, Ordering::Relaxed);
        healthy.iter().nth(ticket % healthy.len()).copied()
    }

    /// Number of picks made so far.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }
}
