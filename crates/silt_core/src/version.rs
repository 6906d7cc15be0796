//! Optimistic-lock version counter.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing version counter.
///
/// Bumped on every mutation and on compaction/split. Iterators opened in
/// fail-fast isolation capture the version at open time and treat any later
/// bump as end-of-stream, letting readers detect concurrent mutation without
/// blocking writers.
#[derive(Debug, Default)]
pub struct VersionController {
    version: AtomicU64,
}

impl VersionController {
    /// Creates a controller starting at version zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current version.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Bumps the version, invalidating fail-fast iterators.
    ///
    /// Returns the new version.
    pub fn bump(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        assert_eq!(VersionController::new().current(), 0);
    }

    #[test]
    fn bump_is_monotonic() {
        let vc = VersionController::new();
        assert_eq!(vc.bump(), 1);
        assert_eq!(vc.bump(), 2);
        assert_eq!(vc.current(), 2);
    }
}
