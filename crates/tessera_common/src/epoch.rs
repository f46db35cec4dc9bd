//! The build epoch counter.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A monotonically increasing counter identifying a successfully completed
/// build.
///
/// The epoch is incremented exactly once per committed build and provides a
/// total order over builds. Fingerprints and cache entries record the epoch
/// they were committed under, which lets the next load detect and discard
/// state that could only have been written by an aborted build.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Epoch(u64);

impl Epoch {
    /// The epoch of a cache that has never completed a build.
    pub const ZERO: Epoch = Epoch(0);

    /// Returns the epoch following this one.
    #[must_use]
    pub fn next(self) -> Epoch {
        Epoch(self.0 + 1)
    }

    /// Returns the raw counter value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
