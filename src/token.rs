//! Modification Tokens
//!
//! Every write stamps its record with a fresh [`ModificationToken`]. The
//! token acts as a fencing value: a deferred eviction only acts when the
//! token it was scheduled with is still the one stored in the index.
//!
//! Tokens are nanosecond wall-clock timestamps. Within one process the
//! [`TokenClock`] forces them to be strictly increasing, so two writes in the
//! same nanosecond (or across a backwards clock step) still get distinct
//! tokens. Across processes distinctness holds with overwhelming probability.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A per-write fencing token.
///
/// The eviction protocol only compares tokens for equality. The timestamp
/// inside is used by the index reaper to estimate a record's age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModificationToken(u64);

impl ModificationToken {
    /// Wraps a raw nanosecond timestamp.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Returns the raw nanosecond timestamp.
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// How long ago this token was issued, according to the wall clock.
    ///
    /// Returns zero for tokens from the future (clock skew between writers).
    pub fn age(&self) -> Duration {
        let now = unix_nanos();
        Duration::from_nanos(now.saturating_sub(self.0))
    }
}

impl fmt::Display for ModificationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ModificationToken {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Issues strictly increasing modification tokens.
#[derive(Debug, Default)]
pub struct TokenClock {
    last: AtomicU64,
}

impl TokenClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a token greater than every token this clock issued before.
    pub fn next(&self) -> ModificationToken {
        let now = unix_nanos();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self.last.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return ModificationToken(candidate),
                Err(actual) => last = actual,
            }
        }
    }
}

pub(crate) fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
