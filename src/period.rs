//! Half-open validity intervals over commit timestamps.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Upper bound marker for periods that are still valid.
pub const OPEN_END: i64 = i64::MAX;

/// `[lower, upper)` interval of commit timestamps; `upper == OPEN_END` is "+∞".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    lower: i64,
    upper: i64,
}

impl Period {
    pub fn new(lower: i64, upper: i64) -> Result<Self> {
        if lower < 0 {
            return Err(Error::precondition(format!(
                "period lower bound must be >= 0, got {lower}"
            )));
        }
        if lower >= upper {
            return Err(Error::precondition(format!(
                "period lower bound {lower} must be below upper bound {upper}"
            )));
        }
        Ok(Self { lower, upper })
    }

    /// `[0, +∞)`.
    pub const fn eternal() -> Self {
        Self {
            lower: 0,
            upper: OPEN_END,
        }
    }

    /// `[lower, +∞)`.
    pub fn starting_at(lower: i64) -> Result<Self> {
        Self::new(lower, OPEN_END)
    }

    /// `[0, upper)`.
    pub fn up_to(upper: i64) -> Result<Self> {
        Self::new(0, upper)
    }

    /// The single-timestamp period `[t, t + 1)`.
    pub fn at(timestamp: i64) -> Result<Self> {
        Self::new(timestamp, timestamp.saturating_add(1))
    }

    pub fn lower(&self) -> i64 {
        self.lower
    }

    pub fn upper(&self) -> i64 {
        self.upper
    }

    pub fn is_open_ended(&self) -> bool {
        self.upper == OPEN_END
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.lower <= timestamp && timestamp < self.upper
    }

    pub fn overlaps(&self, other: &Period) -> bool {
        self.lower < other.upper && other.lower < self.upper
    }

    /// Intersection, or `None` if the periods are disjoint.
    pub fn intersect(&self, other: &Period) -> Option<Period> {
        let lower = self.lower.max(other.lower);
        let upper = self.upper.min(other.upper);
        if lower < upper {
            Some(Period { lower, upper })
        } else {
            None
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_open_ended() {
            write!(f, "[{}, +inf)", self.lower)
        } else {
            write!(f, "[{}, {})", self.lower, self.upper)
        }
    }
}
