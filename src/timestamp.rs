//! Commit timestamp allocation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::key::validate_timestamp;
use crate::{Error, Result};

pub const DEFAULT_WAIT_INCREMENT: Duration = Duration::from_millis(1);

/// Issues strictly increasing commit timestamps for one store.
///
/// Every branch of a store shares one provider, so the returned values
/// totally order all commits. The provider waits under its lock until the
/// clock has moved past both the previous value and the branch's `now`.
pub struct CommitTimestampProvider {
    clock: Arc<dyn Clock>,
    last_served: Mutex<i64>,
    wait_increment: Duration,
}

impl CommitTimestampProvider {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_wait_increment(clock, DEFAULT_WAIT_INCREMENT)
    }

    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    pub fn with_wait_increment(clock: Arc<dyn Clock>, wait_increment: Duration) -> Self {
        Self {
            clock,
            last_served: Mutex::new(i64::MIN),
            wait_increment,
        }
    }

    /// Largest value served so far, `None` before the first call.
    pub fn last_served(&self) -> Option<i64> {
        let last = *self.last_served.lock().ok()?;
        (last != i64::MIN).then_some(last)
    }

    /// Next timestamp, strictly greater than `now_on_branch` and every value
    /// this provider returned before.
    pub fn next_commit_timestamp(&self, now_on_branch: i64) -> Result<i64> {
        validate_timestamp(now_on_branch)?;
        let mut last = self
            .last_served
            .lock()
            .map_err(|_| Error::Closed("timestamp provider lock poisoned"))?;
        let floor = now_on_branch.max(*last);
        if floor == i64::MAX {
            return Err(Error::precondition("commit timestamps exhausted"));
        }
        let mut now = self.clock.now_millis();
        while now <= floor {
            self.clock.sleep(self.wait_increment);
            now = self.clock.now_millis();
        }
        *last = now;
        Ok(now)
    }
}

impl std::fmt::Debug for CommitTimestampProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitTimestampProvider")
            .field("last_served", &self.last_served())
            .field("wait_increment", &self.wait_increment)
            .finish()
    }
}
