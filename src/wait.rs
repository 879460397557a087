// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Deadline arithmetic shared by the timed queue operations.
//!
//! A timeout too large to add to `Instant::now()` has no deadline at
//! all; waits on it are untimed.

use parking_lot::{Condvar, MutexGuard};
use std::time::{Duration, Instant};

/// A point in time a timed wait gives up at, or `None` for never.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
    pub(crate) fn after(timeout: Duration) -> Self {
        Deadline(Instant::now().checked_add(timeout))
    }

    pub(crate) fn has_passed(self) -> bool {
        match self.0 {
            Some(at) => Instant::now() >= at,
            None => false,
        }
    }

    /// Block on `condvar` until notified or the deadline passes.
    /// Callers re-check their predicate afterwards.
    pub(crate) fn wait<T>(self, condvar: &Condvar, guard: &mut MutexGuard<T>) {
        match self.0 {
            Some(at) => {
                condvar.wait_until(guard, at);
            }
            None => condvar.wait(guard),
        }
    }
}
