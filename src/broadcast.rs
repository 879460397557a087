// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A fixed-roster broadcast ring.
//!
//! One writer pushes; every subscriber on the roster reads every item,
//! in push order, exactly once.  Each subscriber owns a private read
//! cursor, and each slot in the ring carries a bitmask of the
//! subscribers that have not read it yet.  A slot may be overwritten
//! only when its mask is empty.
//!
//! This is set up for a SMALL number of subscribers, named once, at
//! construction.  The mask is a single `u64`, so the roster holds at
//! most 64 names, and nobody joins late.
//!
//! By default, overwriting a slot that is still pending is fatal: the
//! ring is expected to be sized so that it never happens unless a
//! subscriber is stuck, and the error names the subscribers to blame.
//! [`OverrunPolicy::Block`] trades that for ordinary backpressure.
//!
//! Shutting down is a handshake.  [`close`] marks the ring closing and
//! wakes everybody; each subscriber drains what is left for it, then
//! receives `Ok(None)` and detaches.  `close` waits, up to a time
//! limit, for every subscriber to detach.
//!
//! [`close`]: BroadcastRingQueue::close

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::HashSet;
use std::time::Duration;

use crate::error::{BlockingTasks, BroadcastError};
use crate::wait::Deadline;

/// The largest roster a ring supports.
pub const MAX_SUBSCRIBERS: usize = 64;

/// Dense index of a subscriber, in roster order.
pub type SubscriberId = usize;

/// What `push` does when the slot it needs has not been read by
/// everybody yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrunPolicy {
    /// Fail with [`BroadcastError::QueueFull`], naming the subscribers
    /// that have not read the slot.
    Fail,
    /// Wait for the slot to be retired.  If the ring starts closing in
    /// the meantime, fail with [`BroadcastError::QueueClosed`].
    Block,
}

impl Default for OverrunPolicy {
    fn default() -> Self {
        OverrunPolicy::Fail
    }
}

struct Slot<T> {
    data: Option<T>,
    pending: u64,
}

struct Subscriber {
    name: String,
    cursor: usize,
    alive: bool,
}

struct Ring<T> {
    slots: Box<[Slot<T>]>,
    subscribers: Box<[Subscriber]>,
    head: usize,
    closing: bool,
}

impl<T> Ring<T> {
    fn pending_names(&self, mask: u64) -> Vec<String> {
        self.subscribers
            .iter()
            .enumerate()
            .filter(|&(id, _)| mask & (1u64 << id) != 0)
            .map(|(_, sub)| sub.name.clone())
            .collect()
    }

    fn live_names(&self) -> Vec<String> {
        self.subscribers
            .iter()
            .filter(|sub| sub.alive)
            .map(|sub| sub.name.clone())
            .collect()
    }

    fn all_detached(&self) -> bool {
        self.subscribers.iter().all(|sub| !sub.alive)
    }

    fn ready(&self, id: SubscriberId) -> bool {
        let sub = &self.subscribers[id];
        self.slots[sub.cursor].pending & (1u64 << id) != 0
    }
}

/// A capacity-limited ring shared by one writer and a fixed roster of
/// named subscribers, each of which sees every item.
pub struct BroadcastRingQueue<T> {
    ring: Mutex<Ring<T>>,
    // Subscribers wait here for data or for close.
    wakeup: Condvar,
    // `close` waits here for subscribers to detach.
    sub_ended: Condvar,
    // A blocking writer waits here for its slot to be retired.
    retired: Condvar,
    full_mask: u64,
    policy: OverrunPolicy,
}

impl<T: Clone> BroadcastRingQueue<T> {
    /// Create a ring of `capacity` slots for the given roster, failing
    /// on overrun.
    pub fn new<I, S>(capacity: usize, names: I) -> Result<Self, BroadcastError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        BroadcastRingQueue::with_policy(capacity, names, OverrunPolicy::Fail)
    }

    /// Create a ring with an explicit overrun policy.  The capacity
    /// must be at least two; the roster must hold between one and
    /// [`MAX_SUBSCRIBERS`] distinct names.
    pub fn with_policy<I, S>(
        capacity: usize,
        names: I,
        policy: OverrunPolicy,
    ) -> Result<Self, BroadcastError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if capacity < 2 {
            return Err(BroadcastError::CapacityTooSmall(capacity));
        }

        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() || names.len() > MAX_SUBSCRIBERS {
            return Err(BroadcastError::WrongSubscriberCount {
                given: names.len(),
                max: MAX_SUBSCRIBERS,
            });
        }
        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(BroadcastError::DuplicateSubscriber(name.clone()));
            }
        }

        let full_mask = if names.len() == MAX_SUBSCRIBERS {
            !0
        } else {
            (1u64 << names.len()) - 1
        };
        let subscribers: Box<[Subscriber]> = names
            .into_iter()
            .map(|name| Subscriber {
                name,
                cursor: 0,
                alive: true,
            })
            .collect();
        let slots: Box<[Slot<T>]> = (0..capacity)
            .map(|_| Slot {
                data: None,
                pending: 0,
            })
            .collect();

        Ok(BroadcastRingQueue {
            ring: Mutex::new(Ring {
                slots,
                subscribers,
                head: 0,
                closing: false,
            }),
            wakeup: Condvar::new(),
            sub_ended: Condvar::new(),
            retired: Condvar::new(),
            full_mask,
            policy,
        })
    }

    /// Publish `item` to every subscriber.
    ///
    /// Under [`OverrunPolicy::Fail`], fails with `QueueFull` if the slot
    /// at the write cursor is still pending for anybody; the ring is
    /// left untouched.  Always fails with `QueueClosed` once `close`
    /// has begun.
    pub fn push(&self, item: T) -> Result<(), BroadcastError> {
        let mut ring = self.ring.lock();
        if ring.closing {
            return Err(BroadcastError::QueueClosed);
        }

        let mut head = ring.head;
        while ring.slots[head].pending != 0 {
            match self.policy {
                OverrunPolicy::Fail => {
                    let blocking = ring.pending_names(ring.slots[head].pending);
                    tracing::warn!(slot = head, ?blocking, "broadcast ring overrun");
                    return Err(BroadcastError::QueueFull(BlockingTasks(blocking)));
                }
                OverrunPolicy::Block => {
                    self.retired.wait(&mut ring);
                    if ring.closing {
                        return Err(BroadcastError::QueueClosed);
                    }
                    // Another writer may have taken the slot meanwhile.
                    head = ring.head;
                }
            }
        }

        let capacity = ring.slots.len();
        let slot = &mut ring.slots[head];
        slot.data = Some(item);
        slot.pending = self.full_mask;
        ring.head = (head + 1) % capacity;
        drop(ring);
        self.wakeup.notify_all();
        Ok(())
    }

    fn check_id(&self, ring: &Ring<T>, id: SubscriberId) -> Result<(), BroadcastError> {
        if id >= ring.subscribers.len() {
            return Err(BroadcastError::InvalidSubscriber {
                id,
                count: ring.subscribers.len(),
            });
        }
        Ok(())
    }

    // Called with the predicate satisfied: either data is ready for
    // `id`, or the ring is closing and nothing is left for it.
    fn take(&self, mut ring: MutexGuard<Ring<T>>, id: SubscriberId) -> Option<T> {
        if !ring.ready(id) {
            let sub = &mut ring.subscribers[id];
            if sub.alive {
                sub.alive = false;
                tracing::debug!(subscriber = %sub.name, "subscriber detached");
            }
            drop(ring);
            self.sub_ended.notify_all();
            return None;
        }

        let capacity = ring.slots.len();
        let cursor = ring.subscribers[id].cursor;
        ring.subscribers[id].cursor = (cursor + 1) % capacity;
        let slot = &mut ring.slots[cursor];
        slot.pending &= !(1u64 << id);
        if slot.pending == 0 {
            // Last reader out takes the payload instead of cloning it.
            let item = slot.data.take();
            drop(ring);
            self.retired.notify_all();
            item
        } else {
            slot.data.clone()
        }
    }

    /// Read the next item for subscriber `id`, blocking until one is
    /// published or the ring starts closing.
    ///
    /// Returns `Ok(None)` once the ring is closing and nothing is left
    /// for this subscriber; from then on the subscriber is detached and
    /// every later call returns `Ok(None)` at once.
    pub fn pop(&self, id: SubscriberId) -> Result<Option<T>, BroadcastError> {
        let mut ring = self.ring.lock();
        self.check_id(&ring, id)?;
        if !ring.subscribers[id].alive {
            return Ok(None);
        }
        while !ring.ready(id) && !ring.closing {
            self.wakeup.wait(&mut ring);
        }
        Ok(self.take(ring, id))
    }

    /// As [`pop`](BroadcastRingQueue::pop), but gives up with
    /// `Timeout` once `timeout` has elapsed.  A timed-out subscriber
    /// stays attached.
    pub fn pop_timeout(
        &self,
        id: SubscriberId,
        timeout: Duration,
    ) -> Result<Option<T>, BroadcastError> {
        let deadline = Deadline::after(timeout);
        let mut ring = self.ring.lock();
        self.check_id(&ring, id)?;
        if !ring.subscribers[id].alive {
            return Ok(None);
        }
        while !ring.ready(id) && !ring.closing {
            if deadline.has_passed() {
                return Err(BroadcastError::Timeout);
            }
            deadline.wait(&self.wakeup, &mut ring);
        }
        Ok(self.take(ring, id))
    }

    /// Begin closing, wake every subscriber, and wait up to
    /// `time_limit` for all of them to detach.  On timeout, the error
    /// names every subscriber still attached.
    pub fn close(&self, time_limit: Duration) -> Result<(), BroadcastError> {
        let deadline = Deadline::after(time_limit);
        let mut ring = self.ring.lock();
        ring.closing = true;
        self.wakeup.notify_all();
        self.retired.notify_all();

        while !ring.all_detached() {
            if deadline.has_passed() {
                let blocking = ring.live_names();
                tracing::warn!(?blocking, "timed out closing broadcast ring");
                return Err(BroadcastError::TimeoutOnClose(BlockingTasks(blocking)));
            }
            deadline.wait(&self.sub_ended, &mut ring);
        }
        tracing::debug!("broadcast ring closed");
        Ok(())
    }
}

impl<T> BroadcastRingQueue<T> {
    /// Number of slots in the ring.
    pub fn capacity(&self) -> usize {
        self.ring.lock().slots.len()
    }

    /// Number of subscribers on the roster.
    pub fn subscriber_count(&self) -> usize {
        self.ring.lock().subscribers.len()
    }

    /// The roster, in id order.
    pub fn subscriber_names(&self) -> Vec<String> {
        self.ring
            .lock()
            .subscribers
            .iter()
            .map(|sub| sub.name.clone())
            .collect()
    }

    /// Look up the id of a subscriber by name.
    pub fn subscriber_id(&self, name: &str) -> Option<SubscriberId> {
        self.ring
            .lock()
            .subscribers
            .iter()
            .position(|sub| sub.name == name)
    }

    /// True if subscriber `id` exists and has not yet detached.
    pub fn is_alive(&self, id: SubscriberId) -> bool {
        self.ring
            .lock()
            .subscribers
            .get(id)
            .map_or(false, |sub| sub.alive)
    }

    /// True once `close` has been called.
    pub fn is_closing(&self) -> bool {
        self.ring.lock().closing
    }

    /// The overrun policy fixed at construction.
    pub fn policy(&self) -> OverrunPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn ring(capacity: usize, names: &[&str]) -> BroadcastRingQueue<char> {
        BroadcastRingQueue::new(capacity, names.iter().cloned()).unwrap()
    }

    #[test]
    fn rejects_degenerate_configurations() {
        let err = BroadcastRingQueue::<u8>::new(1, vec!["a"]).err();
        assert_eq!(err, Some(BroadcastError::CapacityTooSmall(1)));

        let err = BroadcastRingQueue::<u8>::new(4, Vec::<String>::new()).err();
        assert_eq!(
            err,
            Some(BroadcastError::WrongSubscriberCount { given: 0, max: 64 })
        );

        let names: Vec<String> = (0..65).map(|i| format!("s{}", i)).collect();
        assert!(BroadcastRingQueue::<u8>::new(4, names).is_err());

        let err = BroadcastRingQueue::<u8>::new(4, vec!["a", "b", "a"]).err();
        assert_eq!(err, Some(BroadcastError::DuplicateSubscriber("a".to_string())));
    }

    #[test]
    fn full_roster_of_sixty_four() {
        let names: Vec<String> = (0..64).map(|i| format!("s{}", i)).collect();
        let q = BroadcastRingQueue::new(2, names).unwrap();
        q.push(9u8).unwrap();
        for id in 0..64 {
            assert_eq!(q.pop(id), Ok(Some(9)));
        }
        q.push(10).unwrap();
        q.push(11).unwrap();
    }

    #[test]
    fn every_subscriber_sees_every_item() {
        let q = ring(4, &["a", "b"]);
        q.push('x').unwrap();
        q.push('y').unwrap();
        for id in 0..2 {
            assert_eq!(q.pop(id), Ok(Some('x')));
            assert_eq!(q.pop(id), Ok(Some('y')));
        }
    }

    #[test]
    fn overrun_names_only_the_stalled_subscriber() {
        let q = ring(4, &["a", "b"]);
        for c in "wxyz".chars() {
            q.push(c).unwrap();
            assert_eq!(q.pop(0), Ok(Some(c)));
        }
        let err = q.push('!').unwrap_err();
        assert_eq!(err.to_string(), "Queue full! Blocking tasks: \"b\"");
        assert_eq!(err.blocking_tasks(), &["b".to_string()]);

        // The failed push left the ring as it was.
        assert_eq!(q.pop(1), Ok(Some('w')));
        q.push('!').unwrap();
    }

    #[test]
    fn invalid_subscriber_id() {
        let q = ring(4, &["a"]);
        assert_eq!(
            q.pop(1),
            Err(BroadcastError::InvalidSubscriber { id: 1, count: 1 })
        );
    }

    #[test]
    fn roster_lookups() {
        let q = ring(3, &["render", "writer"]);
        assert_eq!(q.subscriber_names(), vec!["render", "writer"]);
        assert_eq!(q.subscriber_id("writer"), Some(1));
        assert_eq!(q.subscriber_id("nobody"), None);
        assert_eq!(q.subscriber_count(), 2);
        assert_eq!(q.capacity(), 3);
        assert_eq!(q.policy(), OverrunPolicy::Fail);
    }

    #[test]
    fn close_drains_then_detaches() {
        let q = Arc::new(ring(4, &["a"]));
        q.push('x').unwrap();
        let closer = {
            let q = q.clone();
            thread::spawn(move || q.close(Duration::from_secs(5)))
        };
        while !q.is_closing() {
            thread::yield_now();
        }
        assert_eq!(q.push('y'), Err(BroadcastError::QueueClosed));
        assert_eq!(q.pop(0), Ok(Some('x')));
        assert!(q.is_alive(0));
        assert_eq!(q.pop(0), Ok(None));
        assert!(!q.is_alive(0));
        assert_eq!(closer.join().unwrap(), Ok(()));
        assert_eq!(q.pop(0), Ok(None));
    }

    #[test]
    fn close_wakes_blocked_subscribers() {
        let q = Arc::new(ring(4, &["a", "b"]));
        let readers: Vec<_> = (0..2)
            .map(|id| {
                let q = q.clone();
                thread::spawn(move || q.pop(id))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        q.close(Duration::from_secs(5)).unwrap();
        for reader in readers {
            assert_eq!(reader.join().unwrap(), Ok(None));
        }
    }

    #[test]
    fn close_timeout_names_the_absent_subscriber() {
        let q = ring(4, &["a", "b"]);
        let err = q.close(Duration::from_millis(0)).unwrap_err();
        assert_eq!(err.to_string(), "Timeout on Close! Blocking tasks: \"a\",\"b\"");
        assert!(err.is_fatal());

        assert_eq!(q.pop(0), Ok(None));
        let err = q.close(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.blocking_tasks(), &["b".to_string()]);
    }

    #[test]
    fn pop_timeout_leaves_subscriber_attached() {
        let q = ring(4, &["a"]);
        let started = Instant::now();
        assert_eq!(
            q.pop_timeout(0, Duration::from_millis(30)),
            Err(BroadcastError::Timeout)
        );
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(q.is_alive(0));
        q.push('z').unwrap();
        assert_eq!(q.pop_timeout(0, Duration::from_millis(30)), Ok(Some('z')));
    }

    #[test]
    fn blocking_policy_waits_for_retirement() {
        let q = Arc::new(
            BroadcastRingQueue::with_policy(2, vec!["slow"], OverrunPolicy::Block).unwrap(),
        );
        q.push(1).unwrap();
        q.push(2).unwrap();
        let writer = {
            let q = q.clone();
            thread::spawn(move || q.push(3))
        };
        thread::sleep(Duration::from_millis(30));
        assert_eq!(q.pop(0), Ok(Some(1)));
        assert_eq!(writer.join().unwrap(), Ok(()));
        assert_eq!(q.pop(0), Ok(Some(2)));
        assert_eq!(q.pop(0), Ok(Some(3)));
    }

    #[test]
    fn blocked_writer_released_by_close() {
        let q = Arc::new(
            BroadcastRingQueue::with_policy(2, vec!["stuck"], OverrunPolicy::Block).unwrap(),
        );
        q.push(1).unwrap();
        q.push(2).unwrap();
        let writer = {
            let q = q.clone();
            thread::spawn(move || q.push(3))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(q.close(Duration::from_millis(10)).is_err());
        assert_eq!(writer.join().unwrap(), Err(BroadcastError::QueueClosed));
    }

    #[test]
    fn huge_pop_timeout_does_not_overflow() {
        let q = ring(4, &["a"]);
        q.push('q').unwrap();
        assert_eq!(q.pop_timeout(0, Duration::from_secs(u64::MAX)), Ok(Some('q')));
    }

    #[test]
    fn huge_close_limit_still_wakes_subscribers() {
        let q = Arc::new(ring(4, &["a", "b"]));
        let readers: Vec<_> = (0..2)
            .map(|id| {
                let q = q.clone();
                thread::spawn(move || q.pop(id))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        q.close(Duration::from_secs(u64::MAX)).unwrap();
        assert!(q.is_closing());
        for reader in readers {
            assert_eq!(reader.join().unwrap(), Ok(None));
        }
    }
}
