// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A bounded, blocking, multi-producer multi-consumer FIFO.
//!
//! Every item is delivered to exactly one consumer.  When the queue is
//! full, producers stall until a consumer makes room; that stall is the
//! backpressure that keeps a fast producer from eating all of memory.
//!
//! Shutdown is a flag, not a poison value.  After [`shutdown`] is
//! called, pushes are refused, consumers drain whatever is still
//! queued, and then every pop (blocked or not) returns
//! [`PopError::Shutdown`].  A consumer loop is therefore just:
//!
//! ```
//! use mandelqueue::{BoundedBlockingQueue, PopError};
//!
//! let queue = BoundedBlockingQueue::new(4);
//! queue.push(1).unwrap();
//! queue.shutdown();
//! loop {
//!     match queue.pop() {
//!         Ok(item) => assert_eq!(item, 1),
//!         Err(PopError::Shutdown) => break,
//!         Err(e) => panic!("{}", e),
//!     }
//! }
//! ```
//!
//! [`shutdown`]: BoundedBlockingQueue::shutdown

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::time::Duration;

use crate::error::{PopError, PushError};
use crate::wait::Deadline;

struct State<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// A capacity-limited FIFO shared by any number of producer and
/// consumer threads.  A capacity of zero means unbounded.
pub struct BoundedBlockingQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedBlockingQueue<T> {
    /// Create an empty queue holding at most `capacity` items.  Zero
    /// means the queue never fills.
    pub fn new(capacity: usize) -> Self {
        BoundedBlockingQueue {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Create an empty queue that never blocks a producer.
    pub fn unbounded() -> Self {
        BoundedBlockingQueue::new(0)
    }

    fn is_full(&self, state: &State<T>) -> bool {
        self.capacity != 0 && state.items.len() >= self.capacity
    }

    // Caller holds the lock and has checked for room.
    fn enqueue(&self, mut state: MutexGuard<State<T>>, item: T) {
        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();
    }

    fn dequeue(&self, mut state: MutexGuard<State<T>>) -> Option<T> {
        let item = state.items.pop_front();
        drop(state);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Append `item`, blocking while the queue is full.  Fails, handing
    /// the item back, if the queue is shut down before there is room.
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.state.lock();
        while self.is_full(&state) && !state.shutdown {
            self.not_full.wait(&mut state);
        }
        if state.shutdown {
            return Err(PushError::Shutdown(item));
        }
        self.enqueue(state, item);
        Ok(())
    }

    /// As [`push`](BoundedBlockingQueue::push), but gives up once
    /// `timeout` has elapsed.  The deadline is fixed when the call
    /// starts, so spurious wakeups do not extend it.
    pub fn push_timeout(&self, item: T, timeout: Duration) -> Result<(), PushError<T>> {
        let deadline = Deadline::after(timeout);
        let mut state = self.state.lock();
        while self.is_full(&state) && !state.shutdown {
            if deadline.has_passed() {
                return Err(PushError::Timeout(item));
            }
            deadline.wait(&self.not_full, &mut state);
        }
        if state.shutdown {
            return Err(PushError::Shutdown(item));
        }
        self.enqueue(state, item);
        Ok(())
    }

    /// Append `item` only if there is room right now.
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        let state = self.state.lock();
        if state.shutdown {
            return Err(PushError::Shutdown(item));
        }
        if self.is_full(&state) {
            return Err(PushError::Full(item));
        }
        self.enqueue(state, item);
        Ok(())
    }

    /// Remove the head item, blocking while the queue is empty.  Items
    /// queued before shutdown are still handed out; once they are gone,
    /// returns [`PopError::Shutdown`].
    pub fn pop(&self) -> Result<T, PopError> {
        let mut state = self.state.lock();
        while state.items.is_empty() && !state.shutdown {
            self.not_empty.wait(&mut state);
        }
        self.dequeue(state).ok_or(PopError::Shutdown)
    }

    /// As [`pop`](BoundedBlockingQueue::pop), but gives up once
    /// `timeout` has elapsed.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<T, PopError> {
        let deadline = Deadline::after(timeout);
        let mut state = self.state.lock();
        while state.items.is_empty() && !state.shutdown {
            if deadline.has_passed() {
                return Err(PopError::Timeout);
            }
            deadline.wait(&self.not_empty, &mut state);
        }
        self.dequeue(state).ok_or(PopError::Shutdown)
    }

    /// Remove the head item only if one is available right now.
    pub fn try_pop(&self) -> Result<T, PopError> {
        let state = self.state.lock();
        if state.items.is_empty() {
            return Err(if state.shutdown {
                PopError::Shutdown
            } else {
                PopError::Empty
            });
        }
        self.dequeue(state).ok_or(PopError::Empty)
    }

    /// Refuse further pushes and release every blocked caller.  Calling
    /// this more than once has no further effect.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        tracing::debug!(remaining = state.items.len(), "work queue shut down");
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// True once [`shutdown`](BoundedBlockingQueue::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// True if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// The configured capacity; zero for an unbounded queue.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
