// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The two contracts the rest of the program codes against.  Workers
//! only need a [`WorkQueue`]; pipeline stages only need a
//! [`BroadcastChannel`].

use std::time::Duration;

use crate::broadcast::{BroadcastRingQueue, SubscriberId};
use crate::error::{BroadcastError, PopError, PushError};
use crate::work_queue::BoundedBlockingQueue;

/// Competing consumption: each item goes to exactly one consumer.
pub trait WorkQueue<T>: Sync {
    /// Append an item, blocking while there is no room.
    fn push(&self, item: T) -> Result<(), PushError<T>>;

    /// Take the next item, blocking while there is none.
    /// `Err(PopError::Shutdown)` tells the consumer to stop.
    fn pop(&self) -> Result<T, PopError>;

    /// Stop accepting work and release every waiting consumer once the
    /// remaining items are gone.
    fn shutdown(&self);
}

impl<T: Send> WorkQueue<T> for BoundedBlockingQueue<T> {
    fn push(&self, item: T) -> Result<(), PushError<T>> {
        BoundedBlockingQueue::push(self, item)
    }

    fn pop(&self) -> Result<T, PopError> {
        BoundedBlockingQueue::pop(self)
    }

    fn shutdown(&self) {
        BoundedBlockingQueue::shutdown(self)
    }
}

/// Fan-out: each item goes to every subscriber on a fixed roster.
pub trait BroadcastChannel<T>: Sync {
    /// Publish an item to every subscriber.
    fn push(&self, item: T) -> Result<(), BroadcastError>;

    /// Read the next item for one subscriber.  `Ok(None)` means the
    /// channel has closed and this subscriber should exit.
    fn pop(&self, id: SubscriberId) -> Result<Option<T>, BroadcastError>;

    /// Close the channel and wait, up to `time_limit`, for every
    /// subscriber to notice.
    fn close(&self, time_limit: Duration) -> Result<(), BroadcastError>;
}

impl<T: Clone + Send> BroadcastChannel<T> for BroadcastRingQueue<T> {
    fn push(&self, item: T) -> Result<(), BroadcastError> {
        BroadcastRingQueue::push(self, item)
    }

    fn pop(&self, id: SubscriberId) -> Result<Option<T>, BroadcastError> {
        BroadcastRingQueue::pop(self, id)
    }

    fn close(&self, time_limit: Duration) -> Result<(), BroadcastError> {
        BroadcastRingQueue::close(self, time_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain<Q: WorkQueue<u32>>(queue: &Q) -> Vec<u32> {
        let mut seen = vec![];
        while let Ok(item) = queue.pop() {
            seen.push(item);
        }
        seen
    }

    fn relay<C: BroadcastChannel<&'static str>>(channel: &C, id: SubscriberId) -> Vec<&'static str> {
        let mut seen = vec![];
        while let Ok(Some(item)) = channel.pop(id) {
            seen.push(item);
        }
        seen
    }

    #[test]
    fn work_queue_through_the_trait() {
        let q = BoundedBlockingQueue::new(8);
        for i in 0..5 {
            WorkQueue::push(&q, i).unwrap();
        }
        WorkQueue::shutdown(&q);
        assert_eq!(drain(&q), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn broadcast_through_the_trait() {
        let q = BroadcastRingQueue::new(4, vec!["a", "b"]).unwrap();
        BroadcastChannel::push(&q, "x").unwrap();
        BroadcastChannel::push(&q, "y").unwrap();
        // Nobody has popped since the close, so it times out.  The
        // ring is still closing afterwards.
        assert!(BroadcastChannel::close(&q, Duration::from_millis(0)).is_err());
        assert_eq!(relay(&q, 0), vec!["x", "y"]);
        assert_eq!(relay(&q, 1), vec!["x", "y"]);
        assert!(q.close(Duration::from_millis(0)).is_ok());
    }
}
