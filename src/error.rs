// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Failure types for the queues, the worker pool, and the renderer.
//!
//! The queues distinguish three kinds of outcome.  `Timeout` is
//! recoverable; the caller decides whether to retry.  `Shutdown` (and
//! `Ok(None)` from a broadcast pop) is not really an error at all: it is
//! how a consumer loop learns that it should stop.  `QueueFull` and
//! `TimeoutOnClose` are fatal for the queue that raised them, and carry
//! the names of the subscribers that stalled.

use failure::Fail;
use std::fmt;

/// Returned by a push that did not take place.  Every variant hands
/// the rejected item back, so nothing is lost when a push fails.
pub enum PushError<T> {
    /// A non-blocking push found the queue at capacity.
    Full(T),
    /// A timed push ran out its deadline while the queue was full.
    Timeout(T),
    /// The queue has been shut down and accepts no more work.
    Shutdown(T),
}

impl<T> PushError<T> {
    /// Recover the item that could not be pushed.
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(item) | PushError::Timeout(item) | PushError::Shutdown(item) => item,
        }
    }

    /// True if the push failed because its deadline expired.
    pub fn is_timeout(&self) -> bool {
        match self {
            PushError::Timeout(_) => true,
            _ => false,
        }
    }
}

// Payload omitted; `T` need not be `Debug`.
impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PushError::Full(_) => f.write_str("Full(..)"),
            PushError::Timeout(_) => f.write_str("Timeout(..)"),
            PushError::Shutdown(_) => f.write_str("Shutdown(..)"),
        }
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PushError::Full(_) => f.write_str("queue is full"),
            PushError::Timeout(_) => f.write_str("timed out waiting for space in the queue"),
            PushError::Shutdown(_) => f.write_str("queue has been shut down"),
        }
    }
}

impl<T: Send + Sync + 'static> Fail for PushError<T> {}

/// Returned by a pop that produced no item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Fail)]
pub enum PopError {
    /// A non-blocking pop found the queue empty.
    #[fail(display = "queue is empty")]
    Empty,
    /// A timed pop ran out its deadline while the queue was empty.
    #[fail(display = "timed out waiting for an item")]
    Timeout,
    /// The queue was shut down and has been drained.  This is the
    /// signal for a consumer loop to exit.
    #[fail(display = "queue has been shut down")]
    Shutdown,
}

/// Joins subscriber names the way the overrun and close diagnostics
/// print them: each quoted, separated by commas.
fn quoted(names: &[String]) -> String {
    names
        .iter()
        .map(|name| format!("\"{}\"", name))
        .collect::<Vec<String>>()
        .join(",")
}

/// Failures reported by the broadcast ring.
#[derive(Debug, Clone, PartialEq, Eq, Fail)]
pub enum BroadcastError {
    /// The writer was about to overwrite a slot that some subscribers
    /// have not read yet.  Names every subscriber holding the slot.
    #[fail(display = "Queue full! Blocking tasks: {}", _0)]
    QueueFull(BlockingTasks),
    /// `close` ran out of time before every subscriber noticed it.
    /// Names every subscriber that is still alive.
    #[fail(display = "Timeout on Close! Blocking tasks: {}", _0)]
    TimeoutOnClose(BlockingTasks),
    /// A push arrived after `close` had begun.
    #[fail(display = "Cannot push to a closed queue")]
    QueueClosed,
    /// A timed pop ran out its deadline with nothing to read.
    #[fail(display = "timed out waiting for an item")]
    Timeout,
    /// The subscriber id does not name anybody on the roster.
    #[fail(display = "Invalid subscriber id: {} (roster has {})", id, count)]
    InvalidSubscriber {
        /// The id that was passed in.
        id: usize,
        /// The number of subscribers on the roster.
        count: usize,
    },
    /// The roster was empty, or too large to fit the pending bitmask.
    #[fail(
        display = "Must provide between 1 and {} subscriber names, got {}",
        max, given
    )]
    WrongSubscriberCount {
        /// Names supplied.
        given: usize,
        /// The largest roster supported.
        max: usize,
    },
    /// Two subscribers on the roster share a name.
    #[fail(display = "Subscriber name \"{}\" appears more than once", _0)]
    DuplicateSubscriber(String),
    /// A ring needs at least two slots.
    #[fail(display = "Capacity must be greater than 1, got {}", _0)]
    CapacityTooSmall(usize),
}

impl BroadcastError {
    /// True for the conditions that mean a subscriber is stuck: the
    /// queue that raised one of these should not be used further.
    pub fn is_fatal(&self) -> bool {
        match self {
            BroadcastError::QueueFull(_) | BroadcastError::TimeoutOnClose(_) => true,
            _ => false,
        }
    }

    /// The names of the subscribers blamed for a fatal condition.
    pub fn blocking_tasks(&self) -> &[String] {
        match self {
            BroadcastError::QueueFull(tasks) | BroadcastError::TimeoutOnClose(tasks) => &tasks.0,
            _ => &[],
        }
    }
}

/// The subscribers named in a fatal broadcast diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockingTasks(pub Vec<String>);

impl fmt::Display for BlockingTasks {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&quoted(&self.0))
    }
}

/// Failures of the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Fail)]
pub enum PoolError {
    /// A pool needs at least one worker.
    #[fail(display = "a worker pool needs at least one thread")]
    NoThreads,
    /// A worker panicked while processing an item.
    #[fail(display = "a worker thread panicked")]
    WorkerPanicked,
}

/// Failures of the renderer.
#[derive(Debug, Fail)]
pub enum RenderError {
    /// The corners or size of the view do not describe a rectangle.
    #[fail(display = "bad plane: {}", _0)]
    BadPlane(String),
    /// A render setting is out of range.
    #[fail(display = "bad configuration: {}", _0)]
    BadConfig(String),
    /// The worker pool failed during a pass.
    #[fail(display = "worker pool failed: {}", _0)]
    Pool(#[cause] PoolError),
    /// Publishing a frame failed.
    #[fail(display = "frame broadcast failed: {}", _0)]
    Broadcast(#[cause] BroadcastError),
}

impl From<PoolError> for RenderError {
    fn from(err: PoolError) -> Self {
        RenderError::Pool(err)
    }
}

impl From<BroadcastError> for RenderError {
    fn from(err: BroadcastError) -> Self {
        RenderError::Broadcast(err)
    }
}
