#![deny(missing_docs)]
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Blocking queues for parallel work, and a renderer built on them
//!
//! Two small synchronization primitives do the heavy lifting here.
//!
//! A [`BoundedBlockingQueue`] is a capacity-limited FIFO shared by any
//! number of producers and consumers.  Each item goes to exactly one
//! consumer.  A full queue stalls its producers, which is what keeps a
//! fast producer from running away with memory.  Shutdown is a flag:
//! consumers drain what is left and then get [`PopError::Shutdown`].
//!
//! A [`BroadcastRingQueue`] is a ring shared by one writer and a fixed,
//! named roster of subscribers, every one of which sees every item in
//! order.  Overwriting a slot somebody has not read yet is fatal by
//! default, and the error names who was too slow.  Closing is a
//! handshake with a time limit, and a timeout names whoever never
//! noticed.
//!
//! On top of those sit a scoped [`WorkerPool`], and a progressive
//! Mandelbrot [`Renderer`] that farms bins of pixels out to the pool
//! and publishes a [`Frame`] after every pass.

pub mod broadcast;
pub mod channel;
pub mod config;
pub mod error;
pub mod mandel;
pub mod planes;
pub mod pool;
pub mod render;
pub mod trace;
mod wait;
pub mod work_queue;

pub use crate::broadcast::{BroadcastRingQueue, OverrunPolicy, SubscriberId};
pub use crate::channel::{BroadcastChannel, WorkQueue};
pub use crate::config::RenderConfig;
pub use crate::error::{BroadcastError, PoolError, PopError, PushError, RenderError};
pub use crate::pool::WorkerPool;
pub use crate::render::{Frame, PassStats, Renderer};
pub use crate::work_queue::BoundedBlockingQueue;
