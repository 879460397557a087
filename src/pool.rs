// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A scoped pool of workers draining a [`WorkQueue`].
//!
//! Each worker loops: pop an item, process it, repeat, until the queue
//! reports shutdown.  The caller's producer runs on the calling thread
//! at the same time as the workers, so a bounded queue throttles the
//! producer rather than buffering all of the work up front.  When the
//! producer returns, the pool shuts the queue down and waits for the
//! workers to drain it.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crate::channel::WorkQueue;
use crate::error::{PoolError, PopError};

/// Hard ceiling on the number of workers in a pool.
pub const MAX_THREADS: usize = 128;

// Shuts the queue down if its holder unwinds.  On a worker, this
// frees the producer and the surviving workers; on the producer, it
// lets the workers drain and exit so the scope can join them.
struct ShutdownOnPanic<'a, T, Q: WorkQueue<T>> {
    queue: &'a Q,
    _item: PhantomData<fn(T)>,
}

impl<'a, T, Q: WorkQueue<T>> Drop for ShutdownOnPanic<'a, T, Q> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.queue.shutdown();
        }
    }
}

/// A fixed number of worker threads, spawned afresh for every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    threads: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        WorkerPool {
            threads: num_cpus::get().max(1).min(MAX_THREADS),
        }
    }
}

impl WorkerPool {
    /// A pool of `threads` workers, capped at [`MAX_THREADS`].
    pub fn new(threads: usize) -> Result<Self, PoolError> {
        if threads == 0 {
            return Err(PoolError::NoThreads);
        }
        Ok(WorkerPool {
            threads: threads.min(MAX_THREADS),
        })
    }

    /// Number of workers a run will spawn.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `produce` on the calling thread while the workers apply
    /// `work` to every item it pushes.  Returns the number of items the
    /// workers processed.
    ///
    /// The queue is shut down when `produce` returns, even if it
    /// returned early, so the workers always exit.  A worker that
    /// panics is reported as [`PoolError::WorkerPanicked`].  A panic in
    /// `produce` also shuts the queue down, and is passed on to the
    /// caller once the workers have exited.
    pub fn run<T, Q, P, F>(&self, queue: &Q, produce: P, work: F) -> Result<usize, PoolError>
    where
        T: Send,
        Q: WorkQueue<T>,
        P: FnOnce(&Q),
        F: Fn(T) + Sync,
    {
        let processed = AtomicUsize::new(0);
        let work = &work;
        let processed_ref = &processed;

        let result = crossbeam::scope(|spawner| {
            for worker in 0..self.threads {
                let spawned = spawner
                    .builder()
                    .name(format!("worker-{}", worker))
                    .spawn(move |_| {
                        let _guard = ShutdownOnPanic {
                            queue,
                            _item: PhantomData::<fn(T)>,
                        };
                        let mut mine = 0;
                        loop {
                            match queue.pop() {
                                Ok(item) => {
                                    work(item);
                                    mine += 1;
                                }
                                Err(PopError::Shutdown) => break,
                                Err(e) => {
                                    tracing::error!(worker, error = %e, "unexpected pop failure");
                                    break;
                                }
                            }
                        }
                        tracing::trace!(worker, items = mine, "worker exiting");
                        processed_ref.fetch_add(mine, Ordering::Relaxed);
                    });
                if let Err(e) = spawned {
                    tracing::error!(worker, error = %e, "could not spawn worker");
                }
            }

            let _guard = ShutdownOnPanic {
                queue,
                _item: PhantomData::<fn(T)>,
            };
            produce(queue);
            queue.shutdown();
        });

        match result {
            Ok(()) => Ok(processed.load(Ordering::Relaxed)),
            Err(_) => {
                tracing::error!("worker panicked, abandoning run");
                Err(PoolError::WorkerPanicked)
            }
        }
    }
}
