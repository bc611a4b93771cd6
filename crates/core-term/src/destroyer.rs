//! Deferred destruction of bulky discards.
//!
//! Dropping a whole alternate screen or a reset buffer frees thousands of
//! allocations; on a hot dispatch path that cost can be handed to a worker
//! instead. Both implementations satisfy the same contract: accept garbage,
//! destroy it at some point.

use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use tracing::trace;

/// Anything droppable and sendable; the destructor is the work.
pub trait Garbage: Send {}

impl<T: Send> Garbage for T {}

pub trait Destroyer {
    fn add(&self, garbage: Box<dyn Garbage>);
}

/// Destroys garbage on the caller's thread, immediately.
#[derive(Debug, Default)]
pub struct SyncDestroyer;

impl Destroyer for SyncDestroyer {
    fn add(&self, garbage: Box<dyn Garbage>) {
        drop(garbage);
    }
}

/// Hands garbage to a worker thread over a channel. Dropping the destroyer
/// closes the channel and joins the worker, so everything queued is
/// destroyed before the destroyer itself goes away.
#[derive(Debug)]
pub struct AsyncDestroyer {
    sender: Option<Sender<Box<dyn Garbage>>>,
    worker: Option<JoinHandle<()>>,
}

impl Default for AsyncDestroyer {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncDestroyer {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<Box<dyn Garbage>>();
        let worker = thread::spawn(move || {
            for garbage in receiver {
                trace!(target: "destroyer", "destroy");
                drop(garbage);
            }
        });
        Self {
            sender: Some(sender),
            worker: Some(worker),
        }
    }
}

impl Destroyer for AsyncDestroyer {
    fn add(&self, garbage: Box<dyn Garbage>) {
        if let Some(sender) = &self.sender {
            // A send can only fail once the worker is gone, i.e. during
            // teardown; destroying inline is the correct fallback.
            let _ = sender.send(garbage);
        }
    }
}

impl Drop for AsyncDestroyer {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn sync_destroys_immediately() {
        let drops = Arc::new(AtomicUsize::new(0));
        let destroyer = SyncDestroyer;
        destroyer.add(Box::new(Tracked(Arc::clone(&drops))));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn async_destroys_before_teardown_completes() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let destroyer = AsyncDestroyer::new();
            for _ in 0..10 {
                destroyer.add(Box::new(Tracked(Arc::clone(&drops))));
            }
        }
        // Drop joined the worker, so every item has been destroyed.
        assert_eq!(drops.load(Ordering::SeqCst), 10);
    }
}
