//! Single-consumer gate dispatch queue
//!
//! One worker thread drains a FIFO of boxed closures. Gate submissions
//! enqueue without blocking; value-returning operations call
//! [`Dispatcher::finish`] first, which is the ordering fence between
//! kernels. Work submitted from one caller executes in submission order.
//!
//! Reentrancy: a dispatched closure must not call `finish` (or any
//! operation that fences) on the dispatcher executing it; it would wait on
//! itself.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueueState {
    jobs: VecDeque<Job>,
    running: bool,
    shutdown: bool,
}

struct Shared {
    queue: Mutex<QueueState>,
    cv: Condvar,
}

/// FIFO queue with one consumer thread
pub struct Dispatcher {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Start the worker thread
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                running: false,
                shutdown: false,
            }),
            cv: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("qregsim-dispatch".into())
            .spawn(move || worker_loop(worker_shared))
            .expect("failed to spawn dispatch worker");

        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Enqueue a closure; returns immediately
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.queue.lock().expect("dispatch queue poisoned");
        queue.jobs.push_back(Box::new(job));
        self.shared.cv.notify_all();
    }

    /// Block until every queued closure has run
    pub fn finish(&self) {
        let mut queue = self.shared.queue.lock().expect("dispatch queue poisoned");
        while !queue.jobs.is_empty() || queue.running {
            queue = self
                .shared
                .cv
                .wait(queue)
                .expect("dispatch queue poisoned");
        }
    }

    /// Discard pending work and wait out the closure in flight, if any
    pub fn dump(&self) {
        let mut queue = self.shared.queue.lock().expect("dispatch queue poisoned");
        queue.jobs.clear();
        while queue.running {
            queue = self
                .shared
                .cv
                .wait(queue)
                .expect("dispatch queue poisoned");
        }
    }

    /// True when no work is queued or in flight
    pub fn is_finished(&self) -> bool {
        let queue = self.shared.queue.lock().expect("dispatch queue poisoned");
        queue.jobs.is_empty() && !queue.running
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        {
            let mut queue = self.shared.queue.lock().expect("dispatch queue poisoned");
            queue.shutdown = true;
            self.shared.cv.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut queue = shared.queue.lock().expect("dispatch queue poisoned");
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    queue.running = true;
                    break job;
                }
                if queue.shutdown {
                    return;
                }
                queue = shared.cv.wait(queue).expect("dispatch queue poisoned");
            }
        };

        job();

        let mut queue = shared.queue.lock().expect("dispatch queue poisoned");
        queue.running = false;
        shared.cv.notify_all();
    }
}
