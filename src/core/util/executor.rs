// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixed-size worker pool for hook execution.
//!
//! The scheduler never runs procedure hooks on its polling thread; it hands
//! them to this pool. Workers isolate panics with `catch_unwind` so one
//! misbehaving hook cannot take a worker (or the scheduler) down.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug)]
pub struct ExecutorService {
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pool_size: usize,
}

impl ExecutorService {
    /// Spawn `pool_size` workers. Sizes below one are clamped to one.
    pub fn new(pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(pool_size);
        for index in 0..pool_size {
            let receiver: Receiver<Job> = receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("alloc-worker-{index}"))
                .spawn(move || worker_loop(receiver))
                .expect("failed to spawn allocation worker");
            workers.push(handle);
        }
        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            pool_size,
        }
    }

    /// Queue a job. Returns `false` if the pool has been shut down.
    pub fn execute<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock().unwrap();
        match sender.as_ref() {
            Some(tx) => tx.send(Box::new(job)).is_ok(),
            None => {
                log::warn!("job rejected: executor already shut down");
                false
            }
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Stop accepting jobs, drain the queue, and join all workers.
    pub fn shutdown(&self) {
        // Dropping the sender disconnects the channel; workers exit once
        // the remaining queue is drained.
        self.sender.lock().unwrap().take();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().unwrap().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                log::error!("allocation worker terminated abnormally");
            }
        }
    }
}

impl Default for ExecutorService {
    fn default() -> Self {
        Self::new(num_cpus::get().max(2))
    }
}

impl Drop for ExecutorService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(receiver: Receiver<Job>) {
    for job in receiver.iter() {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            log::error!("allocation job panicked: {message}");
        }
    }
}
