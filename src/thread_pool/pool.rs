//! Named worker pools that execute blocking file syscalls.
//!
//! Each pool owns a fixed set of OS threads draining one bounded queue.
//! Posting never blocks the caller: a full queue or a pool that is shutting
//! down rejects the task and hands it straight back.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;

use super::task::Task;
use crate::common::config::ThreadPoolConfig;
use crate::common::exception::{FileResult, IoError};

type Job = (Box<Task>, oneshot::Sender<Box<Task>>);

#[derive(Debug, Default)]
struct PoolCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    rejected: AtomicU64,
}

/// Snapshot of a pool's task counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThreadPoolStats {
    pub submitted: u64,
    pub completed: u64,
    pub rejected: u64,
}

pub struct ThreadPool {
    name: String,
    sender: RwLock<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<PoolCounters>,
}

impl ThreadPool {
    /// Spawns `config.threads` workers (at least one) behind a queue of
    /// `config.max_queue` slots.
    pub fn new(config: &ThreadPoolConfig) -> io::Result<Self> {
        let (sender, receiver) = bounded::<Job>(config.max_queue);
        let counters = Arc::new(PoolCounters::default());
        let threads = config.threads.max(1);

        let mut workers = Vec::with_capacity(threads);
        for worker_id in 0..threads {
            let receiver = receiver.clone();
            let counters = Arc::clone(&counters);
            let handle = thread::Builder::new()
                .name(format!("{}-io-{}", config.name, worker_id))
                .spawn(move || Self::worker_loop(receiver, counters))?;
            workers.push(handle);
        }

        info!(
            "Started thread pool \"{}\" with {} workers, queue of {}",
            config.name, threads, config.max_queue
        );

        Ok(Self {
            name: config.name.clone(),
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(workers),
            counters,
        })
    }

    fn worker_loop(receiver: Receiver<Job>, counters: Arc<PoolCounters>) {
        while let Ok((mut task, done)) = receiver.recv() {
            task.run();
            counters.completed.fetch_add(1, Ordering::Relaxed);

            // The waiting operation may have been abandoned; its task goes with it.
            if done.send(task).is_err() {
                debug!("task completion dropped, receiver is gone");
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues `task` for execution; `done` receives it back once it ran.
    pub fn post(
        &self,
        task: Box<Task>,
        done: oneshot::Sender<Box<Task>>,
    ) -> Result<(), (IoError, Box<Task>)> {
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err((IoError::TaskPostError, task));
        };

        match sender.try_send((task, done)) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full((task, _))) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!("thread pool \"{}\" queue overflow", self.name);
                Err((IoError::TaskPostError, task))
            }
            Err(TrySendError::Disconnected((task, _))) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err((IoError::TaskPostError, task))
            }
        }
    }

    pub fn stats(&self) -> ThreadPoolStats {
        ThreadPoolStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Stops accepting tasks, lets queued tasks finish and joins every worker.
    pub fn shutdown(&self) {
        if self.sender.write().take().is_none() {
            return;
        }

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if let Err(e) = handle.join() {
                warn!("Failed to join worker of pool \"{}\": {:?}", self.name, e);
            }
        }
        info!("Thread pool \"{}\" shut down", self.name);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Pools addressable by the name an `IoConfig` refers to.
#[derive(Default)]
pub struct ThreadPoolRegistry {
    pools: HashMap<String, Arc<ThreadPool>>,
}

impl ThreadPoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_configs(configs: &[ThreadPoolConfig]) -> io::Result<Self> {
        let mut registry = Self::new();
        for config in configs {
            registry.add(ThreadPool::new(config)?);
        }
        Ok(registry)
    }

    /// Registers `pool`, replacing any pool of the same name.
    pub fn add(&mut self, pool: ThreadPool) -> Arc<ThreadPool> {
        let pool = Arc::new(pool);
        self.pools.insert(pool.name().to_string(), Arc::clone(&pool));
        pool
    }

    pub fn get(&self, name: &str) -> FileResult<Arc<ThreadPool>> {
        self.pools
            .get(name)
            .cloned()
            .ok_or_else(|| IoError::ThreadPoolNotFound(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    pub fn shutdown_all(&self) {
        for pool in self.pools.values() {
            pool.shutdown();
        }
    }
}
