//! Per-request context.
//!
//! A [`RequestContext`] plays the part of one request-handling script: it
//! owns the buffer pool its sessions allocate from, the counter of tasks it
//! is blocked on, and the cleanup registry that closes every session still
//! open when the request goes away.

use std::collections::HashMap;
use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, error};
use parking_lot::Mutex;

use crate::buffer::{BufferPool, BufferPoolStats};
use crate::common::config::IoConfig;
use crate::common::exception::{FileResult, IoError};
use crate::file::{FileHandle, FileSession, OpenMode};
use crate::thread_pool::ThreadPoolRegistry;

/// State shared between a request and the sessions it opened.
pub(crate) struct RequestShared {
    pub(crate) config: IoConfig,
    pub(crate) buffers: BufferPool,
    pub(crate) blocked: Arc<AtomicUsize>,
    sessions: Mutex<HashMap<u64, Weak<Mutex<FileSession>>>>,
}

impl RequestShared {
    /// Drops the cleanup hook of a finalized session.
    pub(crate) fn unregister(&self, id: u64) {
        self.sessions.lock().remove(&id);
    }
}

pub struct RequestContext {
    shared: Arc<RequestShared>,
    registry: Arc<ThreadPoolRegistry>,
    next_id: AtomicU64,
    torn_down: AtomicBool,
}

impl RequestContext {
    pub fn new(config: IoConfig, registry: Arc<ThreadPoolRegistry>) -> Self {
        let buffers = BufferPool::with_limit(config.memory_limit_bytes());
        Self {
            shared: Arc::new(RequestShared {
                config,
                buffers,
                blocked: Arc::new(AtomicUsize::new(0)),
                sessions: Mutex::new(HashMap::new()),
            }),
            registry,
            next_id: AtomicU64::new(1),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &IoConfig {
        &self.shared.config
    }

    /// Opens `path` with an `fopen`-style `mode`.
    ///
    /// Relative paths are resolved against the configured prefix. The open
    /// itself runs on the calling thread; "a" and "a+" start at end of file.
    pub fn open(&self, path: impl AsRef<Path>, mode: &str) -> FileResult<FileHandle> {
        if self.torn_down.load(Ordering::Acquire) {
            return Err(self.report(IoError::Closed));
        }

        let mode: OpenMode = mode.parse().map_err(|e| self.report(e))?;
        let pool = self
            .registry
            .get(&self.shared.config.thread_pool)
            .map_err(|e| self.report(e))?;
        let path = self.shared.config.resolve_path(path.as_ref());

        debug!(
            "fileio open \"{}\" r:{} w:{} a:{}",
            path.display(),
            mode.read,
            mode.write,
            mode.append
        );

        let file = mode
            .options()
            .open(&path)
            .map_err(|e| self.report(e.into()))?;

        let offset = if mode.append {
            (&file)
                .seek(SeekFrom::End(0))
                .map_err(|e| self.report(e.into()))?
        } else {
            0
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = FileSession::new(
            id,
            path,
            mode,
            file,
            offset,
            pool,
            Arc::clone(&self.shared),
        );
        let handle = FileHandle::new(session);
        self.shared.sessions.lock().insert(id, handle.downgrade());

        Ok(handle)
    }

    /// Number of submitted tasks the request is still waiting on.
    pub fn blocked(&self) -> usize {
        self.shared.blocked.load(Ordering::Acquire)
    }

    /// Sessions opened by this request and not finalized yet.
    pub fn open_sessions(&self) -> usize {
        self.shared.sessions.lock().len()
    }

    pub fn buffer_stats(&self) -> BufferPoolStats {
        self.shared.buffers.stats()
    }

    /// Finalizes every session still open. Cached writes are discarded.
    pub fn teardown(&self) {
        self.torn_down.store(true, Ordering::Release);

        // Sessions unregister themselves on finalize, so the map must not be
        // locked while they run.
        let sessions: Vec<_> = self.shared.sessions.lock().drain().collect();
        if sessions.is_empty() {
            return;
        }

        debug!("fileio request teardown: {} open sessions", sessions.len());
        for (id, session) in sessions {
            if let Some(session) = session.upgrade() {
                if let Some(e) = session.lock().finalize() {
                    debug!("fileio session {} closed with error: {}", id, e);
                }
            }
        }
    }

    fn report(&self, err: IoError) -> IoError {
        if self.shared.config.log_errors {
            error!("fileio open failed: {}", err);
        }
        err
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        self.teardown();
    }
}
