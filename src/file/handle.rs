use std::fmt;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream};
use parking_lot::Mutex;

use super::filter::ReadSpec;
use super::mode::OpenMode;
use super::session::{FileSession, Resumed, SessionStatus, Step};
use crate::common::exception::{FileResult, IoError};

/// Async handle to an open file session.
///
/// Clones share the session. Only one operation may be in flight at a time;
/// a second one started from another clone fails with `IoError::Busy`
/// instead of queueing.
///
/// Dropping an operation's future while its task is running closes the
/// session, the same way an aborted request would.
#[derive(Clone)]
pub struct FileHandle {
    inner: Arc<Mutex<FileSession>>,
}

impl FileHandle {
    pub(crate) fn new(session: FileSession) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<Mutex<FileSession>> {
        Arc::downgrade(&self.inner)
    }

    /// Writes `data`, returning its length.
    ///
    /// Small writes are cached and return at once; a write that overflows
    /// the cache (or any write with a zero-sized cache) waits for a worker.
    pub async fn write(&self, data: impl AsRef<[u8]>) -> FileResult<usize> {
        let step = self.inner.lock().start_write(data.as_ref())?;
        self.drive(step).await?.written()
    }

    /// Writes all `parts` as a single logical write.
    pub async fn write_parts<T: AsRef<[u8]>>(&self, parts: &[T]) -> FileResult<usize> {
        let total = parts.iter().map(|p| p.as_ref().len()).sum();
        let mut joined = BytesMut::with_capacity(total);
        for part in parts {
            joined.extend_from_slice(part.as_ref());
        }
        self.write(joined.freeze()).await
    }

    /// Hands every cached byte to a worker; `full` also syncs the file to disk.
    pub async fn flush(&self, full: bool) -> FileResult<()> {
        let step = self.inner.lock().start_flush(full)?;
        self.drive(step).await?.flushed()
    }

    /// Reads according to `spec`. `Ok(None)` means end of file was reached
    /// before anything could be consumed.
    pub async fn read(&self, spec: ReadSpec) -> FileResult<Option<Bytes>> {
        let step = self.inner.lock().start_read(spec)?;
        self.drive(step).await?.read()
    }

    /// Moves the logical position and returns the new offset from the start.
    pub async fn seek(&self, pos: SeekFrom) -> FileResult<u64> {
        let step = self.inner.lock().start_seek(pos)?;
        self.drive(step).await?.sought()
    }

    /// Writes out cached bytes and closes the descriptor.
    pub async fn close(&self) -> FileResult<()> {
        let step = self.inner.lock().start_close()?;
        self.drive(step).await?.closed()
    }

    /// Successive lines until end of file.
    pub fn lines(&self) -> impl Stream<Item = FileResult<Bytes>> {
        stream::try_unfold(self.clone(), |handle| async move {
            let line = handle.read(ReadSpec::Line).await?;
            Ok::<_, IoError>(line.map(|line| (line, handle)))
        })
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock().status()
    }

    pub fn offset(&self) -> u64 {
        self.inner.lock().offset()
    }

    pub fn path(&self) -> PathBuf {
        self.inner.lock().path().to_path_buf()
    }

    pub fn mode(&self) -> OpenMode {
        self.inner.lock().mode()
    }

    /// Waits on tasks until the operation produces its result.
    async fn drive(&self, mut step: Step) -> FileResult<Resumed> {
        loop {
            let pending = match step {
                Step::Ready(resumed) => return Ok(resumed),
                Step::Wait(pending) => pending,
            };

            let guard = AbortGuard::arm(&self.inner);
            let task = pending.await;
            guard.disarm();

            step = self.inner.lock().on_task_done(task)?;
        }
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = self.inner.lock();
        f.debug_struct("FileHandle")
            .field("id", &session.id())
            .field("path", &session.path())
            .field("state", &session.state())
            .finish()
    }
}

/// Finalizes the session if the waiting future is dropped mid-task.
struct AbortGuard<'a> {
    session: &'a Mutex<FileSession>,
    armed: bool,
}

impl<'a> AbortGuard<'a> {
    fn arm(session: &'a Mutex<FileSession>) -> Self {
        Self {
            session,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbortGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.session.lock().abort();
        }
    }
}
