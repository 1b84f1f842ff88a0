//! Per-file session state machine.
//!
//! ```text
//!            write / flush / read / seek
//!   Idle ─────────────────────────────────▶ Writing | Flushing | Reading | Seeking
//!    ▲                                                  │
//!    └──────────────── on_task_done ◀───────────────────┘
//!
//!   close with cached bytes:  Idle ─▶ Flushing (+closing) ─▶ Closed
//!   close without:            Idle ─▶ Closed
//!   teardown / abort / drop:  any  ─▶ Closed
//! ```
//!
//! Every public entry point checks `Closed` and busy states before touching
//! anything, so a rejected call leaves the session exactly as it was. At most
//! one task is in flight; while it is, `task` is `None` and the worker owns
//! the allocation.
//!
//! The logical `offset` is the caller's view of the file position. It moves
//! when a write is accepted (cached or dispatched), when a read consumes
//! bytes and when a seek completes. The descriptor's own cursor lags behind
//! by the cached write bytes and runs ahead by the unread look-ahead.

use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::mem;
use std::os::unix::io::IntoRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use log::{debug, error, trace};

use super::filter::{FilterStatus, InputFilter, ReadSpec};
use super::mode::OpenMode;
use crate::buffer::BufChain;
use crate::common::config::IoConfig;
use crate::common::exception::{BusyOperation, FileResult, IoError};
use crate::request::RequestShared;
use crate::thread_pool::{submit, PendingTask, Task, TaskKind, ThreadPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Reading,
    Writing,
    Flushing,
    Seeking,
    Closed,
}

impl SessionState {
    /// The in-flight operation, if any.
    pub fn busy_operation(&self) -> Option<BusyOperation> {
        match self {
            SessionState::Reading => Some(BusyOperation::Reading),
            SessionState::Writing => Some(BusyOperation::Writing),
            SessionState::Flushing => Some(BusyOperation::Flushing),
            SessionState::Seeking => Some(BusyOperation::Seeking),
            SessionState::Idle | SessionState::Closed => None,
        }
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    /// A close is waiting for its final write.
    pub closing: bool,
    pub offset: u64,
    /// Bytes accepted by `write` but not handed to a worker yet.
    pub buffered_write: usize,
    /// Read look-ahead not consumed yet.
    pub buffered_read: usize,
    pub eof: bool,
    /// OS error code of the last failed operation, 0 after a success.
    pub last_error: i32,
}

/// Result a finished operation hands back to its caller.
#[derive(Debug)]
pub(crate) enum Resumed {
    Written(usize),
    Flushed,
    Read(Option<Bytes>),
    Sought(u64),
    Closed,
}

impl Resumed {
    pub(crate) fn written(self) -> FileResult<usize> {
        match self {
            Resumed::Written(n) => Ok(n),
            other => Err(other.mismatch("write")),
        }
    }

    pub(crate) fn flushed(self) -> FileResult<()> {
        match self {
            Resumed::Flushed => Ok(()),
            other => Err(other.mismatch("flush")),
        }
    }

    pub(crate) fn read(self) -> FileResult<Option<Bytes>> {
        match self {
            Resumed::Read(data) => Ok(data),
            other => Err(other.mismatch("read")),
        }
    }

    pub(crate) fn sought(self) -> FileResult<u64> {
        match self {
            Resumed::Sought(offset) => Ok(offset),
            other => Err(other.mismatch("seek")),
        }
    }

    pub(crate) fn closed(self) -> FileResult<()> {
        match self {
            Resumed::Closed => Ok(()),
            other => Err(other.mismatch("close")),
        }
    }

    fn mismatch(self, operation: &'static str) -> IoError {
        error!("fileio {} resumed with {:?}", operation, self);
        IoError::UnexpectedCompletion(operation)
    }
}

/// Where an operation stands after a state-machine step.
#[derive(Debug)]
pub(crate) enum Step {
    Ready(Resumed),
    Wait(PendingTask),
}

pub struct FileSession {
    id: u64,
    path: PathBuf,
    mode: OpenMode,
    file: Option<Arc<File>>,
    pool: Arc<ThreadPool>,
    request: Arc<RequestShared>,

    state: SessionState,
    closing: bool,
    offset: u64,
    error_code: i32,

    out_chain: BufChain,
    write_nbytes: usize,
    seek_target: Option<SeekFrom>,

    in_chain: BufChain,
    eof: bool,
    filter: Option<InputFilter>,
    read_out: BytesMut,
    read_consumed: usize,

    task: Option<Box<Task>>,
}

impl FileSession {
    pub(crate) fn new(
        id: u64,
        path: PathBuf,
        mode: OpenMode,
        file: File,
        offset: u64,
        pool: Arc<ThreadPool>,
        request: Arc<RequestShared>,
    ) -> Self {
        Self {
            id,
            path,
            mode,
            file: Some(Arc::new(file)),
            pool,
            request,
            state: SessionState::Idle,
            closing: false,
            offset,
            error_code: 0,
            out_chain: BufChain::new(),
            write_nbytes: 0,
            seek_target: None,
            in_chain: BufChain::new(),
            eof: false,
            filter: None,
            read_out: BytesMut::new(),
            read_consumed: 0,
            task: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            closing: self.closing,
            offset: self.offset,
            buffered_write: self.out_chain.total_pending(),
            buffered_read: self.in_chain.total_pending(),
            eof: self.eof,
            last_error: self.error_code,
        }
    }

    fn config(&self) -> &IoConfig {
        &self.request.config
    }

    fn check_ready(&self) -> FileResult<()> {
        if self.state == SessionState::Closed {
            return Err(self.reject(IoError::Closed));
        }
        if let Some(op) = self.state.busy_operation() {
            return Err(self.reject(IoError::Busy(op)));
        }
        Ok(())
    }

    /// Reports an error that did not change the session.
    fn reject(&self, err: IoError) -> IoError {
        if self.config().log_errors {
            error!("fileio \"{}\": {}", self.path.display(), err);
        }
        err
    }

    /// Records and reports an error raised by an operation that started.
    fn fail(&mut self, err: IoError) -> IoError {
        self.error_code = err.code();
        self.reject(err)
    }

    fn descriptor(&self) -> FileResult<Arc<File>> {
        self.file.clone().ok_or(IoError::Closed)
    }

    fn recycle_chain(&self, chain: BufChain) {
        self.request.buffers.put_chain(chain);
    }

    // ---- write path ----

    pub(crate) fn start_write(&mut self, data: &[u8]) -> FileResult<Step> {
        self.check_ready()?;
        if !self.mode.write {
            return Err(self.reject(IoError::OperationNotPermitted));
        }
        self.error_code = 0;

        let len = data.len();
        if len == 0 {
            return Ok(Step::Ready(Resumed::Written(0)));
        }

        if self.drop_read_ahead() > 0 {
            self.sync_os_cursor().map_err(|e| self.fail(e))?;
        }

        let size = self.config().write_buffer_size;
        let out = if size == 0 {
            let mut buf = self.request.buffers.get(len).map_err(|e| self.fail(e))?;
            buf.append(data);
            let mut out = self.out_chain.take();
            out.push_back(buf);
            out
        } else {
            if let Some(tail) = self.out_chain.back_mut() {
                if tail.room() >= len {
                    tail.append(data);
                    self.offset += len as u64;
                    trace!("fileio write cache: {} bytes", len);
                    return Ok(Step::Ready(Resumed::Written(len)));
                }
            }

            let mut buf = self
                .request
                .buffers
                .get(size.max(len))
                .map_err(|e| self.fail(e))?;
            buf.append(data);

            let mut out = self.out_chain.take();
            if len > size {
                out.push_back(buf);
            } else {
                self.out_chain.push_back(buf);
            }
            out
        };

        self.offset += len as u64;

        if out.is_empty() {
            trace!("fileio write cache: {} bytes", len);
            return Ok(Step::Ready(Resumed::Written(len)));
        }

        trace!("fileio write through: {} bytes", out.total_pending());
        self.write_nbytes = len;
        let pending = self
            .dispatch_write(out, false, SessionState::Writing)
            .map_err(|e| self.fail(e))?;
        Ok(Step::Wait(pending))
    }

    pub(crate) fn start_flush(&mut self, full: bool) -> FileResult<Step> {
        self.check_ready()?;
        if !self.mode.write {
            return Err(self.reject(IoError::OperationNotPermitted));
        }
        self.error_code = 0;

        let chain = self.out_chain.take();
        let pending = self
            .dispatch_write(chain, full, SessionState::Flushing)
            .map_err(|e| self.fail(e))?;
        Ok(Step::Wait(pending))
    }

    /// Hands `chain` to a worker and moves to `state`.
    ///
    /// A rejected post discards the chain, along with anything cached behind
    /// it, and rolls the logical offset back to where the discarded bytes
    /// began.
    fn dispatch_write(
        &mut self,
        chain: BufChain,
        flush: bool,
        state: SessionState,
    ) -> FileResult<PendingTask> {
        let file = self.descriptor()?;
        let behind = self.out_chain.total_pending();
        let start = self
            .offset
            .saturating_sub((chain.total_pending() + behind) as u64);

        debug!(
            "fileio thread write chain: {}, {} bufs, offset {} flush: {}",
            self.path.display(),
            chain.len(),
            start,
            flush
        );

        let mut task = self.task.take().unwrap_or_else(Task::new);
        task.prepare_write(file, chain, start, flush);

        match submit(&self.pool, &self.request.blocked, task) {
            Ok(pending) => {
                self.state = state;
                Ok(pending)
            }
            Err((err, mut task)) => {
                let (chain, _) = task.take_buffers();
                self.recycle_chain(chain);
                let cached = self.out_chain.take();
                self.recycle_chain(cached);
                self.offset = start;
                self.task = Some(task);
                Err(err)
            }
        }
    }

    /// Moves the descriptor's cursor to the logical offset.
    fn sync_os_cursor(&self) -> FileResult<()> {
        let file = self.descriptor()?;
        (&*file).seek(SeekFrom::Start(self.offset))?;
        Ok(())
    }

    /// Re-derives the logical offset after a failed write: whatever reached
    /// the file plus whatever is still cached.
    fn resync_after_write_failure(&mut self) {
        let Ok(file) = self.descriptor() else {
            return;
        };
        if let Ok(pos) = (&*file).stream_position() {
            self.offset = pos + self.out_chain.total_pending() as u64;
        }
    }

    // ---- read path ----

    pub(crate) fn start_read(&mut self, spec: ReadSpec) -> FileResult<Step> {
        self.check_ready()?;
        if !self.mode.read {
            return Err(self.reject(IoError::OperationNotPermitted));
        }
        self.error_code = 0;

        if spec == ReadSpec::Chunk(0) {
            return Ok(Step::Ready(Resumed::Read(Some(Bytes::new()))));
        }

        self.filter = Some(InputFilter::from(spec));
        self.read_out.clear();
        self.read_consumed = 0;
        self.state = SessionState::Reading;

        if !self.out_chain.is_empty() {
            let chain = self.out_chain.take();
            return match self.dispatch_write(chain, false, SessionState::Reading) {
                Ok(pending) => Ok(Step::Wait(pending)),
                Err(e) => {
                    self.abandon_read();
                    Err(self.fail(e))
                }
            };
        }

        self.read_step()
    }

    /// Runs the filter over the buffered input, then either finishes the
    /// read or dispatches a task for more data.
    fn read_step(&mut self) -> FileResult<Step> {
        if self.apply_filter() {
            let data = self.finish_read();
            return Ok(Step::Ready(Resumed::Read(data)));
        }

        match self.dispatch_read() {
            Ok(pending) => Ok(Step::Wait(pending)),
            Err(e) => {
                self.abandon_read();
                Err(self.fail(e))
            }
        }
    }

    /// Returns true once the filter is satisfied or the input is exhausted.
    fn apply_filter(&mut self) -> bool {
        let Some(filter) = self.filter.as_mut() else {
            return true;
        };

        let eof = self.eof;
        let count = self.in_chain.len();
        for (idx, buf) in self.in_chain.iter_mut().enumerate() {
            let last = idx + 1 == count;
            if buf.pending_len() == 0 && !last {
                continue;
            }

            let (used, status) = filter.apply(buf.pending(), eof && last, &mut self.read_out);
            buf.consume(used);
            self.read_consumed += used;

            if status == FilterStatus::Done {
                return true;
            }
        }

        eof
    }

    fn finish_read(&mut self) -> Option<Bytes> {
        let consumed = mem::take(&mut self.read_consumed);
        self.offset += consumed as u64;
        self.filter = None;
        self.state = SessionState::Idle;

        let data = self.read_out.split().freeze();
        self.release_consumed_input();

        trace!(
            "fileio read done: {} bytes consumed, {} returned",
            consumed,
            data.len()
        );

        if consumed == 0 {
            None
        } else {
            Some(data)
        }
    }

    /// Ends a failed read. Bytes the filter already consumed are gone.
    fn abandon_read(&mut self) {
        self.offset += mem::take(&mut self.read_consumed) as u64;
        self.filter = None;
        self.read_out.clear();
        self.state = SessionState::Idle;
        self.release_consumed_input();
    }

    /// Returns fully consumed buffers to the pool; the last one is kept and
    /// emptied so the next read can fill it from the start.
    fn release_consumed_input(&mut self) {
        loop {
            let consumed = matches!(self.in_chain.front(), Some(buf) if buf.pending_len() == 0);
            if !consumed {
                break;
            }

            if self.in_chain.len() == 1 {
                if let Some(buf) = self.in_chain.front_mut() {
                    buf.reset();
                }
                break;
            }

            if let Some(buf) = self.in_chain.pop_front() {
                self.request.buffers.put(buf);
            }
        }
    }

    fn dispatch_read(&mut self) -> FileResult<PendingTask> {
        let file = self.descriptor()?;
        self.release_consumed_input();

        let buf = match self.in_chain.pop_back() {
            Some(buf) if !buf.is_full() => buf,
            full => {
                if let Some(buf) = full {
                    self.in_chain.push_back(buf);
                }
                let size = self.config().read_buffer_size.max(1);
                self.request.buffers.get(size)?
            }
        };

        let read_at = self.offset
            + (self.read_consumed + self.in_chain.total_pending() + buf.pending_len()) as u64;
        trace!(
            "fileio thread read: {}, {} bytes at offset {}",
            self.path.display(),
            buf.room(),
            read_at
        );

        let mut task = self.task.take().unwrap_or_else(Task::new);
        task.prepare_read(file, buf, read_at);

        match submit(&self.pool, &self.request.blocked, task) {
            Ok(pending) => Ok(pending),
            Err((err, mut task)) => {
                let (_, buf) = task.take_buffers();
                if let Some(buf) = buf {
                    self.in_chain.push_back(buf);
                }
                self.task = Some(task);
                Err(err)
            }
        }
    }

    /// Discards unread look-ahead. Returns the number of bytes dropped.
    fn drop_read_ahead(&mut self) -> usize {
        self.eof = false;
        if self.in_chain.is_empty() {
            return 0;
        }

        let dropped = self.in_chain.total_pending();
        let chain = self.in_chain.take();
        self.recycle_chain(chain);
        dropped
    }

    // ---- seek ----

    pub(crate) fn start_seek(&mut self, pos: SeekFrom) -> FileResult<Step> {
        self.check_ready()?;
        self.error_code = 0;

        // The descriptor's cursor is off by the cached and look-ahead bytes.
        let target = match pos {
            SeekFrom::Current(delta) => {
                let absolute = i64::try_from(self.offset)
                    .ok()
                    .and_then(|offset| offset.checked_add(delta))
                    .and_then(|offset| u64::try_from(offset).ok());
                match absolute {
                    Some(offset) => SeekFrom::Start(offset),
                    None => return Err(self.fail(IoError::from_os_code(libc::EINVAL))),
                }
            }
            other => other,
        };

        self.drop_read_ahead();

        if self.out_chain.is_empty() {
            let offset = self.reposition(target)?;
            return Ok(Step::Ready(Resumed::Sought(offset)));
        }

        let chain = self.out_chain.take();
        self.seek_target = Some(target);
        match self.dispatch_write(chain, false, SessionState::Seeking) {
            Ok(pending) => Ok(Step::Wait(pending)),
            Err(e) => {
                self.seek_target = None;
                Err(self.fail(e))
            }
        }
    }

    fn reposition(&mut self, target: SeekFrom) -> FileResult<u64> {
        let file = self.descriptor().map_err(|e| self.fail(e))?;
        match (&*file).seek(target) {
            Ok(offset) => {
                debug!("fileio seek {}: {:?} -> {}", self.path.display(), target, offset);
                self.offset = offset;
                Ok(offset)
            }
            Err(e) => {
                let _ = (&*file).seek(SeekFrom::Start(self.offset));
                Err(self.fail(e.into()))
            }
        }
    }

    // ---- close ----

    pub(crate) fn start_close(&mut self) -> FileResult<Step> {
        self.check_ready()?;
        self.error_code = 0;

        if self.out_chain.is_empty() {
            return match self.finalize() {
                Some(e) => Err(self.fail(e)),
                None => Ok(Step::Ready(Resumed::Closed)),
            };
        }

        debug!("fileio close flushing {}", self.path.display());
        let chain = self.out_chain.take();
        match self.dispatch_write(chain, false, SessionState::Flushing) {
            Ok(pending) => {
                self.closing = true;
                Ok(Step::Wait(pending))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    // ---- completion ----

    /// Single resumption point for every task this session submits.
    ///
    /// `None` means the worker dropped the task without running it.
    pub(crate) fn on_task_done(&mut self, task: Option<Box<Task>>) -> FileResult<Step> {
        let Some(mut task) = task else {
            return Err(self.on_task_lost());
        };

        let (chain, buf) = task.take_buffers();
        let error = task.error();
        let kind = task.kind();
        let eof = task.eof();

        debug!(
            "fileio {:?} task done on {}: {} bytes, state {:?}",
            kind,
            self.path.display(),
            task.nbytes(),
            self.state
        );

        if self.state == SessionState::Closed || self.state == SessionState::Idle {
            self.recycle_chain(chain);
            if let Some(buf) = buf {
                self.request.buffers.put(buf);
            }
            return Err(self.reject(IoError::Closed));
        }

        self.task = Some(task);
        self.recycle_chain(chain);

        match self.state {
            SessionState::Writing => {
                self.state = SessionState::Idle;
                match error {
                    Some(e) => {
                        self.resync_after_write_failure();
                        Err(self.fail(e))
                    }
                    None => Ok(Step::Ready(Resumed::Written(self.write_nbytes))),
                }
            }
            SessionState::Flushing if self.closing => {
                self.closing = false;
                self.state = SessionState::Idle;
                match self.finalize().or(error) {
                    Some(e) => Err(self.fail(e)),
                    None => Ok(Step::Ready(Resumed::Closed)),
                }
            }
            SessionState::Flushing => {
                self.state = SessionState::Idle;
                match error {
                    Some(e) => {
                        self.resync_after_write_failure();
                        Err(self.fail(e))
                    }
                    None => Ok(Step::Ready(Resumed::Flushed)),
                }
            }
            SessionState::Seeking => {
                self.state = SessionState::Idle;
                let target = self.seek_target.take();
                if let Some(e) = error {
                    self.resync_after_write_failure();
                    return Err(self.fail(e));
                }
                let offset = match target {
                    Some(target) => self.reposition(target)?,
                    None => self.offset,
                };
                Ok(Step::Ready(Resumed::Sought(offset)))
            }
            SessionState::Reading => {
                if let Some(buf) = buf {
                    self.in_chain.push_back(buf);
                }
                if let Some(e) = error {
                    if kind == TaskKind::Write {
                        self.resync_after_write_failure();
                    }
                    self.abandon_read();
                    return Err(self.fail(e));
                }
                if kind == TaskKind::Read && eof {
                    self.eof = true;
                }
                self.read_step()
            }
            SessionState::Idle | SessionState::Closed => Err(self.reject(IoError::Closed)),
        }
    }

    fn on_task_lost(&mut self) -> IoError {
        error!(
            "fileio task for {} was dropped by its worker",
            self.path.display()
        );
        match self.state {
            SessionState::Closed => return self.reject(IoError::Closed),
            SessionState::Reading => self.abandon_read(),
            _ => self.state = SessionState::Idle,
        }
        self.seek_target = None;
        if mem::take(&mut self.closing) {
            self.finalize();
        }
        self.fail(IoError::TaskPostError)
    }

    /// The caller stopped waiting while a task was in flight.
    pub(crate) fn abort(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        debug!(
            "fileio operation on {} abandoned while {:?}",
            self.path.display(),
            self.state
        );
        self.finalize();
    }

    /// Releases everything the session owns and closes the descriptor.
    ///
    /// Idempotent. Returns the error of the `close` syscall, which is also
    /// logged. A descriptor still referenced by an in-flight task is closed
    /// when the worker lets go of it.
    pub(crate) fn finalize(&mut self) -> Option<IoError> {
        if self.state == SessionState::Closed {
            return None;
        }

        debug!("fileio session finalize: {}", self.path.display());

        self.request.unregister(self.id);

        let out = self.out_chain.take();
        self.recycle_chain(out);
        let input = self.in_chain.take();
        self.recycle_chain(input);
        if let Some(mut task) = self.task.take() {
            let (chain, buf) = task.take_buffers();
            self.recycle_chain(chain);
            if let Some(buf) = buf {
                self.request.buffers.put(buf);
            }
        }

        self.filter = None;
        self.read_out = BytesMut::new();
        self.read_consumed = 0;
        self.seek_target = None;
        self.closing = false;
        self.eof = false;
        self.error_code = 0;
        self.state = SessionState::Closed;

        let file = self.file.take()?;
        match Arc::try_unwrap(file) {
            Ok(file) => match close_descriptor(file) {
                Ok(()) => None,
                Err(e) => {
                    error!("close() \"{}\" failed: {}", self.path.display(), e);
                    let err = IoError::from(e);
                    self.error_code = err.code();
                    Some(err)
                }
            },
            Err(_shared) => {
                debug!(
                    "fileio descriptor of {} still held by a worker",
                    self.path.display()
                );
                None
            }
        }
    }
}

impl Drop for FileSession {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            debug!("fileio session {} collected while open", self.id);
            self.finalize();
        }
    }
}

fn close_descriptor(file: File) -> io::Result<()> {
    let fd = file.into_raw_fd();
    // SAFETY: `into_raw_fd` released ownership of `fd`, nothing else closes it.
    if unsafe { libc::close(fd) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
