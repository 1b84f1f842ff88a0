//! The unit of blocking work handed to a worker thread.
//!
//! A `Task` is filled in by a session on the runtime thread, moved to a
//! worker together with its completion sender, executed there, and moved
//! back. Its output fields are only read after the move back, so no field
//! is ever touched by two threads at once.

use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::sync::Arc;

use log::{debug, trace};

use crate::buffer::{chain_to_iovec, coalesce_adjacent, Buf, BufChain};
use crate::common::config::IOVS_PREALLOCATE;
use crate::common::exception::IoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Write the chain, then optionally sync.
    Write,
    /// Fill the spare capacity of one buffer.
    Read,
}

/// Syscall that failed inside a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Write,
    Read,
    Sync,
}

#[derive(Debug)]
pub struct TaskFailure {
    pub stage: FailureStage,
    pub error: io::Error,
}

pub struct Task {
    pub(crate) file: Option<Arc<File>>,
    pub(crate) kind: TaskKind,
    pub(crate) chain: BufChain,
    pub(crate) buf: Option<Buf>,
    /// Logical offset the operation starts at; informational only since the
    /// descriptor's own cursor drives the syscall.
    pub(crate) offset: u64,
    pub(crate) flush: bool,

    pub(crate) nbytes: usize,
    pub(crate) failure: Option<TaskFailure>,
    pub(crate) eof: bool,
    pub(crate) short_write: Option<(usize, usize)>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("kind", &self.kind)
            .field("offset", &self.offset)
            .field("flush", &self.flush)
            .field("chain_len", &self.chain.len())
            .field("nbytes", &self.nbytes)
            .field("eof", &self.eof)
            .field("failure", &self.failure)
            .finish()
    }
}

impl Default for Task {
    fn default() -> Self {
        Self {
            file: None,
            kind: TaskKind::Write,
            chain: BufChain::new(),
            buf: None,
            offset: 0,
            flush: false,
            nbytes: 0,
            failure: None,
            eof: false,
            short_write: None,
        }
    }
}

impl Task {
    pub fn new() -> Box<Self> {
        Box::default()
    }

    /// Re-arms the task for a chain write.
    pub(crate) fn prepare_write(&mut self, file: Arc<File>, chain: BufChain, offset: u64, flush: bool) {
        self.reset_outputs();
        self.file = Some(file);
        self.kind = TaskKind::Write;
        self.chain = chain;
        self.buf = None;
        self.offset = offset;
        self.flush = flush;
    }

    /// Re-arms the task for a read into `buf`'s free tail.
    pub(crate) fn prepare_read(&mut self, file: Arc<File>, buf: Buf, offset: u64) {
        self.reset_outputs();
        self.file = Some(file);
        self.kind = TaskKind::Read;
        self.chain = BufChain::new();
        self.buf = Some(buf);
        self.offset = offset;
        self.flush = false;
    }

    fn reset_outputs(&mut self) {
        self.nbytes = 0;
        self.failure = None;
        self.eof = false;
        self.short_write = None;
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn nbytes(&self) -> usize {
        self.nbytes
    }

    pub fn eof(&self) -> bool {
        self.eof
    }

    pub fn failure(&self) -> Option<&TaskFailure> {
        self.failure.as_ref()
    }

    /// Releases the descriptor reference and hands back every buffer the
    /// task still holds.
    pub(crate) fn take_buffers(&mut self) -> (BufChain, Option<Buf>) {
        self.file = None;
        (self.chain.take(), self.buf.take())
    }

    /// Outcome of the task as a caller-facing error, if it failed.
    pub(crate) fn error(&self) -> Option<IoError> {
        if let Some(failure) = &self.failure {
            return Some(match failure.stage {
                FailureStage::Sync => IoError::sync_failure(&failure.error),
                FailureStage::Write | FailureStage::Read => IoError::os_failure(&failure.error),
            });
        }
        self.short_write
            .map(|(written, expected)| IoError::ShortWrite { written, expected })
    }

    /// Executes the blocking part. Runs on a worker thread.
    pub fn run(&mut self) {
        self.reset_outputs();

        let Some(file) = self.file.clone() else {
            self.failure = Some(TaskFailure {
                stage: match self.kind {
                    TaskKind::Write => FailureStage::Write,
                    TaskKind::Read => FailureStage::Read,
                },
                error: io::Error::from_raw_os_error(libc::EBADF),
            });
            return;
        };

        match self.kind {
            TaskKind::Write => self.run_write(&file),
            TaskKind::Read => self.run_read(&file),
        }
    }

    fn run_write(&mut self, file: &File) {
        if !self.write_chain(file) {
            return;
        }

        if self.flush {
            if let Err(error) = file.sync_all() {
                self.failure = Some(TaskFailure {
                    stage: FailureStage::Sync,
                    error,
                });
            }
        }
    }

    /// Writes every pending byte of the chain. Returns false once a syscall
    /// failed or came up short.
    fn write_chain<W: Write>(&mut self, mut out: W) -> bool {
        coalesce_adjacent(&mut self.chain);

        let mut next = 0;
        while next < self.chain.len() {
            let (iov, resume_at) = chain_to_iovec(&self.chain, next, IOVS_PREALLOCATE);
            next = resume_at;
            if iov.is_empty() {
                break;
            }

            let written = loop {
                match out.write_vectored(iov.slices()) {
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                        trace!("writev() was interrupted");
                        continue;
                    }
                    other => break other,
                }
            };

            match written {
                Ok(n) if n == iov.size() => self.nbytes += n,
                Ok(n) => {
                    debug!("short write: {} of {} bytes at offset {}", n, iov.size(), self.offset);
                    self.short_write = Some((n, iov.size()));
                    self.nbytes = 0;
                    return false;
                }
                Err(error) => {
                    self.failure = Some(TaskFailure {
                        stage: FailureStage::Write,
                        error,
                    });
                    return false;
                }
            }
        }

        true
    }

    fn run_read(&mut self, file: &File) {
        let Some(buf) = self.buf.as_mut() else {
            return;
        };

        match buf.fill_from(file) {
            Ok(n) => {
                self.nbytes = n;
                self.eof = n == 0;
            }
            Err(error) => {
                self.failure = Some(TaskFailure {
                    stage: FailureStage::Read,
                    error,
                });
            }
        }
    }
}
