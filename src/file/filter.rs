//! Read-termination policies.
//!
//! A read call picks one [`ReadSpec`]; the session turns it into an
//! [`InputFilter`] and feeds it every span of buffered input until the
//! filter reports [`FilterStatus::Done`].

use std::fmt;
use std::str::FromStr;

use bytes::BytesMut;

use crate::common::exception::IoError;

/// What a single read call asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadSpec {
    /// Up to `n` bytes; fewer only at end of file.
    Chunk(usize),
    /// One line without its terminator.
    #[default]
    Line,
    /// Everything up to end of file.
    All,
}

impl From<usize> for ReadSpec {
    fn from(n: usize) -> Self {
        ReadSpec::Chunk(n)
    }
}

impl FromStr for ReadSpec {
    type Err = IoError;

    /// Accepts `*l`/`l`, `*a`/`a` or a decimal byte count.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix('*').unwrap_or(s) {
            "l" => Ok(ReadSpec::Line),
            "a" => Ok(ReadSpec::All),
            digits if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => digits
                .parse()
                .map(ReadSpec::Chunk)
                .map_err(|_| IoError::BadArgument("bad read pattern")),
            _ => Err(IoError::BadArgument("bad read pattern")),
        }
    }
}

impl fmt::Display for ReadSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadSpec::Chunk(n) => write!(f, "{}", n),
            ReadSpec::Line => f.write_str("*l"),
            ReadSpec::All => f.write_str("*a"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    Done,
    NeedMore,
}

/// Filter state for one read call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputFilter {
    Chunk { remaining: usize },
    Line,
    All,
}

impl From<ReadSpec> for InputFilter {
    fn from(spec: ReadSpec) -> Self {
        match spec {
            ReadSpec::Chunk(n) => InputFilter::Chunk { remaining: n },
            ReadSpec::Line => InputFilter::Line,
            ReadSpec::All => InputFilter::All,
        }
    }
}

impl InputFilter {
    /// Consumes a prefix of `input`, appending the kept bytes to `out`.
    ///
    /// Returns the number of input bytes consumed, which for a line includes
    /// the dropped `\r` and the terminating `\n`. `eof` tells the filter that
    /// `input` is the last data the file holds; every filter is done then.
    pub fn apply(&mut self, input: &[u8], eof: bool, out: &mut BytesMut) -> (usize, FilterStatus) {
        let (consumed, done) = match self {
            InputFilter::Chunk { remaining } => {
                let n = input.len().min(*remaining);
                out.extend_from_slice(&input[..n]);
                *remaining -= n;
                (n, *remaining == 0)
            }
            InputFilter::Line => match input.iter().position(|&b| b == b'\n') {
                Some(idx) => {
                    extend_without_cr(out, &input[..idx]);
                    (idx + 1, true)
                }
                None => {
                    extend_without_cr(out, input);
                    (input.len(), false)
                }
            },
            InputFilter::All => {
                out.extend_from_slice(input);
                (input.len(), false)
            }
        };

        let status = if done || (eof && consumed == input.len()) {
            FilterStatus::Done
        } else {
            FilterStatus::NeedMore
        };
        (consumed, status)
    }
}

fn extend_without_cr(out: &mut BytesMut, data: &[u8]) {
    for chunk in data.split(|&b| b == b'\r') {
        out.extend_from_slice(chunk);
    }
}
