//! The byte-stream seams the controller sits between.
//!
//! Both contracts are non-blocking: a return of zero means the peer would
//! block, and the event loop is expected to call again on readiness. The
//! child-process lifecycle behind the source (fork, signals, descriptor
//! plumbing) is an external collaborator's concern.

use thiserror::Error;

/// The child process behind the byte source has terminated.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("byte source child exited with code {exit_code}")]
pub struct SourceExited {
    pub exit_code: i32,
}

/// The peer behind the byte sink is gone; the error is not recoverable.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Default)]
#[error("byte sink peer is gone")]
pub struct SinkError;

/// Producer of terminal output bytes (the PTY master, in practice).
pub trait ByteSource {
    /// Read up to `buffer.len()` bytes. Zero means would-block.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, SourceExited>;
}

/// Consumer of terminal input bytes.
pub trait ByteSink {
    /// Write a prefix of `buffer`, returning how much was taken. Zero means
    /// would-block.
    fn write(&mut self, buffer: &[u8]) -> Result<usize, SinkError>;
}
