//! One-shot `displayfd` channel
//!
//! An X server started with `-displayfd <fd>` writes the display number it
//! bound, followed by a newline, to `<fd>` once it accepts connections. The
//! write end is handed to the child, the read end stays with us.
//!
//! The parent's copy of the write end must be closed before reading, so that
//! a child dying before it reports anything shows up as an empty read
//! ([`HandshakeError::NoData`]) rather than a read that blocks forever.
//! Passing the writer into a [`Command`](std::process::Command) with
//! [`pass_fd`](crate::process::pass_fd) and spawning it does exactly that.

use std::{
    fmt,
    fs::File,
    io::{self, BufRead, BufReader, Write},
    os::fd::{AsFd, BorrowedFd, OwnedFd},
};

use rustix::pipe::{pipe_with, PipeFlags};
use tracing::debug;

use super::XDisplay;

/// Errors of the handshake channel
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The pipe could not be created
    #[error("failed to create handshake pipe")]
    Pipe(#[source] io::Error),
    /// Reading from the pipe failed
    #[error("failed to read from handshake pipe")]
    Read(#[source] io::Error),
    /// The peer closed its end without sending anything
    #[error("peer closed the handshake channel without reporting a value")]
    NoData,
    /// The peer sent something that isn't a display number
    #[error("peer reported an invalid display `{0}`")]
    Invalid(String),
}

/// Create a handshake channel
///
/// Both ends are close-on-exec until handed over with
/// [`pass_fd`](crate::process::pass_fd).
pub fn channel() -> Result<(HandshakeReader, HandshakeWriter), HandshakeError> {
    let (read, write) = pipe_with(PipeFlags::CLOEXEC).map_err(|err| HandshakeError::Pipe(err.into()))?;
    Ok((HandshakeReader(read), HandshakeWriter(write)))
}

/// The end of the channel kept by the waiting side
#[derive(Debug)]
pub struct HandshakeReader(OwnedFd);

impl HandshakeReader {
    /// Block until the peer sends a line or closes the channel
    ///
    /// The trailing newline is stripped.
    pub fn read_line(self) -> Result<String, HandshakeError> {
        let mut reader = BufReader::new(File::from(self.0));
        let mut line = String::new();
        let read = reader.read_line(&mut line).map_err(HandshakeError::Read)?;
        if read == 0 {
            return Err(HandshakeError::NoData);
        }
        let value = line.trim_end_matches('\n').to_owned();
        debug!(value = %value, "Handshake value received");
        Ok(value)
    }

    /// Block until the peer reports the display it bound
    pub fn read_display(self) -> Result<XDisplay, HandshakeError> {
        let value = self.read_line()?;
        match value.parse::<XDisplay>() {
            Ok(display) => Ok(display),
            Err(_) => Err(HandshakeError::Invalid(value)),
        }
    }
}

impl AsFd for HandshakeReader {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

/// The end of the channel given to the reporting side
#[derive(Debug)]
pub struct HandshakeWriter(OwnedFd);

impl HandshakeWriter {
    /// Report `value` and close the channel
    pub fn send(self, value: impl fmt::Display) -> io::Result<()> {
        let mut file = File::from(self.0);
        writeln!(file, "{}", value)
    }
}

impl AsFd for HandshakeWriter {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl From<HandshakeWriter> for OwnedFd {
    fn from(writer: HandshakeWriter) -> OwnedFd {
        writer.0
    }
}
