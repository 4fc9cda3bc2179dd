//! Crate-wide error type.

use std::fmt;

/// What went wrong, coarsely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Bad value handed in by the caller or operator
    InvalidArgument,
    /// Output buffer too small for the frame being assembled
    BufferOverflow,
    /// Inbound bytes do not form the packet they claim to be
    InvalidPacket,
    /// Options area exhausted or malformed
    InvalidOptions,
    /// Socket creation, configuration, send or receive failure
    Socket,
    /// Interface index / hardware address / flags query failure
    Interface,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidArgument => "invalid argument",
            Self::BufferOverflow => "buffer overflow",
            Self::InvalidPacket => "invalid packet",
            Self::InvalidOptions => "invalid options",
            Self::Socket => "socket error",
            Self::Interface => "interface error",
        };
        write!(f, "{name}")
    }
}

/// Error with a kind for dispatch and a message for the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpError {
    kind: ErrorKind,
    msg: String,
}

impl DhcpError {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for DhcpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.msg)
    }
}

impl std::error::Error for DhcpError {}

impl From<std::io::Error> for DhcpError {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Socket, e.to_string())
    }
}

impl From<nix::errno::Errno> for DhcpError {
    fn from(e: nix::errno::Errno) -> Self {
        Self::new(ErrorKind::Socket, e.to_string())
    }
}
