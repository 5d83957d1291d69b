//! Error types for the ccnf forwarder.

use thiserror::Error;

/// All possible errors that can occur within the ccnf implementation.
#[derive(Error, Debug)]
pub enum Error {
    /// Error raised while parsing a name from its wire form.
    #[error("malformed name: {0}")]
    MalformedName(String),

    /// Error raised while parsing a packet buffer.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// Error raised while parsing a control command line.
    #[error("control parse error: {0}")]
    ControlParse(String),

    /// A connection id or symbolic name that is not in the table.
    #[error("unknown connection: {0}")]
    UnknownConnection(String),

    /// A connection insert that collides with an existing id or name.
    #[error("duplicate connection: {0}")]
    DuplicateConnection(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}
