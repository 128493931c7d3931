//! Error types for the hub and client-to-client session state machines.
//!
//! Both taxonomies follow the same five kinds: `io` (connect/read/write),
//! `protocol` (malformed or out-of-order frame), `parse` (bad base32,
//! malformed XML, malformed field), `policy` (no slot, no matching file,
//! unsupported request type), and `auth` (bad password, name taken).
//! `policy` failures are turned into a wire reply at the call site (e.g.
//! `$MaxedOut`) rather than propagated as a disconnect; see [`crate::slots`].

use thiserror::Error;

/// Errors from a hub session.
#[derive(Debug, Error)]
pub enum HubError {
    /// Transport-level I/O failure.
    #[error("I/O: {0}")]
    Io(#[from] dc_transport::TransportError),

    /// Frame arrived out of sequence for the current state, or was
    /// otherwise structurally invalid for its kind.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A field within an otherwise well-formed frame failed to parse.
    #[error("parse error: {0}")]
    Parse(String),

    /// Authentication failed: bad password or a name already in use.
    #[error("authentication failed: {0}")]
    Auth(String),
}

/// Errors from a client-to-client session.
#[derive(Debug, Error)]
pub enum CcError {
    /// Transport-level I/O failure.
    #[error("I/O: {0}")]
    Io(#[from] dc_transport::TransportError),

    /// Frame arrived out of sequence for the current state (e.g. an
    /// `$ADCGET` before `$MyNick`).
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A field within an otherwise well-formed frame failed to parse.
    #[error("parse error: {0}")]
    Parse(String),
}
