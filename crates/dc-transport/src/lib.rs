//! # dc-transport
//!
//! The delimiter-framed byte transport shared by hub and client-to-client
//! sessions: one TCP socket, an inbound/outbound buffer pair, and a mode
//! switch between buffered commands and raw file streaming.
//!
//! There is no multi-backend abstraction here — Direct Connect only ever
//! speaks plaintext (optionally TLS-wrapped, see [`framed::TlsPolicy`])
//! line-oriented TCP, so [`framed::Framed`] is the transport, not one
//! implementation of a trait.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod framed;

pub use framed::{Delimiter, ErrorKind, Framed, Phase, TlsPolicy, TransportError, MAX_FRAME_LEN};
