//! # dc-core
//!
//! Core protocol implementation for dcfish, a Direct Connect client.
//!
//! This crate provides:
//! - **Hub session**: the dual-dialect (legacy/modern) roster, chat, and
//!   search state machine for a hub connection
//! - **C↔C session**: the handshake and file-serving state machine between
//!   two peers
//! - **Slot admission**: the process-wide policy capping concurrent
//!   paid transfers
//! - **Runtime**: the registries both session kinds are tracked in
//! - **Charset bridging**: the legacy and modern wire escape/encoding rules
//! - **Error types**: the `io`/`protocol`/`parse`/`policy`/`auth` taxonomy
//!
//! ## Module Structure
//!
//! - [`hub`]: hub session state machine (legacy and modern dialects)
//! - [`cc`]: client-to-client session state machine
//! - [`slots`]: slot admission policy
//! - [`runtime`]: process-wide session registries
//! - [`charset`]: wire charset escaping for both dialects
//! - [`hasher`]: hash-tree persistence collaborator trait
//! - [`sink`]: UI-facing message delivery trait
//! - [`error`]: error types and result handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod cc;
pub mod charset;
pub mod error;
pub mod hasher;
pub mod hub;
pub mod runtime;
pub mod sink;
pub mod slots;

pub use cc::{CcHandlerCtx, CcReply, CcSession, CcState};
pub use charset::Charset;
pub use error::{CcError, HubError};
pub use hasher::{DownloadRecord, HashRecord, HashStore, NullHashStore};
pub use hub::{HandlerCtx, HubSession};
pub use runtime::{CcId, HubId, Runtime};
pub use sink::{MessageSink, NullSink, Priority};
