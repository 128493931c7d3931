//! # dc-files
//!
//! The shared file tree, TTH/base32 plumbing, and file-list XML
//! serialization for a Direct Connect client.
//!
//! This crate owns the data a share advertises to the network: an ordered
//! [`tree::FileTree`] of files and directories, a secondary TTH index over
//! it, and the `<FileListing>` XML form peers exchange as `files.xml.bz2`.
//! Computing a TTH digest from file bytes is out of scope (that's an
//! external collaborator); this crate only validates and indexes digests
//! it is handed.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod base32;
pub mod filelist;
pub mod tree;
pub mod tth;

pub use filelist::{Compression, FileListError};
pub use tree::{FileMask, FileTree, NodeId, SearchHit, SearchQuery, SizeConstraint, TreeError};
