//! Client-to-client (C↔C) session: the handshake and file-serving state
//! machine between two peers.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use dc_files::{base32, FileTree};

use crate::error::CcError;
use crate::hasher::HashStore;
use crate::hub::legacy;

/// Deferred-free delay after disconnection, so in-flight reply frames can
/// drain before the session leaves the registry.
pub const FREE_DELAY: Duration = Duration::from_secs(30);
/// Files at or above this size require a slot.
pub const SLOT_THRESHOLD: u64 = 16 * 1024;

/// State of a C↔C session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcState {
    /// Awaiting `$MyNick` then `$Lock`.
    Connected,
    /// Past the handshake; serving `$ADCGET` requests.
    Ready,
}

/// The kind of resource an `$ADCGET` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcGetKind {
    /// A file's content.
    File,
    /// A file's hash-tree blob.
    Tthl,
}

/// A parsed `$ADCGET <type> <id> <start> <bytes>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdcGetRequest {
    /// `file` or `tthl`.
    pub kind: AdcGetKind,
    /// The raw identifier token (still escaped).
    pub identifier: String,
    /// Start offset.
    pub start: i64,
    /// Requested byte count, `-1` meaning "until end".
    pub bytes: i64,
}

/// Parse an `$ADCGET` command body (everything after `$ADCGET `).
#[must_use]
pub fn parse_adcget(rest: &str) -> Option<AdcGetRequest> {
    let mut parts = rest.split_whitespace();
    let kind = match parts.next()? {
        "file" => AdcGetKind::File,
        "tthl" => AdcGetKind::Tthl,
        _ => return None,
    };
    let identifier = parts.next()?.to_string();
    let start: i64 = parts.next()?.parse().ok()?;
    let bytes: i64 = parts.next()?.parse().ok()?;
    Some(AdcGetRequest { kind, identifier, start, bytes })
}

/// The three ways an `$ADCGET file` identifier resolves to content.
enum Resolved {
    /// The own file-list, pre-rendered by the caller.
    FileList,
    /// A real file on disk, with its advertised size.
    Path(PathBuf, u64),
}

/// Whether `path` can actually be served: it must stat successfully and be
/// a regular file, not a cache-only entry that's since been moved, turned
/// into a directory, or deleted out from under the share.
fn is_servable(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.is_file())
}

fn resolve_file(identifier: &str, tree: &FileTree, share_base: &Path) -> Option<Resolved> {
    if identifier == "files.xml.bz2" {
        return Some(Resolved::FileList);
    }
    if let Some(virtual_path) = identifier.strip_prefix('/') {
        let node = tree.resolve(tree.root(), virtual_path).ok().flatten()?;
        if !tree.is_file(node) {
            return None;
        }
        let path = share_base.join(virtual_path);
        if !is_servable(&path) {
            return None;
        }
        return Some(Resolved::Path(path, tree.size(node)));
    }
    if let Some(b32) = identifier.strip_prefix("TTH/") {
        let digest = base32::decode(b32).ok()?;
        let node = *tree.by_tth(&digest).first()?;
        let path = share_base.join(tree.path_from(tree.root(), node));
        if !is_servable(&path) {
            return None;
        }
        return Some(Resolved::Path(path, tree.size(node)));
    }
    None
}

/// A reply the session wants sent: either a command frame, or a command
/// frame immediately followed by a byte-range file stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CcReply {
    /// A bare command frame.
    Command(String),
    /// A command frame, then stream `length` bytes of `path` from `offset`.
    SendFile { command: String, path: PathBuf, offset: u64, length: u64 },
    /// A command frame, then the given raw bytes (used for the `tthl` blob,
    /// which isn't backed by a file on disk).
    SendBytes { command: String, bytes: Vec<u8> },
}

/// Resources an `$ADCGET` handler needs but the session does not own.
pub struct CcHandlerCtx<'a> {
    /// The shared file tree.
    pub tree: &'a FileTree,
    /// Filesystem directory the tree's virtual paths are rooted at.
    pub share_base: &'a Path,
    /// Pre-rendered, possibly-compressed `files.xml.bz2` bytes.
    pub file_list_bytes: &'a [u8],
    /// The hash-tree persistence collaborator.
    pub hash_store: &'a dyn HashStore,
    /// Locally configured slot count.
    pub configured_slots: u32,
    /// Current count of in-progress C↔C transfers.
    pub slots_in_use: u32,
}

/// One direct peer connection.
pub struct CcSession {
    /// Current state.
    pub state: CcState,
    /// Hub-encoded raw nickname of the peer, once known.
    pub peer_nick_raw: Option<String>,
    /// UTF-8 nickname of the peer.
    pub peer_nick: Option<String>,
    /// Whether a hub back-reference is set (we dialed out, or matched a
    /// prior `$RevConnectToMe`). Required before `$MyNick` is accepted.
    pub hub_attached: bool,
    /// Raw nicknames already bound to another session on the same hub.
    taken_nicks: Vec<String>,
    /// Whether the peer's `$Supports` included `ADCGet`.
    pub supports_adcget: bool,
    /// Last activity timestamp.
    pub last_activity: Instant,
    /// Last served virtual path.
    pub last_virtual_path: Option<String>,
    /// Last served file's total size.
    pub last_file_size: u64,
    /// Last served byte count.
    pub last_length: u64,
    /// Last served start offset.
    pub last_offset: u64,
    /// The first protocol/parse error seen; seals the connection.
    pub last_error: Option<CcError>,
    /// Deadline of the deferred free timer, once armed.
    pub free_deadline: Option<Instant>,
}

impl CcSession {
    /// A fresh session. `hub_attached` must be true before `$MyNick` is
    /// accepted.
    #[must_use]
    pub fn new(hub_attached: bool, taken_nicks: Vec<String>) -> Self {
        Self {
            state: CcState::Connected,
            peer_nick_raw: None,
            peer_nick: None,
            hub_attached,
            taken_nicks,
            supports_adcget: false,
            last_activity: Instant::now(),
            last_virtual_path: None,
            last_file_size: 0,
            last_length: 0,
            last_offset: 0,
            last_error: None,
            free_deadline: None,
        }
    }

    /// Arm the 30-second deferred-free timer. Idempotent.
    pub fn arm_free_timer(&mut self) {
        if self.free_deadline.is_none() {
            self.free_deadline = Some(Instant::now() + FREE_DELAY);
        }
    }

    /// Whether the deferred-free timer has fired.
    #[must_use]
    pub fn free_due(&self, now: Instant) -> bool {
        self.free_deadline.is_some_and(|d| now >= d)
    }

    fn seal(&mut self, err: CcError) {
        if self.last_error.is_none() {
            self.last_error = Some(err);
        }
        self.arm_free_timer();
    }

    /// Handle one decoded, delimiter-stripped command line.
    ///
    /// Returns the reply frames (if any) the caller should send. An error
    /// return means the session is now sealed (`last_error` set) and should
    /// be disconnected after any reply is flushed.
    pub fn handle_line(&mut self, line: &str, ctx: &CcHandlerCtx<'_>) -> Result<Vec<CcReply>, CcError> {
        self.last_activity = Instant::now();
        let Some(rest) = line.strip_prefix('$') else {
            return Ok(Vec::new());
        };
        let (cmd, rest) = rest.split_once(' ').unwrap_or((rest, ""));
        match cmd {
            "MyNick" => self.on_my_nick(rest),
            "Lock" => self.on_lock(rest),
            "Supports" => self.on_supports(rest),
            "ADCGET" => self.on_adcget(rest, ctx),
            _ => Ok(Vec::new()),
        }
    }

    fn on_my_nick(&mut self, rest: &str) -> Result<Vec<CcReply>, CcError> {
        let nick_raw = rest.trim();
        if !self.hub_attached {
            let err = CcError::Protocol("received $MyNick without a hub back-reference".to_string());
            self.seal(err.clone_for_seal());
            return Err(err);
        }
        if self.taken_nicks.iter().any(|n| n == nick_raw) {
            let err = CcError::Protocol(format!("duplicate nick {nick_raw} already connected"));
            self.seal(err.clone_for_seal());
            return Err(err);
        }
        self.peer_nick_raw = Some(nick_raw.to_string());
        self.peer_nick = Some(legacy::unescape(nick_raw));
        Ok(Vec::new())
    }

    fn on_lock(&mut self, rest: &str) -> Result<Vec<CcReply>, CcError> {
        let challenge = rest.split_whitespace().next().unwrap_or("");
        if !challenge.starts_with(legacy::EXTENDED_PROTOCOL_MARKER) {
            let err = CcError::Protocol("lock missing EXTENDEDPROTOCOL marker".to_string());
            self.seal(err.clone_for_seal());
            return Err(err);
        }
        let key = legacy::keylock::compute(challenge.as_bytes());
        Ok(vec![
            CcReply::Command("$Supports MiniSlots XmlBZList ADCGet TTHL TTHF".to_string()),
            CcReply::Command("$Direction Upload 0".to_string()),
            CcReply::Command(format!("$Key {}", String::from_utf8_lossy(&key))),
        ])
    }

    fn on_supports(&mut self, rest: &str) -> Result<Vec<CcReply>, CcError> {
        self.supports_adcget = rest.split_whitespace().any(|cap| cap == "ADCGet");
        if !self.supports_adcget {
            let err = CcError::Protocol("peer did not advertise ADCGet support".to_string());
            self.seal(err.clone_for_seal());
            return Err(err);
        }
        Ok(Vec::new())
    }

    fn on_adcget(&mut self, rest: &str, ctx: &CcHandlerCtx<'_>) -> Result<Vec<CcReply>, CcError> {
        if self.peer_nick_raw.is_none() {
            let err = CcError::Protocol("received $ADCGET before $MyNick".to_string());
            self.seal(err.clone_for_seal());
            return Err(err);
        }
        self.state = CcState::Ready;
        let Some(req) = parse_adcget(rest) else {
            let err = CcError::Parse("malformed $ADCGET".to_string());
            self.seal(err.clone_for_seal());
            return Err(err);
        };

        Ok(match req.kind {
            AdcGetKind::Tthl => self.serve_tthl(&req, ctx),
            AdcGetKind::File => self.serve_file(&req, ctx),
        })
    }

    fn serve_tthl(&mut self, req: &AdcGetRequest, ctx: &CcHandlerCtx<'_>) -> Vec<CcReply> {
        if req.start != 0 {
            return vec![CcReply::Command("$Error Invalid ADCGET arguments".to_string())];
        }
        let Some(root_b32) = req.identifier.strip_prefix("TTH/") else {
            return vec![CcReply::Command("$Error File Not Available".to_string())];
        };
        let Ok(root) = base32::decode(root_b32) else {
            return vec![CcReply::Command("$Error File Not Available".to_string())];
        };
        match ctx.hash_store.hash_tthl(&root) {
            Some(blob) => vec![CcReply::SendBytes {
                command: format!("$ADCSND tthl {} 0 {}", req.identifier, blob.len()),
                bytes: blob,
            }],
            None => vec![CcReply::Command("$Error File Not Available".to_string())],
        }
    }

    fn serve_file(&mut self, req: &AdcGetRequest, ctx: &CcHandlerCtx<'_>) -> Vec<CcReply> {
        let not_available = vec![CcReply::Command("$Error File Not Available".to_string())];

        match resolve_file(&req.identifier, ctx.tree, ctx.share_base) {
            Some(Resolved::FileList) => {
                let len = ctx.file_list_bytes.len() as u64;
                if req.start < 0 || req.start as u64 > len {
                    return not_available;
                }
                let start = req.start as u64;
                let remaining = len - start;
                let want = if req.bytes < 0 || req.bytes as u64 > remaining {
                    remaining
                } else {
                    req.bytes as u64
                };
                let bytes = ctx.file_list_bytes[start as usize..(start + want) as usize].to_vec();
                vec![CcReply::SendBytes {
                    command: format!("$ADCSND file {} {start} {}", req.identifier, bytes.len() as u64),
                    bytes,
                }]
            }
            Some(Resolved::Path(path, size)) => {
                if req.start < 0 || req.start as u64 > size {
                    return not_available;
                }
                let start = req.start as u64;
                let length = if req.bytes < 0 || req.bytes as u64 > size - start {
                    size - start
                } else {
                    req.bytes as u64
                };

                if length >= SLOT_THRESHOLD && ctx.slots_in_use >= ctx.configured_slots {
                    return vec![CcReply::Command("$MaxedOut".to_string())];
                }

                self.last_virtual_path = Some(req.identifier.clone());
                self.last_file_size = size;
                self.last_offset = start;
                self.last_length = length;

                vec![CcReply::SendFile {
                    command: format!("$ADCSND file {} {start} {length}", legacy::escape(&req.identifier)),
                    path,
                    offset: start,
                    length,
                }]
            }
            None => not_available,
        }
    }
}

impl CcError {
    /// Work around [`CcError`] not implementing `Clone` (its `Io` variant
    /// wraps a non-`Clone` transport error): rebuild an equivalent
    /// `protocol`/`parse` error for sealing while the original is returned
    /// to the caller.
    fn clone_for_seal(&self) -> Self {
        match self {
            Self::Protocol(s) => Self::Protocol(s.clone()),
            Self::Parse(s) => Self::Parse(s.clone()),
            Self::Io(_) => Self::Protocol("transport error".to_string()),
        }
    }
}
