//! Hub session: the protocol-dual state machine for one hub connection.
//!
//! Both wire dialects are driven through one [`HubSession`]; the tagged
//! [`HubDial`] carries each dialect's own sub-state, per-variant, behind a
//! shared handler entry point ([`HubSession::handle_frame`]).

pub mod legacy;
pub mod modern;
pub mod user;

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use dc_files::{FileMask, FileTree, SearchQuery, SizeConstraint};

use crate::charset::Charset;
use crate::error::HubError;
use crate::sink::{MessageSink, Priority};
use user::HubUser;

/// How long a hub session waits before giving up on reconnecting after an
/// I/O error.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(30);
/// How often the self-advertisement is rebuilt and (if changed) resent.
pub const ADVERTISEMENT_TICK: Duration = Duration::from_secs(300);

/// Legacy-protocol sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyState {
    /// Waiting for the initial `$Lock` challenge.
    AwaitLock,
    /// Past `$Hello` for our own nick; roster/chat traffic flows normally.
    Validated,
}

/// Modern-protocol sub-state, per §4.5.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModernState {
    /// Before `ISID`.
    Protocol,
    /// After `ISID`, before `IINF`.
    Identify,
    /// Reserved for a verification step the original protocol specifies but
    /// this client does not initiate.
    Verify,
    /// Past `IINF`; roster/chat traffic flows normally.
    Normal,
}

/// The tagged dial variant: each dialect carries its own sub-state, per the
/// "dual protocol" design note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubDial {
    /// `|`-terminated ASCII.
    Legacy(LegacyState),
    /// Newline-terminated token frames.
    Modern(ModernState),
}

/// The user roster: primary lookup by raw nickname, secondary lookup by
/// modern-protocol session id.
#[derive(Debug, Default)]
pub struct Roster {
    by_name: HashMap<String, HubUser>,
    sid_to_name: HashMap<u32, String>,
}

impl Roster {
    /// Insert a bare placeholder if `name_raw` is not already present.
    pub fn ensure(&mut self, name: &str, name_raw: &str) {
        self.by_name
            .entry(name_raw.to_string())
            .or_insert_with(|| HubUser::named(name, name_raw));
    }

    /// Fetch a user by raw nickname.
    #[must_use]
    pub fn by_name(&self, name_raw: &str) -> Option<&HubUser> {
        self.by_name.get(name_raw)
    }

    /// Mutate (inserting if absent) the record for `name_raw`.
    pub fn upsert_by_name(&mut self, name_raw: &str, f: impl FnOnce(&mut HubUser)) {
        let entry = self
            .by_name
            .entry(name_raw.to_string())
            .or_insert_with(|| HubUser::named(name_raw, name_raw));
        f(entry);
    }

    /// Mutate (inserting if absent) the record for a modern-protocol sid,
    /// maintaining the sid→name secondary index.
    pub fn upsert_by_sid(&mut self, sid: u32, fallback_name: &str, f: impl FnOnce(&mut HubUser)) {
        let name_raw = self
            .sid_to_name
            .get(&sid)
            .cloned()
            .unwrap_or_else(|| fallback_name.to_string());
        self.sid_to_name.insert(sid, name_raw.clone());
        let entry = self
            .by_name
            .entry(name_raw.clone())
            .or_insert_with(|| HubUser::named(&name_raw, &name_raw));
        entry.session_id = Some(sid);
        f(entry);
    }

    /// Remove a user by raw nickname.
    pub fn remove_by_name(&mut self, name_raw: &str) {
        if let Some(user) = self.by_name.remove(name_raw) {
            if let Some(sid) = user.session_id {
                self.sid_to_name.remove(&sid);
            }
        }
    }

    /// Remove a user by modern-protocol sid.
    pub fn remove_by_sid(&mut self, sid: u32) {
        if let Some(name) = self.sid_to_name.remove(&sid) {
            self.by_name.remove(&name);
        }
    }

    /// Clear every `is_op` flag. Used by `$OpList`, which lists the full set
    /// of current operators each time it is sent.
    pub fn clear_all_op_flags(&mut self) {
        for user in self.by_name.values_mut() {
            user.is_op = false;
        }
    }

    /// Number of users with at least one shared file (`share_size > 0`).
    #[must_use]
    pub fn share_count(&self) -> usize {
        self.by_name.values().filter(|u| u.share_size > 0).count()
    }

    /// Sum of every user's advertised share size.
    #[must_use]
    pub fn share_size_total(&self) -> u64 {
        self.by_name.values().map(|u| u.share_size).sum()
    }

    /// Iterate all known users.
    pub fn iter(&self) -> impl Iterator<Item = &HubUser> {
        self.by_name.values()
    }

    /// Number of known users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether the roster is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Resources a handler needs but the hub session does not own itself:
/// the process-wide share tree, slot accounting, and the message sink.
pub struct HandlerCtx<'a> {
    /// The shared file tree, used to answer `$Search`/`SCH`.
    pub tree: &'a FileTree,
    /// This hub's locally configured upload slot count.
    pub configured_slots: u32,
    /// Current count of in-progress C↔C transfers (see `slots::in_use`).
    pub slots_in_use: u32,
    /// Where user-visible messages go.
    pub sink: &'a dyn MessageSink,
}

/// A reply a handler wants sent back out over this hub's own channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutFrame(pub String);

/// Aggregate state for one upstream hub connection.
pub struct HubSession {
    /// Which dialect this hub speaks, and that dialect's sub-state.
    pub dial: HubDial,
    /// Hub-encoded raw nickname.
    pub nick_raw: String,
    /// UTF-8 nickname.
    pub nick: String,
    /// Modern-protocol session id once assigned by `ISID`.
    pub own_sid: Option<u32>,
    /// This client's long-term identity, for the modern dialect's `BINF`.
    pub cid: [u8; 24],
    /// This client's identity preimage, for the modern dialect's `BINF`.
    pub pid: [u8; 24],
    /// Client name/version string advertised in `BINF`'s `VE` field.
    pub client_version: String,
    /// Advertised upload slots.
    pub advertised_slots: u32,
    /// Whether this account is registered on the hub.
    pub is_registered: bool,
    /// Whether this account holds operator status on the hub.
    pub is_op: bool,
    /// Configured password, if any (sent in reply to `$GetPass`).
    pub password: Option<String>,
    /// Per-hub character set.
    pub charset: Charset,
    /// Display name of the hub, used in `$SR` replies lacking a TTH.
    pub hub_name: String,
    /// `host:port` of the hub, used in `$SR` replies.
    pub hub_addr: String,
    /// The user roster.
    pub roster: Roster,
    /// Raw nicknames explicitly granted an upload slot.
    pub grants: HashSet<String>,
    /// The last self-advertisement frame sent, for tick suppression.
    pub advertisement_cache: Option<String>,
    /// Deadline of the pending reconnect timer, if armed.
    pub reconnect_deadline: Option<Instant>,
    /// Deadline of the next self-advertisement tick.
    pub adv_deadline: Instant,
    /// Whether the legacy `NoGetINFO` capability was advertised by the hub.
    pub no_get_info: bool,
    /// Two-phase flag: the initial roster flush has completed.
    pub received_first: bool,
    /// Two-phase flag: join handshake fully complete.
    pub join_complete: bool,
    /// Whether the peer has asked us to disconnect (`$ForceMove`, fatal
    /// `ISTA`, own-sid `IQUI`).
    pub disconnect_requested: bool,
    /// `ip:port` targets this session wants actively connected to, queued by
    /// `$ConnectToMe`/`$RevConnectToMe` handling for the runtime to dial.
    pub pending_connects: Vec<String>,
    /// `(addr, payload)` UDP search replies queued for the runtime to send.
    pub pending_udp_sends: Vec<(String, String)>,
    /// Frames to send back over this hub's own TCP channel.
    pub outbox: Vec<OutFrame>,
}

impl HubSession {
    /// A fresh legacy-dialect session.
    #[must_use]
    pub fn new_legacy(nick: impl Into<String>, hub_name: impl Into<String>, hub_addr: impl Into<String>) -> Self {
        Self::new(HubDial::Legacy(LegacyState::AwaitLock), nick, hub_name, hub_addr)
    }

    /// A fresh modern-dialect session.
    #[must_use]
    pub fn new_modern(nick: impl Into<String>, hub_name: impl Into<String>, hub_addr: impl Into<String>) -> Self {
        Self::new(HubDial::Modern(ModernState::Protocol), nick, hub_name, hub_addr)
    }

    fn new(dial: HubDial, nick: impl Into<String>, hub_name: impl Into<String>, hub_addr: impl Into<String>) -> Self {
        let nick = nick.into();
        Self {
            dial,
            nick_raw: nick.clone(),
            nick,
            own_sid: None,
            cid: [0u8; 24],
            pid: [0u8; 24],
            client_version: "dcfish 0.1".to_string(),
            advertised_slots: 0,
            is_registered: false,
            is_op: false,
            password: None,
            charset: Charset::utf8(),
            hub_name: hub_name.into(),
            hub_addr: hub_addr.into(),
            roster: Roster::default(),
            grants: HashSet::new(),
            advertisement_cache: None,
            reconnect_deadline: None,
            adv_deadline: Instant::now() + ADVERTISEMENT_TICK,
            no_get_info: false,
            received_first: false,
            join_complete: false,
            disconnect_requested: false,
            pending_connects: Vec::new(),
            pending_udp_sends: Vec::new(),
            outbox: Vec::new(),
        }
    }

    /// Arm the 30-second reconnect timer. Idempotent: re-arming while
    /// already armed leaves the original deadline alone (a single timer, not
    /// one per error).
    pub fn arm_reconnect_timer(&mut self) {
        if self.reconnect_deadline.is_none() {
            self.reconnect_deadline = Some(Instant::now() + RECONNECT_DELAY);
        }
    }

    /// Clear the reconnect timer (e.g. on manual disconnect).
    pub fn clear_reconnect_timer(&mut self) {
        self.reconnect_deadline = None;
    }

    /// Whether the reconnect timer has fired.
    #[must_use]
    pub fn reconnect_due(&self, now: Instant) -> bool {
        self.reconnect_deadline.is_some_and(|d| now >= d)
    }

    fn send(&mut self, frame: impl Into<String>) {
        self.outbox.push(OutFrame(frame.into()));
    }

    /// Decode, dispatch, and handle one wire frame (without its delimiter).
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Protocol`]/[`HubError::Parse`] for a malformed
    /// frame; per §7, the caller logs and drops the frame rather than
    /// disconnecting, except where the frame itself requires closure (which
    /// this sets via [`HubSession::disconnect_requested`] instead of
    /// returning an error).
    pub fn handle_frame(&mut self, raw: &[u8], ctx: &HandlerCtx<'_>) -> Result<(), HubError> {
        let text = self.charset.decode(raw);
        match self.dial {
            HubDial::Legacy(_) => self.handle_legacy_line(&text, ctx),
            HubDial::Modern(_) => self.handle_modern_line(&text, ctx),
        }
    }

    // ---- legacy dialect -------------------------------------------------

    fn handle_legacy_line(&mut self, line: &str, ctx: &HandlerCtx<'_>) -> Result<(), HubError> {
        if !line.starts_with('$') {
            // Unprefixed lines are main-chat traffic.
            ctx.sink.post(Priority::Low, line);
            return Ok(());
        }
        let (cmd, rest) = line[1..].split_once(' ').unwrap_or((&line[1..], ""));
        match cmd {
            "Lock" => self.legacy_on_lock(rest),
            "GetPass" => self.legacy_on_get_pass(),
            "Hello" => self.legacy_on_hello(rest),
            "NickList" => {
                self.legacy_on_nick_list(rest, false);
                Ok(())
            }
            "OpList" => {
                self.legacy_on_nick_list(rest, true);
                Ok(())
            }
            "MyINFO" => self.legacy_on_myinfo(rest),
            "Quit" => {
                self.roster.remove_by_name(rest.trim());
                Ok(())
            }
            "To:" => {
                self.legacy_on_to(rest, ctx);
                Ok(())
            }
            "ForceMove" => {
                ctx.sink.post(Priority::High, &format!("moved to {rest}"));
                self.disconnect_requested = true;
                Ok(())
            }
            "ConnectToMe" => {
                if let Some((_, addr)) = rest.split_once(' ') {
                    self.pending_connects.push(addr.to_string());
                }
                Ok(())
            }
            "RevConnectToMe" => {
                // Reachability is a runtime/config concern; just log the
                // request for now.
                tracing::debug!(rest, "received $RevConnectToMe");
                Ok(())
            }
            "Search" => {
                self.legacy_on_search(rest, ctx);
                Ok(())
            }
            "BadPass" => {
                ctx.sink.post(Priority::High, "bad password");
                self.disconnect_requested = true;
                Err(HubError::Auth("bad password".to_string()))
            }
            "ValidateDenide" => {
                ctx.sink.post(Priority::High, "nickname already in use");
                self.disconnect_requested = true;
                Err(HubError::Auth("nickname denied".to_string()))
            }
            _ => Ok(()),
        }
    }

    fn legacy_on_lock(&mut self, rest: &str) -> Result<(), HubError> {
        let challenge = rest.split_whitespace().next().unwrap_or("");
        if !challenge.starts_with(legacy::EXTENDED_PROTOCOL_MARKER) {
            return Err(HubError::Protocol("lock missing EXTENDEDPROTOCOL marker".to_string()));
        }
        let key = legacy::keylock::compute(challenge.as_bytes());
        self.send("$Supports NoGetINFO NoHello");
        self.send(format!("$Key {}", String::from_utf8_lossy(&key)));
        self.send(format!("$ValidateNick {}", legacy::escape(&self.nick_raw)));
        Ok(())
    }

    fn legacy_on_get_pass(&mut self) -> Result<(), HubError> {
        if let Some(password) = self.password.clone() {
            self.send(format!("$MyPass {password}"));
        }
        Ok(())
    }

    fn legacy_on_hello(&mut self, rest: &str) -> Result<(), HubError> {
        let nick_raw = rest.trim();
        if nick_raw == self.nick_raw {
            self.dial = HubDial::Legacy(LegacyState::Validated);
            self.send("$Version 1,0091");
            self.send("$GetNickList");
        } else {
            self.roster.ensure(nick_raw, nick_raw);
            if !self.no_get_info {
                self.send(format!("$GetINFO {} {}", legacy::escape(&self.nick_raw), legacy::escape(nick_raw)));
            }
        }
        Ok(())
    }

    fn legacy_on_nick_list(&mut self, rest: &str, is_op_list: bool) {
        if is_op_list {
            self.roster.clear_all_op_flags();
        }
        for name in rest.split("$$").filter(|s| !s.is_empty()) {
            self.roster.ensure(name, name);
            if is_op_list {
                self.roster.upsert_by_name(name, |u| u.is_op = true);
            }
        }
        self.received_first = true;
        self.join_complete = true;
    }

    fn legacy_on_myinfo(&mut self, rest: &str) -> Result<(), HubError> {
        let rest = rest.strip_prefix("$ALL ").ok_or_else(|| HubError::Parse("malformed $MyINFO".to_string()))?;
        let (nick_raw, payload) = rest.split_once(' ').ok_or_else(|| HubError::Parse("malformed $MyINFO".to_string()))?;
        let info = legacy::parse_myinfo(payload).ok_or_else(|| HubError::Parse("malformed $MyINFO payload".to_string()))?;
        self.roster.upsert_by_name(nick_raw, |u| {
            u.has_info = true;
            u.description = info.description;
            u.slots = info.slots;
            u.hubs_normal = info.hubs_normal;
            u.hubs_registered = info.hubs_registered;
            u.hubs_op = info.hubs_op;
            u.connection = info.connection;
            u.active = info.active;
            u.email = info.email;
            u.share_size = info.share_size;
        });
        Ok(())
    }

    fn legacy_on_to(&mut self, rest: &str, ctx: &HandlerCtx<'_>) {
        let Some(from_idx) = rest.find("From: ") else { return };
        let after_from = &rest[from_idx + "From: ".len()..];
        let Some((sender, msg_part)) = after_from.split_once(' ') else { return };
        let msg = msg_part.find('$').map_or(msg_part, |i| &msg_part[i + 1..]);
        ctx.sink.post(Priority::Low, &format!("{}: {}", legacy::unescape(sender), legacy::unescape(msg)));
    }

    fn legacy_on_search(&mut self, rest: &str, ctx: &HandlerCtx<'_>) {
        let Some((source, params)) = rest.split_once(' ') else { return };
        let mut fields = params.splitn(5, '?');
        let size_restricted = fields.next() == Some("T");
        let is_max = fields.next() == Some("T");
        let size: u64 = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let type_code = fields.next().unwrap_or("1");
        let pattern = fields.next().unwrap_or("").replace('$', " ");

        let size_constraint = if !size_restricted {
            SizeConstraint::Any
        } else if is_max {
            SizeConstraint::AtMost(size)
        } else {
            SizeConstraint::AtLeast(size)
        };
        let mask = match type_code {
            "8" => FileMask::DirsOnly,
            "1" => FileMask::Any,
            _ => FileMask::FilesOnly,
        };
        let from_broadcast = source.starts_with("Hub:");
        let max_results = if from_broadcast { 5 } else { 10 };

        let query = SearchQuery {
            size: size_constraint,
            mask,
            extensions: Vec::new(),
            include: pattern.split_whitespace().map(str::to_string).collect(),
            max_results,
        };
        let hits = ctx.tree.search(ctx.tree.root(), &query);
        let slots_free = ctx.configured_slots.saturating_sub(ctx.slots_in_use);

        for hit in hits {
            let path = hit.path.replace('/', "\\");
            let sr = legacy::format_sr(
                &self.nick,
                &path,
                ctx.tree.size(hit.node),
                slots_free,
                ctx.configured_slots,
                ctx.tree.tth(hit.node).as_ref(),
                &self.hub_name,
                &self.hub_addr,
            );
            if let Some(sender) = source.strip_prefix("Hub:") {
                self.send(format!("{sr}\u{5}{sender}"));
            } else {
                self.pending_udp_sends.push((source.to_string(), sr));
            }
        }
    }

    // ---- modern dialect ---------------------------------------------

    fn handle_modern_line(&mut self, line: &str, ctx: &HandlerCtx<'_>) -> Result<(), HubError> {
        if line.len() < 2 {
            return Ok(());
        }
        let (cmd, params) = line[1..].split_once(' ').unwrap_or((&line[1..], ""));
        match cmd {
            "SID" => self.modern_on_isid(params),
            "INF" if line.starts_with('I') => self.modern_on_iinf(params),
            "INF" if line.starts_with('B') => {
                self.modern_on_binf(params)?;
                Ok(())
            }
            "QUI" => {
                self.modern_on_iquit(params);
                Ok(())
            }
            "STA" => {
                self.modern_on_ista(params, ctx);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn modern_on_isid(&mut self, params: &str) -> Result<(), HubError> {
        let sid = modern::sid::decode(params.trim()).ok_or_else(|| HubError::Parse("malformed ISID".to_string()))?;
        self.own_sid = Some(sid);
        self.dial = HubDial::Modern(ModernState::Identify);
        let binf = modern::build_own_binf(
            sid,
            &self.cid,
            &self.pid,
            &self.nick,
            &self.client_version,
            self.advertised_slots,
            1,
            u32::from(self.is_registered),
            u32::from(self.is_op),
            "",
            "",
        );
        self.send(format!("BINF {binf}"));
        Ok(())
    }

    fn modern_on_iinf(&mut self, params: &str) -> Result<(), HubError> {
        if let Some(nick) = params.strip_prefix("NI") {
            self.nick = nick.to_string();
        }
        self.dial = HubDial::Modern(ModernState::Normal);
        Ok(())
    }

    fn modern_on_binf(&mut self, params: &str) -> Result<(), HubError> {
        let binf = modern::parse_binf(params).map_err(|e| HubError::Parse(e.to_string()))?;
        if Some(binf.source_sid) == self.own_sid {
            if self.received_first {
                self.join_complete = true;
            }
            self.received_first = true;
            return Ok(());
        }
        let sid = binf.source_sid;
        let nick_fallback = binf.nick.clone().unwrap_or_default();
        self.roster.upsert_by_sid(sid, &nick_fallback, |u| {
            u.has_info = true;
            if let Some(nick) = binf.nick {
                u.name_raw.clone_from(&nick);
                u.name = nick;
            }
            if let Some(desc) = binf.description {
                u.description = desc;
            }
            if let Some(ver) = binf.version {
                u.client = ver;
            }
            if let Some(email) = binf.email {
                u.email = email;
            }
            if let Some(cid) = binf.cid {
                u.cid = Some(cid);
            }
            if let Some(size) = binf.share_size {
                u.share_size = size;
            }
            if let Some(n) = binf.hubs_normal {
                u.hubs_normal = n;
            }
            if let Some(n) = binf.hubs_registered {
                u.hubs_registered = n;
            }
            if let Some(n) = binf.hubs_op {
                u.hubs_op = n;
            }
            if let Some(n) = binf.slots {
                u.slots = n;
            }
            if let Some(bps) = binf.auto_slot_bps {
                u.auto_slot_bps = bps;
            }
            u.active = binf.active;
            u.is_op = binf.is_op;
        });
        Ok(())
    }

    fn modern_on_iquit(&mut self, params: &str) {
        let Some(sid) = modern::sid::decode(params.split(' ').next().unwrap_or("")) else {
            return;
        };
        self.roster.remove_by_sid(sid);
        if Some(sid) == self.own_sid {
            self.disconnect_requested = true;
        }
    }

    fn modern_on_ista(&mut self, params: &str, ctx: &HandlerCtx<'_>) {
        let Some(ista) = modern::parse_ista(params) else { return };
        let priority = if ista.is_fatal() { Priority::High } else { Priority::Low };
        ctx.sink.post(priority, &ista.message);
        if ista.is_fatal() {
            self.disconnect_requested = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dc_files::FileTree;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<(Priority, String)>>);

    impl MessageSink for CollectingSink {
        fn post(&self, priority: Priority, text: &str) {
            self.0.lock().unwrap().push((priority, text.to_string()));
        }
    }

    fn ctx<'a>(tree: &'a FileTree, sink: &'a dyn MessageSink) -> HandlerCtx<'a> {
        HandlerCtx {
            tree,
            configured_slots: 3,
            slots_in_use: 1,
            sink,
        }
    }

    #[test]
    fn legacy_lock_rejects_without_marker() {
        let mut session = HubSession::new_legacy("me", "H", "1.2.3.4:411");
        let tree = FileTree::new();
        let sink = CollectingSink::default();
        let err = session.handle_frame(b"$Lock bogus Pk=x", &ctx(&tree, &sink));
        assert!(err.is_err());
    }

    #[test]
    fn legacy_lock_sends_key_and_validate_nick() {
        let mut session = HubSession::new_legacy("me", "H", "1.2.3.4:411");
        let tree = FileTree::new();
        let sink = CollectingSink::default();
        session
            .handle_frame(b"$Lock EXTENDEDPROTOCOL_abcdefgh Pk=dcfish", &ctx(&tree, &sink))
            .unwrap();
        assert_eq!(session.outbox.len(), 3);
        assert!(session.outbox[2].0.starts_with("$ValidateNick me"));
    }

    #[test]
    fn legacy_hello_own_nick_transitions_to_validated() {
        let mut session = HubSession::new_legacy("me", "H", "1.2.3.4:411");
        let tree = FileTree::new();
        let sink = CollectingSink::default();
        session.handle_frame(b"$Hello me", &ctx(&tree, &sink)).unwrap();
        assert_eq!(session.dial, HubDial::Legacy(LegacyState::Validated));
    }

    #[test]
    fn legacy_hello_other_adds_to_roster_and_requests_info() {
        let mut session = HubSession::new_legacy("me", "H", "1.2.3.4:411");
        let tree = FileTree::new();
        let sink = CollectingSink::default();
        session.handle_frame(b"$Hello bob", &ctx(&tree, &sink)).unwrap();
        assert!(session.roster.by_name("bob").is_some());
        assert!(session.outbox.iter().any(|f| f.0.starts_with("$GetINFO")));
    }

    #[test]
    fn legacy_oplist_clears_stale_op_flags() {
        let mut session = HubSession::new_legacy("me", "H", "1.2.3.4:411");
        session.roster.upsert_by_name("alice", |u| u.is_op = true);
        let tree = FileTree::new();
        let sink = CollectingSink::default();
        session.handle_frame(b"$OpList bob$$", &ctx(&tree, &sink)).unwrap();
        assert!(!session.roster.by_name("alice").unwrap().is_op);
        assert!(session.roster.by_name("bob").unwrap().is_op);
    }

    #[test]
    fn legacy_myinfo_updates_roster() {
        let mut session = HubSession::new_legacy("me", "H", "1.2.3.4:411");
        let tree = FileTree::new();
        let sink = CollectingSink::default();
        session
            .handle_frame(
                "$MyINFO $ALL bob desc<++ S:3>$ $Cable1\u{1}$bob@x.com$42$".as_bytes(),
                &ctx(&tree, &sink),
            )
            .unwrap();
        let bob = session.roster.by_name("bob").unwrap();
        assert_eq!(bob.slots, 3);
        assert_eq!(bob.share_size, 42);
        assert!(bob.active);
    }

    #[test]
    fn legacy_bad_pass_disconnects_and_reports_high_priority() {
        let mut session = HubSession::new_legacy("me", "H", "1.2.3.4:411");
        let tree = FileTree::new();
        let sink = CollectingSink::default();
        let result = session.handle_frame(b"$BadPass", &ctx(&tree, &sink));
        assert!(result.is_err());
        assert!(session.disconnect_requested);
        let messages = sink.0.into_inner().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].0 >= Priority::Medium);
    }

    #[test]
    fn reconnect_timer_is_idempotent_and_clearable() {
        let mut session = HubSession::new_legacy("me", "H", "1.2.3.4:411");
        session.arm_reconnect_timer();
        let first = session.reconnect_deadline;
        session.arm_reconnect_timer();
        assert_eq!(session.reconnect_deadline, first);
        session.clear_reconnect_timer();
        assert!(session.reconnect_deadline.is_none());
    }

    #[test]
    fn modern_isid_then_binf_populates_roster() {
        let mut session = HubSession::new_modern("me", "H", "1.2.3.4:411");
        let tree = FileTree::new();
        let sink = CollectingSink::default();
        session.handle_frame(b"ISID AAAA", &ctx(&tree, &sink)).unwrap();
        assert_eq!(session.dial, HubDial::Modern(ModernState::Identify));
        session
            .handle_frame(b"BINF BBBB NIbob SL2 SUTCP4 CT5", &ctx(&tree, &sink))
            .unwrap();
        let bob = session.roster.by_name("bob").unwrap();
        assert_eq!(bob.slots, 2);
        assert!(bob.active);
        assert!(bob.is_op);
    }

    #[test]
    fn modern_own_sid_iquit_requests_disconnect() {
        let mut session = HubSession::new_modern("me", "H", "1.2.3.4:411");
        let tree = FileTree::new();
        let sink = CollectingSink::default();
        session.handle_frame(b"ISID AAAA", &ctx(&tree, &sink)).unwrap();
        session.handle_frame(b"IQUI AAAA", &ctx(&tree, &sink)).unwrap();
        assert!(session.disconnect_requested);
    }

    #[test]
    fn modern_fatal_ista_requests_disconnect() {
        let mut session = HubSession::new_modern("me", "H", "1.2.3.4:411");
        let tree = FileTree::new();
        let sink = CollectingSink::default();
        session.handle_frame(b"ISTA 230 kicked", &ctx(&tree, &sink)).unwrap();
        assert!(session.disconnect_requested);
    }
}
