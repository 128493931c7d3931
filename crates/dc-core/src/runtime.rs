//! Process-wide session registries.
//!
//! The list of C↔C sessions and the list of hub sessions are logically
//! process-wide: a C↔C session points back at the hub that arranged it, and
//! a hub forgets every C↔C session it spawned when it closes. Rather than
//! true globals, both lists live on one [`Runtime`] passed to every
//! handler. Sessions reference each other only by an opaque id and
//! re-resolve it on use, which sidesteps the lifetime cycle — "forget the
//! hub" is just writing a null id, not chasing a dangling reference.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dc_transport::Framed;

use crate::cc::CcSession;
use crate::hub::HubSession;

/// Opaque handle to a registered hub session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HubId(u64);

/// Opaque handle to a registered C↔C session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CcId(u64);

/// A registered hub session plus the transport it owns.
pub struct HubEntry {
    /// The protocol state machine.
    pub session: HubSession,
    /// Its socket.
    pub transport: Framed,
}

/// A registered C↔C session plus its transport and owning hub, if any.
pub struct CcEntry {
    /// The protocol state machine.
    pub session: CcSession,
    /// Its socket.
    pub transport: Framed,
    /// The hub that arranged this connection, if it's still open.
    pub hub: Option<HubId>,
}

/// Process-wide session registries, passed to every handler rather than
/// reached for as true globals.
pub struct Runtime {
    next_id: AtomicU64,
    hubs: DashMap<HubId, HubEntry>,
    ccs: DashMap<CcId, CcEntry>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// An empty runtime.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            hubs: DashMap::new(),
            ccs: DashMap::new(),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register a hub session, returning its id.
    pub fn insert_hub(&self, session: HubSession, transport: Framed) -> HubId {
        let id = HubId(self.next_id());
        self.hubs.insert(id, HubEntry { session, transport });
        id
    }

    /// Remove a hub session. Every C↔C session still pointing at it
    /// forgets the reference rather than being left dangling.
    pub fn remove_hub(&self, id: HubId) -> Option<HubEntry> {
        for mut entry in self.ccs.iter_mut() {
            if entry.hub == Some(id) {
                entry.hub = None;
            }
        }
        self.hubs.remove(&id).map(|(_, entry)| entry)
    }

    /// Register a C↔C session, returning its id.
    pub fn insert_cc(&self, session: CcSession, transport: Framed, hub: Option<HubId>) -> CcId {
        let id = CcId(self.next_id());
        self.ccs.insert(id, CcEntry { session, transport, hub });
        id
    }

    /// Remove a C↔C session. Called once its deferred free timer fires,
    /// never immediately on disconnect, so in-flight reply frames can
    /// drain first.
    pub fn remove_cc(&self, id: CcId) -> Option<CcEntry> {
        self.ccs.remove(&id).map(|(_, entry)| entry)
    }

    /// Number of open hub sessions.
    #[must_use]
    pub fn hub_count(&self) -> usize {
        self.hubs.len()
    }

    /// Number of open C↔C sessions.
    #[must_use]
    pub fn cc_count(&self) -> usize {
        self.ccs.len()
    }

    /// Slot admission's `in_use`: the count of C↔C sessions whose
    /// transport reports a non-zero remaining byte count. Rescans the
    /// registry on every call; see [`crate::slots`].
    #[must_use]
    pub fn slots_in_use(&self) -> u32 {
        self.ccs
            .iter()
            .filter(|entry| entry.transport.streaming_remaining() > 0)
            .count() as u32
    }

    /// Hub-presence counts for advertisement building: open hub sessions
    /// discriminated as operator / registered / normal.
    #[must_use]
    pub fn hub_presence_counts(&self) -> (u32, u32, u32) {
        let mut normal = 0u32;
        let mut registered = 0u32;
        let mut op = 0u32;
        for entry in self.hubs.iter() {
            if entry.session.is_op {
                op += 1;
            } else if entry.session.is_registered {
                registered += 1;
            } else {
                normal += 1;
            }
        }
        (normal, registered, op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dc_transport::{Delimiter, Framed};
    use tokio::net::{TcpListener, TcpStream};

    async fn paired_transport() -> Framed {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move { listener.accept().await.unwrap() });
        let stream = TcpStream::connect(addr).await.unwrap();
        server.await.unwrap();
        Framed::from_stream(stream, Delimiter::Pipe)
    }

    #[tokio::test]
    async fn removing_a_hub_clears_back_references() {
        let runtime = Runtime::new();
        let hub_session = HubSession::new_legacy("me", "TestHub", "1.2.3.4:411");
        let hub_transport = paired_transport().await;
        let hub_id = runtime.insert_hub(hub_session, hub_transport);

        let cc_session = CcSession::new(true, Vec::new());
        let cc_transport = paired_transport().await;
        let cc_id = runtime.insert_cc(cc_session, cc_transport, Some(hub_id));

        runtime.remove_hub(hub_id);
        assert_eq!(runtime.hub_count(), 0);
        assert_eq!(runtime.ccs.get(&cc_id).unwrap().hub, None);
    }

    #[tokio::test]
    async fn slots_in_use_is_zero_for_idle_sessions() {
        let runtime = Runtime::new();
        let cc_session = CcSession::new(true, Vec::new());
        let transport = paired_transport().await;
        runtime.insert_cc(cc_session, transport, None);
        assert_eq!(runtime.slots_in_use(), 0);
    }

    #[tokio::test]
    async fn hub_presence_counts_discriminate_by_role() {
        let runtime = Runtime::new();
        let mut op_hub = HubSession::new_legacy("me", "OpHub", "1.2.3.4:411");
        op_hub.is_op = true;
        let mut reg_hub = HubSession::new_legacy("me", "RegHub", "1.2.3.4:412");
        reg_hub.is_registered = true;
        let normal_hub = HubSession::new_legacy("me", "NormalHub", "1.2.3.4:413");

        runtime.insert_hub(op_hub, paired_transport().await);
        runtime.insert_hub(reg_hub, paired_transport().await);
        runtime.insert_hub(normal_hub, paired_transport().await);

        assert_eq!(runtime.hub_presence_counts(), (1, 1, 1));
    }
}
