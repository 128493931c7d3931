//! Slot admission: the process-wide policy layer that caps concurrent
//! paid (slot-bearing) transfers.
//!
//! A single counter: the number of C↔C sessions whose transport reports a
//! non-zero remaining byte count. [`in_use`] re-scans the registry on each
//! query rather than maintaining a cached counter — the registry is bounded
//! by the configured listen backlog plus active sessions, so the rescan is
//! cheap, and a cached counter risks drifting from reality on every
//! disconnect path. This intentionally over-counts: a session streaming a
//! file that never required a slot (small files, `tthl`, the file-list)
//! still counts toward `in_use`.

use dc_transport::Framed;

/// Count of C↔C sessions currently streaming bytes, regardless of whether
/// the transfer required a slot. A read through this function is required
/// before admitting any slot-bearing transfer.
#[must_use]
pub fn in_use<'a>(transports: impl IntoIterator<Item = &'a Framed>) -> u32 {
    transports
        .into_iter()
        .filter(|t| t.streaming_remaining() > 0)
        .count() as u32
}

/// `slots_free = max(0, configured_slots − in_use)`.
///
/// `in_use` may exceed `configured_slots` (see the module docs on
/// over-counting), in which case this saturates to zero rather than
/// wrapping.
#[must_use]
pub fn slots_free(configured_slots: u32, in_use: u32) -> u32 {
    configured_slots.saturating_sub(in_use)
}

/// Whether a new slot-bearing transfer may be admitted.
#[must_use]
pub fn can_admit(configured_slots: u32, in_use: u32) -> bool {
    in_use < configured_slots
}
