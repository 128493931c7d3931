//! [`HubUser`]: the roster record carried for each peer visible on a hub.

/// One peer visible on a hub, as seen through either wire dialect.
#[derive(Debug, Clone, Default)]
pub struct HubUser {
    /// Display name, UTF-8.
    pub name: String,
    /// Hub-encoded raw name; identical to `name` on the modern protocol.
    pub name_raw: String,

    /// Modern-protocol session id (20-bit value, 4-character base32 on the
    /// wire). `None` on the legacy protocol.
    pub session_id: Option<u32>,
    /// Modern-protocol 24-byte client identity, decoded from `BINF`'s `ID`
    /// field. `None` until received.
    pub cid: Option<[u8; 24]>,

    /// Whether the advertisement record (`$MyINFO`/`BINF`) has been
    /// received yet.
    pub has_info: bool,
    /// Hub operator flag.
    pub is_op: bool,
    /// Reachable on a direct (active) port.
    pub active: bool,

    /// Count of other hubs this user is in as a normal user.
    pub hubs_normal: u32,
    /// Count of other hubs this user is in as a registered user.
    pub hubs_registered: u32,
    /// Count of other hubs this user is in as an operator.
    pub hubs_op: u32,
    /// Advertised upload slot count.
    pub slots: u32,
    /// Auto-slot threshold in bits per second, from `BINF`'s `AS` field.
    pub auto_slot_bps: u64,

    /// Free-text description.
    pub description: String,
    /// Connection speed string.
    pub connection: String,
    /// E-mail address.
    pub email: String,
    /// Client name/version tag.
    pub client: String,

    /// Total shared size in bytes.
    pub share_size: u64,
}

impl HubUser {
    /// A fresh, otherwise-empty record for a user known only by name.
    #[must_use]
    pub fn named(name: impl Into<String>, name_raw: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            name_raw: name_raw.into(),
            ..Self::default()
        }
    }
}
