//! Legacy (NMDC-style) hub protocol: `|`-terminated ASCII commands.

use crate::charset;
use dc_files::base32;

/// The literal marker an `$Lock` challenge must start with before this
/// client will proceed with the handshake.
pub const EXTENDED_PROTOCOL_MARKER: &str = "EXTENDEDPROTOCOL";

/// The `$Lock`/`$Key` unlock-key algorithm.
pub mod keylock {
    /// Bytes that must be escaped in the computed key, as
    /// `/%DCN<dec>%/` where `<dec>` is their three-digit decimal form.
    const ESCAPED: [u8; 6] = [0, 5, 36, 96, 124, 126];

    /// Compute the `$Key` value for a `$Lock` challenge.
    ///
    /// `lock` must be 1..=255 bytes, per the wire format; this function
    /// does not reject an out-of-range length itself (the caller validates
    /// the frame), but degrades gracefully for a 1-byte lock by treating
    /// the missing second-to-last byte as the first byte.
    #[must_use]
    pub fn compute(lock: &[u8]) -> Vec<u8> {
        let n = lock.len();
        if n == 0 {
            return Vec::new();
        }
        let last = lock[n - 1];
        let second_last = if n >= 2 { lock[n - 2] } else { lock[0] };

        let mut k = vec![0u8; n];
        k[0] = lock[0] ^ last ^ second_last ^ 5;
        for i in 1..n {
            k[i] = lock[i] ^ lock[i - 1];
        }
        for b in &mut k {
            *b = ((*b << 4) | (*b >> 4)) & 0xFF;
        }

        let mut out = Vec::with_capacity(n);
        for b in k {
            if ESCAPED.contains(&b) {
                out.extend(format!("/%DCN{b:03}%/").into_bytes());
            } else {
                out.push(b);
            }
        }
        out
    }
}

/// A parsed `$MyINFO $ALL <nick> <payload>` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MyInfo {
    /// Free-text description (tag stripped).
    pub description: String,
    /// Advertised upload slots, from the `S:` tag field.
    pub slots: u32,
    /// Hubs-as-normal-user count, from the `H:` tag field.
    pub hubs_normal: u32,
    /// Hubs-as-registered-user count, from the `H:` tag field.
    pub hubs_registered: u32,
    /// Hubs-as-operator count, from the `H:` tag field.
    pub hubs_op: u32,
    /// Connection speed string.
    pub connection: String,
    /// Whether the low bit of the flag byte marks this user reachable
    /// directly (active mode).
    pub active: bool,
    /// E-mail address.
    pub email: String,
    /// Total shared size in bytes.
    pub share_size: u64,
}

/// Parse a `$MyINFO` payload of the form
/// `<desc><tag>$ $<connection><flag>$<email>$<size>$`.
///
/// Unknown tag fields (anything but `H` and `S`) are ignored, per the
/// search/roster spec's tolerance for unrecognized `K:V` pairs.
#[must_use]
pub fn parse_myinfo(payload: &str) -> Option<MyInfo> {
    let (desc_and_tag, rest) = payload.split_once("$ $")?;

    let (description, tag) = match (desc_and_tag.rfind('<'), desc_and_tag.ends_with('>')) {
        (Some(lt), true) => (
            desc_and_tag[..lt].to_string(),
            Some(&desc_and_tag[lt + 1..desc_and_tag.len() - 1]),
        ),
        _ => (desc_and_tag.to_string(), None),
    };

    let mut slots = 0;
    let mut hubs_normal = 0;
    let mut hubs_registered = 0;
    let mut hubs_op = 0;
    if let Some(tag) = tag {
        for field in tag.split(',') {
            let Some((key, value)) = field.trim().split_once(':') else {
                continue;
            };
            match key {
                "S" => slots = value.parse().unwrap_or(0),
                "H" => {
                    let mut parts = value.splitn(3, '/');
                    hubs_normal = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                    hubs_registered = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                    hubs_op = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
                }
                _ => {}
            }
        }
    }

    let mut fields = rest.splitn(3, '$');
    let connection_and_flag = fields.next()?;
    let email = fields.next().unwrap_or_default().to_string();
    let share_size = fields.next().unwrap_or_default().trim_end_matches('$').parse().unwrap_or(0);

    let mut chars = connection_and_flag.chars();
    let flag = chars.next_back();
    let connection = chars.as_str().to_string();
    let active = flag.is_some_and(|c| (c as u32) & 0x01 != 0);

    Some(MyInfo {
        description,
        slots,
        hubs_normal,
        hubs_registered,
        hubs_op,
        connection,
        active,
        email,
        share_size,
    })
}

/// Format a `$SR` search-result record.
///
/// `(hub_name|TTH:xxx)` in the spec means "one of the two": a file with a
/// digest reports `TTH:<base32>` in that slot, everything else (including
/// directories) reports the hub's display name.
#[must_use]
pub fn format_sr(
    own_nick: &str,
    path: &str,
    size: u64,
    slots_free: u32,
    slots: u32,
    tth: Option<&[u8; 24]>,
    hub_name: &str,
    hub_addr: &str,
) -> String {
    let descriptor = match tth {
        Some(digest) => format!("TTH:{}", base32::encode(digest)),
        None => hub_name.to_string(),
    };
    format!("$SR {own_nick} {path}\u{5}{size} {slots_free}/{slots}\u{5}{descriptor} ({hub_addr})")
}

/// Escape a description/nick/chat string for the legacy wire.
#[must_use]
pub fn escape(s: &str) -> String {
    charset::legacy::escape(s)
}

/// Reverse [`escape`].
#[must_use]
pub fn unescape(s: &str) -> String {
    charset::legacy::unescape(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference vector for `lock = "dcfish-reference-lock-000001"`, computed
    /// independently of `keylock::compute` (by hand against the XOR/nibble-
    /// swap/escape rule, not by calling the function under test) so a broken
    /// `compute` can't pass by construction. Exercises the escape path: the
    /// nibble-swapped bytes land on 96 once and 0 four times.
    #[test]
    fn keylock_reference_vector() {
        let lock = b"dcfish-reference-lock-000001";
        let key = keylock::compute(lock);
        let expected: Vec<u8> = vec![
            6, 112, 80, 240, 161, 177, 84, 245, 113, 48, 48, 113, 113, 176, 208, 47, 37, 68, 67,
            78, 48, 57, 54, 37, 47, 132, 20, 48, 192, 128, 100, 209, 47, 37, 68, 67, 78, 48, 48,
            48, 37, 47, 47, 37, 68, 67, 78, 48, 48, 48, 37, 47, 47, 37, 68, 67, 78, 48, 48, 48,
            37, 47, 47, 37, 68, 67, 78, 48, 48, 48, 37, 47,
        ];
        assert_eq!(key, expected);
    }

    #[test]
    fn keylock_escapes_reserved_bytes() {
        // A 2-byte lock chosen so K[0] lands on a reserved byte (0).
        // K[0] = S[0] ^ S[1] ^ S[0] ^ 5 = S[1] ^ 5; pick S[1] = 5 so K[0] = 0,
        // then nibble-swap(0) = 0, which must be escaped.
        let lock = [0x00u8, 0x05];
        let key = keylock::compute(&lock);
        assert!(key.starts_with(b"/%DCN000%/"));
    }

    #[test]
    fn keylock_handles_single_byte_lock() {
        // Must not panic on the minimum-length lock.
        let key = keylock::compute(b"X");
        assert_eq!(key.len(), 1.max(key.len()));
    }

    #[test]
    fn parse_myinfo_extracts_fixed_fields() {
        let payload = "A description<++ V:1.2,M:A,H:1/2/3,S:5>$ $DSL1\u{1}$user@example.com$123456$";
        let info = parse_myinfo(payload).unwrap();
        assert_eq!(info.description, "A description");
        assert_eq!(info.slots, 5);
        assert_eq!(info.hubs_normal, 1);
        assert_eq!(info.hubs_registered, 2);
        assert_eq!(info.hubs_op, 3);
        assert_eq!(info.connection, "DSL1");
        assert!(info.active);
        assert_eq!(info.email, "user@example.com");
        assert_eq!(info.share_size, 123_456);
    }

    #[test]
    fn parse_myinfo_ignores_unknown_tag_fields() {
        let payload = "d<++ X:weird,S:2>$ $Cable\u{0}$$0$";
        let info = parse_myinfo(payload).unwrap();
        assert_eq!(info.slots, 2);
        assert!(!info.active);
    }

    #[test]
    fn format_sr_uses_tth_when_present() {
        let tth = [7u8; 24];
        let s = format_sr("me", "music/song.mp3", 1024, 3, 5, Some(&tth), "MyHub", "1.2.3.4:411");
        assert_eq!(
            s,
            format!(
                "$SR me music/song.mp3\u{5}1024 3/5\u{5}TTH:{} (1.2.3.4:411)",
                base32::encode(&tth)
            )
        );
    }

    #[test]
    fn format_sr_uses_hub_name_without_tth() {
        let s = format_sr("me", "shared", 0, 1, 1, None, "MyHub", "1.2.3.4:411");
        assert_eq!(s, "$SR me shared\u{5}0 1/1\u{5}MyHub (1.2.3.4:411)");
    }
}
