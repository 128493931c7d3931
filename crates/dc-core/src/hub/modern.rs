//! Modern (ADC-like) hub protocol: newline-terminated, token-based frames.
//!
//! A frame is `TCMD param…`: a one-character addressing tag `T`, a
//! three-letter command, then space-separated parameters. Parameter
//! *values* use the `\s`/`\n`/`\\` escapes of [`crate::charset::modern`];
//! splitting on raw spaces is safe first since an escaped space is the
//! two literal characters `\`, `s`, never a real space byte.

use crate::charset::{self, modern::unescape, CharsetError};
use dc_files::base32;

/// Session-id codec: a 20-bit value as 4 base32 characters.
pub mod sid {
    const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

    /// Encode a session id. Only the low 20 bits are significant.
    #[must_use]
    pub fn encode(value: u32) -> String {
        let value = value & 0x000F_FFFF;
        (0..4)
            .rev()
            .map(|i| ALPHABET[((value >> (i * 5)) & 0x1F) as usize] as char)
            .collect()
    }

    /// Decode a 4-character base32 session id.
    #[must_use]
    pub fn decode(s: &str) -> Option<u32> {
        if s.chars().count() != 4 {
            return None;
        }
        let mut value = 0u32;
        for c in s.chars() {
            let idx = ALPHABET.iter().position(|&b| b.eq_ignore_ascii_case(&(c as u8)))?;
            value = (value << 5) | idx as u32;
        }
        Some(value)
    }
}

/// Errors parsing a modern-protocol frame body.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ModernError {
    /// The frame was missing a required positional field.
    #[error("missing required field")]
    Missing,
    /// A field value used an invalid backslash escape.
    #[error("escape error: {0}")]
    Escape(#[from] CharsetError),
}

/// A parsed `BINF` advertisement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binf {
    /// The session-id this advertisement is from (the positional first
    /// parameter).
    pub source_sid: u32,
    /// `NI`: display name.
    pub nick: Option<String>,
    /// `DE`: description.
    pub description: Option<String>,
    /// `VE`: client version string.
    pub version: Option<String>,
    /// `EM`: e-mail address.
    pub email: Option<String>,
    /// `ID`: 24-byte client identity, decoded from base32.
    pub cid: Option<[u8; 24]>,
    /// `SS`: total shared size.
    pub share_size: Option<u64>,
    /// `HN`: hubs-as-normal-user count.
    pub hubs_normal: Option<u32>,
    /// `HR`: hubs-as-registered-user count.
    pub hubs_registered: Option<u32>,
    /// `HO`: hubs-as-operator count.
    pub hubs_op: Option<u32>,
    /// `SL`: advertised upload slots.
    pub slots: Option<u32>,
    /// `AS`: auto-slot threshold in bits per second.
    pub auto_slot_bps: Option<u64>,
    /// Derived from `SU`: whether it lists `TCP4` or `TCP6`.
    pub active: bool,
    /// Derived from `CT`: operator if the numeric class is >= 4.
    pub is_op: bool,
}

/// Parse a `BINF` frame's parameters (everything after the `BINF` token).
///
/// # Errors
///
/// Returns [`ModernError::Missing`] if the source sid is absent or
/// malformed, or [`ModernError::Escape`] if a field value contains an
/// invalid backslash sequence.
pub fn parse_binf(params: &str) -> Result<Binf, ModernError> {
    let mut tokens = params.split(' ');
    let source_sid = sid::decode(tokens.next().ok_or(ModernError::Missing)?).ok_or(ModernError::Missing)?;

    let mut binf = Binf {
        source_sid,
        ..Binf::default()
    };

    for token in tokens {
        if token.len() < 2 {
            continue;
        }
        let (key, raw_value) = token.split_at(2);
        let value = unescape(raw_value)?;
        match key {
            "NI" => binf.nick = Some(value),
            "DE" => binf.description = Some(value),
            "VE" => binf.version = Some(value),
            "EM" => binf.email = Some(value),
            "ID" => {
                if let Ok(cid) = base32::decode(&value) {
                    binf.cid = Some(cid);
                }
            }
            "SS" => binf.share_size = value.parse().ok(),
            "HN" => binf.hubs_normal = value.parse().ok(),
            "HR" => binf.hubs_registered = value.parse().ok(),
            "HO" => binf.hubs_op = value.parse().ok(),
            "SL" => binf.slots = value.parse().ok(),
            "AS" => binf.auto_slot_bps = value.parse().ok(),
            "SU" => binf.active = value.split(',').any(|s| s == "TCP4" || s == "TCP6"),
            "CT" => binf.is_op = value.parse::<u32>().is_ok_and(|v| v >= 4),
            _ => {}
        }
    }

    Ok(binf)
}

/// A parsed `ISTA <code> <msg…>` status frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ista {
    /// Three-digit status code.
    pub code: u16,
    /// Free-text message.
    pub message: String,
}

impl Ista {
    /// Whether the first digit of the code is `2` (fatal: disconnect).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.code / 100 == 2
    }

    /// Whether the first digit of the code is `1` (advisory only).
    #[must_use]
    pub fn is_advisory(&self) -> bool {
        self.code / 100 == 1
    }
}

/// Parse an `ISTA` frame's parameters.
#[must_use]
pub fn parse_ista(params: &str) -> Option<Ista> {
    let (code, rest) = params.split_once(' ').unwrap_or((params, ""));
    let code: u16 = code.parse().ok()?;
    Some(Ista {
        code,
        message: charset::modern::unescape(rest).unwrap_or_else(|_| rest.to_string()),
    })
}

/// Build this client's own `BINF` parameter string for the identify
/// transition, e.g. after receiving `ISID`.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn build_own_binf(
    own_sid: u32,
    cid: &[u8; 24],
    pid: &[u8; 24],
    nick: &str,
    version: &str,
    slots: u32,
    hubs_normal: u32,
    hubs_registered: u32,
    hubs_op: u32,
    description: &str,
    email: &str,
) -> String {
    use charset::modern::escape;
    format!(
        "{} ID{} PD{} I40.0.0.0 VEncdc\\s{} NI{} SL{} HN{} HR{} HO{} DE{} EM{}",
        sid::encode(own_sid),
        base32::encode(cid),
        base32::encode(pid),
        escape(version),
        escape(nick),
        slots,
        hubs_normal,
        hubs_registered,
        hubs_op,
        escape(description),
        escape(email),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sid_roundtrip() {
        for v in [0u32, 1, 12345, 0xF_FFFF] {
            assert_eq!(sid::decode(&sid::encode(v)), Some(v));
        }
    }

    #[test]
    fn sid_rejects_wrong_length() {
        assert_eq!(sid::decode("AAA"), None);
    }

    /// Reference vector pinning the exact field layout.
    #[test]
    fn parse_binf_reference_vector() {
        let cid = [0x11u8; 24];
        let params = format!(
            "AAAA NImyname DEa\\sdesc VE1.0 EMme@x.com ID{} SS1000 HN1 HR2 HO0 SL5 AS800000 SUTCP4,UDP4 CT5",
            base32::encode(&cid)
        );
        let binf = parse_binf(&params).unwrap();
        assert_eq!(binf.source_sid, sid::decode("AAAA").unwrap());
        assert_eq!(binf.nick.as_deref(), Some("myname"));
        assert_eq!(binf.description.as_deref(), Some("a desc"));
        assert_eq!(binf.version.as_deref(), Some("1.0"));
        assert_eq!(binf.email.as_deref(), Some("me@x.com"));
        assert_eq!(binf.cid, Some(cid));
        assert_eq!(binf.share_size, Some(1000));
        assert_eq!(binf.hubs_normal, Some(1));
        assert_eq!(binf.hubs_registered, Some(2));
        assert_eq!(binf.hubs_op, Some(0));
        assert_eq!(binf.slots, Some(5));
        assert_eq!(binf.auto_slot_bps, Some(800_000));
        assert!(binf.active);
        assert!(binf.is_op);
    }

    #[test]
    fn parse_binf_su_without_tcp_is_not_active() {
        let binf = parse_binf("AAAA SUUDP4").unwrap();
        assert!(!binf.active);
    }

    #[test]
    fn parse_binf_ct_below_four_is_not_op() {
        let binf = parse_binf("AAAA CT3").unwrap();
        assert!(!binf.is_op);
    }

    #[test]
    fn parse_binf_propagates_escape_error() {
        assert_eq!(
            parse_binf("AAAA NIbad\\xescape"),
            Err(ModernError::Escape(CharsetError::InvalidEscape))
        );
    }

    #[test]
    fn ista_fatal_and_advisory_codes() {
        let advisory = parse_ista("100 hello").unwrap();
        assert!(advisory.is_advisory());
        assert!(!advisory.is_fatal());

        let fatal = parse_ista("230 kicked").unwrap();
        assert!(fatal.is_fatal());
    }
}
