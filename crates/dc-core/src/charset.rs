//! Per-hub character-set bridge and the two wire escape flavours.
//!
//! Each hub carries a configured encoding label (UTF-8 by default); text
//! sent to or read from the legacy protocol is transcoded through it, since
//! many hubs still advertise CP1251, CP1252 or similar legacy code pages.
//! Independent of that transcoding, both wire dialects use their own
//! escaping layer to keep protocol delimiters out of values: the legacy
//! protocol escapes `$`, `|` and space as numeric character references; the
//! modern protocol escapes space, newline and backslash with `\`-sequences.

use encoding_rs::{Encoding, UTF_8};
use thiserror::Error;

/// Errors from the escape/unescape layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CharsetError {
    /// A modern-protocol backslash sequence was not one of `\s`, `\n`, `\\`.
    #[error("invalid backslash escape sequence")]
    InvalidEscape,
}

/// A hub's configured character set, used to transcode legacy-protocol
/// text to and from UTF-8.
#[derive(Debug, Clone, Copy)]
pub struct Charset(&'static Encoding);

impl Default for Charset {
    fn default() -> Self {
        Self::utf8()
    }
}

impl Charset {
    /// The default charset: UTF-8.
    #[must_use]
    pub fn utf8() -> Self {
        Self(UTF_8)
    }

    /// Resolve an encoding label (e.g. `"cp1251"`), falling back to UTF-8
    /// for an unrecognized label.
    #[must_use]
    pub fn by_label(label: &str) -> Self {
        Self(Encoding::for_label(label.as_bytes()).unwrap_or(UTF_8))
    }

    /// Encode UTF-8 text into this charset's bytes.
    #[must_use]
    pub fn encode(&self, text: &str) -> Vec<u8> {
        let (bytes, _, _) = self.0.encode(text);
        bytes.into_owned()
    }

    /// Decode this charset's bytes into UTF-8 text.
    #[must_use]
    pub fn decode(&self, bytes: &[u8]) -> String {
        let (text, _, _) = self.0.decode(bytes);
        text.into_owned()
    }
}

/// The legacy protocol's raw numeric-character-reference escapes.
pub mod legacy {
    /// Escape `$`, `|`, and space as `&#36;`, `&#124;`, `&#32;`.
    #[must_use]
    pub fn escape(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '$' => out.push_str("&#36;"),
                '|' => out.push_str("&#124;"),
                ' ' => out.push_str("&#32;"),
                _ => out.push(c),
            }
        }
        out
    }

    /// Reverse [`escape`]. Unrecognized `&#...;` sequences are passed
    /// through unchanged rather than rejected — unlike the modern
    /// protocol's backslash escapes, malformed references here are not a
    /// reportable error.
    #[must_use]
    pub fn unescape(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        let mut rest = s;
        while let Some(start) = rest.find("&#") {
            out.push_str(&rest[..start]);
            let tail = &rest[start + 2..];
            if let Some(end) = tail.find(';') {
                let digits = &tail[..end];
                if let Some(ch) = digits.parse::<u32>().ok().and_then(char::from_u32) {
                    out.push(ch);
                    rest = &tail[end + 1..];
                    continue;
                }
            }
            out.push_str("&#");
            rest = tail;
        }
        out.push_str(rest);
        out
    }
}

/// The modern protocol's whitespace/backslash escapes.
pub mod modern {
    use super::CharsetError;

    /// Escape space, newline, and backslash as `\s`, `\n`, `\\`.
    #[must_use]
    pub fn escape(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '\\' => out.push_str("\\\\"),
                ' ' => out.push_str("\\s"),
                '\n' => out.push_str("\\n"),
                _ => out.push(c),
            }
        }
        out
    }

    /// Reverse [`escape`].
    ///
    /// # Errors
    ///
    /// Returns [`CharsetError::InvalidEscape`] if a backslash is followed
    /// by anything other than `s`, `n`, or `\`.
    pub fn unescape(s: &str) -> Result<String, CharsetError> {
        let mut out = String::with_capacity(s.len());
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('\\') => out.push('\\'),
                Some('s') => out.push(' '),
                Some('n') => out.push('\n'),
                _ => return Err(CharsetError::InvalidEscape),
            }
        }
        Ok(out)
    }
}
