//! File-list XML: `<FileListing>` save/load.
//!
//! ```xml
//! <FileListing Version="1" Generator="…" CID="…" Base="/">
//!   <Directory Name="music">
//!     <File Name="song.mp3" Size="1024" TTH="…"/>
//!   </Directory>
//! </FileListing>
//! ```
//!
//! Saved optionally gzip- or bzip2-compressed; written via
//! write-temp-then-rename so a reader never observes a half-written file.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression as BzLevel;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use quick_xml::escape::escape;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

use crate::base32::{self, Base32Error, DIGEST_LEN};
use crate::tree::{FileTree, NodeId, TreeError};

/// The compression wrapper (if any) around the XML body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Plain, uncompressed XML.
    None,
    /// gzip-compressed.
    Gzip,
    /// bzip2-compressed; the conventional form for `files.xml.bz2`.
    Bzip2,
}

impl Compression {
    /// Guess a compression scheme from a file extension: `.bz2` → bzip2,
    /// `.gz` → gzip, anything else → none.
    #[must_use]
    pub fn from_extension(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("bz2") => Self::Bzip2,
            Some("gz") => Self::Gzip,
            _ => Self::None,
        }
    }
}

/// Errors saving or loading a file-list.
#[derive(Debug, Error)]
pub enum FileListError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The XML was not well-formed.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// A `<File>` or `<Directory>` was missing a required attribute.
    #[error("<{element}> is missing required attribute {attr}")]
    MissingAttribute {
        /// Element name.
        element: &'static str,
        /// Attribute name.
        attr: &'static str,
    },

    /// A `Size` attribute did not parse as a `u64`.
    #[error("invalid Size attribute: {0:?}")]
    InvalidSize(String),

    /// A `TTH` attribute did not decode as 39-character base32.
    #[error("invalid TTH attribute: {0}")]
    InvalidTth(#[from] Base32Error),

    /// A `<File>` element was opened with a start tag instead of being
    /// self-closing.
    #[error("<File> must be self-closing")]
    FileNotSelfClosing,

    /// An attribute could not be parsed off an element's start tag.
    #[error("malformed attribute: {0}")]
    AttrError(String),

    /// An element other than `<Directory>`/`<File>` appeared where a child
    /// was expected, or `<FileListing>` was missing/duplicated.
    #[error("unexpected element <{0}>")]
    UnexpectedElement(String),

    /// Non-whitespace text appeared between elements.
    #[error("stray text content in file-list")]
    StrayText,

    /// The tree rejected an insertion (e.g. duplicate sibling name).
    #[error("file-list tree error: {0}")]
    Tree(#[from] TreeError),
}

/// Build the uncompressed XML body for `tree`, rooted at `root`.
fn write_xml(tree: &FileTree, root: NodeId, cid: &[u8; DIGEST_LEN], base: &str) -> Vec<u8> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .expect("writing to a Vec<u8> cannot fail");

    let mut listing = BytesStart::new("FileListing");
    listing.push_attribute(("Version", "1"));
    listing.push_attribute(("Generator", "dcfish/0.4.0"));
    listing.push_attribute(("CID", escape(base32::encode(cid)).as_ref()));
    listing.push_attribute(("Base", escape(base).as_ref()));
    writer
        .write_event(Event::Start(listing))
        .expect("writing to a Vec<u8> cannot fail");

    write_children(&mut writer, tree, root);

    writer
        .write_event(Event::End(BytesEnd::new("FileListing")))
        .expect("writing to a Vec<u8> cannot fail");

    writer.into_inner()
}

fn write_children(writer: &mut Writer<Vec<u8>>, tree: &FileTree, parent: NodeId) {
    for &child in tree.children(parent) {
        if tree.is_file(child) {
            let mut elem = BytesStart::new("File");
            elem.push_attribute(("Name", escape(tree.name(child)).as_ref()));
            elem.push_attribute(("Size", tree.size(child).to_string().as_str()));
            if let Some(tth) = tree.tth(child) {
                elem.push_attribute(("TTH", base32::encode(&tth).as_str()));
            }
            writer
                .write_event(Event::Empty(elem))
                .expect("writing to a Vec<u8> cannot fail");
        } else {
            let mut elem = BytesStart::new("Directory");
            elem.push_attribute(("Name", escape(tree.name(child)).as_ref()));
            if tree.incomplete(child) {
                elem.push_attribute(("Incomplete", "1"));
            }
            writer
                .write_event(Event::Start(elem))
                .expect("writing to a Vec<u8> cannot fail");
            write_children(writer, tree, child);
            writer
                .write_event(Event::End(BytesEnd::new("Directory")))
                .expect("writing to a Vec<u8> cannot fail");
        }
    }
}

fn compress(xml: Vec<u8>, compression: Compression) -> Result<Vec<u8>, FileListError> {
    match compression {
        Compression::None => Ok(xml),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
            encoder.write_all(&xml)?;
            Ok(encoder.finish()?)
        }
        Compression::Bzip2 => {
            let mut encoder = BzEncoder::new(Vec::new(), BzLevel::default());
            encoder.write_all(&xml)?;
            Ok(encoder.finish()?)
        }
    }
}

fn decompress(bytes: &[u8], compression: Compression) -> Result<Vec<u8>, FileListError> {
    match compression {
        Compression::None => Ok(bytes.to_vec()),
        Compression::Gzip => {
            let mut out = Vec::new();
            GzDecoder::new(bytes).read_to_end(&mut out)?;
            Ok(out)
        }
        Compression::Bzip2 => {
            let mut out = Vec::new();
            BzDecoder::new(bytes).read_to_end(&mut out)?;
            Ok(out)
        }
    }
}

/// Serialize `tree` (rooted at `root`) to bytes, optionally compressed.
///
/// # Errors
///
/// Propagates compression I/O failures.
pub fn to_bytes(
    tree: &FileTree,
    root: NodeId,
    cid: &[u8; DIGEST_LEN],
    base: &str,
    compression: Compression,
) -> Result<Vec<u8>, FileListError> {
    compress(write_xml(tree, root, cid, base), compression)
}

/// Save `tree` (rooted at `root`) to `path`, atomically: the body is
/// written to a sibling temp file, then renamed into place.
///
/// # Errors
///
/// Propagates I/O and compression failures.
pub fn save(
    path: &Path,
    tree: &FileTree,
    root: NodeId,
    cid: &[u8; DIGEST_LEN],
    base: &str,
    compression: Compression,
) -> Result<(), FileListError> {
    let bytes = to_bytes(tree, root, cid, base, compression)?;
    let tmp_path = path.with_extension("tmp");
    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&bytes)?;
        tmp.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "wrote file-list");
    Ok(())
}

/// Parse a file-list body into a fresh [`FileTree`]. Returns the tree and
/// the `CID` attribute from the root `<FileListing>` element.
///
/// # Errors
///
/// Returns [`FileListError`] on any malformed input: invalid size, bad
/// TTH, missing name, stray text, or a non-self-closing `<File>`.
pub fn from_bytes(
    bytes: &[u8],
    compression: Compression,
) -> Result<(FileTree, [u8; DIGEST_LEN]), FileListError> {
    let xml = decompress(bytes, compression)?;
    let text = String::from_utf8_lossy(&xml);
    parse_xml(&text)
}

/// Load and parse a file-list from `path`.
///
/// # Errors
///
/// Propagates I/O and parse failures.
pub fn load(path: &Path, compression: Compression) -> Result<(FileTree, [u8; DIGEST_LEN]), FileListError> {
    let bytes = std::fs::read(path)?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "loaded file-list");
    from_bytes(&bytes, compression)
}

fn parse_xml(text: &str) -> Result<(FileTree, [u8; DIGEST_LEN]), FileListError> {
    let mut reader = Reader::from_str(text);

    let mut tree = FileTree::new();
    let root = tree.root();
    let mut stack = vec![root];
    let mut cid = [0u8; DIGEST_LEN];
    let mut seen_root = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) if e.name().as_ref() == b"FileListing" => {
                if seen_root {
                    return Err(FileListError::UnexpectedElement("FileListing".into()));
                }
                seen_root = true;
                cid = required_tth_like(&e, "FileListing", "CID")?;
            }
            Event::End(e) if e.name().as_ref() == b"FileListing" => break,
            Event::Start(e) if e.name().as_ref() == b"Directory" => {
                let name = required_attr(&e, "Directory", "Name")?;
                let incomplete = optional_attr(&e, "Incomplete")?.as_deref() == Some("1");
                let parent = *stack.last().expect("root always on stack");
                let id = tree.insert_dir(parent, name, incomplete)?;
                stack.push(id);
            }
            Event::End(e) if e.name().as_ref() == b"Directory" => {
                if stack.len() <= 1 {
                    return Err(FileListError::UnexpectedElement("Directory".into()));
                }
                stack.pop();
            }
            Event::Empty(e) if e.name().as_ref() == b"File" => {
                let name = required_attr(&e, "File", "Name")?;
                let size_str = required_attr(&e, "File", "Size")?;
                let size: u64 = size_str
                    .parse()
                    .map_err(|_| FileListError::InvalidSize(size_str.clone()))?;
                let tth = match optional_attr(&e, "TTH")? {
                    Some(s) => Some(base32::decode(&s)?),
                    None => None,
                };
                let parent = *stack.last().expect("root always on stack");
                tree.insert_file(parent, name, size, tth, 0)?;
            }
            Event::Start(e) if e.name().as_ref() == b"File" => {
                let _ = e;
                return Err(FileListError::FileNotSelfClosing);
            }
            Event::Text(t) => {
                if !t.unescape()?.trim().is_empty() {
                    return Err(FileListError::StrayText);
                }
            }
            Event::Start(e) | Event::Empty(e) => {
                return Err(FileListError::UnexpectedElement(
                    String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                ));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(FileListError::UnexpectedElement("(missing FileListing)".into()));
    }

    Ok((tree, cid))
}

fn required_attr(e: &BytesStart<'_>, element: &'static str, attr: &'static str) -> Result<String, FileListError> {
    optional_attr(e, attr)?.ok_or(FileListError::MissingAttribute { element, attr })
}

fn optional_attr(e: &BytesStart<'_>, attr: &str) -> Result<Option<String>, FileListError> {
    for a in e.attributes() {
        let a = a.map_err(|err| FileListError::AttrError(err.to_string()))?;
        if a.key.as_ref() == attr.as_bytes() {
            return Ok(Some(a.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn required_tth_like(
    e: &BytesStart<'_>,
    element: &'static str,
    attr: &'static str,
) -> Result<[u8; DIGEST_LEN], FileListError> {
    let s = required_attr(e, element, attr)?;
    Ok(base32::decode(&s)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (FileTree, NodeId) {
        let mut tree = FileTree::new();
        let root = tree.root();
        let music = tree.insert_dir(root, "music", false).unwrap();
        tree.insert_file(music, "song.mp3", 1024, Some([7u8; DIGEST_LEN]), 0)
            .unwrap();
        tree.insert_dir(music, "live", true).unwrap();
        (tree, root)
    }

    fn tree_equal(a: &FileTree, an: NodeId, b: &FileTree, bn: NodeId) -> bool {
        let mut ac: Vec<_> = a.children(an).to_vec();
        let mut bc: Vec<_> = b.children(bn).to_vec();
        ac.sort_by_key(|n| a.name(*n).to_string());
        bc.sort_by_key(|n| b.name(*n).to_string());
        if ac.len() != bc.len() {
            return false;
        }
        for (&x, &y) in ac.iter().zip(bc.iter()) {
            if a.name(x) != b.name(y) {
                return false;
            }
            if a.is_file(x) != b.is_file(y) {
                return false;
            }
            if a.is_file(x) {
                if a.size(x) != b.size(y) || a.tth(x) != b.tth(y) {
                    return false;
                }
            } else if !tree_equal(a, x, b, y) {
                return false;
            }
        }
        true
    }

    #[test]
    fn roundtrip_uncompressed() {
        let (tree, root) = sample();
        let cid = [3u8; DIGEST_LEN];
        let bytes = to_bytes(&tree, root, &cid, "/", Compression::None).unwrap();
        let (loaded, loaded_cid) = from_bytes(&bytes, Compression::None).unwrap();
        assert_eq!(loaded_cid, cid);
        assert!(tree_equal(&tree, root, &loaded, loaded.root()));
    }

    #[test]
    fn roundtrip_bzip2() {
        let (tree, root) = sample();
        let cid = [9u8; DIGEST_LEN];
        let bytes = to_bytes(&tree, root, &cid, "/", Compression::Bzip2).unwrap();
        let (loaded, _) = from_bytes(&bytes, Compression::Bzip2).unwrap();
        assert!(tree_equal(&tree, root, &loaded, loaded.root()));
    }

    #[test]
    fn rejects_non_self_closing_file() {
        let xml = r#"<FileListing Version="1" CID="AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA" Base="/"><File Name="x" Size="1"></File></FileListing>"#;
        assert!(matches!(
            parse_xml(xml),
            Err(FileListError::FileNotSelfClosing)
        ));
    }

    #[test]
    fn rejects_bad_tth() {
        let xml = r#"<FileListing Version="1" CID="AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA" Base="/"><File Name="x" Size="1" TTH="nope"/></FileListing>"#;
        assert!(matches!(parse_xml(xml), Err(FileListError::InvalidTth(_))));
    }

    #[test]
    fn rejects_invalid_size() {
        let xml = r#"<FileListing Version="1" CID="AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA" Base="/"><File Name="x" Size="not-a-number"/></FileListing>"#;
        assert!(matches!(parse_xml(xml), Err(FileListError::InvalidSize(_))));
    }

    #[test]
    fn rejects_stray_text() {
        let xml = r#"<FileListing Version="1" CID="AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA" Base="/">stray text</FileListing>"#;
        assert!(matches!(parse_xml(xml), Err(FileListError::StrayText)));
    }

    #[test]
    fn save_then_load_file_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("files.xml");
        let (tree, root) = sample();
        let cid = [1u8; DIGEST_LEN];
        save(&path, &tree, root, &cid, "/", Compression::None).unwrap();
        assert!(!path.with_extension("tmp").exists());
        let (loaded, loaded_cid) = load(&path, Compression::None).unwrap();
        assert_eq!(loaded_cid, cid);
        assert!(tree_equal(&tree, root, &loaded, loaded.root()));
    }
}
