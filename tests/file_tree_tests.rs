//! File-list save/load round-trips not already covered by `dc-files`'
//! own in-module tests (which exercise `None`/`Bzip2` on a flat sample
//! tree): gzip compression and a deeper, multi-level directory tree.

use dc_files::filelist::{self, Compression};
use dc_files::{FileTree, NodeId};

const DIGEST_LEN: usize = 24;

/// A tree with nested directories, an empty directory, and a file with no
/// TTH, to exercise every branch `write_children`/`parse_xml` can take.
fn nested_sample() -> (FileTree, NodeId) {
    let mut tree = FileTree::new();
    let root = tree.root();

    let music = tree.insert_dir(root, "music", false).unwrap();
    tree.insert_file(music, "song.mp3", 4096, Some([3u8; DIGEST_LEN]), 1_700_000_000).unwrap();
    let live = tree.insert_dir(music, "live", true).unwrap();
    tree.insert_file(live, "bootleg.flac", 123_456_789, Some([9u8; DIGEST_LEN]), 1_700_000_001).unwrap();

    tree.insert_dir(root, "empty", false).unwrap();
    tree.insert_file(root, "readme.txt", 12, None, 0).unwrap();

    (tree, root)
}

fn assert_trees_equal(a: &FileTree, an: NodeId, b: &FileTree, bn: NodeId) {
    let mut ac: Vec<_> = a.children(an).to_vec();
    let mut bc: Vec<_> = b.children(bn).to_vec();
    ac.sort_by_key(|n| a.name(*n).to_string());
    bc.sort_by_key(|n| b.name(*n).to_string());
    assert_eq!(ac.len(), bc.len(), "child count mismatch under {:?}", a.name(an));

    for (&x, &y) in ac.iter().zip(bc.iter()) {
        assert_eq!(a.name(x), b.name(y));
        assert_eq!(a.is_file(x), b.is_file(y));
        if a.is_file(x) {
            assert_eq!(a.size(x), b.size(y));
            assert_eq!(a.tth(x), b.tth(y));
        } else {
            assert_eq!(a.incomplete(x), b.incomplete(y));
            assert_trees_equal(a, x, b, y);
        }
    }
}

#[test]
fn gzip_roundtrip_preserves_structure() {
    let (tree, root) = nested_sample();
    let cid = [5u8; DIGEST_LEN];
    let bytes = filelist::to_bytes(&tree, root, &cid, "/", Compression::Gzip).unwrap();
    let (loaded, loaded_cid) = filelist::from_bytes(&bytes, Compression::Gzip).unwrap();
    assert_eq!(loaded_cid, cid);
    assert_trees_equal(&tree, root, &loaded, loaded.root());
}

#[test]
fn compression_is_selected_by_file_extension() {
    assert_eq!(Compression::from_extension(std::path::Path::new("files.xml")), Compression::None);
    assert_eq!(Compression::from_extension(std::path::Path::new("files.xml.gz")), Compression::Gzip);
    assert_eq!(Compression::from_extension(std::path::Path::new("files.xml.bz2")), Compression::Bzip2);
}

#[test]
fn save_and_load_nested_tree_to_real_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("files.xml.bz2");
    let (tree, root) = nested_sample();
    let cid = [1u8; DIGEST_LEN];

    filelist::save(&path, &tree, root, &cid, "/", Compression::Bzip2).unwrap();
    let (loaded, loaded_cid) = filelist::load(&path, Compression::Bzip2).unwrap();

    assert_eq!(loaded_cid, cid);
    assert_trees_equal(&tree, root, &loaded, loaded.root());

    let empty_dir = tree.find_child(root, "empty").unwrap();
    let loaded_empty = loaded.find_child(loaded.root(), "empty").unwrap();
    assert!(loaded.children(loaded_empty).is_empty());
    assert_eq!(tree.children(empty_dir).len(), loaded.children(loaded_empty).len());
}
