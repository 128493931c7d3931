//! The persistent-state collaborator interface.
//!
//! Actually persisting hash and download records (a real database) is out
//! of scope; this module only defines the interface the rest of the crate
//! programs against, mirroring the hub/share persistence surface: a queued
//! write path for every mutation, with the durability property that after
//! a clean close all queued writes have landed. [`NullHashStore`] satisfies
//! the trait by doing nothing, which is what `dc-cli` wires up today.

/// Row identifier for a hashed file record.
pub type HashId = i64;

/// One row of the hash table: the file path, its last-known size and
/// modification time, and the TTH root covering it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRecord {
    /// Row id.
    pub id: HashId,
    /// Last modification time, as seconds since the epoch.
    pub last_modified: u64,
    /// File size at the time it was hashed.
    pub size: u64,
    /// TTH root digest.
    pub tth: [u8; 24],
}

/// One row of the download queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRecord {
    /// TTH root of the wanted file.
    pub tth: [u8; 24],
    /// Destination path once complete.
    pub path: String,
}

/// The hash and download persistence interface.
pub trait HashStore: Send + Sync {
    /// Record a hashed file, returning its row id.
    fn hash_insert(
        &self,
        path: &str,
        size: u64,
        last_modified: u64,
        root: [u8; 24],
        tthl: &[u8],
    ) -> HashId;

    /// Fetch the stored hash-tree blob for a TTH root, if any.
    fn hash_tthl(&self, root: &[u8; 24]) -> Option<Vec<u8>>;

    /// Look up the hash record for a share-relative path.
    fn hash_lookup(&self, path: &str) -> Option<HashRecord>;

    /// Remove the given rows.
    fn hash_rm_many(&self, ids: &[HashId]);

    /// All known row ids.
    fn hash_ids(&self) -> Vec<HashId>;

    /// Drop rows that no longer correspond to a shared path.
    fn hash_purge_unreferenced(&self);

    /// Visit every queued download.
    fn dl_list(&self, visit: &mut dyn FnMut(&DownloadRecord));

    /// Visit every user with at least one queued download.
    fn dl_users(&self, visit: &mut dyn FnMut(&str));

    /// Remove a queued download by TTH.
    fn dl_rm(&self, tth: &[u8; 24]);

    /// Compact underlying storage.
    fn vacuum(&self);
}

/// A [`HashStore`] that persists nothing; every read returns empty and
/// every write is discarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHashStore;

impl HashStore for NullHashStore {
    fn hash_insert(
        &self,
        _path: &str,
        _size: u64,
        _last_modified: u64,
        _root: [u8; 24],
        _tthl: &[u8],
    ) -> HashId {
        0
    }

    fn hash_tthl(&self, _root: &[u8; 24]) -> Option<Vec<u8>> {
        None
    }

    fn hash_lookup(&self, _path: &str) -> Option<HashRecord> {
        None
    }

    fn hash_rm_many(&self, _ids: &[HashId]) {}

    fn hash_ids(&self) -> Vec<HashId> {
        Vec::new()
    }

    fn hash_purge_unreferenced(&self) {}

    fn dl_list(&self, _visit: &mut dyn FnMut(&DownloadRecord)) {}

    fn dl_users(&self, _visit: &mut dyn FnMut(&str)) {}

    fn dl_rm(&self, _tth: &[u8; 24]) {}

    fn vacuum(&self) {}
}
