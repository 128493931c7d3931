//! The shared file tree.
//!
//! An ordered, in-memory tree of [`FileTree`] nodes, indexed both by
//! position (parent/children) and by content hash (TTH). Implemented as an
//! arena of slots addressed by [`NodeId`] rather than an owned tree of
//! `Rc<RefCell<_>>` nodes: a directory's "back-reference" to its parent is
//! just an index, which sidesteps the ownership cycle a naive tree would
//! have (see the *Cyclic back-references* design note this crate's sibling
//! `dc-core` follows for the same reason).

use std::collections::HashMap;
use thiserror::Error;

/// Opaque handle to a node in a [`FileTree`]. Stable for the node's
/// lifetime; never reused after removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

/// Errors from tree mutation and lookup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    /// A sibling with this name already exists (invariant I1).
    #[error("a sibling named {0:?} already exists")]
    DuplicateName(String),

    /// The target node is not a directory.
    #[error("node is not a directory")]
    NotADirectory,

    /// The target node is not a file.
    #[error("node is not a file")]
    NotAFile,

    /// Attempted to remove the root node.
    #[error("cannot remove the root node")]
    CannotRemoveRoot,

    /// A path component was `..`, which is unsupported.
    #[error("path contains an unsupported `..` component")]
    DotDot,
}

#[derive(Debug, Clone)]
enum NodeKind {
    File {
        size: u64,
        tth: Option<[u8; 24]>,
    },
    Dir {
        children: Vec<NodeId>,
        /// Count of direct children that are subdirectories, or files with
        /// a valid TTH (invariant I3).
        has_tth: u32,
        incomplete: bool,
        /// Rolled-up size of all descendants (invariant I2).
        size: u64,
    },
}

#[derive(Debug, Clone)]
struct Node {
    name: String,
    parent: Option<NodeId>,
    last_modified: u64,
    kind: NodeKind,
    removed: bool,
}

/// The shared file tree: one ordered hierarchy of [`FileTree`] nodes plus a
/// secondary index from TTH digest to the file nodes carrying it.
#[derive(Debug, Clone)]
pub struct FileTree {
    nodes: Vec<Node>,
    root: NodeId,
    tth_index: HashMap<[u8; 24], Vec<NodeId>>,
}

impl Default for FileTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTree {
    /// Create a new tree with an empty root directory.
    #[must_use]
    pub fn new() -> Self {
        let root = Node {
            name: String::new(),
            parent: None,
            last_modified: 0,
            kind: NodeKind::Dir {
                children: Vec::new(),
                has_tth: 0,
                incomplete: false,
                size: 0,
            },
            removed: false,
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
            tth_index: HashMap::new(),
        }
    }

    /// The root node.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.root
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    /// The node's name. Empty for the root.
    #[must_use]
    pub fn name(&self, id: NodeId) -> &str {
        &self.node(id).name
    }

    /// The node's parent, or `None` for the root.
    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Whether the node is a file (as opposed to a directory).
    #[must_use]
    pub fn is_file(&self, id: NodeId) -> bool {
        matches!(self.node(id).kind, NodeKind::File { .. })
    }

    /// The node's rolled-up size: intrinsic size for a file, sum of
    /// children for a directory (invariant I2).
    #[must_use]
    pub fn size(&self, id: NodeId) -> u64 {
        match &self.node(id).kind {
            NodeKind::File { size, .. } => *size,
            NodeKind::Dir { size, .. } => *size,
        }
    }

    /// The file's TTH digest, if it has one.
    #[must_use]
    pub fn tth(&self, id: NodeId) -> Option<[u8; 24]> {
        match &self.node(id).kind {
            NodeKind::File { tth, .. } => *tth,
            NodeKind::Dir { .. } => None,
        }
    }

    /// Whether the file has a valid digest, or for a directory, the
    /// invariant-I3 count of children that are subdirectories or files with
    /// a valid digest.
    #[must_use]
    pub fn has_tth(&self, id: NodeId) -> u32 {
        match &self.node(id).kind {
            NodeKind::File { tth, .. } => u32::from(tth.is_some()),
            NodeKind::Dir { has_tth, .. } => *has_tth,
        }
    }

    /// Whether a directory is known to be a partial listing.
    #[must_use]
    pub fn incomplete(&self, id: NodeId) -> bool {
        matches!(
            self.node(id).kind,
            NodeKind::Dir {
                incomplete: true,
                ..
            }
        )
    }

    /// The node's direct children, in sorted (byte-wise by name) order.
    /// Empty for a file.
    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.node(id).kind {
            NodeKind::Dir { children, .. } => children,
            NodeKind::File { .. } => &[],
        }
    }

    /// Find a direct child by name.
    #[must_use]
    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let children = self.children(parent);
        children
            .binary_search_by(|c| self.name(*c).cmp(name))
            .ok()
            .map(|i| children[i])
    }

    /// Whether `ancestor` is `node` or a proper ancestor of it.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cur = Some(node);
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = self.parent(id);
        }
        false
    }

    /// Insert a new file as a child of `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::NotADirectory`] if `parent` is not a directory,
    /// or [`TreeError::DuplicateName`] if a sibling already has this name
    /// (invariant I1).
    pub fn insert_file(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        size: u64,
        tth: Option<[u8; 24]>,
        last_modified: u64,
    ) -> Result<NodeId, TreeError> {
        let name = name.into();
        self.check_can_insert(parent, &name)?;

        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            name: name.clone(),
            parent: Some(parent),
            last_modified,
            kind: NodeKind::File { size, tth },
            removed: false,
        });

        self.link_child(parent, id, &name);
        if let Some(digest) = tth {
            self.tth_index.entry(digest).or_default().push(id);
        }

        self.adjust_size(parent, size as i64);
        self.adjust_has_tth(parent, i64::from(tth.is_some()));

        Ok(id)
    }

    /// Insert a new (empty) subdirectory as a child of `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::NotADirectory`] if `parent` is not a directory,
    /// or [`TreeError::DuplicateName`] if a sibling already has this name.
    pub fn insert_dir(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        incomplete: bool,
    ) -> Result<NodeId, TreeError> {
        let name = name.into();
        self.check_can_insert(parent, &name)?;

        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            name: name.clone(),
            parent: Some(parent),
            last_modified: 0,
            kind: NodeKind::Dir {
                children: Vec::new(),
                has_tth: 0,
                incomplete,
                size: 0,
            },
            removed: false,
        });

        self.link_child(parent, id, &name);
        // A subdirectory unconditionally counts toward the parent's has_tth
        // (invariant I3's predicate is "subdirectory OR file-with-tth").
        self.adjust_has_tth(parent, 1);

        Ok(id)
    }

    fn check_can_insert(&self, parent: NodeId, name: &str) -> Result<(), TreeError> {
        match &self.node(parent).kind {
            NodeKind::Dir { .. } => {}
            NodeKind::File { .. } => return Err(TreeError::NotADirectory),
        }
        if self.find_child(parent, name).is_some() {
            return Err(TreeError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    fn link_child(&mut self, parent: NodeId, id: NodeId, name: &str) {
        let NodeKind::Dir { children, .. } = &self.node(parent).kind else {
            unreachable!("checked by check_can_insert")
        };
        let pos = children
            .iter()
            .position(|c| self.node(*c).name.as_str() > name)
            .unwrap_or(children.len());
        let NodeKind::Dir { children, .. } = &mut self.node_mut(parent).kind else {
            unreachable!("checked by check_can_insert")
        };
        children.insert(pos, id);
    }

    fn adjust_size(&mut self, start: NodeId, delta: i64) {
        let mut cur = Some(start);
        while let Some(id) = cur {
            if let NodeKind::Dir { size, .. } = &mut self.node_mut(id).kind {
                *size = (*size as i64 + delta).max(0) as u64;
            }
            cur = self.parent(id);
        }
    }

    /// has_tth rebalances only the immediate parent (invariant I3): a
    /// directory's count depends solely on its own children, never on
    /// grandchildren, so a change never needs to propagate past one level.
    fn adjust_has_tth(&mut self, parent: NodeId, delta: i64) {
        if let NodeKind::Dir { has_tth, .. } = &mut self.node_mut(parent).kind {
            *has_tth = (*has_tth as i64 + delta).max(0) as u32;
        }
    }

    /// Remove a node (and, for a directory, its whole subtree).
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::CannotRemoveRoot`] if `id` is the root.
    pub fn remove(&mut self, id: NodeId) -> Result<(), TreeError> {
        if id == self.root {
            return Err(TreeError::CannotRemoveRoot);
        }
        let parent = self.parent(id).expect("non-root has a parent");

        let (size_delta, tth_delta) = match self.node(id).kind.clone() {
            NodeKind::File { size, tth } => (size, i64::from(tth.is_some())),
            NodeKind::Dir { size, .. } => (size, 1),
        };

        if let NodeKind::Dir { children, .. } = &self.node(id).kind {
            let children = children.clone();
            for child in children {
                self.remove_subtree_bookkeeping(child);
            }
        }
        self.purge_tth_entries(id);

        if let NodeKind::Dir { children, .. } = &mut self.node_mut(parent).kind {
            children.retain(|c| *c != id);
        }
        self.node_mut(id).removed = true;

        self.adjust_size(parent, -(size_delta as i64));
        self.adjust_has_tth(parent, -tth_delta);

        Ok(())
    }

    /// Mark a subtree as removed without touching the (already-detached)
    /// parent's bookkeeping; used internally by [`Self::remove`].
    fn remove_subtree_bookkeeping(&mut self, id: NodeId) {
        if let NodeKind::Dir { children, .. } = &self.node(id).kind {
            let children = children.clone();
            for child in children {
                self.remove_subtree_bookkeeping(child);
            }
        }
        self.purge_tth_entries(id);
        self.node_mut(id).removed = true;
    }

    fn purge_tth_entries(&mut self, id: NodeId) {
        if let NodeKind::File { tth: Some(digest), .. } = self.node(id).kind {
            if let Some(list) = self.tth_index.get_mut(&digest) {
                list.retain(|n| *n != id);
                if list.is_empty() {
                    self.tth_index.remove(&digest);
                }
            }
        }
    }

    /// Update a file's TTH digest (e.g. once the background hasher
    /// finishes). Adjusts the immediate parent's has_tth count and the TTH
    /// index (invariant I4).
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::NotAFile`] if `id` is a directory.
    pub fn set_file_tth(&mut self, id: NodeId, tth: Option<[u8; 24]>) -> Result<(), TreeError> {
        let parent = self.parent(id);
        let NodeKind::File { tth: slot, .. } = &mut self.node_mut(id).kind else {
            return Err(TreeError::NotAFile);
        };
        let had = slot.is_some();
        let old = *slot;
        *slot = tth;
        let has = tth.is_some();

        if let Some(old_digest) = old {
            if let Some(list) = self.tth_index.get_mut(&old_digest) {
                list.retain(|n| *n != id);
                if list.is_empty() {
                    self.tth_index.remove(&old_digest);
                }
            }
        }
        if let Some(new_digest) = tth {
            self.tth_index.entry(new_digest).or_default().push(id);
        }

        if had != has {
            if let Some(parent) = parent {
                self.adjust_has_tth(parent, if has { 1 } else { -1 });
            }
        }
        Ok(())
    }

    /// Look up all file nodes carrying a given TTH digest.
    #[must_use]
    pub fn by_tth(&self, digest: &[u8; 24]) -> &[NodeId] {
        self.tth_index.get(digest).map_or(&[], |v| v.as_slice())
    }

    /// Render a node's path relative to `root`, `/`-separated, without a
    /// leading slash. Returns an empty string for `root` itself.
    #[must_use]
    pub fn path_from(&self, root: NodeId, id: NodeId) -> String {
        let mut components = Vec::new();
        let mut cur = id;
        while cur != root {
            components.push(self.name(cur).to_string());
            match self.parent(cur) {
                Some(p) => cur = p,
                None => break,
            }
        }
        components.reverse();
        components.join("/")
    }

    /// Resolve a `/`-separated path relative to `root`. A leading `/` is
    /// equivalent to none. Case-sensitive; `..` is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::DotDot`] if any component is `..`.
    pub fn resolve(&self, root: NodeId, path: &str) -> Result<Option<NodeId>, TreeError> {
        let path = path.strip_prefix('/').unwrap_or(path);
        if path.is_empty() {
            return Ok(Some(root));
        }
        let mut cur = root;
        for component in path.split('/') {
            if component == ".." {
                return Err(TreeError::DotDot);
            }
            if component.is_empty() {
                continue;
            }
            match self.find_child(cur, component) {
                Some(next) => cur = next,
                None => return Ok(None),
            }
        }
        Ok(Some(cur))
    }

    /// Deep-copy the subtree rooted at `id` into `dest`, as a child of
    /// `dest_parent`. Used e.g. to graft a peer's partial listing into a
    /// local browse cache.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::NotADirectory`] if `dest_parent` is not a
    /// directory in `dest`, or [`TreeError::DuplicateName`] if the name
    /// collides with an existing sibling.
    pub fn copy_subtree(
        &self,
        id: NodeId,
        dest: &mut FileTree,
        dest_parent: NodeId,
    ) -> Result<NodeId, TreeError> {
        let name = self.name(id).to_string();
        match &self.node(id).kind {
            NodeKind::File { size, tth } => {
                let last_modified = self.node(id).last_modified;
                dest.insert_file(dest_parent, name, *size, *tth, last_modified)
            }
            NodeKind::Dir {
                children,
                incomplete,
                ..
            } => {
                let new_id = dest.insert_dir(dest_parent, name, *incomplete)?;
                for &child in children {
                    self.copy_subtree(child, dest, new_id)?;
                }
                Ok(new_id)
            }
        }
    }
}

/// Whether a search result may be a file, a directory, or either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMask {
    /// Both files and directories match.
    Any,
    /// Only files match.
    FilesOnly,
    /// Only directories match.
    DirsOnly,
}

impl FileMask {
    fn allows_files(self) -> bool {
        !matches!(self, Self::DirsOnly)
    }
    fn allows_dirs(self) -> bool {
        !matches!(self, Self::FilesOnly)
    }
}

/// A signed size constraint on search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeConstraint {
    /// No size constraint.
    Any,
    /// Match only files of at least this size.
    AtLeast(u64),
    /// Match only files of at most this size.
    AtMost(u64),
}

impl SizeConstraint {
    fn matches(self, size: u64) -> bool {
        match self {
            Self::Any => true,
            Self::AtLeast(min) => size >= min,
            Self::AtMost(max) => size <= max,
        }
    }
}

/// A file-tree search query, as issued by `$Search`/`SCH`.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Size constraint.
    pub size: SizeConstraint,
    /// File/directory mask.
    pub mask: FileMask,
    /// Lowercased extensions (without the leading `.`); empty means "any".
    pub extensions: Vec<String>,
    /// Lowercased substrings that must all appear somewhere along the path
    /// from the search root to the match.
    pub include: Vec<String>,
    /// Maximum number of results (10 for a remote peer's query, 5 for the
    /// hub's own broadcast channel).
    pub max_results: usize,
}

/// One search hit: the matched node and its path relative to the search
/// root.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Path from the search root, `/`-separated, no leading slash.
    pub path: String,
    /// The matched node.
    pub node: NodeId,
}

impl FileTree {
    /// Run a search rooted at `root`, depth-first, capped at
    /// `query.max_results`.
    #[must_use]
    pub fn search(&self, root: NodeId, query: &SearchQuery) -> Vec<SearchHit> {
        let include: Vec<String> = query.include.iter().map(|s| s.to_lowercase()).collect();
        let mut results = Vec::new();
        self.search_rec(root, root, &include, String::new(), query, &mut results);
        results
    }

    fn search_rec(
        &self,
        root: NodeId,
        id: NodeId,
        terms: &[String],
        path: String,
        query: &SearchQuery,
        results: &mut Vec<SearchHit>,
    ) {
        if results.len() >= query.max_results {
            return;
        }

        let name_lower = self.name(id).to_lowercase();
        let remaining: Vec<String> = if id == root {
            terms.to_vec()
        } else {
            terms
                .iter()
                .filter(|t| !name_lower.contains(t.as_str()))
                .cloned()
                .collect()
        };

        match &self.node(id).kind {
            NodeKind::Dir { children, .. } => {
                if id != root && query.mask.allows_dirs() && remaining.is_empty() {
                    results.push(SearchHit {
                        path: path.clone(),
                        node: id,
                    });
                    if results.len() >= query.max_results {
                        return;
                    }
                }
                for &child in children {
                    let child_path = if path.is_empty() {
                        self.name(child).to_string()
                    } else {
                        format!("{path}/{}", self.name(child))
                    };
                    self.search_rec(root, child, &remaining, child_path, query, results);
                    if results.len() >= query.max_results {
                        return;
                    }
                }
            }
            NodeKind::File { size, tth } => {
                if !query.mask.allows_files() || tth.is_none() {
                    return;
                }
                if !query.size.matches(*size) {
                    return;
                }
                if !query.extensions.is_empty() {
                    let ext = self
                        .name(id)
                        .rsplit_once('.')
                        .map(|(_, e)| e.to_lowercase());
                    if !ext.is_some_and(|e| query.extensions.contains(&e)) {
                        return;
                    }
                }
                if remaining.is_empty() {
                    results.push(SearchHit { path, node: id });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> (FileTree, NodeId) {
        let mut tree = FileTree::new();
        let root = tree.root();
        let music = tree.insert_dir(root, "music", false).unwrap();
        tree.insert_file(music, "song.mp3", 1024, Some([1u8; 24]), 0)
            .unwrap();
        tree.insert_file(music, "other.flac", 2048, None, 0)
            .unwrap();
        (tree, root)
    }

    #[test]
    fn size_rolls_up_to_root() {
        let (tree, root) = sample_tree();
        assert_eq!(tree.size(root), 1024 + 2048);
    }

    #[test]
    fn has_tth_counts_subdirs_and_tth_files() {
        let (tree, root) = sample_tree();
        // root has one child: the "music" directory, which always counts.
        assert_eq!(tree.has_tth(root), 1);
        let music = tree.find_child(root, "music").unwrap();
        // music has one file with a TTH and one without.
        assert_eq!(tree.has_tth(music), 1);
    }

    #[test]
    fn duplicate_sibling_name_rejected() {
        let (mut tree, root) = sample_tree();
        assert_eq!(
            tree.insert_dir(root, "music", false),
            Err(TreeError::DuplicateName("music".into()))
        );
    }

    #[test]
    fn path_roundtrip() {
        let (tree, root) = sample_tree();
        let music = tree.find_child(root, "music").unwrap();
        let song = tree.find_child(music, "song.mp3").unwrap();
        let path = tree.path_from(root, song);
        assert_eq!(path, "music/song.mp3");
        assert_eq!(tree.resolve(root, &path).unwrap(), Some(song));
        assert_eq!(tree.resolve(root, "/music/song.mp3").unwrap(), Some(song));
    }

    #[test]
    fn resolve_rejects_dotdot() {
        let (tree, root) = sample_tree();
        assert_eq!(tree.resolve(root, "music/../x"), Err(TreeError::DotDot));
    }

    #[test]
    fn remove_rebalances_size_and_has_tth() {
        let (mut tree, root) = sample_tree();
        let music = tree.find_child(root, "music").unwrap();
        let song = tree.find_child(music, "song.mp3").unwrap();
        tree.remove(song).unwrap();
        assert_eq!(tree.size(root), 2048);
        assert_eq!(tree.has_tth(music), 0);
        assert_eq!(tree.by_tth(&[1u8; 24]), &[] as &[NodeId]);
    }

    #[test]
    fn tth_index_tracks_insert_and_update() {
        let (mut tree, root) = sample_tree();
        let music = tree.find_child(root, "music").unwrap();
        let other = tree.find_child(music, "other.flac").unwrap();
        assert!(tree.by_tth(&[9u8; 24]).is_empty());
        tree.set_file_tth(other, Some([9u8; 24])).unwrap();
        assert_eq!(tree.by_tth(&[9u8; 24]), &[other]);
        assert_eq!(tree.has_tth(music), 2);
    }

    #[test]
    fn search_finds_file_by_substring() {
        let (tree, root) = sample_tree();
        let query = SearchQuery {
            size: SizeConstraint::Any,
            mask: FileMask::Any,
            extensions: vec![],
            include: vec!["song".into()],
            max_results: 10,
        };
        let hits = tree.search(root, &query);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "music/song.mp3");
    }

    #[test]
    fn search_excludes_files_without_tth() {
        let (tree, root) = sample_tree();
        let query = SearchQuery {
            size: SizeConstraint::Any,
            mask: FileMask::Any,
            extensions: vec![],
            include: vec!["other".into()],
            max_results: 10,
        };
        assert!(tree.search(root, &query).is_empty());
    }

    #[test]
    fn search_caps_at_max_results() {
        let mut tree = FileTree::new();
        let root = tree.root();
        for i in 0..20 {
            tree.insert_file(root, format!("f{i}.bin"), 1, Some([i as u8; 24]), 0)
                .unwrap();
        }
        let query = SearchQuery {
            size: SizeConstraint::Any,
            mask: FileMask::Any,
            extensions: vec![],
            include: vec![],
            max_results: 5,
        };
        assert_eq!(tree.search(root, &query).len(), 5);
    }

    #[test]
    fn search_prunes_include_terms_matched_by_directory_name() {
        let mut tree = FileTree::new();
        let root = tree.root();
        let music = tree.insert_dir(root, "music", false).unwrap();
        tree.insert_file(music, "track.mp3", 10, Some([2u8; 24]), 0)
            .unwrap();
        // "music" is matched by the directory name, so the file itself
        // doesn't need to contain it.
        let query = SearchQuery {
            size: SizeConstraint::Any,
            mask: FileMask::Any,
            extensions: vec![],
            include: vec!["music".into()],
            max_results: 10,
        };
        assert_eq!(tree.search(root, &query).len(), 1);
    }
}
