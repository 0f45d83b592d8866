use std::cmp::Ordering;

use smallvec::{smallvec, SmallVec};

use crate::config::{
    CHILD_PTR_SIZE, MAX_KEY_SIZE, MAX_VALUE_SIZE, NODE_HEADER_SIZE, OFFSET_SLOT_SIZE, PAGE_SIZE,
};
use crate::storage::{Node, PageStore, PageType};

/// How an insert treats an existing or missing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Insert the key or replace its value.
    #[default]
    Upsert = 0,
    /// Replace only; a missing key is a no-op.
    UpdateOnly = 1,
    /// Insert only; an existing key is a no-op.
    InsertOnly = 2,
}

struct InsertRequest<'a> {
    key: &'a [u8],
    val: &'a [u8],
    mode: UpdateMode,
    added: bool,
}

/// The tree root and the operations on it. All page traffic goes through
/// the [`PageStore`] passed into each call.
#[derive(Debug)]
pub struct BTree {
    root: u64,
}

impl BTree {
    pub fn new(root: u64) -> Self {
        BTree { root }
    }

    pub fn root(&self) -> u64 {
        self.root
    }

    /// Point lookup. Returns the stored value only on an exact key match.
    pub fn get(&self, store: &impl PageStore, key: &[u8]) -> Option<Vec<u8>> {
        if self.root == 0 {
            return None;
        }
        node_get(store, &store.get(self.root), key)
    }

    /// Inserts or updates `key` according to `mode`. Returns whether a new
    /// key was added; replacing or skipping an existing key reports false.
    pub fn insert(
        &mut self,
        store: &mut impl PageStore,
        key: &[u8],
        val: &[u8],
        mode: UpdateMode,
    ) -> bool {
        assert!(!key.is_empty(), "inserting an empty key");
        assert!(key.len() <= MAX_KEY_SIZE, "key exceeds {MAX_KEY_SIZE} bytes");
        assert!(val.len() <= MAX_VALUE_SIZE, "value exceeds {MAX_VALUE_SIZE} bytes");

        if self.root == 0 {
            // the sentinel guarantees the tree always holds at least one
            // key, making lookup_le total for every search key
            let mut root = Node::new();
            root.set_header(PageType::Leaf, 2);
            root.append_kv(0, 0, b"", b"");
            root.append_kv(1, 0, key, val);
            self.root = store.allocate(root);
            return true;
        }

        let mut req = InsertRequest {
            key,
            val,
            mode,
            added: false,
        };
        let old_root = store.get(self.root);
        let Some(updated) = tree_insert(store, &mut req, old_root) else {
            return req.added;
        };

        let pieces = node_split3(updated);
        store.free(self.root);

        if pieces.len() > 1 {
            // the root was split, add a level above the pieces
            let mut root = Node::new();
            root.set_header(PageType::Internal, pieces.len());
            for (i, piece) in pieces.into_iter().enumerate() {
                let first = piece.key(0).to_vec();
                let ptr = store.allocate(piece);
                root.append_kv(i, ptr, &first, b"");
            }
            self.root = store.allocate(root);
        } else {
            self.root = store.allocate(pieces.into_iter().next().unwrap());
        }
        req.added
    }

    /// Removes `key`. Returns whether it was present.
    pub fn delete(&mut self, store: &mut impl PageStore, key: &[u8]) -> bool {
        assert!(!key.is_empty(), "deleting an empty key");
        assert!(key.len() <= MAX_KEY_SIZE, "key exceeds {MAX_KEY_SIZE} bytes");

        if self.root == 0 {
            return false;
        }

        let old_root = store.get(self.root);
        let Some(updated) = tree_delete(store, old_root, key) else {
            return false;
        };

        store.free(self.root);
        if updated.page_type() == PageType::Internal && updated.nkeys() == 1 {
            // a single-child internal root is a pure indirection; drop a level
            self.root = updated.child_ptr(0);
        } else {
            self.root = store.allocate(updated);
        }
        true
    }
}

/// Greatest index whose key is ≤ `key`. Index 0 is the separator copied
/// from the parent (or the sentinel) and is skipped; it is the fallback
/// when every later key is greater.
fn lookup_le(node: &Node, key: &[u8]) -> usize {
    let mut found = 0;
    for i in 1..node.nkeys() {
        match node.key(i).cmp(key) {
            Ordering::Less => found = i,
            Ordering::Equal => {
                found = i;
                break;
            }
            Ordering::Greater => break,
        }
    }
    found
}

fn node_get(store: &impl PageStore, node: &Node, key: &[u8]) -> Option<Vec<u8>> {
    let idx = lookup_le(node, key);
    match node.page_type() {
        PageType::Leaf => (node.key(idx) == key).then(|| node.value(idx).to_vec()),
        PageType::Internal => node_get(store, &store.get(node.child_ptr(idx)), key),
        PageType::FreeList => panic!("free-list page reached during lookup"),
    }
}

/* --- insertion --- */

/// Applies the insert to the subtree rooted at `node`, returning the
/// replacement (possibly oversized, to be split by the caller) or `None`
/// for a no-op.
fn tree_insert(
    store: &mut impl PageStore,
    req: &mut InsertRequest<'_>,
    node: Node,
) -> Option<Node> {
    let idx = lookup_le(&node, req.key);
    match node.page_type() {
        PageType::Leaf => {
            if node.key(idx) == req.key {
                if req.mode == UpdateMode::InsertOnly {
                    return None;
                }
                if node.value(idx) == req.val {
                    // identical value, avoid churning pages
                    return None;
                }
                let mut new = Node::scratch();
                leaf_update(&mut new, &node, idx, req.key, req.val);
                Some(new)
            } else {
                if req.mode == UpdateMode::UpdateOnly {
                    return None;
                }
                let mut new = Node::scratch();
                leaf_insert(&mut new, &node, idx + 1, req.key, req.val);
                req.added = true;
                Some(new)
            }
        }
        PageType::Internal => node_insert(store, req, node, idx),
        PageType::FreeList => panic!("free-list page reached during insert"),
    }
}

fn node_insert(
    store: &mut impl PageStore,
    req: &mut InsertRequest<'_>,
    node: Node,
    idx: usize,
) -> Option<Node> {
    let child_ptr = node.child_ptr(idx);
    let child = store.get(child_ptr);
    let updated = tree_insert(store, req, child)?;

    store.free(child_ptr);
    let pieces = node_split3(updated);

    let mut new = Node::scratch();
    replace_children(store, &mut new, &node, idx, pieces);
    Some(new)
}

/// Inserts the pair at `idx`, shifting the tail right by one.
fn leaf_insert(new: &mut Node, old: &Node, idx: usize, key: &[u8], val: &[u8]) {
    new.set_header(PageType::Leaf, old.nkeys() + 1);
    new.append_range(old, 0, 0, idx);
    new.append_kv(idx, 0, key, val);
    new.append_range(old, idx + 1, idx, old.nkeys() - idx);
}

/// Replaces the value at `idx` in place (structurally; the page is new).
fn leaf_update(new: &mut Node, old: &Node, idx: usize, key: &[u8], val: &[u8]) {
    new.set_header(PageType::Leaf, old.nkeys());
    new.append_range(old, 0, 0, idx);
    new.append_kv(idx, 0, key, val);
    new.append_range(old, idx + 1, idx + 1, old.nkeys() - (idx + 1));
}

/// Cuts an overflowing node into at most three pages. A node within page
/// size passes through unchanged (truncated to one page).
fn node_split3(mut old: Node) -> SmallVec<[Node; 3]> {
    if old.nbytes() <= PAGE_SIZE {
        old.truncate_to_page();
        return smallvec![old];
    }

    let mut left = Node::scratch(); // may still overflow and split again
    let mut right = Node::new();
    node_split2(&mut left, &mut right, &old);

    if left.nbytes() <= PAGE_SIZE {
        left.truncate_to_page();
        return smallvec![left, right];
    }

    let mut leftleft = Node::new();
    let mut middle = Node::new();
    node_split2(&mut leftleft, &mut middle, &left);
    assert!(leftleft.nbytes() <= PAGE_SIZE, "split failed to fit the left piece");
    smallvec![leftleft, middle, right]
}

/// Cuts `old` in two so that the right half always fits a page. The split
/// point starts at the middle, moves left until the left half fits, then
/// right until the right half fits, so the left piece tends smaller.
fn node_split2(left: &mut Node, right: &mut Node, old: &Node) {
    assert!(old.nkeys() >= 2, "splitting a node with fewer than 2 entries");

    let left_bytes = |nleft: usize| {
        NODE_HEADER_SIZE + (CHILD_PTR_SIZE + OFFSET_SLOT_SIZE) * nleft + old.entry_offset(nleft)
    };
    let right_bytes = |nleft: usize| old.nbytes() - left_bytes(nleft) + NODE_HEADER_SIZE;

    let mut nleft = old.nkeys() / 2;
    while left_bytes(nleft) > PAGE_SIZE {
        nleft -= 1;
    }
    assert!(nleft >= 1, "left split piece has no entries");

    while right_bytes(nleft) > PAGE_SIZE {
        nleft += 1;
    }
    assert!(nleft < old.nkeys(), "right split piece has no entries");
    let nright = old.nkeys() - nleft;

    left.set_header(old.page_type(), nleft);
    right.set_header(old.page_type(), nright);
    left.append_range(old, 0, 0, nleft);
    right.append_range(old, 0, nleft, nright);
    // only the right half is guaranteed to fit; the caller re-splits the left
    assert!(right.nbytes() <= PAGE_SIZE, "right split piece overflows");
}

/// Rewrites `old` with the link at `idx` replaced by links to `children`,
/// each child allocated and keyed by its first entry.
fn replace_children(
    store: &mut impl PageStore,
    new: &mut Node,
    old: &Node,
    idx: usize,
    children: SmallVec<[Node; 3]>,
) {
    let inc = children.len();

    if inc == 1 && children[0].key(0) == old.key(idx) {
        // separator unchanged: byte-copy the parent, swap one pointer
        new.copy_used_from(old);
        let child = children.into_iter().next().unwrap();
        let ptr = store.allocate(child);
        new.set_child_ptr(idx, ptr);
        return;
    }

    new.set_header(PageType::Internal, old.nkeys() + inc - 1);
    new.append_range(old, 0, 0, idx);
    for (i, child) in children.into_iter().enumerate() {
        let first = child.key(0).to_vec();
        let ptr = store.allocate(child);
        new.append_kv(idx + i, ptr, &first, b"");
    }
    new.append_range(old, idx + inc, idx + 1, old.nkeys() - (idx + 1));
}

/* --- deletion --- */

enum MergeDir {
    Left(Node),
    Right(Node),
    None,
}

/// Decides whether an underfull page should be folded into a sibling.
/// Merging triggers only below a quarter page and only when the combined
/// page fits; the left sibling wins when both qualify.
fn should_merge(
    store: &impl PageStore,
    parent: &Node,
    idx: usize,
    updated: &Node,
) -> MergeDir {
    if updated.nbytes() > PAGE_SIZE / 4 {
        return MergeDir::None;
    }

    if idx > 0 {
        let sibling = store.get(parent.child_ptr(idx - 1));
        let merged = sibling.nbytes() + updated.nbytes() - NODE_HEADER_SIZE;
        if merged <= PAGE_SIZE {
            return MergeDir::Left(sibling);
        }
    }

    if idx + 1 < parent.nkeys() {
        let sibling = store.get(parent.child_ptr(idx + 1));
        let merged = sibling.nbytes() + updated.nbytes() - NODE_HEADER_SIZE;
        if merged <= PAGE_SIZE {
            return MergeDir::Right(sibling);
        }
    }
    MergeDir::None
}

fn node_merge(new: &mut Node, left: &Node, right: &Node) {
    new.set_header(left.page_type(), left.nkeys() + right.nkeys());
    new.append_range(left, 0, 0, left.nkeys());
    new.append_range(right, left.nkeys(), 0, right.nkeys());
    assert!(new.nbytes() <= PAGE_SIZE, "merged page overflows");
}

fn leaf_delete(new: &mut Node, old: &Node, idx: usize) {
    new.set_header(PageType::Leaf, old.nkeys() - 1);
    new.append_range(old, 0, 0, idx);
    new.append_range(old, idx, idx + 1, old.nkeys() - (idx + 1));
}

/// Rewrites `old` with the two adjacent links at `idx` and `idx + 1`
/// replaced by a single link to the merged page.
fn replace_two_children(new: &mut Node, old: &Node, idx: usize, ptr: u64, key: &[u8]) {
    new.set_header(old.page_type(), old.nkeys() - 1);
    new.append_range(old, 0, 0, idx);
    new.append_kv(idx, ptr, key, b"");
    new.append_range(old, idx + 1, idx + 2, old.nkeys() - (idx + 2));
}

/// Applies the delete to the subtree rooted at `node`, returning the
/// replacement or `None` when the key was not found.
fn tree_delete(store: &mut impl PageStore, node: Node, key: &[u8]) -> Option<Node> {
    let idx = lookup_le(&node, key);
    match node.page_type() {
        PageType::Leaf => {
            if node.key(idx) != key {
                return None;
            }
            let mut new = Node::new();
            leaf_delete(&mut new, &node, idx);
            Some(new)
        }
        PageType::Internal => node_delete(store, node, idx, key),
        PageType::FreeList => panic!("free-list page reached during delete"),
    }
}

fn node_delete(store: &mut impl PageStore, node: Node, idx: usize, key: &[u8]) -> Option<Node> {
    let child_ptr = node.child_ptr(idx);
    let child = store.get(child_ptr);
    let updated = tree_delete(store, child, key)?;
    store.free(child_ptr);

    let mut new = Node::new();
    match should_merge(store, &node, idx, &updated) {
        MergeDir::Left(sibling) => {
            let mut merged = Node::new();
            node_merge(&mut merged, &sibling, &updated);
            store.free(node.child_ptr(idx - 1));
            let first = merged.key(0).to_vec();
            let ptr = store.allocate(merged);
            replace_two_children(&mut new, &node, idx - 1, ptr, &first);
        }
        MergeDir::Right(sibling) => {
            let mut merged = Node::new();
            node_merge(&mut merged, &updated, &sibling);
            store.free(node.child_ptr(idx + 1));
            let first = merged.key(0).to_vec();
            let ptr = store.allocate(merged);
            replace_two_children(&mut new, &node, idx, ptr, &first);
        }
        MergeDir::None if updated.nkeys() == 0 => {
            // deleting everything under the only child: the parent empties
            // too and the emptiness propagates upward
            assert!(node.nkeys() == 1 && idx == 0, "empty child with siblings");
            new.set_header(PageType::Internal, 0);
        }
        MergeDir::None => {
            replace_children(store, &mut new, &node, idx, smallvec![updated]);
        }
    }
    Some(new)
}
