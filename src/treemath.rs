//! Index arithmetic for left-balanced binary trees
//!
//! A tree over `n` leaves is stored as a flat array of `2n - 1` nodes:
//! - leaves sit at even positions (leaf `i` at `2i`)
//! - internal nodes sit at odd positions
//! - the root is at `2^floor(log2(2n - 1)) - 1`
//!
//! The left subtree of every node holds the largest power of two of its
//! leaves, so for a leaf count that is not a power of two the rightmost leaves
//! sit closer to the root. Positions past the end of the array are skipped
//! when walking up or right, which is what keeps the tree complete.

pub type LeafIndex = usize;
pub type NodeIndex = usize;

/// Number of nodes in a tree with `leaf_count` leaves: `2n - 1`
pub fn node_width(leaf_count: usize) -> usize {
    if leaf_count == 0 {
        0
    } else {
        2 * (leaf_count - 1) + 1
    }
}

/// Number of leaves in a tree with `node_count` nodes, if that count is valid
pub fn leaf_width(node_count: usize) -> Option<usize> {
    if node_count % 2 == 1 {
        Some(node_count.div_ceil(2))
    } else {
        None
    }
}

/// Level of a node: 0 for leaves, counting the trailing one bits otherwise
pub fn level(node: NodeIndex) -> usize {
    node.trailing_ones() as usize
}

/// Exponent of the largest power of two not above `x`
fn log2(x: usize) -> usize {
    if x == 0 {
        0
    } else {
        (usize::BITS - 1 - x.leading_zeros()) as usize
    }
}

/// Root position of a tree with `leaf_count` leaves
pub fn root(leaf_count: usize) -> NodeIndex {
    let width = node_width(leaf_count);
    (1 << log2(width)) - 1
}

pub fn is_leaf(node: NodeIndex) -> bool {
    node & 0x01 == 0
}

pub fn leaf_to_node(leaf: LeafIndex) -> NodeIndex {
    2 * leaf
}

pub fn node_to_leaf(node: NodeIndex) -> Option<LeafIndex> {
    is_leaf(node).then_some(node / 2)
}

/// Left child: `x ^ (1 << (k - 1))`
pub fn left(node: NodeIndex) -> Option<NodeIndex> {
    let k = level(node);
    if k == 0 {
        None
    } else {
        Some(node ^ (0x01 << (k - 1)))
    }
}

/// Right child: `x ^ (3 << (k - 1))`, descending left while outside the tree
pub fn right(node: NodeIndex, leaf_count: usize) -> Option<NodeIndex> {
    let k = level(node);
    if k == 0 {
        return None;
    }

    let width = node_width(leaf_count);
    let mut r = node ^ (0x03 << (k - 1));
    while r >= width {
        r = left(r)?;
    }
    Some(r)
}

/// Parent in the infinite tree
fn parent_step(node: NodeIndex) -> NodeIndex {
    let k = level(node);
    let b = (node >> (k + 1)) & 0x01;
    (node | (1 << k)) ^ (b << (k + 1))
}

/// Parent, climbing past positions outside the tree
pub fn parent(node: NodeIndex, leaf_count: usize) -> Option<NodeIndex> {
    if node == root(leaf_count) {
        return None;
    }

    let width = node_width(leaf_count);
    let mut p = parent_step(node);
    while p >= width {
        p = parent_step(p);
    }
    Some(p)
}

pub fn sibling(node: NodeIndex, leaf_count: usize) -> Option<NodeIndex> {
    let p = parent(node, leaf_count)?;
    if node < p {
        right(p, leaf_count)
    } else {
        left(p)
    }
}

/// Ancestors of a leaf, ordered from its parent up to the root
pub fn direct_path(leaf: LeafIndex, leaf_count: usize) -> Vec<NodeIndex> {
    let mut path = Vec::new();
    let mut node = leaf_to_node(leaf);
    while let Some(p) = parent(node, leaf_count) {
        path.push(p);
        node = p;
    }
    path
}

/// Siblings of the leaf and of each non-root ancestor, from the leaf upward
pub fn copath(leaf: LeafIndex, leaf_count: usize) -> Vec<NodeIndex> {
    let mut copath = Vec::new();
    let mut node = leaf_to_node(leaf);
    while let Some(s) = sibling(node, leaf_count) {
        copath.push(s);
        // sibling exists only below the root, so parent does too
        let Some(p) = parent(node, leaf_count) else {
            break;
        };
        node = p;
    }
    copath
}

/// Maximum leaf depth: `ceil(log2(n))`
pub fn depth(leaf_count: usize) -> usize {
    if leaf_count <= 1 {
        0
    } else {
        log2(leaf_count - 1) + 1
    }
}

/// Internal nodes ordered so that both children precede their parent
pub fn internal_nodes_bottom_up(leaf_count: usize) -> Vec<NodeIndex> {
    let width = node_width(leaf_count);
    let mut nodes: Vec<NodeIndex> = (0..width).filter(|&x| !is_leaf(x)).collect();
    nodes.sort_by_key(|&x| (level(x), x));
    nodes
}
