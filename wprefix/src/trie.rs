// Copyright 2022 Oxide Computer Company

//! A complete binary trie over fixed length address keys.
//!
//! Node values live in a single arena owned by the trie, laid out breadth
//! first: the root is at index 0 and the children of node `i` are at
//! `2i + 1` and `2i + 2`. Structure and node names are derived from the
//! index, so a node only stores its counts. Every child has a larger index
//! than its parent, so a reverse scan of the arena visits the tree bottom up.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rand::Rng;

use crate::bits::BitPath;
use crate::error::Error;
use crate::normalize::normalize;

/// Deepest trie that may be built. A trie of depth `d` holds `2^(d+1) - 1`
/// nodes.
pub const MAX_DEPTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }

    /// Distance from the root.
    pub fn depth(self) -> usize {
        (usize::BITS - 1 - (self.0 + 1).leading_zeros()) as usize
    }

    /// The node's path from the root read as an integer of `depth()` bits.
    fn path_value(self) -> u64 {
        ((self.0 + 1) - (1usize << self.depth())) as u64
    }

    /// Path from the root, `0` for left and `1` for right.
    pub fn name(self) -> BitPath {
        BitPath::from_value(self.path_value(), self.depth())
    }

    /// Order by path as a bit string: a prefix sorts before its extensions,
    /// `0` before `1`.
    fn path_cmp(self, other: NodeId) -> Ordering {
        let (da, db) = (self.depth(), other.depth());
        let m = da.max(db);
        (self.path_value() << (m - da))
            .cmp(&(other.path_value() << (m - db)))
            .then(da.cmp(&db))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Node {
    /// Aggregate count of this node.
    pub value: u64,

    /// The value this node had when the trie was built.
    pub orig_value: u64,

    /// Set once the node's subtree has been taken by a selection.
    pub used: bool,
}

#[derive(Debug, Clone)]
pub struct AddressTrie {
    nodes: Vec<Node>,
    depth: usize,
}

impl AddressTrie {
    /// A trie of the given depth with every value zero.
    pub fn new(depth: usize) -> Result<Self, Error> {
        if depth > MAX_DEPTH {
            return Err(Error::invalid(
                "build trie",
                format!("depth {} exceeds {}", depth, MAX_DEPTH),
            ));
        }
        let count = (1usize << (depth + 1)) - 1;
        Ok(Self {
            nodes: vec![Node::default(); count],
            depth,
        })
    }

    /// A trie whose leaves, in address order, carry `leaf_weights`. Internal
    /// nodes are aggregated from them.
    pub fn build(
        depth: usize,
        leaf_weights: Option<&[u64]>,
    ) -> Result<Self, Error> {
        let mut trie = Self::new(depth)?;
        let weights = match leaf_weights {
            Some(w) => w,
            None => return Ok(trie),
        };
        let leaves = trie.leaves();
        if weights.len() != leaves.len() {
            return Err(Error::invalid(
                "build trie",
                format!(
                    "{} leaf weights given for {} leaves",
                    weights.len(),
                    leaves.len()
                ),
            ));
        }
        // Every internal node sums a subset of the leaves, so a total that
        // fits bounds them all.
        weights.iter().try_fold(0u64, |acc, w| {
            acc.checked_add(*w).ok_or_else(|| {
                Error::invalid("build trie", "leaf weights overflow u64")
            })
        })?;
        for (id, w) in leaves.into_iter().zip(weights) {
            trie.nodes[id.0].value = *w;
        }
        trie.aggregate();
        for n in &mut trie.nodes {
            n.orig_value = n.value;
        }
        Ok(trie)
    }

    /// A trie with leaf values drawn uniformly from `0..=max`, optionally
    /// normalized to sum to `normal`.
    pub fn random<R: Rng>(
        depth: usize,
        max: u64,
        normal: Option<u64>,
        rng: &mut R,
    ) -> Result<Self, Error> {
        if depth > MAX_DEPTH {
            return Err(Error::invalid(
                "build trie",
                format!("depth {} exceeds {}", depth, MAX_DEPTH),
            ));
        }
        let mut values: Vec<u64> =
            (0..1usize << depth).map(|_| rng.random_range(0..=max)).collect();
        if let Some(total) = normal {
            values = normalize(&values, total)?;
        }
        Self::build(depth, Some(&values))
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn value(&self, id: NodeId) -> u64 {
        self.nodes[id.0].value
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        match id.0 {
            0 => None,
            i => Some(NodeId((i - 1) / 2)),
        }
    }

    pub fn left(&self, id: NodeId) -> Option<NodeId> {
        let i = 2 * id.0 + 1;
        (i < self.nodes.len()).then_some(NodeId(i))
    }

    pub fn right(&self, id: NodeId) -> Option<NodeId> {
        let i = 2 * id.0 + 2;
        (i < self.nodes.len()).then_some(NodeId(i))
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        id.depth() == self.depth
    }

    /// Recompute every internal node as the sum of its children. Leaves are
    /// left alone.
    pub fn aggregate(&mut self) {
        for i in (0..self.nodes.len()).rev() {
            if let (Some(l), Some(r)) =
                (self.left(NodeId(i)), self.right(NodeId(i)))
            {
                self.nodes[i].value =
                    self.nodes[l.0].value + self.nodes[r.0].value;
            }
        }
    }

    /// Count one sample along `bits`, incrementing the root and every node on
    /// the path.
    pub fn insert(&mut self, bits: &BitPath) -> Result<(), Error> {
        if bits.len() > self.depth {
            return Err(Error::invalid(
                "trie insert",
                format!(
                    "key of {} bits for trie of depth {}",
                    bits.len(),
                    self.depth
                ),
            ));
        }
        let mut cur = self.root();
        self.nodes[cur.0].value += 1;
        for bit in bits.iter() {
            let next = if bit { self.right(cur) } else { self.left(cur) };
            cur = match next {
                Some(c) => c,
                None => break,
            };
            self.nodes[cur.0].value += 1;
        }
        Ok(())
    }

    /// Leaves from left to right, i.e. in ascending address order.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.level(self.depth)
    }

    /// All nodes exactly `depth` steps below the root, left to right. Empty
    /// if the trie is not that deep.
    pub fn level(&self, depth: usize) -> Vec<NodeId> {
        if depth > self.depth {
            return Vec::new();
        }
        ((1usize << depth) - 1..(1usize << (depth + 1)) - 1)
            .map(NodeId)
            .collect()
    }

    /// The node reached by following `bits` from the root.
    pub fn node_at(&self, bits: &BitPath) -> Option<NodeId> {
        let mut cur = self.root();
        for bit in bits.iter() {
            cur = if bit { self.right(cur) } else { self.left(cur) }?;
        }
        Some(cur)
    }

    /// `id` followed by each of its ancestors up to and including the root.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), move |x| self.parent(*x))
    }

    /// Where the root paths of `a` and `b` part ways: the two children of
    /// their lowest common ancestor on `a`'s and `b`'s side respectively. If
    /// one node is an ancestor of the other (or they are the same node) the
    /// nodes themselves are returned.
    pub fn lowest_divergence(&self, a: NodeId, b: NodeId) -> (NodeId, NodeId) {
        if a == b {
            return (a, b);
        }
        let mut to_a: Vec<NodeId> = self.ancestors(a).collect();
        let mut to_b: Vec<NodeId> = self.ancestors(b).collect();
        to_a.reverse();
        to_b.reverse();

        for (x, y) in to_a.iter().zip(to_b.iter()) {
            if x != y {
                return (*x, *y);
            }
        }
        (a, b)
    }

    /// Priority order over nodes. Heavier nodes come first. Equal values are
    /// ordered by the heavier side of their divergence pair, and remaining
    /// ties by path so that distinct nodes never compare equal.
    pub fn compare_nodes(&self, a: NodeId, b: NodeId) -> Ordering {
        self.value(b)
            .cmp(&self.value(a))
            .then_with(|| {
                let (x, y) = self.lowest_divergence(a, b);
                self.value(y).cmp(&self.value(x))
            })
            .then_with(|| a.path_cmp(b))
    }

    /// `ids` sorted by `compare_nodes`.
    pub fn ranked<I>(&self, ids: I) -> Vec<NodeId>
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut v: Vec<NodeId> = ids.into_iter().collect();
        v.sort_by(|a, b| self.compare_nodes(*a, *b));
        v
    }

    /// A priority queue over `ids` that pops in `compare_nodes` order.
    pub fn queue<I>(&self, ids: I) -> NodeQueue<'_>
    where
        I: IntoIterator<Item = NodeId>,
    {
        NodeQueue {
            heap: ids.into_iter().map(|id| Ranked { trie: self, id }).collect(),
        }
    }

    /// Values of the nodes at `depth`, in priority order.
    pub fn level_values(&self, depth: usize) -> Vec<u64> {
        self.ranked(self.level(depth))
            .into_iter()
            .map(|id| self.value(id))
            .collect()
    }

    /// Zero `id` and its whole subtree and flag all of it as used. Ancestors
    /// pick up the change on the next `aggregate`.
    pub fn mark_used(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(x) = stack.pop() {
            let n = &mut self.nodes[x.0];
            n.used = true;
            n.value = 0;
            stack.extend(self.left(x).into_iter().chain(self.right(x)));
        }
    }

    /// Return every node to the value it was built with and clear all used
    /// flags.
    pub fn restore(&mut self) {
        for n in &mut self.nodes {
            n.value = n.orig_value;
            n.used = false;
        }
    }

    /// Take the heaviest not yet used node at `depth`: it is marked used, the
    /// trie is re-aggregated and the node is returned with the value it had
    /// when taken.
    pub fn take_heaviest(&mut self, depth: usize) -> Option<(NodeId, u64)> {
        let best = self
            .level(depth)
            .into_iter()
            .filter(|id| !self.nodes[id.0].used)
            .min_by(|a, b| self.compare_nodes(*a, *b))?;
        let value = self.value(best);
        self.mark_used(best);
        self.aggregate();
        Some((best, value))
    }
}

struct Ranked<'a> {
    trie: &'a AddressTrie,
    id: NodeId,
}

impl Ord for Ranked<'_> {
    // The heap pops its greatest element, which is the one that ranks first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.trie.compare_nodes(other.id, self.id)
    }
}

impl PartialOrd for Ranked<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Ranked<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Ranked<'_> {}

/// Max-priority queue of trie nodes. Borrows the trie, so values must not
/// change while the queue is alive.
pub struct NodeQueue<'a> {
    heap: BinaryHeap<Ranked<'a>>,
}

impl<'a> NodeQueue<'a> {
    pub fn pop(&mut self) -> Option<NodeId> {
        self.heap.pop().map(|r| r.id)
    }

    pub fn peek(&self) -> Option<NodeId> {
        self.heap.peek().map(|r| r.id)
    }

    pub fn push(&mut self, trie: &'a AddressTrie, id: NodeId) {
        self.heap.push(Ranked { trie, id });
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
