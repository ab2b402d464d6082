//! Segment directory: the ordered chain of segments.
//!
//! The chain is a doubly-linked list kept in an arena of slots, sorted
//! ascending by a sparse `i64` order key. New segments get the midpoint of
//! their neighbours' keys; when two neighbours are adjacent integers the
//! whole chain is renumbered ([`SegmentDirectory::rearrange`]).
//!
//! ```text
//!   head                                             tail
//!    |                                                 |
//!  [k=-6e18] <-> [k=-2e18] <-> [k=0] <-> [k=2] <-> [k=4e18]
//!                                ^          ^
//!                              write       read
//! ```
//!
//! A token table maps registered identities to their node. Removing a node
//! removes its table entry, so a token can never resolve to a dead node.

use crate::error::{CoreError, CoreResult};
use crate::token::TokenId;
use segstore_storage::{Segment, SegmentMode};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// Index of a node within the chain's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(usize);

/// One segment plus its chain bookkeeping.
pub(crate) struct Node {
    pub(crate) key: i64,
    pub(crate) identity: TokenId,
    pub(crate) segment: Box<dyn Segment>,
    pub(crate) mode: SegmentMode,
    pub(crate) read_pos: u64,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("key", &self.key)
            .field("identity", &self.identity)
            .field("mode", &self.mode)
            .field("read_pos", &self.read_pos)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Reads from the node's read cursor and advances it.
    pub(crate) fn read(&mut self, buf: &mut [u8]) -> CoreResult<usize> {
        let n = self.segment.read_at(self.read_pos, buf)?;
        self.read_pos += n as u64;
        Ok(n)
    }

    /// Appends at the end of the segment.
    pub(crate) fn write(&mut self, data: &[u8]) -> CoreResult<()> {
        self.segment.append(data)?;
        Ok(())
    }

    /// Bytes between the read cursor and the end of the segment.
    pub(crate) fn remaining(&self) -> CoreResult<u64> {
        Ok(self.segment.size()?.saturating_sub(self.read_pos))
    }

    pub(crate) fn size(&self) -> CoreResult<u64> {
        Ok(self.segment.size()?)
    }

    pub(crate) fn set_mode(&mut self, mode: SegmentMode) -> CoreResult<()> {
        self.segment.set_mode(mode)?;
        self.mode = mode;
        Ok(())
    }
}

/// Ordered chain of segments plus the token table.
#[derive(Debug, Default)]
pub(crate) struct SegmentDirectory {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    tokens: HashMap<TokenId, NodeId>,
    len: usize,
}

impl SegmentDirectory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn head(&self) -> Option<NodeId> {
        self.head
    }

    pub(crate) fn tail(&self) -> Option<NodeId> {
        self.tail
    }

    /// # Panics
    ///
    /// Panics if `id` does not name a live node. Node ids are only handed out
    /// by this directory and dropped by the engine when a node is removed.
    pub(crate) fn node(&self, id: NodeId) -> &Node {
        match self.slots.get(id.0).and_then(Option::as_ref) {
            Some(node) => node,
            None => panic!("stale chain node {}", id.0),
        }
    }

    /// # Panics
    ///
    /// Panics if `id` does not name a live node.
    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        match self.slots.get_mut(id.0).and_then(Option::as_mut) {
            Some(node) => node,
            None => panic!("stale chain node {}", id.0),
        }
    }

    pub(crate) fn key(&self, id: NodeId) -> i64 {
        self.node(id).key
    }

    pub(crate) fn prev(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).prev
    }

    pub(crate) fn next(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).next
    }

    /// Resolves a registered identity to its node.
    pub(crate) fn lookup(&self, identity: &TokenId) -> Option<NodeId> {
        self.tokens.get(identity).copied()
    }

    /// Returns `true` if a live token resolves to this node.
    pub(crate) fn is_registered(&self, id: NodeId) -> bool {
        self.tokens.get(&self.node(id).identity) == Some(&id)
    }

    /// Forgets a registered identity without touching its node.
    pub(crate) fn unregister(&mut self, identity: &TokenId) -> Option<NodeId> {
        self.tokens.remove(identity)
    }

    /// Inserts a segment at its ordered position.
    ///
    /// The scan for the position starts at `hint` when the hint lies before
    /// the new key, and at the head otherwise.
    pub(crate) fn insert(
        &mut self,
        key: i64,
        identity: TokenId,
        segment: Box<dyn Segment>,
        register: bool,
        hint: Option<NodeId>,
    ) -> CoreResult<NodeId> {
        if register && self.tokens.contains_key(&identity) {
            return Err(CoreError::invalid_format(format!(
                "segment identity {identity} already in chain"
            )));
        }

        // Find the last node with a key below the new one.
        let mut prev = hint.filter(|&h| self.key(h) < key);
        let mut cursor = match prev {
            Some(p) => self.next(p),
            None => self.head,
        };
        while let Some(c) = cursor {
            let c_key = self.key(c);
            if c_key == key {
                return Err(CoreError::invalid_format(format!(
                    "duplicate order key {key}"
                )));
            }
            if c_key > key {
                break;
            }
            prev = Some(c);
            cursor = self.next(c);
        }
        let next = cursor;

        let node = Node {
            key,
            identity: identity.clone(),
            segment,
            mode: SegmentMode::Idle,
            read_pos: 0,
            prev,
            next,
        };
        let id = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.slots.push(Some(node));
                NodeId(self.slots.len() - 1)
            }
        };

        match prev {
            Some(p) => self.node_mut(p).next = Some(id),
            None => self.head = Some(id),
        }
        match next {
            Some(n) => self.node_mut(n).prev = Some(id),
            None => self.tail = Some(id),
        }

        if register {
            self.tokens.insert(identity, id);
        }
        self.len += 1;
        Ok(id)
    }

    /// Unlinks a node and returns it. Its token entry goes with it.
    pub(crate) fn remove(&mut self, id: NodeId) -> Node {
        let (prev, next) = {
            let node = self.node(id);
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => self.tail = prev,
        }

        let node = match self.slots[id.0].take() {
            Some(node) => node,
            None => panic!("stale chain node {}", id.0),
        };
        self.free.push(id.0);
        if self.tokens.get(&node.identity) == Some(&id) {
            self.tokens.remove(&node.identity);
        }
        self.len -= 1;
        node
    }

    /// Node ids in chain order.
    pub(crate) fn ids(&self) -> Vec<NodeId> {
        let mut ids = Vec::with_capacity(self.len);
        let mut cursor = self.head;
        while let Some(id) = cursor {
            ids.push(id);
            cursor = self.next(id);
        }
        ids
    }

    /// Iterates nodes in chain order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Node> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let id = cursor?;
            let node = self.node(id);
            cursor = node.next;
            Some(node)
        })
    }

    /// Removes every node, returning them in chain order.
    pub(crate) fn drain(&mut self) -> Vec<Node> {
        self.ids().into_iter().map(|id| self.remove(id)).collect()
    }

    /// Width of the key gap between two neighbours (or the chain ends).
    pub(crate) fn gap(&self, lo: Option<NodeId>, hi: Option<NodeId>) -> i128 {
        let lo = lo.map_or(i64::MIN, |id| self.key(id));
        let hi = hi.map_or(i64::MAX, |id| self.key(id));
        i128::from(hi) - i128::from(lo)
    }

    /// Midpoint key between two neighbours (or the chain ends).
    pub(crate) fn key_between(&self, lo: Option<NodeId>, hi: Option<NodeId>) -> i64 {
        midpoint(lo.map(|id| self.key(id)), hi.map(|id| self.key(id)))
    }

    /// Spreads all keys evenly across the `i64` range, keeping chain order.
    ///
    /// Each segment is relabelled so media that persist keys stay in step.
    ///
    /// Either every segment takes its new key or none does: when a relabel
    /// fails, the segments already relabelled are put back under their old
    /// keys before the error is returned.
    pub(crate) fn rearrange(&mut self) -> CoreResult<()> {
        let ids = self.ids();
        let keys = spread_keys(ids.len())?;
        for (done, (&id, &key)) in ids.iter().zip(&keys).enumerate() {
            if let Err(e) = self.node_mut(id).segment.relabel(key) {
                for &undo in &ids[..done] {
                    let node = self.node_mut(undo);
                    if let Err(undo_err) = node.segment.relabel(node.key) {
                        warn!(key = node.key, error = %undo_err, "failed to restore segment key");
                    }
                }
                return Err(e.into());
            }
        }
        for (id, key) in ids.into_iter().zip(keys) {
            self.node_mut(id).key = key;
        }
        Ok(())
    }
}

/// Ceiling midpoint between two keys; a missing bound is the end of the range.
pub(crate) fn midpoint(lo: Option<i64>, hi: Option<i64>) -> i64 {
    let lo = i128::from(lo.unwrap_or(i64::MIN));
    let hi = i128::from(hi.unwrap_or(i64::MAX));
    let mid = lo + (hi - lo + 1) / 2;
    // lo <= mid <= hi, so the value always fits
    mid as i64
}

/// Evenly spaced keys for `n` segments across the whole `i64` range.
pub(crate) fn spread_keys(n: usize) -> CoreResult<Vec<i64>> {
    spread(i128::from(i64::MIN), i128::from(i64::MAX), n)
}

fn spread(lo: i128, hi: i128, n: usize) -> CoreResult<Vec<i64>> {
    let step = (hi - lo) / (n as i128 + 1);
    if step < 2 {
        return Err(CoreError::RenumberingExhausted { segments: n });
    }
    Ok((1..=n as i128).map(|i| (lo + i * step) as i64).collect())
}
