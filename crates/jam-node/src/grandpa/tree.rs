//! Block tree used by the finality engine.
//!
//! Tracks every known block record with its parent link and audit flag, and
//! answers the three questions a round asks: is the finalized block an
//! ancestor, is there an equivocation in the unfinalized range, and which
//! audited head is best.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use jam_types::{Hash, TimeSlot};

/// A block as the finality engine sees it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockRecord {
    pub hash: Hash,
    pub parent: Option<Hash>,
    pub height: u64,
    pub state_root: Hash,
    pub slot: TimeSlot,
    pub author: u32,
    /// Off-chain verification flag; unaudited blocks are never voted for.
    pub audited: bool,
}

/// Parent-linked block index.
#[derive(Clone, Debug, Default)]
pub struct BlockTree {
    blocks: BTreeMap<Hash, BlockRecord>,
    children: BTreeMap<Hash, Vec<Hash>>,
}

impl BlockTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record; re-inserting a known hash is a no-op.
    pub fn add_block(&mut self, record: BlockRecord) {
        if self.blocks.contains_key(&record.hash) {
            return;
        }
        if let Some(parent) = record.parent {
            self.children.entry(parent).or_default().push(record.hash);
        }
        self.blocks.insert(record.hash, record);
    }

    pub fn get(&self, hash: &Hash) -> Option<&BlockRecord> {
        self.blocks.get(hash)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Mark a known block as audited.
    pub fn set_audited(&mut self, hash: &Hash, audited: bool) {
        if let Some(record) = self.blocks.get_mut(hash) {
            record.audited = audited;
        }
    }

    /// Is `finalized` an ancestor of `block` (or absent)?
    pub fn has_finalized_ancestor(&self, block: &Hash, finalized: Option<&Hash>) -> bool {
        let Some(finalized) = finalized else { return true };
        let mut cursor = Some(*block);
        while let Some(hash) = cursor {
            if hash == *finalized {
                return true;
            }
            cursor = self.blocks.get(&hash).and_then(|r| r.parent);
        }
        false
    }

    /// Does any parent in the unfinalized range above `finalized` (walking up
    /// from `block`) have more than one child?
    pub fn has_equivocation(&self, block: &Hash, finalized: Option<&Hash>) -> bool {
        let mut cursor = Some(*block);
        while let Some(hash) = cursor {
            if finalized.is_some_and(|f| hash == *f) {
                return false;
            }
            let parent = self.blocks.get(&hash).and_then(|r| r.parent);
            if let Some(parent) = parent {
                if self.children.get(&parent).map_or(0, |c| c.len()) > 1 {
                    return true;
                }
            }
            cursor = parent;
        }
        false
    }

    /// Best prevote candidate: audited, descends from the finalized block,
    /// equivocation-free in the unfinalized range; highest `(height, hash)`.
    pub fn best_chain_head(&self, finalized: Option<&Hash>) -> Option<&BlockRecord> {
        self.blocks
            .values()
            .filter(|record| record.audited)
            .filter(|record| self.has_finalized_ancestor(&record.hash, finalized))
            .filter(|record| !self.has_equivocation(&record.hash, finalized))
            .max_by_key(|record| (record.height, record.hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tag: u8, parent: Option<u8>, height: u64, audited: bool) -> BlockRecord {
        BlockRecord {
            hash: Hash::from_bytes([tag; 32]),
            parent: parent.map(|p| Hash::from_bytes([p; 32])),
            height,
            state_root: Hash::zero(),
            slot: height as u32,
            author: 0,
            audited,
        }
    }

    fn h(tag: u8) -> Hash {
        Hash::from_bytes([tag; 32])
    }

    /// genesis(1) <- 2 <- 3
    fn linear() -> BlockTree {
        let mut tree = BlockTree::new();
        tree.add_block(record(1, None, 0, true));
        tree.add_block(record(2, Some(1), 1, true));
        tree.add_block(record(3, Some(2), 2, true));
        tree
    }

    #[test]
    fn ancestry_walks_to_genesis() {
        let tree = linear();
        assert!(tree.has_finalized_ancestor(&h(3), Some(&h(1))));
        assert!(tree.has_finalized_ancestor(&h(3), None));
        assert!(!tree.has_finalized_ancestor(&h(1), Some(&h(3))));
    }

    #[test]
    fn best_head_is_highest_audited() {
        let tree = linear();
        assert_eq!(tree.best_chain_head(Some(&h(1))).unwrap().hash, h(3));
    }

    #[test]
    fn unaudited_blocks_are_skipped() {
        let mut tree = linear();
        tree.set_audited(&h(3), false);
        assert_eq!(tree.best_chain_head(Some(&h(1))).unwrap().hash, h(2));
    }

    #[test]
    fn forks_create_equivocation() {
        let mut tree = linear();
        // sibling of block 3
        tree.add_block(record(4, Some(2), 2, true));
        assert!(tree.has_equivocation(&h(3), Some(&h(1))));
        assert!(tree.has_equivocation(&h(4), Some(&h(1))));
        // block 2 itself is below the fork point
        assert!(!tree.has_equivocation(&h(2), Some(&h(1))));
        // the fork disqualifies both tips; best head falls back to block 2
        assert_eq!(tree.best_chain_head(Some(&h(1))).unwrap().hash, h(2));
    }

    #[test]
    fn equivocation_window_stops_at_finalized() {
        let mut tree = linear();
        tree.add_block(record(4, Some(2), 2, true)); // fork below
        tree.add_block(record(5, Some(3), 3, true));
        // with block 3 finalized, the fork at height 2 is outside the window
        assert!(!tree.has_equivocation(&h(5), Some(&h(3))));
    }

    #[test]
    fn duplicate_insert_ignored() {
        let mut tree = linear();
        let before = tree.len();
        tree.add_block(record(2, Some(1), 1, false));
        assert_eq!(tree.len(), before);
        assert!(tree.get(&h(2)).unwrap().audited);
    }

    #[test]
    fn disconnected_block_has_no_finalized_ancestor() {
        let mut tree = linear();
        tree.add_block(record(9, Some(8), 5, true));
        assert!(!tree.has_finalized_ancestor(&h(9), Some(&h(1))));
    }
}
