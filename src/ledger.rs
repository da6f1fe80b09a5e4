//! A peer's local view of the blockchain, stored as a tree of forks

use std::{collections::HashMap, sync::Arc};

use thiserror::Error;

use crate::block::{Block, BlockLabel};

/// Tree of every [`Block`] a peer knows about, rooted at a genesis block.
///
/// Blocks are stored in an arena in the order they were appended, with
/// parent/child links expressed as arena indices. Because a block can only be
/// appended after its parent, arena order is also a topological order of the
/// tree.
#[derive(Debug, Clone)]
pub struct Ledger {
    nodes: Vec<LedgerNode>,
    index: HashMap<BlockLabel, usize>,
    /// Arena indices of all blocks, grouped by depth and then ordered by
    /// the time they were appended.
    by_depth: Vec<Vec<usize>>,
}

/// A block and its position within a [`Ledger`].
#[derive(Debug, Clone)]
pub struct LedgerNode {
    pub block: Arc<Block>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("{0} does not reference a parent block")]
    NoParentGiven(BlockLabel),
    #[error("parent {parent} of {block} was not found in this ledger")]
    ParentNotFound { block: BlockLabel, parent: BlockLabel },
    #[error("{0} already exists in this ledger")]
    DuplicateBlock(BlockLabel),
    #[error("{block} has depth {depth}, expected {expected}")]
    InvalidDepth { block: BlockLabel, depth: u64, expected: u64 },
}

impl Ledger {
    /// Index of the genesis block in the arena.
    pub const GENESIS: usize = 0;

    /// Creates a ledger containing only a fresh genesis block.
    pub fn new() -> Self {
        Self::with_genesis(Arc::new(Block::genesis()))
    }

    /// Creates a ledger rooted at `genesis`.
    pub fn with_genesis(genesis: Arc<Block>) -> Self {
        let index = HashMap::from([(genesis.label(), Self::GENESIS)]);
        let nodes = vec![LedgerNode {
            block: genesis,
            parent: None,
            children: vec![],
        }];

        Ledger {
            nodes,
            index,
            by_depth: vec![vec![Self::GENESIS]],
        }
    }

    #[inline]
    pub fn genesis(&self) -> &Arc<Block> {
        &self.nodes[Self::GENESIS].block
    }

    /// Total number of blocks in the ledger, genesis included.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if nothing but the genesis block has been appended.
    #[inline]
    pub fn is_genesis_only(&self) -> bool {
        self.nodes.len() == 1
    }

    #[inline]
    pub fn contains(&self, label: &BlockLabel) -> bool {
        self.index.contains_key(label)
    }

    #[inline]
    pub fn get(&self, label: &BlockLabel) -> Option<&Arc<Block>> {
        self.index.get(label).map(|&i| &self.nodes[i].block)
    }

    #[inline]
    pub(crate) fn node(&self, index: usize) -> &LedgerNode {
        &self.nodes[index]
    }

    /// Maximum depth of any block in the ledger.
    #[inline]
    pub fn max_depth(&self) -> u64 {
        (self.by_depth.len() - 1) as u64
    }

    /// Labels of all blocks at `depth`, in the order they were appended.
    pub fn at_depth(&self, depth: u64) -> Vec<BlockLabel> {
        self.by_depth
            .get(depth as usize)
            .map(|level| {
                level.iter().map(|&i| self.nodes[i].block.label()).collect()
            })
            .unwrap_or_default()
    }

    /// Iterates over all blocks in the order they were appended.
    pub fn blocks(&self) -> impl Iterator<Item = &Arc<Block>> {
        self.nodes.iter().map(|node| &node.block)
    }

    /// Adds `block` as a child of its parent.
    ///
    /// The parent must already be present: callers are responsible for
    /// appending ancestors first.
    pub fn append(&mut self, block: Arc<Block>) -> Result<(), LedgerError> {
        use LedgerError::*;

        let label = block.label();
        if self.contains(&label) {
            return Err(DuplicateBlock(label));
        }

        let parent_label = block.parent_label().ok_or(NoParentGiven(label))?;
        let &parent = self
            .index
            .get(&parent_label)
            .ok_or(ParentNotFound {
                block: label,
                parent: parent_label,
            })?;

        let expected = self.nodes[parent].block.depth + 1;
        if block.depth != expected {
            return Err(InvalidDepth {
                block: label,
                depth: block.depth,
                expected,
            });
        }

        let i = self.nodes.len();
        self.nodes[parent].children.push(i);

        let depth = block.depth as usize;
        if depth == self.by_depth.len() {
            self.by_depth.push(vec![i]);
        } else {
            self.by_depth[depth].push(i);
        }

        self.index.insert(label, i);
        self.nodes.push(LedgerNode {
            block,
            parent: Some(parent),
            children: vec![],
        });

        Ok(())
    }

    /// Returns the tip of the canonical chain: the deepest block, with ties
    /// going to the block appended first. A genesis-only ledger returns its
    /// genesis block.
    #[inline]
    pub fn canonical_tip(&self) -> &Arc<Block> {
        &self.nodes[self.canonical_tip_index()].block
    }

    #[inline]
    pub(crate) fn canonical_tip_index(&self) -> usize {
        // Every level of `by_depth` holds at least one block
        self.by_depth[self.by_depth.len() - 1][0]
    }

    /// Returns the blocks of the canonical chain, ordered from the genesis
    /// block to [`Ledger::canonical_tip`].
    pub fn canonical_chain(&self) -> Vec<&Arc<Block>> {
        self.path_to(self.canonical_tip_index())
            .into_iter()
            .map(|i| &self.nodes[i].block)
            .collect()
    }

    /// Returns the blocks on the path from the genesis block to the block with
    /// the given label, or `None` if no such block exists.
    pub fn ancestors_of(
        &self,
        label: &BlockLabel,
    ) -> Option<Vec<&Arc<Block>>> {
        let &i = self.index.get(label)?;
        let path = self.path_to(i);

        Some(path.into_iter().map(|i| &self.nodes[i].block).collect())
    }

    fn path_to(&self, index: usize) -> Vec<usize> {
        let mut path = vec![index];

        let mut curr = index;
        while let Some(parent) = self.nodes[curr].parent {
            path.push(parent);
            curr = parent;
        }

        path.reverse();
        path
    }

    /// Number of blocks in each block's subtree (the block itself included),
    /// indexed by arena position.
    pub(crate) fn subtree_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![1; self.nodes.len()];

        // Children always come after their parents in the arena
        for i in (1..self.nodes.len()).rev() {
            if let Some(parent) = self.nodes[i].parent {
                sizes[parent] += sizes[i];
            }
        }

        sizes
    }

    /// Number of blocks outside of the canonical chain.
    #[inline]
    pub fn uncle_count(&self) -> usize {
        self.len() - (self.max_depth() as usize + 1)
    }

    /// Fraction of all blocks which are outside of the canonical chain.
    #[inline]
    pub fn uncle_fraction(&self) -> f64 {
        self.uncle_count() as f64 / self.len() as f64
    }

    /// Checks that every non-genesis block has its parent in this ledger at
    /// one level above it.
    pub fn is_well_formed(&self) -> bool {
        self.nodes.iter().skip(1).all(|node| {
            let block = &node.block;
            match (node.parent, block.parent_label()) {
                (Some(parent), Some(label)) => {
                    let parent = &self.nodes[parent].block;
                    parent.label() == label
                        && parent.depth + 1 == block.depth
                        && parent.id < block.id
                }
                _ => false,
            }
        })
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use crate::{
        block::{Block, SimTime},
        peer::PeerId,
    };

    use super::{Ledger, LedgerError};

    /// Mines a block on top of `parent` and appends it to `ledger`.
    pub(crate) fn mine(
        ledger: &mut Ledger,
        parent: &Arc<Block>,
        miner: usize,
    ) -> Arc<Block> {
        let block = Arc::new(Block::extending(
            parent,
            PeerId::from(miner),
            SimTime::from_secs(parent.depth + 1),
        ));
        ledger.append(Arc::clone(&block)).expect("parent is present");

        block
    }

    #[test]
    fn new_instance_canonical_chain() {
        let ledger = Ledger::new();
        let chain = ledger.canonical_chain();

        assert_eq!(chain.len(), 1);
        assert!(chain[0].is_genesis());
        assert!(ledger.is_genesis_only());
        assert_eq!(ledger.uncle_count(), 0);
    }

    #[test]
    fn append_requires_parent() {
        let mut ledger = Ledger::new();
        let mut other = Ledger::new();
        let genesis = Arc::clone(other.genesis());
        let a = mine(&mut other, &genesis, 1);
        let b = Arc::new(Block::extending(&a, 1.into(), SimTime::from_secs(2)));

        assert_eq!(
            ledger.append(Arc::clone(&b)),
            Err(LedgerError::ParentNotFound {
                block: b.label(),
                parent: a.label(),
            })
        );
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn append_rejects_duplicates() {
        let mut ledger = Ledger::new();
        let genesis = Arc::clone(ledger.genesis());
        let a = mine(&mut ledger, &genesis, 1);

        assert_eq!(
            ledger.append(Arc::clone(&a)),
            Err(LedgerError::DuplicateBlock(a.label()))
        );
    }

    #[test]
    fn canonical_chain_follows_deepest_fork() {
        let mut ledger = Ledger::new();
        let genesis = Arc::clone(ledger.genesis());
        let a1 = mine(&mut ledger, &genesis, 1);
        let b1 = mine(&mut ledger, &genesis, 2);
        let b2 = mine(&mut ledger, &b1, 2);

        let chain: Vec<_> =
            ledger.canonical_chain().into_iter().map(|b| b.label()).collect();
        assert_eq!(chain, vec![genesis.label(), b1.label(), b2.label()]);
        assert!(ledger.contains(&a1.label()));
        assert_eq!(ledger.uncle_count(), 1);
        assert_eq!(ledger.uncle_fraction(), 0.25);
        assert!(ledger.is_well_formed());
    }

    #[test]
    fn canonical_tip_prefers_first_appended() {
        let mut ledger = Ledger::new();
        let genesis = Arc::clone(ledger.genesis());
        let first = mine(&mut ledger, &genesis, 4);
        mine(&mut ledger, &genesis, 2);

        assert_eq!(ledger.canonical_tip().label(), first.label());
        assert_eq!(ledger.at_depth(1).len(), 2);
    }

    #[test]
    fn uncle_count_never_decreases() {
        let mut ledger = Ledger::new();
        let genesis = Arc::clone(ledger.genesis());
        let mut tips = vec![Arc::clone(&genesis)];
        let mut last = 0;

        for step in 0..30usize {
            let parent = Arc::clone(&tips[(step * 7) % tips.len()]);
            tips.push(mine(&mut ledger, &parent, step + 1));

            let uncles = ledger.uncle_count();
            assert!(uncles >= last);
            assert!(ledger.is_well_formed());
            last = uncles;
        }
    }

    #[test]
    fn subtree_sizes_count_descendants() {
        let mut ledger = Ledger::new();
        let genesis = Arc::clone(ledger.genesis());
        let a = mine(&mut ledger, &genesis, 1);
        mine(&mut ledger, &a, 1);
        mine(&mut ledger, &a, 2);
        mine(&mut ledger, &genesis, 3);

        assert_eq!(ledger.subtree_sizes(), vec![5, 3, 1, 1, 1]);
    }
}
