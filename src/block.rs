//! Blocks and the identifiers used to address them

use std::{fmt::Display, sync::Arc, time::Duration};

use crate::peer::PeerId;

/// Simulated time, measured as an offset from the start of a simulation.
pub type SimTime = Duration;

/// Representation of a mined block. Blocks are never mutated after creation
/// and are shared between ledgers through [`Arc`] handles.
#[derive(Debug, Clone)]
pub struct Block {
    /// Number of the block, equal to the number of its parent plus one.
    pub id: BlockId,
    /// The instant this block was discovered.
    pub timestamp: SimTime,
    /// The block this block extends. `None` only for the genesis block.
    pub previous_block: Option<Arc<Block>>,
    /// The peer which mined this block.
    pub miner_id: PeerId,
    /// Length of the path from this block to the genesis block.
    pub depth: u64,
}

/// Block number. Sibling blocks on different forks share the same
/// [`BlockId`], so blocks are identified by [`BlockLabel`] instead.
#[repr(transparent)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u64);

/// Unique identity of a [`Block`] within a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockLabel {
    pub id: BlockId,
    pub miner_id: PeerId,
}

impl Block {
    /// Builds the block mined by `miner_id` at `timestamp` on top of `parent`.
    pub fn extending(
        parent: &Arc<Block>,
        miner_id: PeerId,
        timestamp: SimTime,
    ) -> Self {
        Block {
            id: BlockId(parent.id.0 + 1),
            timestamp,
            previous_block: Some(Arc::clone(parent)),
            miner_id,
            depth: parent.depth + 1,
        }
    }

    /// Creates a genesis block, mined by [`PeerId::GENESIS`] at time zero.
    pub fn genesis() -> Self {
        Block {
            id: BlockId(0),
            timestamp: SimTime::ZERO,
            previous_block: None,
            miner_id: PeerId::GENESIS,
            depth: 0,
        }
    }

    #[inline]
    pub fn label(&self) -> BlockLabel {
        BlockLabel {
            id: self.id,
            miner_id: self.miner_id,
        }
    }

    #[inline]
    pub fn parent_label(&self) -> Option<BlockLabel> {
        self.previous_block.as_ref().map(|parent| parent.label())
    }

    #[inline]
    pub fn is_genesis(&self) -> bool {
        self.previous_block.is_none()
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.label() == other.label()
    }
}

impl Eq for Block {}

impl Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<u64> for BlockId {
    fn from(value: u64) -> Self {
        BlockId(value)
    }
}

impl Display for BlockLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Block {} (Miner {})", self.id, self.miner_id)
    }
}

impl Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.label(), f)
    }
}
