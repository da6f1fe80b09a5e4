/*!
Peers of the gossip network and their handling of advertised blocks

Each [`Peer`] owns a [`Ledger`] and a history of every block it received. When
a neighbor advertises a block, the peer first decides whether the block is
worth requesting ([`Peer::should_request`]) and, if so, downloads it along with
any ancestors it is missing ([`Peer::synchronize`]).
*/

use std::{collections::BTreeMap, fmt::Display, str::FromStr, sync::Arc};

use crate::{
    block::{Block, SimTime},
    ledger::{Ledger, LedgerError},
};

/// Maximum number of generations an advertised block may trail a peer's
/// canonical tip by and still be requested. Older blocks can no longer be
/// referenced as uncles.
pub const MAX_UNCLE_DEPTH: u64 = 7;

/// Unique identifier of a [`Peer`] in a [`Network`](crate::network::Network).
///
/// # Invariants
///
/// `PeerId(0)` is reserved for [`PeerId::GENESIS`], the nominal miner of every
/// genesis block. Peers of a network are numbered from 1.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub(crate) usize);

impl PeerId {
    /// Miner of the genesis block.
    pub const GENESIS: PeerId = PeerId(0);

    /// Returns the [`usize`] corresponding to this [`PeerId`].
    pub fn get(&self) -> usize {
        self.0
    }
}

impl From<usize> for PeerId {
    fn from(value: usize) -> Self {
        assert_ne!(value, 0, "newly made PeerId must be greater than 0");
        Self(value)
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Client software run by a peer. Determines how many neighbors a peer relays
/// new blocks to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    /// Relays blocks to all neighbors.
    #[default]
    Geth,
    /// Relays blocks to the square root of its neighbor count, chosen at
    /// random.
    Parity,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown client kind {0:?}, expected 'geth' or 'parity'")]
pub struct ParseClientKindError(String);

impl FromStr for ClientKind {
    type Err = ParseClientKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "geth" => Ok(Self::Geth),
            "parity" => Ok(Self::Parity),
            _ => Err(ParseClientKindError(s.to_string())),
        }
    }
}

/// Where a received block came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    SelfMined,
    Peer(PeerId),
}

/// Record of a single block reception.
#[derive(Debug, Clone)]
pub struct ReceptionEntry {
    pub block: Arc<Block>,
    pub received_from: Sender,
    pub received_at: SimTime,
    /// True for ancestors appended while synchronizing with a descendant
    /// advertised by `received_from`.
    pub backfilled: bool,
}

impl ReceptionEntry {
    /// Time between the discovery of the block and its reception.
    #[inline]
    pub fn delay(&self) -> SimTime {
        self.received_at.saturating_sub(self.block.timestamp)
    }

    /// Returns true if the block was advertised by a neighbor and transferred
    /// on its own, as opposed to being mined locally or backfilled.
    #[inline]
    pub fn is_transfer(&self) -> bool {
        matches!(self.received_from, Sender::Peer(_)) && !self.backfilled
    }
}

impl Display for ReceptionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}, mined at {:.3}s ",
            self.block,
            self.block.timestamp.as_secs_f64()
        )?;
        match self.received_from {
            Sender::SelfMined => write!(f, "self-mined")?,
            Sender::Peer(id) => write!(f, "received from peer {}", id)?,
        }
        write!(f, " at {:.3}s", self.received_at.as_secs_f64())
    }
}

/// A node of the gossip network.
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: PeerId,
    pub client_kind: ClientKind,
    pub ledger: Ledger,
    /// Number of blocks received so far, self-mined blocks included.
    pub blocks_received_counter: u64,
    /// Every block reception in order, keyed by the value of
    /// [`Peer::blocks_received_counter`] after the reception.
    pub blocks_reception_history: BTreeMap<u64, ReceptionEntry>,
}

impl Peer {
    pub fn new(id: PeerId, client_kind: ClientKind) -> Self {
        Self::with_ledger(id, client_kind, Ledger::new())
    }

    pub fn with_ledger(
        id: PeerId,
        client_kind: ClientKind,
        ledger: Ledger,
    ) -> Self {
        Peer {
            id,
            client_kind,
            ledger,
            blocks_received_counter: 0,
            blocks_reception_history: BTreeMap::new(),
        }
    }

    /// Returns true if this peer would request `block` after it was
    /// advertised by a neighbor.
    ///
    /// Blocks mined by this peer, blocks it already has and blocks more than
    /// [`MAX_UNCLE_DEPTH`] generations behind its canonical tip are declined.
    pub fn should_request(&self, block: &Block) -> bool {
        if block.miner_id == self.id || self.ledger.contains(&block.label()) {
            return false;
        }

        let tip = self.ledger.canonical_tip();
        block.depth + MAX_UNCLE_DEPTH >= tip.depth
    }

    /// Appends `block` to this peer's ledger, first appending any of its
    /// ancestors which are missing, oldest first. Each appended block is
    /// recorded in the reception history.
    ///
    /// Returns the number of blocks appended, which is zero if `block` was
    /// already present.
    pub fn synchronize(
        &mut self,
        block: &Arc<Block>,
        from: Sender,
        at: SimTime,
    ) -> Result<usize, LedgerError> {
        if self.ledger.contains(&block.label()) {
            return Ok(0);
        }

        let mut missing = vec![Arc::clone(block)];
        let mut parent = block.previous_block.as_ref();
        while let Some(ancestor) = parent {
            if self.ledger.contains(&ancestor.label()) {
                break;
            }
            missing.push(Arc::clone(ancestor));
            parent = ancestor.previous_block.as_ref();
        }

        let appended = missing.len();
        for (i, block) in missing.into_iter().enumerate().rev() {
            self.ledger.append(Arc::clone(&block))?;
            self.record_reception(block, from, at, i > 0);
        }

        Ok(appended)
    }

    /// Appends a block mined by this peer to its ledger.
    pub fn append_mined(
        &mut self,
        block: &Arc<Block>,
    ) -> Result<(), LedgerError> {
        self.ledger.append(Arc::clone(block))?;
        let (block, at) = (Arc::clone(block), block.timestamp);
        self.record_reception(block, Sender::SelfMined, at, false);

        Ok(())
    }

    /// Delays of every block transferred to this peer by a neighbor, in
    /// reception order. Backfilled ancestors are skipped.
    pub fn transfer_delays(&self) -> impl Iterator<Item = SimTime> + '_ {
        self.blocks_reception_history
            .values()
            .filter(|entry| entry.is_transfer())
            .map(ReceptionEntry::delay)
    }

    fn record_reception(
        &mut self,
        block: Arc<Block>,
        from: Sender,
        at: SimTime,
        backfilled: bool,
    ) {
        self.blocks_received_counter += 1;
        self.blocks_reception_history.insert(
            self.blocks_received_counter,
            ReceptionEntry {
                block,
                received_from: from,
                received_at: at,
                backfilled,
            },
        );
    }
}
