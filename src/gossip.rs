/*!
Breadth-first gossip of newly mined blocks

Propagating a block is modeled as a breadth-first traversal of the network
starting from its miner. Every peer which receives the block relays it to its
neighbors once the relay delay drawn from the [`LatencyModel`] has passed.
Peers running [`ClientKind::Parity`] only relay to the square root of their
neighbor count.

Because a whole propagation is processed before the next block discovery, the
engine also detects discoveries which are scheduled while the block is still
in flight: such discoveries would have been made on top of a stale tip, so they
are counted as uncles and dropped from the [`BlockSchedule`].
*/

use std::{collections::VecDeque, sync::Arc};

use rand::{seq::SliceRandom, Rng};
use tracing::{debug, info, warn};

use crate::{
    block::{Block, SimTime},
    latency::LatencyModel,
    network::Network,
    peer::{ClientKind, PeerId, Sender},
    schedule::{BlockSchedule, Cycle},
};

/// Keeps track of the next pending block discovery and of the number of
/// uncles formed so far.
#[derive(Debug, Clone, Default)]
pub struct UncleTracker {
    next_discovery: Option<(Cycle, SimTime)>,
    uncles: usize,
}

impl UncleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of uncles formed so far. Never decreases.
    #[inline]
    pub fn uncles(&self) -> usize {
        self.uncles
    }

    #[inline]
    pub fn next_discovery(&self) -> Option<(Cycle, SimTime)> {
        self.next_discovery
    }

    #[inline]
    pub fn set_next_discovery(&mut self, next: Option<(Cycle, SimTime)>) {
        self.next_discovery = next;
    }

    /// Turns the next scheduled discovery into an uncle if it happens no later
    /// than `now` and has not been executed yet. Returns the cycle and time of
    /// the uncle.
    pub fn check(
        &mut self,
        schedule: &mut BlockSchedule,
        now: SimTime,
    ) -> Option<(Cycle, SimTime)> {
        let (next_cycle, next_time) = self.next_discovery?;
        if now < next_time || !schedule.is_pending(next_cycle) {
            return None;
        }

        let (cycle, time) = schedule.pop_front()?;
        if let Some(front) = schedule.front() {
            self.next_discovery = Some(front);
        }
        schedule.complete(cycle);
        self.uncles += 1;

        info!(cycle, at = ?time, "uncle formed");
        Some((cycle, time))
    }
}

/// Summary of a single block propagation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropagationReport {
    /// Number of peers which accepted the block, its miner excluded.
    pub peers_reached: usize,
    /// Cycles turned into uncles while the block was in flight.
    pub uncles: Vec<Cycle>,
    /// Latest time at which a peer received the block.
    pub last_reception: SimTime,
    /// Number of peers whose ledger could not be synchronized.
    pub sync_failures: usize,
}

/// Spreads blocks across a [`Network`].
pub struct GossipEngine<'a, R: Rng + ?Sized> {
    pub network: &'a mut Network,
    pub schedule: &'a mut BlockSchedule,
    pub uncles: &'a mut UncleTracker,
    pub latency: &'a LatencyModel,
    pub rng: &'a mut R,
}

impl<'a, R: Rng + ?Sized> GossipEngine<'a, R> {
    /// Propagates `block`, mined by `miner` at time `at`, to every peer
    /// reachable from `miner`.
    pub fn propagate(
        &mut self,
        miner: PeerId,
        block: &Arc<Block>,
        at: SimTime,
    ) -> PropagationReport {
        let mut received = vec![false; self.network.id_bound()];
        let mut queue = VecDeque::from([(miner, at)]);
        let mut report = PropagationReport {
            last_reception: at,
            ..Default::default()
        };

        while let Some((sender_id, timestamp)) = queue.pop_front() {
            let uncle = self.uncles.check(&mut *self.schedule, timestamp);
            if let Some((cycle, _)) = uncle {
                report.uncles.push(cycle);
            }

            let client_kind = match self.network.peer(sender_id) {
                Some(sender) => sender.client_kind,
                None => continue,
            };

            for target in self.fan_out(sender_id, client_kind) {
                if received[target.get()] {
                    continue;
                }
                received[target.get()] = true;

                let Some(peer) = self.network.peer_mut(target) else {
                    continue;
                };
                if !peer.should_request(block) {
                    continue;
                }

                let forward =
                    timestamp + self.latency.relay_delay(&mut *self.rng);
                let from = Sender::Peer(sender_id);
                match peer.synchronize(block, from, forward) {
                    Ok(appended) => {
                        debug!(
                            peer = %target,
                            from = %sender_id,
                            %block,
                            appended,
                            at = ?forward,
                            "received block"
                        );
                    }
                    Err(e) => {
                        warn!(
                            peer = %target,
                            %block,
                            error = %e,
                            "error in syncing"
                        );
                        report.sync_failures += 1;
                        continue;
                    }
                }

                report.peers_reached += 1;
                report.last_reception = report.last_reception.max(forward);
                queue.push_back((target, forward));
            }
        }

        report
    }

    /// Returns the neighbors `sender` relays a block to.
    fn fan_out(
        &mut self,
        sender: PeerId,
        client_kind: ClientKind,
    ) -> Vec<PeerId> {
        let neighbors = self.network.neighbors(sender);

        match client_kind {
            ClientKind::Geth => neighbors,
            ClientKind::Parity => {
                let amount = (neighbors.len() as f64).sqrt() as usize;
                neighbors
                    .choose_multiple(&mut *self.rng, amount)
                    .copied()
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use crate::{
        block::{Block, SimTime},
        latency::{LatencyConfig, LatencyModel},
        network::Network,
        peer::{ClientKind, Peer, PeerId},
        schedule::BlockSchedule,
    };

    use super::{GossipEngine, UncleTracker};

    /// Relay delay of exactly 2 seconds.
    fn two_seconds() -> LatencyModel {
        LatencyModel::new(LatencyConfig::constant(0.5, 0.25, 0.25)).unwrap()
    }

    fn mine_on_genesis(
        network: &mut Network,
        miner: usize,
        at: u64,
    ) -> Arc<Block> {
        let miner = PeerId::from(miner);
        let peer = network.peer_mut(miner).unwrap();
        let genesis = Arc::clone(peer.ledger.genesis());
        let at = SimTime::from_secs(at);
        let block = Arc::new(Block::extending(&genesis, miner, at));
        peer.append_mined(&block).unwrap();

        block
    }

    fn line(n: usize) -> Network {
        let mut network = Network::with_peers(n, |_| ClientKind::Geth);
        for i in 1..n {
            network.connect(PeerId::from(i), PeerId::from(i + 1));
        }

        network
    }

    #[test]
    fn block_reaches_every_connected_peer() {
        let mut network = line(4);
        let mut schedule =
            BlockSchedule::from_entries([(1, SimTime::from_secs(10))]).unwrap();
        schedule.pop_front();
        let mut uncles = UncleTracker::new();
        let latency = two_seconds();
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let block = mine_on_genesis(&mut network, 1, 10);
        let report = GossipEngine {
            network: &mut network,
            schedule: &mut schedule,
            uncles: &mut uncles,
            latency: &latency,
            rng: &mut rng,
        }
        .propagate(PeerId::from(1), &block, SimTime::from_secs(10));

        assert_eq!(report.peers_reached, 3);
        assert_eq!(report.last_reception, SimTime::from_secs(16));
        for peer in network.peers() {
            assert!(peer.ledger.contains(&block.label()));
        }
        let last = network.peer(PeerId::from(4)).unwrap();
        let first = &last.blocks_reception_history[&1];
        assert_eq!(first.received_at, SimTime::from_secs(16));
    }

    #[test]
    fn discovery_during_propagation_is_an_uncle() {
        let mut network = line(3);
        let mut schedule = BlockSchedule::from_entries([
            (1, SimTime::from_secs(10)),
            (2, SimTime::from_secs(11)),
            (3, SimTime::from_secs(30)),
        ])
        .unwrap();
        schedule.pop_front();
        schedule.complete(1);
        let mut uncles = UncleTracker::new();
        uncles.set_next_discovery(schedule.front());
        let latency = two_seconds();
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let block = mine_on_genesis(&mut network, 1, 10);
        let report = GossipEngine {
            network: &mut network,
            schedule: &mut schedule,
            uncles: &mut uncles,
            latency: &latency,
            rng: &mut rng,
        }
        .propagate(PeerId::from(1), &block, SimTime::from_secs(10));

        assert_eq!(report.uncles, vec![2]);
        assert_eq!(uncles.uncles(), 1);
        assert!(!schedule.is_pending(2));
        assert_eq!(schedule.front(), Some((3, SimTime::from_secs(30))));
        assert_eq!(uncles.next_discovery(), Some((3, SimTime::from_secs(30))));
    }

    #[test]
    fn parity_relays_to_square_root_of_neighbors() {
        // Star around a Parity hub with 9 leaves that never relay further
        let mut network = Network::with_peers(10, |id| {
            if id.get() == 1 {
                ClientKind::Parity
            } else {
                ClientKind::Geth
            }
        });
        for leaf in 2..=10 {
            network.connect(PeerId::from(1), PeerId::from(leaf));
        }
        let mut schedule =
            BlockSchedule::from_entries([(1, SimTime::from_secs(10))]).unwrap();
        schedule.pop_front();
        let mut uncles = UncleTracker::new();
        let latency = two_seconds();
        let mut rng = ChaCha8Rng::seed_from_u64(4);

        let block = mine_on_genesis(&mut network, 1, 10);
        let report = GossipEngine {
            network: &mut network,
            schedule: &mut schedule,
            uncles: &mut uncles,
            latency: &latency,
            rng: &mut rng,
        }
        .propagate(PeerId::from(1), &block, SimTime::from_secs(10));

        assert_eq!(report.peers_reached, 3);
    }

    #[test]
    fn unreachable_peers_keep_their_ledger() {
        let mut network = line(2);
        let isolated = Peer::new(PeerId::from(3), ClientKind::Geth);
        network.add_peer(isolated);
        let mut schedule =
            BlockSchedule::from_entries([(1, SimTime::from_secs(10))]).unwrap();
        schedule.pop_front();
        let mut uncles = UncleTracker::new();
        let latency = two_seconds();
        let mut rng = ChaCha8Rng::seed_from_u64(0);

        let block = mine_on_genesis(&mut network, 2, 10);
        GossipEngine {
            network: &mut network,
            schedule: &mut schedule,
            uncles: &mut uncles,
            latency: &latency,
            rng: &mut rng,
        }
        .propagate(PeerId::from(2), &block, SimTime::from_secs(10));

        let peer = |id: usize| network.peer(PeerId::from(id)).unwrap();
        assert!(peer(1).ledger.contains(&block.label()));
        assert!(peer(3).ledger.is_genesis_only());
    }
}
