/*!
The peer-to-peer network over which blocks are gossiped

A [`Network`] is an undirected graph whose nodes each carry one [`Peer`].
Networks are normally created with a [`NetworkBuilder`], which connects peers
at random following a normal distribution of node degrees, splits peers
between [`ClientKind`]s and can remove a percentage of nodes to simulate
failures.

```
use propagation_sim::prelude::*;
use rand::SeedableRng;

let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(234);
let network = NetworkBuilder::new(100)
    .degree(8.0, 2.0)
    .failing_percent(10.0)
    .build(&mut rng)
    .unwrap();

assert_eq!(network.node_count(), 90);
```
*/

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use rand::{seq::IteratorRandom, Rng};
use rand_distr::{Distribution, Normal};
use tracing::{debug, info};

use crate::{
    block::Block,
    ledger::Ledger,
    peer::{ClientKind, Peer, PeerId},
};

/// Undirected graph of [`Peer`]s.
#[derive(Debug, Clone, Default)]
pub struct Network {
    peers: BTreeMap<PeerId, Peer>,
    adjacency: BTreeMap<PeerId, BTreeSet<PeerId>>,
    /// One more than the largest [`PeerId`] ever added to the network.
    id_bound: usize,
}

impl Network {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a network of `n` Geth peers in which every peer is connected
    /// to every other peer.
    pub fn fully_connected(n: usize) -> Self {
        let mut network = Self::with_peers(n, |_| ClientKind::Geth);
        for a in 1..=n {
            for b in (a + 1)..=n {
                network.connect(a.into(), b.into());
            }
        }

        network
    }

    /// Creates a network of `n` peers without any connections. The client
    /// kind of each peer is given by `client_of`.
    pub fn with_peers<F>(n: usize, client_of: F) -> Self
    where
        F: Fn(PeerId) -> ClientKind,
    {
        let genesis = Arc::new(Block::genesis());
        let mut network = Self::new();
        for id in (1..=n).map(PeerId::from) {
            let ledger = Ledger::with_genesis(Arc::clone(&genesis));
            network.add_peer(Peer::with_ledger(id, client_of(id), ledger));
        }

        network
    }

    /// Adds `peer` to the network, replacing any peer with the same ID.
    pub fn add_peer(&mut self, peer: Peer) {
        let id = peer.id;
        self.id_bound = self.id_bound.max(id.get() + 1);
        self.adjacency.entry(id).or_default();
        self.peers.insert(id, peer);
    }

    /// Connects peers `a` and `b`. Returns false if either peer is missing,
    /// `a == b`, or the peers were already connected.
    pub fn connect(&mut self, a: PeerId, b: PeerId) -> bool {
        if a == b || !self.contains(a) || !self.contains(b) {
            return false;
        }

        let added = self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);

        added
    }

    /// Removes the peer with the given ID along with all of its connections.
    pub fn remove_peer(&mut self, id: PeerId) -> Option<Peer> {
        let peer = self.peers.remove(&id)?;
        if let Some(neighbors) = self.adjacency.remove(&id) {
            for neighbor in neighbors {
                if let Some(set) = self.adjacency.get_mut(&neighbor) {
                    set.remove(&id);
                }
            }
        }

        Some(peer)
    }

    #[inline]
    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    #[inline]
    pub fn peer(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    #[inline]
    pub fn peer_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(&id)
    }

    /// Iterates over all peers in ascending order of [`PeerId`].
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Iterates over all peer IDs in ascending order.
    pub fn peer_ids(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers.keys().copied()
    }

    /// Returns the neighbors of `id` in ascending order. Missing peers have no
    /// neighbors.
    pub fn neighbors(&self, id: PeerId) -> Vec<PeerId> {
        self.adjacency
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    #[inline]
    pub fn degree(&self, id: PeerId) -> usize {
        self.adjacency.get(&id).map_or(0, BTreeSet::len)
    }

    /// Number of peers currently in the network.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.peers.len()
    }

    #[inline]
    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(BTreeSet::len).sum::<usize>() / 2
    }

    /// Average number of neighbors per peer.
    pub fn average_degree(&self) -> f64 {
        if self.peers.is_empty() {
            return 0.0;
        }

        2.0 * self.edge_count() as f64 / self.node_count() as f64
    }

    /// One more than the largest [`PeerId`] ever added to this network, so
    /// that any peer ID can index a vector of this length.
    #[inline]
    pub fn id_bound(&self) -> usize {
        self.id_bound
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkBuildError {
    #[error("network must contain at least one peer")]
    NoPeers,
    #[error("fraction of Geth clients {0} is not in the range 0.0..=1.0")]
    BadClientFraction(f64),
    #[error(
        "invalid degree distribution (mean {mean}, std. deviation {std_dev})"
    )]
    BadDegreeDistribution { mean: f64, std_dev: f64 },
    #[error("failing percentage {0} is not in the range 0.0..100.0")]
    BadFailingPercent(f64),
}

/// Builds a random [`Network`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkBuilder {
    n_peers: usize,
    geth_fraction: f64,
    degree_mean: f64,
    degree_std_dev: f64,
    failing_percent: f64,
}

impl NetworkBuilder {
    /// Fraction of peers running Geth in the Ethereum network (2019).
    pub const GETH_FRACTION: f64 = 0.809;

    /// Creates a builder for a network of `n_peers` peers.
    pub fn new(n_peers: usize) -> Self {
        NetworkBuilder {
            n_peers,
            geth_fraction: Self::GETH_FRACTION,
            degree_mean: 8.0,
            degree_std_dev: 2.0,
            failing_percent: 0.0,
        }
    }

    /// Sets the fraction of peers running Geth. The peers with the lowest IDs
    /// run Geth, the remaining ones run Parity.
    pub fn geth_fraction(mut self, fraction: f64) -> Self {
        self.geth_fraction = fraction;

        self
    }

    /// Sets the normal distribution from which each peer's target number of
    /// neighbors is drawn.
    pub fn degree(mut self, mean: f64, std_dev: f64) -> Self {
        self.degree_mean = mean;
        self.degree_std_dev = std_dev;

        self
    }

    /// Sets the percentage of peers removed from the network after it has
    /// been connected.
    pub fn failing_percent(mut self, percent: f64) -> Self {
        self.failing_percent = percent;

        self
    }

    /// Checks the parameters without building a network.
    pub fn validate(&self) -> Result<(), NetworkBuildError> {
        self.degree_distribution().map(|_| ())
    }

    fn degree_distribution(&self) -> Result<Normal<f64>, NetworkBuildError> {
        use NetworkBuildError::*;

        if self.n_peers == 0 {
            return Err(NoPeers);
        }
        let fraction = self.geth_fraction;
        if fraction.is_nan() || !(0.0..=1.0).contains(&fraction) {
            return Err(BadClientFraction(fraction));
        }
        let percent = self.failing_percent;
        if percent.is_nan() || !(0.0..100.0).contains(&percent) {
            return Err(BadFailingPercent(percent));
        }

        Normal::new(self.degree_mean, self.degree_std_dev)
            .ok()
            .filter(|_| self.degree_mean.is_finite())
            .filter(|_| self.degree_std_dev >= 0.0)
            .ok_or(BadDegreeDistribution {
                mean: self.degree_mean,
                std_dev: self.degree_std_dev,
            })
    }

    /// Number of peers before failing peers are removed.
    #[inline]
    pub fn n_peers(&self) -> usize {
        self.n_peers
    }

    /// Creates the network, drawing all random values from `rng`.
    pub fn build<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<Network, NetworkBuildError> {
        let degrees = self.degree_distribution()?;
        let NetworkBuilder { n_peers, geth_fraction, failing_percent, .. } =
            *self;

        let n_geth = (geth_fraction * n_peers as f64) as usize;
        let mut network = Network::with_peers(n_peers, |id| {
            if id.get() <= n_geth {
                ClientKind::Geth
            } else {
                ClientKind::Parity
            }
        });

        let max_degree = (n_peers - 1) as f64;
        for peer in (1..=n_peers).map(PeerId::from) {
            let target = degrees.sample(rng).min(max_degree);
            while (network.degree(peer) as f64) < target {
                let neighbor = PeerId::from(rng.gen_range(1..=n_peers));
                network.connect(peer, neighbor);
            }
        }

        info!(
            peers = network.node_count(),
            edges = network.edge_count(),
            average_degree = network.average_degree(),
            "connected peers"
        );

        let n_failing = (failing_percent / 100.0 * n_peers as f64) as usize;
        let failing: Vec<_> =
            network.peer_ids().choose_multiple(rng, n_failing);
        for id in failing {
            debug!(peer = %id, "setting peer as failing");
            network.remove_peer(id);
        }
        if n_failing > 0 {
            info!(active_peers = network.node_count(), "removed failing peers");
        }

        Ok(network)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use crate::peer::{ClientKind, PeerId};

    use super::{Network, NetworkBuilder};

    #[test]
    fn fully_connected_neighbors() {
        let network = Network::fully_connected(4);

        assert_eq!(network.edge_count(), 6);
        assert_eq!(
            network.neighbors(PeerId::from(2)),
            vec![PeerId::from(1), PeerId::from(3), PeerId::from(4)]
        );
        assert_eq!(network.id_bound(), 5);
    }

    #[test]
    fn remove_peer_drops_edges() {
        let mut network = Network::fully_connected(3);
        network.remove_peer(PeerId::from(2)).unwrap();

        assert_eq!(network.node_count(), 2);
        assert_eq!(network.neighbors(PeerId::from(1)), vec![PeerId::from(3)]);
        assert!(network.neighbors(PeerId::from(2)).is_empty());
        assert_eq!(network.id_bound(), 4);
    }

    #[test]
    fn peers_share_genesis_block() {
        let network = Network::fully_connected(3);
        let mut peers = network.peers();
        let first = peers.next().unwrap().ledger.genesis();

        assert!(peers.all(|p| Arc::ptr_eq(p.ledger.genesis(), first)));
    }

    #[test]
    fn builder_reaches_target_degrees() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let network = NetworkBuilder::new(200)
            .degree(10.0, 1.0)
            .build(&mut rng)
            .unwrap();

        assert_eq!(network.node_count(), 200);
        assert!(network.average_degree() >= 9.0);
        assert!(network.peer_ids().all(|id| network.degree(id) >= 1));
    }

    #[test]
    fn builder_splits_clients() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let network = NetworkBuilder::new(10)
            .geth_fraction(0.8)
            .build(&mut rng)
            .unwrap();

        let parity: Vec<_> = network
            .peers()
            .filter(|p| p.client_kind == ClientKind::Parity)
            .map(|p| p.id.get())
            .collect();
        assert_eq!(parity, vec![9, 10]);
    }

    #[test]
    fn builder_is_reproducible() {
        let build = || {
            let mut rng = ChaCha8Rng::seed_from_u64(99);
            let network = NetworkBuilder::new(50)
                .failing_percent(20.0)
                .build(&mut rng)
                .unwrap();
            network
                .peer_ids()
                .map(|id| (id, network.neighbors(id)))
                .collect::<Vec<_>>()
        };

        let first = build();
        assert_eq!(first.len(), 40);
        assert_eq!(first, build());
    }

    #[test]
    fn builder_rejects_empty_network() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(NetworkBuilder::new(0).build(&mut rng).is_err());
    }

    #[test]
    fn builder_rejects_bad_degree_distribution() {
        use super::NetworkBuildError::BadDegreeDistribution;

        for (mean, std_dev) in [(8.0, -2.0), (f64::NAN, 1.0), (8.0, f64::NAN)] {
            assert!(matches!(
                NetworkBuilder::new(10).degree(mean, std_dev).validate(),
                Err(BadDegreeDistribution { .. })
            ));
        }
        assert!(NetworkBuilder::new(10).degree(8.0, 0.0).validate().is_ok());
    }
}
