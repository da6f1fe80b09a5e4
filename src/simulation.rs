//! Building/running simulations and analyzing the resulting data

use std::{num::NonZeroUsize, sync::Arc, time::SystemTime};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::{
    block::{Block, SimTime},
    election::{Election, ElectionError},
    fork_choice::ForkChoice,
    gossip::{GossipEngine, PropagationReport, UncleTracker},
    latency::LatencyModel,
    network::{Network, NetworkBuildError, NetworkBuilder},
    peer::{Peer, PeerId},
    results::ResultsBuilder,
    schedule::{BlockSchedule, Cycle, ScheduleError, ScheduleMode},
};

pub mod builder;

pub use builder::{SimulationBuildError, SimulationBuilder};

/// Peer whose ledger is used to decide when enough blocks are confirmed.
pub const REFERENCE_PEER: PeerId = PeerId(1);

/// Where the peer network of each run comes from.
#[derive(Debug, Clone)]
pub enum NetworkSource {
    /// Every run starts from a copy of this network.
    Fixed(Network),
    /// Every run draws a new random network.
    Random(NetworkBuilder),
}

/// Where the block schedule of each run comes from.
#[derive(Debug, Clone)]
pub enum ScheduleSource {
    /// Every run draws a new schedule.
    Generated { mode: ScheduleMode, block_time: f64 },
    /// Every run replays this schedule.
    Fixed(BlockSchedule),
}

/// Container for a group of simulations which share one configuration and
/// differ only in their seed. Simulations should be run using this struct's
/// `run_all` method.
#[derive(Debug, Clone)]
pub struct SimulationGroup {
    network: NetworkSource,
    schedule: ScheduleSource,
    election: Box<dyn Election>,
    fork_choice: ForkChoice,
    latency: LatencyModel,
    confirmations: Option<usize>,
    seed: u64,
    repeat_all: NonZeroUsize,
}

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("could not elect a miner")]
    ElectionError(#[from] ElectionError),
    #[error("could not build the peer network")]
    NetworkBuildError(#[from] NetworkBuildError),
    #[error("could not schedule block discoveries")]
    ScheduleError(#[from] ScheduleError),
}

impl SimulationGroup {
    pub fn builder() -> SimulationBuilder {
        SimulationBuilder::new()
    }

    /// Seed of the first run. Run `i` is seeded with `seed + i`.
    #[inline]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[inline]
    pub fn repeat_all(&self) -> NonZeroUsize {
        self.repeat_all
    }

    /// Sets up the `repeat`-th run of this group.
    pub fn simulation(
        &self,
        repeat: usize,
    ) -> Result<Simulation, SimulationError> {
        let seed = self.seed.wrapping_add(repeat as u64);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let network = match &self.network {
            NetworkSource::Fixed(network) => network.clone(),
            NetworkSource::Random(builder) => builder.build(&mut rng)?,
        };
        let (schedule, block_time) = match &self.schedule {
            ScheduleSource::Generated { mode, block_time } => (
                BlockSchedule::generate(*mode, *block_time, &mut rng)?,
                Some(*block_time),
            ),
            ScheduleSource::Fixed(schedule) => (schedule.clone(), None),
        };

        Ok(Simulation {
            block_discoveries: schedule.len(),
            network,
            schedule,
            election: self.election.clone(),
            fork_choice: self.fork_choice,
            latency: self.latency.clone(),
            confirmations: self.confirmations,
            uncles: UncleTracker::new(),
            rng,
            seed,
            block_time,
            blocks_mined: 0,
            skipped_discoveries: 0,
            propagation: vec![],
        })
    }

    /// Runs every repeat of this group, in parallel when the `rayon` feature
    /// is enabled.
    pub fn run_all(self) -> Result<ResultsBuilder, SimulationError> {
        let repeats = self.repeat_all.get();
        info!(repeats, seed = self.seed, "running simulation group");

        #[cfg(feature = "rayon")]
        let outputs: Result<Vec<_>, _> = (0..repeats)
            .into_par_iter()
            .map(|i| self.simulation(i).and_then(Simulation::run))
            .collect();
        #[cfg(not(feature = "rayon"))]
        let outputs: Result<Vec<_>, _> = (0..repeats)
            .map(|i| self.simulation(i).and_then(Simulation::run))
            .collect();

        Ok(ResultsBuilder::new(outputs?, self.repeat_all))
    }
}

/// A single simulation run.
///
/// # Details
/// Block discoveries are taken from the schedule one at a time. For each, a
/// miner is elected, extends the block picked by its fork choice, and the new
/// block is gossiped across the network before the next discovery happens.
#[derive(Debug, Clone)]
pub struct Simulation {
    network: Network,
    schedule: BlockSchedule,
    election: Box<dyn Election>,
    fork_choice: ForkChoice,
    latency: LatencyModel,
    confirmations: Option<usize>,
    uncles: UncleTracker,
    rng: ChaCha8Rng,
    seed: u64,
    block_time: Option<f64>,
    block_discoveries: usize,
    blocks_mined: usize,
    skipped_discoveries: usize,
    propagation: Vec<PropagationReport>,
}

/// Contains the output data from a simulation.
#[derive(Debug, Clone)]
pub struct SimulationOutput {
    pub network: Network,
    /// Discoveries which happened while a block was still propagating.
    pub uncles: usize,
    /// Number of scheduled block discoveries.
    pub block_discoveries: usize,
    pub blocks_mined: usize,
    /// Discoveries dropped because the miner could not append its block.
    pub skipped_discoveries: usize,
    /// True if the run stopped early because enough blocks were confirmed.
    pub confirmed: bool,
    pub election: String,
    pub fork_choice: ForkChoice,
    /// Mean block time, if the schedule was drawn at random.
    pub block_time: Option<f64>,
    pub seed: u64,
    pub propagation: Vec<PropagationReport>,
    pub started_at: SystemTime,
}

impl Simulation {
    #[inline]
    pub fn network(&self) -> &Network {
        &self.network
    }

    #[inline]
    pub fn schedule(&self) -> &BlockSchedule {
        &self.schedule
    }

    /// Number of uncles formed so far.
    #[inline]
    pub fn uncles(&self) -> usize {
        self.uncles.uncles()
    }

    /// Executes the next scheduled block discovery, including the propagation
    /// of the mined block. Returns false if the schedule was already empty.
    pub fn step(&mut self) -> Result<bool, SimulationError> {
        let Some((cycle, at)) = self.schedule.pop_front() else {
            return Ok(false);
        };
        self.schedule.complete(cycle);
        self.uncles.set_next_discovery(self.schedule.front());

        self.trigger_block_discovery(cycle, at)?;

        Ok(true)
    }

    /// Executes the configured simulation.
    pub fn run(mut self) -> Result<SimulationOutput, SimulationError> {
        let started_at = self.schedule.started_at();
        info!(
            seed = self.seed,
            peers = self.network.node_count(),
            discoveries = self.block_discoveries,
            election = %self.election.name(),
            fork_choice = %self.fork_choice,
            "starting simulation"
        );

        let mut confirmed = false;
        while !self.schedule.is_empty() {
            if self.confirmations_reached() {
                confirmed = true;
                info!(
                    confirmations = ?self.confirmations,
                    "confirmation target reached"
                );
                break;
            }
            self.step()?;
        }

        info!(
            seed = self.seed,
            uncles = self.uncles.uncles(),
            blocks_mined = self.blocks_mined,
            elapsed = ?started_at.elapsed().unwrap_or_default(),
            "simulation finished"
        );

        Ok(SimulationOutput {
            uncles: self.uncles.uncles(),
            block_discoveries: self.block_discoveries,
            blocks_mined: self.blocks_mined,
            skipped_discoveries: self.skipped_discoveries,
            confirmed,
            election: self.election.name(),
            fork_choice: self.fork_choice,
            block_time: self.block_time,
            seed: self.seed,
            propagation: self.propagation,
            started_at,
            network: self.network,
        })
    }

    fn trigger_block_discovery(
        &mut self,
        cycle: Cycle,
        at: SimTime,
    ) -> Result<(), SimulationError> {
        let miner_id = self.election.elect(&self.network, &mut self.rng)?;
        let miner = self
            .network
            .peer_mut(miner_id)
            .ok_or(ElectionError::PeerNotFound(miner_id))?;

        let parent = Arc::clone(self.fork_choice.choose(&miner.ledger));
        let block = Arc::new(Block::extending(&parent, miner_id, at));
        if let Err(e) = miner.append_mined(&block) {
            warn!(cycle, %block, error = %e, "skipping block discovery");
            self.skipped_discoveries += 1;
            return Ok(());
        }
        self.blocks_mined += 1;
        debug!(cycle, %block, depth = block.depth, at = ?at, "block mined");

        let report = GossipEngine {
            network: &mut self.network,
            schedule: &mut self.schedule,
            uncles: &mut self.uncles,
            latency: &self.latency,
            rng: &mut self.rng,
        }
        .propagate(miner_id, &block, at);
        self.propagation.push(report);

        Ok(())
    }

    /// Checks whether the reference peer has confirmed more blocks than the
    /// confirmation target.
    fn confirmations_reached(&self) -> bool {
        let Some(target) = self.confirmations else {
            return false;
        };
        let Some(reference) = reference_peer(&self.network) else {
            return false;
        };

        let chain = reference.ledger.canonical_chain().len();
        chain.saturating_sub(self.uncles.uncles()) > target + 1
    }
}

/// Returns [`REFERENCE_PEER`], or the peer with the lowest ID if it failed.
fn reference_peer(network: &Network) -> Option<&Peer> {
    network
        .peer(REFERENCE_PEER)
        .or_else(|| network.peers().next())
}

impl SimulationOutput {
    /// Peer whose ledger summarizes the run. See [`REFERENCE_PEER`].
    pub fn reference_peer(&self) -> Option<&Peer> {
        reference_peer(&self.network)
    }

    /// Number of blocks on the reference peer's canonical chain, genesis
    /// excluded.
    pub fn canonical_chain_length(&self) -> usize {
        self.reference_peer()
            .map(|peer| peer.ledger.canonical_chain().len() - 1)
            .unwrap_or_default()
    }

    /// Uncles per scheduled block discovery.
    pub fn uncle_rate(&self) -> f64 {
        if self.block_discoveries == 0 {
            return 0.0;
        }

        self.uncles as f64 / self.block_discoveries as f64
    }

    /// Time between the discovery of a block and its reception by a peer, in
    /// seconds, for every block transferred by a neighbor. Ancestors
    /// backfilled during synchronization are not counted.
    pub fn reception_delays(&self) -> Vec<f64> {
        self.network
            .peers()
            .flat_map(|peer| peer.transfer_delays())
            .map(|delay| delay.as_secs_f64())
            .collect()
    }

    /// Mean of [`SimulationOutput::reception_delays`], or NaN if no block was
    /// relayed.
    pub fn mean_reception_delay(&self) -> f64 {
        crate::utils::mean_of_floats(self.reception_delays())
    }

    /// For every peer with a reception history, the seconds between the
    /// discovery of the first block it recorded and the reception of the last.
    pub fn times_to_last_reception(&self) -> Vec<f64> {
        self.network
            .peers()
            .filter_map(|peer| {
                let history = &peer.blocks_reception_history;
                let first = history.get(&1)?;
                let (_, last) = history.iter().next_back()?;
                let elapsed =
                    last.received_at.saturating_sub(first.block.timestamp);

                Some(elapsed.as_secs_f64())
            })
            .collect()
    }

    /// Median of [`SimulationOutput::times_to_last_reception`] over all peers.
    pub fn median_time_to_last_reception(&self) -> f64 {
        crate::utils::median_of_floats(self.times_to_last_reception())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        block::SimTime,
        election::{SinglePool, Uniform, Weighted},
        fork_choice::ForkChoice,
        hash_power::HashPowerTable,
        latency::LatencyConfig,
        network::{Network, NetworkBuilder},
        peer::PeerId,
        schedule::BlockSchedule,
    };

    use super::{SimulationBuilder, SimulationOutput};

    fn two_second_relays() -> LatencyConfig {
        LatencyConfig::constant(0.5, 0.25, 0.25)
    }

    #[test]
    fn single_miner_builds_one_chain() {
        let output = SimulationBuilder::new()
            .network(Network::fully_connected(1))
            .election(SinglePool::new())
            .fork_choice(ForkChoice::LongestChain)
            .block_discoveries(5)
            .seed(3)
            .build()
            .unwrap()
            .simulation(0)
            .unwrap()
            .run()
            .unwrap();

        let ledger = &output.reference_peer().unwrap().ledger;
        assert_eq!(ledger.len(), 6);
        let depths: Vec<_> =
            ledger.canonical_chain().iter().skip(1).map(|b| b.depth).collect();
        assert_eq!(depths, vec![1, 2, 3, 4, 5]);
        assert_eq!(output.uncles, 0);
        assert_eq!(output.blocks_mined, 5);
        assert_eq!(output.canonical_chain_length(), 5);
    }

    #[test]
    fn close_discoveries_form_an_uncle() {
        let schedule = BlockSchedule::from_entries([
            (1, SimTime::from_secs(10)),
            (2, SimTime::from_secs(11)),
        ])
        .unwrap();
        let output = SimulationBuilder::new()
            .network(Network::fully_connected(2))
            .election(SinglePool::new())
            .fork_choice(ForkChoice::Ghost)
            .schedule(schedule)
            .latency(two_second_relays())
            .seed(0)
            .build()
            .unwrap()
            .simulation(0)
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(output.uncles, 1);
        assert_eq!(output.blocks_mined, 1);
        let second = &output.network.peer(PeerId::from(2)).unwrap().ledger;
        assert_eq!(second.len(), 2);
        assert_eq!(second.uncle_count(), 0);
        assert_eq!(second.canonical_tip().miner_id, PeerId::from(1));
        assert_eq!(output.mean_reception_delay(), 2.0);
    }

    fn random_run(seed: u64) -> SimulationOutput {
        SimulationBuilder::new()
            .random_network(NetworkBuilder::new(30).degree(4.0, 1.0))
            .election(Weighted::new(HashPowerTable::new([0.3, 0.2]).unwrap()))
            .fork_choice(ForkChoice::Ghost)
            .block_time(4.0)
            .block_discoveries(40)
            .seed(seed)
            .build()
            .unwrap()
            .simulation(0)
            .unwrap()
            .run()
            .unwrap()
    }

    #[test]
    fn fixed_seed_is_reproducible() {
        let summary = |output: SimulationOutput| {
            let chain: Vec<_> = output
                .reference_peer()
                .unwrap()
                .ledger
                .canonical_chain()
                .iter()
                .map(|b| b.label())
                .collect();
            (output.uncles, chain, output.reception_delays())
        };

        assert_eq!(summary(random_run(11)), summary(random_run(11)));
    }

    #[test]
    fn uncles_never_decrease() {
        let mut sim = SimulationBuilder::new()
            .random_network(NetworkBuilder::new(20).degree(3.0, 1.0))
            .election(Uniform::new())
            .fork_choice(ForkChoice::LongestChain)
            .block_time(2.0)
            .block_discoveries(60)
            .seed(5)
            .build()
            .unwrap()
            .simulation(0)
            .unwrap();

        let mut uncles = 0;
        let mut ledger_uncles = vec![0; sim.network().id_bound()];
        while sim.step().unwrap() {
            assert!(sim.uncles() >= uncles);
            uncles = sim.uncles();
            for peer in sim.network().peers() {
                assert!(peer.ledger.is_well_formed());
                let count = peer.ledger.uncle_count();
                assert!(count >= ledger_uncles[peer.id.get()]);
                ledger_uncles[peer.id.get()] = count;
            }
        }
        assert!(sim.schedule().is_empty());
    }

    #[test]
    fn time_to_last_reception_per_peer() {
        let schedule = BlockSchedule::from_entries([
            (1, SimTime::from_secs(10)),
            (2, SimTime::from_secs(30)),
            (3, SimTime::from_secs(50)),
        ])
        .unwrap();
        let output = SimulationBuilder::new()
            .network(Network::fully_connected(2))
            .election(SinglePool::new())
            .fork_choice(ForkChoice::LongestChain)
            .schedule(schedule)
            .latency(two_second_relays())
            .seed(4)
            .build()
            .unwrap()
            .simulation(0)
            .unwrap()
            .run()
            .unwrap();

        assert_eq!(output.uncles, 0);
        let mut times = output.times_to_last_reception();
        times.sort_by(f64::total_cmp);
        assert_eq!(times, vec![40.0, 42.0]);
        assert_eq!(output.median_time_to_last_reception(), 41.0);
    }

    #[test]
    fn stops_at_confirmation_target() {
        let output = SimulationBuilder::new()
            .network(Network::fully_connected(1))
            .election(SinglePool::new())
            .fork_choice(ForkChoice::LongestChain)
            .block_discoveries(100)
            .confirmations(3)
            .seed(1)
            .build()
            .unwrap()
            .simulation(0)
            .unwrap()
            .run()
            .unwrap();

        assert!(output.confirmed);
        assert_eq!(output.blocks_mined, 4);
    }

    #[test]
    fn repeats_use_consecutive_seeds() {
        let outputs = SimulationBuilder::new()
            .network(Network::fully_connected(4))
            .election(Uniform::new())
            .fork_choice(ForkChoice::Ghost)
            .block_discoveries(10)
            .repeat_all(3)
            .seed(100)
            .build()
            .unwrap()
            .run_all()
            .unwrap()
            .data();

        let seeds: Vec<_> = outputs.iter().map(|o| o.seed).collect();
        assert_eq!(seeds, vec![100, 101, 102]);
    }
}
