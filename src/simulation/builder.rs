use std::num::NonZeroUsize;

use tracing::info;

use crate::{
    block::SimTime,
    election::{Election, ElectionError},
    fork_choice::ForkChoice,
    latency::{LatencyConfig, LatencyError, LatencyModel},
    network::{Network, NetworkBuildError, NetworkBuilder},
    peer::PeerId,
    schedule::{BlockSchedule, ScheduleMode},
};

use super::{NetworkSource, ScheduleSource, SimulationGroup};

/// Builds a [`SimulationGroup`].
#[derive(Debug, Default)]
pub struct SimulationBuilder {
    pub block_time: Option<f64>,
    pub schedule_mode: Option<ScheduleMode>,
    pub confirmations: Option<usize>,
    pub repeat_all: Option<usize>,
    pub seed: Option<u64>,
    schedule: Option<BlockSchedule>,
    network: Option<NetworkSource>,
    election: Option<Box<dyn Election>>,
    fork_choice: Option<ForkChoice>,
    latency: Option<LatencyConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum SimulationBuildError {
    #[error("no peer network was given")]
    NoNetworkGiven,
    #[error("the peer network has no peers")]
    EmptyNetwork,
    #[error("no miner election policy was given")]
    NoElectionGiven,
    #[error("no fork choice rule was given")]
    NoForkChoiceGiven,
    #[error("number of block discoveries must be greater than 0")]
    ZeroBlockDiscoveries,
    #[error("simulation time must be greater than 0")]
    ZeroDuration,
    #[error("block time must be positive and finite, got {0}")]
    BadBlockTime(f64),
    #[error(
        "a fixed schedule cannot be combined with a block time or schedule mode"
    )]
    ConflictingSchedule,
    #[error("cannot repeat the simulation 0 times")]
    ZeroRepeats,
    #[error(transparent)]
    NetworkBuildError(#[from] NetworkBuildError),
    #[error(transparent)]
    LatencyError(#[from] LatencyError),
    #[error(transparent)]
    ElectionError(#[from] ElectionError),
}

impl SimulationBuilder {
    /// Creates a new [`SimulationBuilder`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the mean time between block discoveries, in seconds
    /// (default [`LatencyConfig::REFERENCE_BLOCK_TIME`]).
    pub fn block_time(mut self, seconds: f64) -> Self {
        self.block_time = Some(seconds);

        self
    }

    /// Schedule exactly `num` block discoveries (100 by default).
    pub fn block_discoveries(mut self, num: usize) -> Self {
        self.schedule_mode = Some(ScheduleMode::BlockDiscoveries(num));

        self
    }

    /// Schedule block discoveries until `duration` of simulated time has
    /// passed.
    pub fn simulation_time(mut self, duration: SimTime) -> Self {
        self.schedule_mode = Some(ScheduleMode::SimulationTime(duration));

        self
    }

    /// Replay `schedule` in every run instead of drawing a new one.
    pub fn schedule(mut self, schedule: BlockSchedule) -> Self {
        self.schedule = Some(schedule);

        self
    }

    /// Every run starts from a copy of `network`.
    pub fn network(mut self, network: Network) -> Self {
        self.network = Some(NetworkSource::Fixed(network));

        self
    }

    /// Every run draws a new network from `builder`.
    pub fn random_network(mut self, builder: NetworkBuilder) -> Self {
        self.network = Some(NetworkSource::Random(builder));

        self
    }

    pub fn election<E: Election + 'static>(mut self, election: E) -> Self {
        self.election = Some(Box::new(election));

        self
    }

    pub fn fork_choice(mut self, fork_choice: ForkChoice) -> Self {
        self.fork_choice = Some(fork_choice);

        self
    }

    /// Sets the relay delay parameters ([`LatencyConfig::default`] used
    /// otherwise).
    pub fn latency(mut self, config: LatencyConfig) -> Self {
        self.latency = Some(config);

        self
    }

    /// Stop a run once the reference peer's canonical chain, minus the uncles
    /// formed so far, holds more than `num + 1` blocks.
    pub fn confirmations(mut self, num: usize) -> Self {
        self.confirmations = Some(num);

        self
    }

    /// Seed of the first run (random by default).
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);

        self
    }

    /// Run the simulation `num` times, with seeds `seed..seed + num`.
    pub fn repeat_all(mut self, num: usize) -> Self {
        self.repeat_all = Some(num);

        self
    }

    /// Creates a [`SimulationGroup`] from the specified parameters.
    pub fn build(self) -> Result<SimulationGroup, SimulationBuildError> {
        use SimulationBuildError::*;

        let SimulationBuilder {
            block_time,
            schedule_mode,
            confirmations,
            repeat_all,
            seed,
            schedule,
            network,
            election,
            fork_choice,
            latency,
        } = self;

        let network = network.ok_or(NoNetworkGiven)?;
        let peer_ids: Vec<PeerId> = match &network {
            NetworkSource::Fixed(network) if network.node_count() == 0 => {
                return Err(EmptyNetwork)
            }
            NetworkSource::Fixed(network) => network.peer_ids().collect(),
            NetworkSource::Random(builder) => {
                builder.validate()?;
                (1..=builder.n_peers()).map(PeerId::from).collect()
            }
        };
        let election = election.ok_or(NoElectionGiven)?;
        election.validate(&peer_ids)?;
        let fork_choice = fork_choice.ok_or(NoForkChoiceGiven)?;

        let schedule = match schedule {
            Some(_) if block_time.is_some() || schedule_mode.is_some() => {
                return Err(ConflictingSchedule)
            }
            Some(schedule) => ScheduleSource::Fixed(schedule),
            None => {
                let block_time =
                    block_time.unwrap_or(LatencyConfig::REFERENCE_BLOCK_TIME);
                if !block_time.is_finite() || block_time <= 0.0 {
                    return Err(BadBlockTime(block_time));
                }

                let mode = schedule_mode.unwrap_or_default();
                match mode {
                    ScheduleMode::BlockDiscoveries(0) => {
                        return Err(ZeroBlockDiscoveries)
                    }
                    ScheduleMode::SimulationTime(d) if d.is_zero() => {
                        return Err(ZeroDuration)
                    }
                    _ => (),
                }

                ScheduleSource::Generated { mode, block_time }
            }
        };

        let latency = LatencyModel::new(latency.unwrap_or_default())?;
        let repeat_all = match repeat_all {
            Some(x) => NonZeroUsize::new(x).ok_or(ZeroRepeats)?,
            None => NonZeroUsize::MIN,
        };
        let seed = seed.unwrap_or_else(|| {
            let seed: u64 = rand::random();
            info!(seed, "no seed given, drew a random one");
            seed
        });

        Ok(SimulationGroup {
            network,
            schedule,
            election,
            fork_choice,
            latency,
            confirmations,
            seed,
            repeat_all,
        })
    }
}
