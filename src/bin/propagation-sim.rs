//! Block propagation simulator CLI
//!
//! # Example
//!
//! ```bash
//! # 400 block discoveries over 500 peers with the hash power of the top miners
//! propagation-sim --seed 42 -n 500 -b 400 --hash-power hashrates.csv
//!
//! # One hour of simulated time, median over 20 runs, as CSV
//! propagation-sim -d 3600 --repeat 20 --average median --csv
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use propagation_sim::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Block propagation simulator
///
/// Gossips proof-of-work blocks across a random peer-to-peer network and
/// counts the uncles which form. Reproducible when the same seed is used.
#[derive(Parser, Debug)]
#[command(name = "propagation-sim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of peers
    #[arg(short = 'n', long, default_value = "100")]
    peers: usize,

    /// Mean time between block discoveries, in seconds
    #[arg(long, default_value_t = LatencyConfig::REFERENCE_BLOCK_TIME)]
    block_time: f64,

    /// Number of block discoveries to simulate
    #[arg(short = 'b', long, conflicts_with = "duration")]
    blocks: Option<usize>,

    /// Simulated time in seconds, as an alternative to a number of blocks
    #[arg(short = 'd', long)]
    duration: Option<u64>,

    /// Miner election policy
    #[arg(long, value_enum, default_value = "weighted")]
    election: ElectionArg,

    /// File with the hash power percentages of the top miners, one per line
    /// after a `hashrates` header
    #[arg(long)]
    hash_power: Option<PathBuf>,

    /// Fork choice rule, `ghost` or `longest_chain_rule`
    #[arg(long, default_value = "ghost")]
    fork_choice: ForkChoice,

    /// Mean number of neighbors per peer
    #[arg(long, default_value = "8")]
    degree_mean: f64,

    /// Standard deviation of the number of neighbors per peer
    #[arg(long, default_value = "2")]
    degree_std: f64,

    /// Fraction of peers running Geth, the rest run Parity
    #[arg(long, default_value_t = NetworkBuilder::GETH_FRACTION)]
    geth_fraction: f64,

    /// Percentage of peers removed from the network before the simulation
    #[arg(long, default_value = "0")]
    failing_percent: f64,

    /// Stop once the most powerful miner has confirmed this many blocks
    #[arg(long)]
    confirmations: Option<usize>,

    /// Scale block transfer and validation delays to the block time
    #[arg(long)]
    scale_latency: bool,

    /// Skip the exchange of Status messages
    #[arg(long)]
    no_status_msg: bool,

    /// Skip PoW validation of block headers
    #[arg(long)]
    no_pow_validation: bool,

    /// Random seed for reproducible results. When omitted, a random seed is
    /// used.
    #[arg(long)]
    seed: Option<u64>,

    /// Number of runs, seeded `seed`, `seed + 1`, ...
    #[arg(short = 'r', long, default_value = "1")]
    repeat: usize,

    /// Aggregate repeated runs into one row
    #[arg(long, value_enum, default_value = "none")]
    average: AverageArg,

    /// Print results as CSV
    #[arg(long)]
    csv: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum ElectionArg {
    Weighted,
    SinglePool,
    Uniform,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum AverageArg {
    None,
    Mean,
    Median,
    Max,
    Min,
}

impl From<AverageArg> for Average {
    fn from(arg: AverageArg) -> Self {
        match arg {
            AverageArg::None => Average::None,
            AverageArg::Mean => Average::Mean,
            AverageArg::Median => Average::Median,
            AverageArg::Max => Average::Max,
            AverageArg::Min => Average::Min,
        }
    }
}

fn hash_power_table(path: Option<&PathBuf>) -> anyhow::Result<HashPowerTable> {
    let Some(path) = path else {
        return Ok(HashPowerTable::default());
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("could not read {}", path.display()))?;
    let table = HashPowerTable::parse_percentages(&text).with_context(|| {
        format!("invalid hash power table {}", path.display())
    })?;
    info!(
        miners = table.len(),
        total = table.total(),
        "loaded hash power table"
    );

    Ok(table)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("warn,propagation_sim=info")
            }),
        )
        .init();

    let args = Args::parse();

    let mut latency = LatencyConfig {
        status_msg: !args.no_status_msg,
        pow_validation: !args.no_pow_validation,
        ..Default::default()
    };
    if args.scale_latency {
        latency = latency.scaled_to_block_time(args.block_time);
    }

    let network = NetworkBuilder::new(args.peers)
        .degree(args.degree_mean, args.degree_std)
        .geth_fraction(args.geth_fraction)
        .failing_percent(args.failing_percent);

    let mut builder = SimulationBuilder::new()
        .random_network(network)
        .fork_choice(args.fork_choice)
        .block_time(args.block_time)
        .latency(latency)
        .repeat_all(args.repeat);
    builder = match args.election {
        ElectionArg::Weighted => {
            let table = hash_power_table(args.hash_power.as_ref())?;
            builder.election(Weighted::new(table))
        }
        ElectionArg::SinglePool => builder.election(SinglePool::new()),
        ElectionArg::Uniform => builder.election(Uniform::new()),
    };
    builder = match (args.blocks, args.duration) {
        (_, Some(secs)) => builder.simulation_time(SimTime::from_secs(secs)),
        (Some(blocks), None) => builder.block_discoveries(blocks),
        (None, None) => builder,
    };
    if let Some(confirmations) = args.confirmations {
        builder = builder.confirmations(confirmations);
    }
    if let Some(seed) = args.seed {
        builder = builder.seed(seed);
    }

    let group = builder.build()?;
    info!(seed = group.seed(), repeats = args.repeat, "starting simulations");

    let format = if args.csv { Format::CSV } else { Format::PrettyPrint };
    let results = group
        .run_all()?
        .all()
        .average(args.average.into())
        .format(format)
        .build();

    println!("{}", results);

    Ok(())
}
