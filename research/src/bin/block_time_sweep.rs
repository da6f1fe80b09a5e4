//! Mean block reception delay and uncle rate for a range of block times.
//!
//! Block transfer and validation delays grow with the block time, since
//! longer block times leave room for more transactions per block.

use std::{num::NonZeroUsize, time::Instant};

use anyhow::Result;
use propagation_sim::prelude::*;
use tracing_subscriber::EnvFilter;

const BLOCK_TIMES: [f64; 7] = [2.0, 4.0, 6.0, 8.0, 10.0, 13.24, 20.0];
const REPEATS: usize = 10;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let start = Instant::now();

    let mut data = vec![];
    for (i, &block_time) in BLOCK_TIMES.iter().enumerate() {
        let latency = LatencyConfig::default().scaled_to_block_time(block_time);
        let simulation = SimulationBuilder::new()
            .random_network(NetworkBuilder::new(200))
            .election(Uniform::new())
            .fork_choice(ForkChoice::Ghost)
            .block_time(block_time)
            .block_discoveries(100)
            .latency(latency)
            .repeat_all(REPEATS)
            .seed(1000 * i as u64)
            .build()?;

        data.extend(simulation.run_all()?.data());
    }

    let repeated = NonZeroUsize::new(REPEATS).unwrap_or(NonZeroUsize::MIN);
    let results = ResultsBuilder::new(data, repeated)
        .average(Average::Mean)
        .block_time()
        .uncle_rate()
        .mean_reception_delay()
        .output_func("Max Reception Delay", |output| {
            output.reception_delays().into_iter().fold(0.0, f64::max)
        })
        .build();

    println!("{}", results);

    println!("elapsed time: {:.4} secs", start.elapsed().as_secs_f64());
    Ok(())
}
