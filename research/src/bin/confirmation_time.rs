//! Median time until every peer has received the last block of a run that
//! stops once the reference peer reaches a confirmation target, for a range
//! of block times.

use std::{num::NonZeroUsize, time::Instant};

use anyhow::Result;
use propagation_sim::prelude::*;
use tracing_subscriber::EnvFilter;

const BLOCK_TIMES: [f64; 6] = [2.0, 4.0, 6.0, 8.0, 10.0, 13.24];
const CONFIRMATIONS: usize = 12;
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
            .block_discoveries(300)
            .confirmations(CONFIRMATIONS)
            .latency(latency)
            .repeat_all(REPEATS)
            .seed(1000 * i as u64)
            .build()?;

        data.extend(simulation.run_all()?.data());
    }

    let repeated = NonZeroUsize::new(REPEATS).unwrap_or(NonZeroUsize::MIN);
    let results = ResultsBuilder::new(data, repeated)
        .average(Average::Median)
        .block_time()
        .constant("Confirmations", CONFIRMATIONS as f64)
        .blocks_mined()
        .uncles()
        .output_func("Median Time To Last Reception", |output| {
            output.median_time_to_last_reception()
        })
        .build();

    println!("{}", results);

    println!("elapsed time: {:.4} secs", start.elapsed().as_secs_f64());
    Ok(())
}
