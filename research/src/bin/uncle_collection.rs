//! Number of uncles formed over many runs of 400 block discoveries, for
//! comparison with the uncle rate of the Ethereum main network.

use anyhow::Result;
use propagation_sim::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn,uncle_collection=info"))
        .init();

    let simulation = SimulationBuilder::new()
        .random_network(NetworkBuilder::new(300))
        .election(Uniform::new())
        .fork_choice(ForkChoice::Ghost)
        .block_discoveries(400)
        .repeat_all(300)
        .build()?;

    let data = simulation.run_all()?.data();
    info!(runs = data.len(), "collected uncle counts");
    let uncles: Vec<_> =
        data.iter().map(|output| output.uncles as f64).collect();

    let mean = uncles.iter().sum::<f64>() / uncles.len() as f64;
    let variance = uncles.iter().map(|u| (u - mean).powi(2)).sum::<f64>()
        / (uncles.len() - 1).max(1) as f64;

    println!("uncles");
    for u in &uncles {
        println!("{}", u);
    }
    println!(
        "mean uncle percentage: {:.2}%, standard deviation: {:.2} uncles",
        100.0 * mean / 400.0,
        variance.sqrt()
    );

    Ok(())
}
