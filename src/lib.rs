/*!
Discrete-event simulator of block propagation and fork formation in a
proof-of-work peer-to-peer network.

Blocks are discovered according to a [`schedule::BlockSchedule`]. For each
discovery a miner is elected ([`election`]), extends the block picked by its
[`fork_choice::ForkChoice`], and the new block is gossiped across the
[`network::Network`] ([`gossip`]). Discoveries which happen while a block is
still in flight become uncles.

```
use propagation_sim::prelude::*;

let group = SimulationBuilder::new()
    .random_network(NetworkBuilder::new(50).degree(6.0, 2.0))
    .election(Weighted::new(HashPowerTable::new([0.25, 0.15]).unwrap()))
    .fork_choice(ForkChoice::Ghost)
    .block_discoveries(30)
    .seed(234)
    .build()
    .unwrap();

let output = group.simulation(0).unwrap().run().unwrap();
assert!(output.uncles + output.blocks_mined <= output.block_discoveries);
```
*/

pub mod block;
pub mod election;
pub mod fork_choice;
pub mod gossip;
pub mod hash_power;
pub mod latency;
pub mod ledger;
pub mod network;
pub mod peer;
pub mod prelude;
pub mod results;
pub mod schedule;
pub mod simulation;

pub(crate) mod utils;
