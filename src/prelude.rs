/*!
Re-export of common values and datatypes used for running and analyzing
simulations. Must be imported manually.

```
use propagation_sim::prelude::*;
```
*/

use crate::{
    block, election, fork_choice, gossip, hash_power, latency, ledger, network,
    peer, results, schedule, simulation,
};

pub use block::{Block, BlockId, BlockLabel, SimTime};

pub use election::{Election, ElectionError, SinglePool, Uniform, Weighted};

pub use fork_choice::ForkChoice;

pub use gossip::PropagationReport;

pub use hash_power::{HashPowerError, HashPowerTable, PowerValue};

pub use latency::{LatencyConfig, LatencyModel};

pub use ledger::{Ledger, LedgerError};

pub use network::{Network, NetworkBuilder};

pub use peer::{ClientKind, Peer, PeerId, ReceptionEntry, Sender};

pub use results::{Average, Format, ResultsBuilder, ResultsTable};

pub use schedule::{BlockSchedule, ScheduleMode};

pub use simulation::{
    SimulationBuildError, SimulationBuilder, SimulationError, SimulationGroup,
    SimulationOutput,
};
