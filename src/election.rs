/*!
Policies for electing the peer which mines the next block

An election policy is any type which implements the [`Election`] trait. Policies
must not depend on ledger state: the elected peer is a function of the network
and the random number generator alone.

# Built-In Policies

- Weighted by hash power [`weighted::Weighted`]
- A single pool owning all hash power [`single_pool::SinglePool`]
- Uniformly random [`uniform::Uniform`]

# Examples

```
use propagation_sim::prelude::*;
use rand::SeedableRng;

let network = Network::fully_connected(10);
let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(1);

let table = HashPowerTable::new([0.6, 0.3]).unwrap();
let miner = Weighted::new(table).elect(&network, &mut rng).unwrap();
assert!(network.contains(miner));
```
*/

use std::fmt::Debug;

use rand::{distributions::WeightedError, RngCore};

use crate::{hash_power::HashPowerError, network::Network, peer::PeerId};

pub mod single_pool;
pub mod uniform;
pub mod weighted;

pub use single_pool::SinglePool;
pub use uniform::Uniform;
pub use weighted::Weighted;

/// Chooses the miner of each new block.
pub trait Election: Debug + dyn_clone::DynClone + Send + Sync {
    /// Returns the name of this election policy.
    fn name(&self) -> String;

    /// Returns the ID of the peer of `network` which mines the next block.
    fn elect(
        &self,
        network: &Network,
        rng: &mut dyn RngCore,
    ) -> Result<PeerId, ElectionError>;

    /// Checks that a miner can be elected from a network made of `peers`.
    fn validate(&self, _peers: &[PeerId]) -> Result<(), ElectionError> {
        Ok(())
    }
}

dyn_clone::clone_trait_object!(Election);

#[derive(Debug, thiserror::Error)]
pub enum ElectionError {
    #[error("cannot elect a miner in an empty network")]
    NoPeers,
    #[error("elected peer {0} is not part of the network")]
    PeerNotFound(PeerId),
    #[error(transparent)]
    HashPowerError(#[from] HashPowerError),
    #[error("could not create rand::distributions::WeightedIndex")]
    WeightedIndexError(#[from] WeightedError),
}
