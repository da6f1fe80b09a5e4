//! Implementation of an election weighted by the hash power of each peer.

use rand::{
    distributions::{Distribution, WeightedIndex},
    RngCore,
};

use crate::{hash_power::HashPowerTable, network::Network, peer::PeerId};

use super::{Election, ElectionError};

/// Elects a peer with probability proportional to its hash power, as given by
/// a [`HashPowerTable`].
#[derive(Debug, Clone, Default)]
pub struct Weighted {
    table: HashPowerTable,
}

impl Weighted {
    pub fn new(table: HashPowerTable) -> Self {
        Weighted { table }
    }

    #[inline]
    pub fn table(&self) -> &HashPowerTable {
        &self.table
    }
}

impl Election for Weighted {
    fn name(&self) -> String {
        format!("Weighted ({} top miners)", self.table.len())
    }

    fn elect(
        &self,
        network: &Network,
        rng: &mut dyn RngCore,
    ) -> Result<PeerId, ElectionError> {
        let population: Vec<_> = network.peer_ids().collect();
        if population.is_empty() {
            return Err(ElectionError::NoPeers);
        }

        let weights = self.table.weights(&population)?;
        let index = WeightedIndex::new(weights)?;

        Ok(population[index.sample(rng)])
    }

    fn validate(&self, peers: &[PeerId]) -> Result<(), ElectionError> {
        WeightedIndex::new(self.table.weights(peers)?)?;

        Ok(())
    }
}
