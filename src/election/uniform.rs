//! Implementation of an election in which every peer has equal hash power.

use rand::{seq::IteratorRandom, RngCore};

use crate::{network::Network, peer::PeerId};

use super::{Election, ElectionError};

/// Elects a peer uniformly at random among the peers of the network.
#[derive(Debug, Default, Clone, Copy)]
pub struct Uniform;

impl Uniform {
    pub fn new() -> Self {
        Uniform
    }
}

impl Election for Uniform {
    fn name(&self) -> String {
        "Uniform".into()
    }

    fn elect(
        &self,
        network: &Network,
        rng: &mut dyn RngCore,
    ) -> Result<PeerId, ElectionError> {
        network.peer_ids().choose(rng).ok_or(ElectionError::NoPeers)
    }
}
