//! Implementation of a network where one mining pool holds all hash power.

use rand::RngCore;

use crate::{network::Network, peer::PeerId};

use super::{Election, ElectionError};

/// Always elects the peer with [`PeerId`] 1.
#[derive(Debug, Default, Clone, Copy)]
pub struct SinglePool;

impl SinglePool {
    pub const POOL: PeerId = PeerId(1);

    pub fn new() -> Self {
        SinglePool
    }
}

impl Election for SinglePool {
    fn name(&self) -> String {
        "Single Pool".into()
    }

    fn elect(
        &self,
        network: &Network,
        _rng: &mut dyn RngCore,
    ) -> Result<PeerId, ElectionError> {
        if network.contains(Self::POOL) {
            Ok(Self::POOL)
        } else {
            Err(ElectionError::PeerNotFound(Self::POOL))
        }
    }

    fn validate(&self, peers: &[PeerId]) -> Result<(), ElectionError> {
        if peers.contains(&Self::POOL) {
            Ok(())
        } else {
            Err(ElectionError::PeerNotFound(Self::POOL))
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use crate::{election::Election, network::Network, peer::PeerId};

    use super::SinglePool;

    #[test]
    fn pool_must_be_present() {
        let mut network = Network::fully_connected(3);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert_eq!(SinglePool.elect(&network, &mut rng).unwrap(), PeerId(1));

        network.remove_peer(PeerId::from(1));
        let ids: Vec<_> = network.peer_ids().collect();
        assert!(SinglePool.validate(&ids).is_err());
        assert!(SinglePool.elect(&network, &mut rng).is_err());
    }
}
