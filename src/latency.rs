//! Delays incurred while relaying a block between two peers

use rand::{distributions::Uniform, Rng};
use rand_distr::{Distribution, Normal};

use crate::block::SimTime;

/// Parameters of the delay distributions, in seconds.
///
/// Relaying a block is modeled as the Ethereum wire protocol exchange
/// `Status`, `GetBlockHeaders`, `BlockHeaders`, proof-of-work validation,
/// `GetBlockBodies`, followed by the transfer of the block body itself. Each
/// step of the exchange can be switched off individually.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyConfig {
    pub mean_block_transfer: f64,
    pub std_block_transfer: f64,
    /// Mean one-way latency of a protocol message, including the time the
    /// receiver takes to process it.
    pub mean_latency_msgs: f64,
    pub std_latency_msgs: f64,
    pub min_time_pow_validation: f64,
    pub max_time_pow_validation: f64,
    /// Exchange of `Status` messages (one round trip).
    pub status_msg: bool,
    pub get_block_headers_msg: bool,
    pub block_headers_msg: bool,
    pub pow_validation: bool,
    pub get_block_bodies_msg: bool,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        LatencyConfig {
            mean_block_transfer: 0.5,
            std_block_transfer: 0.2,
            mean_latency_msgs: 0.3,
            std_latency_msgs: 0.1,
            min_time_pow_validation: 0.1,
            max_time_pow_validation: 0.2,
            status_msg: true,
            get_block_headers_msg: true,
            block_headers_msg: true,
            pow_validation: true,
            get_block_bodies_msg: true,
        }
    }
}

impl LatencyConfig {
    /// Block time of the Ethereum network as of October 2020, in seconds.
    pub const REFERENCE_BLOCK_TIME: f64 = 13.24;

    /// Returns a copy of this configuration in which the delays that depend
    /// on block size (transfer and validation) are scaled in proportion to
    /// `block_time / REFERENCE_BLOCK_TIME`. Message latencies are unchanged.
    pub fn scaled_to_block_time(&self, block_time: f64) -> Self {
        let ratio = block_time / Self::REFERENCE_BLOCK_TIME;

        LatencyConfig {
            mean_block_transfer: self.mean_block_transfer * ratio,
            std_block_transfer: self.std_block_transfer * ratio,
            min_time_pow_validation: self.min_time_pow_validation * ratio,
            max_time_pow_validation: self.max_time_pow_validation * ratio,
            ..self.clone()
        }
    }

    /// Configuration in which every delay is exactly its mean.
    pub fn constant(
        block_transfer: f64,
        msgs: f64,
        pow_validation: f64,
    ) -> Self {
        LatencyConfig {
            mean_block_transfer: block_transfer,
            std_block_transfer: 0.0,
            mean_latency_msgs: msgs,
            std_latency_msgs: 0.0,
            min_time_pow_validation: pow_validation,
            max_time_pow_validation: pow_validation,
            ..Default::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LatencyError {
    #[error("invalid block transfer delay (mean {0}, std. deviation {1})")]
    BadBlockTransfer(f64, f64),
    #[error("invalid message latency (mean {0}, std. deviation {1})")]
    BadMessageLatency(f64, f64),
    #[error("invalid PoW validation interval {0}..={1}")]
    BadPowValidation(f64, f64),
}

/// Samples relay delays according to a [`LatencyConfig`].
#[derive(Debug, Clone)]
pub struct LatencyModel {
    config: LatencyConfig,
    block_transfer: Normal<f64>,
    one_way: Normal<f64>,
    pow_validation: Uniform<f64>,
}

impl LatencyModel {
    pub fn new(config: LatencyConfig) -> Result<Self, LatencyError> {
        use LatencyError::*;

        let c = &config;
        let (mean, std_dev) = (c.mean_block_transfer, c.std_block_transfer);
        let block_transfer =
            normal(mean, std_dev).ok_or(BadBlockTransfer(mean, std_dev))?;
        let (mean, std_dev) = (c.mean_latency_msgs, c.std_latency_msgs);
        let one_way =
            normal(mean, std_dev).ok_or(BadMessageLatency(mean, std_dev))?;

        let (min, max) = (c.min_time_pow_validation, c.max_time_pow_validation);
        if !(min.is_finite() && max.is_finite() && 0.0 <= min && min <= max) {
            return Err(BadPowValidation(min, max));
        }
        let pow_validation = Uniform::new_inclusive(min, max);

        Ok(LatencyModel {
            config,
            block_transfer,
            one_way,
            pow_validation,
        })
    }

    #[inline]
    pub fn config(&self) -> &LatencyConfig {
        &self.config
    }

    /// Time needed to synchronize with a peer before the block body can be
    /// transferred.
    pub fn blockchain_sync_delay<R>(&self, rng: &mut R) -> SimTime
    where
        R: Rng + ?Sized,
    {
        let c = &self.config;
        let mut secs = 0.0;

        if c.status_msg {
            secs += 2.0 * self.one_way_latency(rng);
        }
        if c.get_block_headers_msg {
            secs += self.one_way_latency(rng);
        }
        if c.block_headers_msg {
            secs += self.one_way_latency(rng);
        }
        if c.pow_validation {
            secs += self.pow_validation.sample(rng);
        }
        if c.get_block_bodies_msg {
            secs += self.one_way_latency(rng);
        }

        SimTime::from_secs_f64(secs)
    }

    /// Time needed to transfer a block body.
    pub fn block_transfer_delay<R>(&self, rng: &mut R) -> SimTime
    where
        R: Rng + ?Sized,
    {
        SimTime::from_secs_f64(self.block_transfer.sample(rng).abs())
    }

    /// Total time between a peer receiving a block and relaying it onward.
    pub fn relay_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> SimTime {
        self.blockchain_sync_delay(rng) + self.block_transfer_delay(rng)
    }

    fn one_way_latency<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        self.one_way.sample(rng).abs()
    }
}

fn normal(mean: f64, std_dev: f64) -> Option<Normal<f64>> {
    // Normal::new accepts negative standard deviations
    if !mean.is_finite() || !(std_dev >= 0.0) {
        return None;
    }

    Normal::new(mean, std_dev).ok()
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use crate::block::SimTime;

    use super::{LatencyConfig, LatencyError, LatencyModel};

    #[test]
    fn constant_latencies() {
        let config = LatencyConfig::constant(0.5, 0.25, 0.125);
        let model = LatencyModel::new(config).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        // status round trip + 3 one-way messages + validation
        assert_eq!(
            model.blockchain_sync_delay(&mut rng),
            SimTime::from_secs_f64(5.0 * 0.25 + 0.125)
        );
        assert_eq!(
            model.relay_delay(&mut rng),
            SimTime::from_secs_f64(1.375 + 0.5)
        );
    }

    #[test]
    fn disabled_messages_add_no_delay() {
        let config = LatencyConfig {
            status_msg: false,
            get_block_headers_msg: false,
            block_headers_msg: false,
            pow_validation: false,
            get_block_bodies_msg: false,
            ..Default::default()
        };
        let model = LatencyModel::new(config).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        assert_eq!(model.blockchain_sync_delay(&mut rng), SimTime::ZERO);
    }

    #[test]
    fn sampled_delays_are_never_negative() {
        let config = LatencyConfig {
            mean_block_transfer: 0.0,
            std_block_transfer: 1.0,
            ..Default::default()
        };
        let model = LatencyModel::new(config).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        for _ in 0..1000 {
            // Duration::from_secs_f64 panics on negative input
            model.relay_delay(&mut rng);
        }
    }

    #[test]
    fn scaling_to_block_time() {
        let scaled = LatencyConfig::default()
            .scaled_to_block_time(2.0 * LatencyConfig::REFERENCE_BLOCK_TIME);

        assert_eq!(scaled.mean_block_transfer, 1.0);
        assert_eq!(scaled.max_time_pow_validation, 0.4);
        assert_eq!(scaled.mean_latency_msgs, 0.3);
    }

    #[test]
    fn rejects_bad_parameters() {
        let config = LatencyConfig {
            std_latency_msgs: -1.0,
            ..Default::default()
        };
        assert!(LatencyModel::new(config).is_err());

        let config = LatencyConfig {
            std_block_transfer: -0.2,
            ..Default::default()
        };
        assert!(matches!(
            LatencyModel::new(config),
            Err(LatencyError::BadBlockTransfer(..))
        ));

        let config = LatencyConfig {
            std_block_transfer: f64::NAN,
            ..Default::default()
        };
        assert!(LatencyModel::new(config).is_err());

        let config = LatencyConfig {
            min_time_pow_validation: 0.3,
            max_time_pow_validation: 0.2,
            ..Default::default()
        };
        assert!(LatencyModel::new(config).is_err());
    }
}
