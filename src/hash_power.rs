//! Describing the distribution of hash power across the network

use crate::peer::PeerId;

/// Numeric type used to represent hash power.
pub type PowerValue = f64;

/// Hash power of the most powerful miners of a network, as fractions of the
/// total hash power. The `i`-th value belongs to the peer with [`PeerId`]
/// `i + 1`; the remaining hash power is distributed equally between all other
/// peers.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct HashPowerTable {
    top_miners: Vec<PowerValue>,
}

#[derive(Debug, thiserror::Error)]
pub enum HashPowerError {
    #[error("hash power values sum to {0}, which exceeds 1.0")]
    BadDistributionSum(PowerValue),
    #[error("hash power value {0} is not in the range 0.0..=1.0")]
    BadPowerValue(PowerValue),
    #[error("hash power table lists {0} miners but the network has {1} peers")]
    TooManyMiners(usize, usize),
    #[error("cannot distribute hash power over zero peers")]
    ZeroPeersGiven,
    #[error("could not parse hash power table: {0}")]
    Parse(String),
}

impl HashPowerTable {
    /// Allowable difference between a table sum and 1.0.
    const EPSILON_POWER: PowerValue = 1e-6;

    /// Creates a table from fractions of the total hash power.
    pub fn new<I>(values: I) -> Result<Self, HashPowerError>
    where
        I: IntoIterator<Item = PowerValue>,
    {
        let table = HashPowerTable {
            top_miners: values.into_iter().collect(),
        };
        table.validate()?;

        Ok(table)
    }

    /// Creates a table from percentages of the total hash power.
    pub fn from_percentages<I>(values: I) -> Result<Self, HashPowerError>
    where
        I: IntoIterator<Item = PowerValue>,
    {
        Self::new(values.into_iter().map(|p| p / 100.0))
    }

    /// Parses a table of percentages, one per line. Blank lines, `#` comments
    /// and a leading `hashrates` header are skipped.
    pub fn parse_percentages(text: &str) -> Result<Self, HashPowerError> {
        let mut values = vec![];
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if i == 0 && line.eq_ignore_ascii_case("hashrates") {
                continue;
            }

            let value = line.parse::<PowerValue>().map_err(|e| {
                HashPowerError::Parse(format!("line {}: {}", i + 1, e))
            })?;
            values.push(value);
        }

        Self::from_percentages(values)
    }

    fn validate(&self) -> Result<(), HashPowerError> {
        use HashPowerError::*;

        if let Some(&val) = self
            .top_miners
            .iter()
            .find(|&x| x.is_nan() || !(0.0..=1.0).contains(x))
        {
            return Err(BadPowerValue(val));
        }

        let sum = self.total();
        if sum > 1.0 + Self::EPSILON_POWER {
            return Err(BadDistributionSum(sum));
        }

        Ok(())
    }

    /// Number of miners listed in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.top_miners.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.top_miners.is_empty()
    }

    /// Sum of the hash power of all listed miners.
    #[inline]
    pub fn total(&self) -> PowerValue {
        self.top_miners.iter().sum()
    }

    /// Returns the hash power of every peer in `peers`, in the same order.
    ///
    /// Listed miners whose peer is not among `peers` (for example because it
    /// failed) keep their share out of the distribution.
    pub fn weights(
        &self,
        peers: &[PeerId],
    ) -> Result<Vec<PowerValue>, HashPowerError> {
        use HashPowerError::*;

        if peers.is_empty() {
            return Err(ZeroPeersGiven);
        }

        let listed = |id: &PeerId| id.get() <= self.top_miners.len();
        let n_rest = peers.iter().filter(|id| !listed(id)).count();
        if n_rest == 0 && self.top_miners.len() > peers.len() {
            return Err(TooManyMiners(self.top_miners.len(), peers.len()));
        }

        let rest = (1.0 - self.total()).max(0.0);
        let each = if n_rest > 0 { rest / n_rest as PowerValue } else { 0.0 };

        Ok(peers
            .iter()
            .map(|id| {
                if listed(id) {
                    self.top_miners[id.get() - 1]
                } else {
                    each
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::peer::PeerId;

    use super::HashPowerTable;

    fn ids(n: usize) -> Vec<PeerId> {
        (1..=n).map(PeerId::from).collect()
    }

    #[test]
    fn remaining_power_is_spread_evenly() {
        let table = HashPowerTable::new([0.6, 0.3]).unwrap();
        let weights = table.weights(&ids(4)).unwrap();

        assert_eq!(weights[..2], [0.6, 0.3]);
        assert!((weights[2] - 0.05).abs() < 1e-12);
        assert!((weights[3] - 0.05).abs() < 1e-12);
    }

    #[test]
    fn empty_table_is_uniform() {
        let weights = HashPowerTable::default().weights(&ids(4)).unwrap();

        assert_eq!(weights, vec![0.25; 4]);
    }

    #[test]
    fn rejects_invalid_tables() {
        assert!(HashPowerTable::new([0.7, 0.4]).is_err());
        assert!(HashPowerTable::new([-0.1]).is_err());
        assert!(HashPowerTable::new([f64::NAN]).is_err());
        assert!(HashPowerTable::new([0.5, 0.5]).is_ok());
    }

    #[test]
    fn parse_percentages_with_header() {
        let file = "hashrates\n25.5\n\n10\n";
        let table = HashPowerTable::parse_percentages(file).unwrap();

        assert_eq!(table.len(), 2);
        assert!((table.total() - 0.355).abs() < 1e-12);
        assert!(HashPowerTable::parse_percentages("hashrates\nabc\n").is_err());
    }

    #[test]
    fn too_many_miners_for_network() {
        let table = HashPowerTable::new([0.2, 0.2, 0.2]).unwrap();

        assert!(table.weights(&ids(2)).is_err());
    }
}
