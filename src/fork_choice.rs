//! Rules for choosing which block a miner extends.

use std::{fmt::Display, str::FromStr, sync::Arc};

use crate::{block::Block, ledger::Ledger};

/// Determines which block of a [`Ledger`] a newly mined block extends.
///
/// Ties are always broken in favor of the block which was appended to the
/// ledger first.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ForkChoice {
    /// Greedy Heaviest Observed Subtree: starting from the genesis block,
    /// repeatedly step to the child with the most blocks in its subtree.
    #[default]
    Ghost,
    /// Extend the deepest block of the ledger.
    LongestChain,
}

#[derive(Debug, thiserror::Error)]
#[error(
    "unknown fork choice rule {0:?}, expected 'ghost' or 'longest_chain_rule'"
)]
pub struct ParseForkChoiceError(String);

impl ForkChoice {
    /// Returns the block of `ledger` which should be extended by the next
    /// block mined on it.
    pub fn choose<'a>(&self, ledger: &'a Ledger) -> &'a Arc<Block> {
        match &self {
            Self::LongestChain => ledger.canonical_tip(),
            Self::Ghost => {
                let sizes = ledger.subtree_sizes();

                let mut curr = Ledger::GENESIS;
                loop {
                    // `max_by_key` keeps the last maximum, so iterate in
                    // reverse to favor the earliest child
                    let heaviest = ledger
                        .node(curr)
                        .children
                        .iter()
                        .rev()
                        .max_by_key(|&&child| sizes[child]);

                    match heaviest {
                        Some(&child) => curr = child,
                        None => return &ledger.node(curr).block,
                    }
                }
            }
        }
    }
}

impl FromStr for ForkChoice {
    type Err = ParseForkChoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ghost" => Ok(Self::Ghost),
            "longest_chain_rule" | "longest-chain" => Ok(Self::LongestChain),
            _ => Err(ParseForkChoiceError(s.to_string())),
        }
    }
}

impl Display for ForkChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ghost => write!(f, "ghost"),
            Self::LongestChain => write!(f, "longest_chain_rule"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::ledger::{tests::mine, Ledger};

    use super::ForkChoice;

    /// Builds a ledger where the longest chain (depth 3) hangs off a thin
    /// branch while a shallower branch has more blocks overall.
    ///
    /// ```text
    /// genesis ─ a1 ─ a2 ─ a3
    ///         └ b1 ┬ b2
    ///              ├ c2
    ///              └ d2
    /// ```
    fn wide_and_deep() -> (Ledger, Vec<Arc<crate::block::Block>>) {
        let mut ledger = Ledger::new();
        let genesis = Arc::clone(ledger.genesis());
        let a1 = mine(&mut ledger, &genesis, 1);
        let a2 = mine(&mut ledger, &a1, 1);
        let a3 = mine(&mut ledger, &a2, 1);
        let b1 = mine(&mut ledger, &genesis, 2);
        let b2 = mine(&mut ledger, &b1, 2);
        let c2 = mine(&mut ledger, &b1, 3);
        let d2 = mine(&mut ledger, &b1, 4);

        (ledger, vec![a1, a2, a3, b1, b2, c2, d2])
    }

    #[test]
    fn longest_chain_extends_deepest() {
        let (ledger, blocks) = wide_and_deep();

        let tip = ForkChoice::LongestChain.choose(&ledger);
        assert_eq!(tip.label(), blocks[2].label());
    }

    #[test]
    fn ghost_extends_heaviest_subtree() {
        let (ledger, blocks) = wide_and_deep();

        // b1's subtree has 4 blocks against a1's 3; b2 is the first child
        let tip = ForkChoice::Ghost.choose(&ledger);
        assert_eq!(tip.label(), blocks[4].label());
    }

    #[test]
    fn ghost_breaks_ties_by_first_appended() {
        let mut ledger = Ledger::new();
        let genesis = Arc::clone(ledger.genesis());
        let first = mine(&mut ledger, &genesis, 7);
        mine(&mut ledger, &genesis, 3);

        assert_eq!(ForkChoice::Ghost.choose(&ledger).label(), first.label());
    }

    #[test]
    fn choice_is_deterministic() {
        let (ledger, _) = wide_and_deep();

        for rule in [ForkChoice::Ghost, ForkChoice::LongestChain] {
            let first = rule.choose(&ledger).label();
            for _ in 0..10 {
                assert_eq!(rule.choose(&ledger).label(), first);
            }
        }
    }

    #[test]
    fn genesis_only_ledger_extends_genesis() {
        let ledger = Ledger::new();

        for rule in [ForkChoice::Ghost, ForkChoice::LongestChain] {
            assert!(rule.choose(&ledger).is_genesis());
        }
    }

    #[test]
    fn parse_config_names() {
        assert_eq!("ghost".parse::<ForkChoice>().unwrap(), ForkChoice::Ghost);
        assert_eq!(
            "longest_chain_rule".parse::<ForkChoice>().unwrap(),
            ForkChoice::LongestChain
        );
        assert!("heaviest".parse::<ForkChoice>().is_err());
    }
}
