//! The schedule of block discoveries

use std::{
    collections::{BTreeSet, VecDeque},
    time::SystemTime,
};

use rand::Rng;
use rand_distr::{Distribution, Poisson};
use tracing::{debug, info};

use crate::block::SimTime;

/// Number of a scheduled block discovery, starting at 1.
pub type Cycle = u64;

/// Determines how many block discoveries are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// Schedule exactly this many discoveries.
    BlockDiscoveries(usize),
    /// Schedule discoveries until the simulated time reaches this duration.
    /// The discovery which crosses the duration is still scheduled.
    SimulationTime(SimTime),
}

impl Default for ScheduleMode {
    fn default() -> Self {
        Self::BlockDiscoveries(100)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("block time must be positive and finite, got {0}")]
    BadBlockTime(f64),
    #[error("schedule must contain at least one block discovery")]
    Empty,
    #[error("discovery of cycle {0} is scheduled before the previous one")]
    OutOfOrder(Cycle),
}

/// Ordered queue of `(cycle, time)` block discoveries, consumed front to back.
///
/// Besides the queue itself, the schedule tracks which cycles have yet to be
/// executed. A cycle stops being pending once its block has been mined or
/// once it has been turned into an uncle.
#[derive(Debug, Clone)]
pub struct BlockSchedule {
    queue: VecDeque<(Cycle, SimTime)>,
    cycles_to_be_executed: BTreeSet<Cycle>,
    started_at: SystemTime,
}

impl BlockSchedule {
    /// Draws a schedule in which the time between consecutive discoveries
    /// follows a Poisson distribution with mean `block_time` seconds.
    pub fn generate<R: Rng + ?Sized>(
        mode: ScheduleMode,
        block_time: f64,
        rng: &mut R,
    ) -> Result<Self, ScheduleError> {
        let poisson = block_time_distribution(block_time)?;
        let started_at = SystemTime::now();
        info!(?started_at, ?mode, block_time, "scheduling block discoveries");

        let draw = |rng: &mut R| SimTime::from_secs(poisson.sample(rng) as u64);
        let mut entries = vec![];
        let mut now = SimTime::ZERO;
        match mode {
            ScheduleMode::BlockDiscoveries(n) => {
                for cycle in 1..=n as Cycle {
                    let block_time = draw(rng);
                    now += block_time;
                    debug!(
                        cycle,
                        ?block_time,
                        at = ?now,
                        "scheduled block discovery"
                    );
                    entries.push((cycle, now));
                }
            }
            ScheduleMode::SimulationTime(duration) => {
                let mut cycle = 0;
                while now < duration {
                    let block_time = draw(rng);
                    now += block_time;
                    cycle += 1;
                    debug!(
                        cycle,
                        ?block_time,
                        at = ?now,
                        "scheduled block discovery"
                    );
                    entries.push((cycle, now));
                }
            }
        }

        let mut schedule = Self::from_entries(entries)?;
        schedule.started_at = started_at;
        info!(discoveries = schedule.len(), "block discoveries scheduled");

        Ok(schedule)
    }

    /// Creates a schedule from explicit `(cycle, time)` entries, which must be
    /// ordered by time.
    pub fn from_entries<I>(entries: I) -> Result<Self, ScheduleError>
    where
        I: IntoIterator<Item = (Cycle, SimTime)>,
    {
        let queue: VecDeque<_> = entries.into_iter().collect();
        if queue.is_empty() {
            return Err(ScheduleError::Empty);
        }
        if let Some((_, &(cycle, _))) = queue
            .iter()
            .zip(queue.iter().skip(1))
            .find(|(prev, next)| next.1 < prev.1)
        {
            return Err(ScheduleError::OutOfOrder(cycle));
        }

        let cycles_to_be_executed =
            queue.iter().map(|&(cycle, _)| cycle).collect();

        Ok(BlockSchedule {
            queue,
            cycles_to_be_executed,
            started_at: SystemTime::now(),
        })
    }

    /// Wall-clock time at which the schedule was created.
    #[inline]
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    #[inline]
    pub fn pop_front(&mut self) -> Option<(Cycle, SimTime)> {
        self.queue.pop_front()
    }

    #[inline]
    pub fn front(&self) -> Option<(Cycle, SimTime)> {
        self.queue.front().copied()
    }

    /// Number of discoveries left in the queue.
    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Iterates over the discoveries left in the queue.
    pub fn entries(&self) -> impl Iterator<Item = &(Cycle, SimTime)> {
        self.queue.iter()
    }

    #[inline]
    pub fn is_pending(&self, cycle: Cycle) -> bool {
        self.cycles_to_be_executed.contains(&cycle)
    }

    /// Marks `cycle` as executed. Returns false if it was not pending.
    #[inline]
    pub fn complete(&mut self, cycle: Cycle) -> bool {
        self.cycles_to_be_executed.remove(&cycle)
    }

    /// Number of cycles which have yet to be executed.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.cycles_to_be_executed.len()
    }
}

fn block_time_distribution(
    block_time: f64,
) -> Result<Poisson<f64>, ScheduleError> {
    if !block_time.is_finite() || block_time <= 0.0 {
        return Err(ScheduleError::BadBlockTime(block_time));
    }

    Poisson::new(block_time)
        .map_err(|_| ScheduleError::BadBlockTime(block_time))
}
