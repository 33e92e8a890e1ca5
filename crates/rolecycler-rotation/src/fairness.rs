//! Cycle queue that hands out the assigned status in batches.
//!
//! Within one cycle every eligible member is picked exactly once. Members who
//! leave the pool are dropped from the remaining order as soon as they are
//! seen missing; members who join only enter at the next reshuffle.

use std::collections::{BTreeSet, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;
use rolecycler_core::MemberId;
use serde::{Deserialize, Serialize};

/// Persisted queue state for one domain.
///
/// `order[cursor..]` are the members still to be visited this cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FairnessQueue {
    pub order: Vec<MemberId>,
    pub cursor: usize,
}

/// Outcome of [`FairnessQueue::next_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Members to grant, in selection order. Never contains duplicates.
    pub picked: Vec<MemberId>,
    /// Queue state to persist once the run commits.
    pub queue: FairnessQueue,
    /// How many members were asked for.
    pub requested: usize,
    /// Whether a fresh permutation was drawn during this batch.
    pub started_new_cycle: bool,
}

impl Batch {
    /// Fewer unique members were available than requested.
    pub fn is_under_filled(&self) -> bool {
        self.picked.len() < self.requested
    }
}

impl FairnessQueue {
    /// Members still waiting in the current cycle.
    pub fn remaining(&self) -> &[MemberId] {
        self.order.get(self.cursor..).unwrap_or(&[])
    }

    /// Remaining members in groups of `size`, i.e. the upcoming batches if
    /// the pool stays the same.
    pub fn upcoming_groups(&self, size: usize) -> Vec<Vec<MemberId>> {
        self.remaining()
            .chunks(size.max(1))
            .map(|c| c.to_vec())
            .collect()
    }

    /// Choose the next `want` members from `pool`.
    ///
    /// Does not mutate `self`; the new state is returned in the [`Batch`] so
    /// the caller decides when it is committed.
    pub fn next_batch<R: Rng + ?Sized>(
        &self,
        pool: &BTreeSet<MemberId>,
        want: usize,
        rng: &mut R,
    ) -> Batch {
        // Whatever is left of this cycle, minus members who left the pool.
        let mut seen = HashSet::new();
        let carry: Vec<MemberId> = self
            .remaining()
            .iter()
            .copied()
            .filter(|id| pool.contains(id) && seen.insert(*id))
            .collect();

        let (working, mut started_new_cycle) = if carry.is_empty() {
            (shuffled(pool, rng), true)
        } else {
            (carry, false)
        };

        if working.len() >= want {
            return Batch {
                picked: working[..want].to_vec(),
                queue: FairnessQueue {
                    order: working,
                    cursor: want,
                },
                requested: want,
                started_new_cycle,
            };
        }

        // Top-up: take the tail of this cycle, then start the next one
        // without the members just served from that tail.
        let tail = working;
        let tail_set: HashSet<MemberId> = tail.iter().copied().collect();
        let mut fresh: Vec<MemberId> = shuffled(pool, rng)
            .into_iter()
            .filter(|id| !tail_set.contains(id))
            .collect();

        let take = (want - tail.len()).min(fresh.len());
        let mut picked = tail;
        picked.extend(fresh.drain(..take));
        started_new_cycle = true;

        Batch {
            picked,
            queue: FairnessQueue {
                order: fresh,
                cursor: 0,
            },
            requested: want,
            started_new_cycle,
        }
    }
}

fn shuffled<R: Rng + ?Sized>(pool: &BTreeSet<MemberId>, rng: &mut R) -> Vec<MemberId> {
    // BTreeSet iteration is sorted, so a seeded rng gives a reproducible order.
    let mut ids: Vec<MemberId> = pool.iter().copied().collect();
    ids.shuffle(rng);
    ids
}
