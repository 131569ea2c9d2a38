// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

//! Cascaded FIFO of reverse filters. New entries land in the head tier;
//! tiers overflow downwards, composing runs of entries into single
//! filters on the way, and the tail tier ages out. Together with the
//! backend's filter namespace this is what lets a descriptor step the
//! committed state backwards.

use serde::{Deserialize, Serialize};

use crate::{
    backend::Backend,
    error::{ErrorKind, Result},
    filter::Filter,
    logger::trace,
};

/// Journal slot address: tier in the top byte, slot counter below.
pub type Qid = u64;

/// Monotonic identity of a journal entry. Composed entries keep the id
/// of their oldest member.
pub type FilterId = u64;

fn make_qid(tier: usize, slot: u64) -> Qid {
    ((tier as u64 + 1) << 56) | slot
}

/// Per-tier tuning: how many entries leave on overflow (`width`), how
/// many of those compose into one (`dilution`, zero keeps them intact),
/// and how many entries the tier holds (`capacity`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierCfg {
    pub width: usize,
    pub dilution: usize,
    pub capacity: usize,
}

impl TierCfg {
    pub const fn new(width: usize, dilution: usize, capacity: usize) -> Self {
        Self {
            width,
            dilution,
            capacity,
        }
    }
}

pub const DEFAULT_LAYOUT: [TierCfg; 4] = [
    TierCfg::new(4, 0, 10),
    TierCfg::new(3, 3, 10),
    TierCfg::new(3, 4, 10),
    TierCfg::new(3, 5, 10),
];

/// Persisted scheduler bookkeeping: entry order per tier (newest first)
/// and the counters for fresh ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedState {
    pub tiers: Vec<Vec<(Qid, FilterId)>>,
    pub next_fid: FilterId,
    pub next_slot: Vec<u64>,
}

impl SchedState {
    fn sized(mut self, ntiers: usize) -> Self {
        self.tiers.resize(ntiers, Vec::new());
        self.next_slot.resize(ntiers, 0);
        if self.next_fid == 0 {
            self.next_fid = 1;
        }
        self
    }
}

/// The staged outcome of a scheduler mutation: filter puts/deletes for
/// the backend batch plus the successor state. Nothing takes effect
/// until the batch commits and [`Journal::apply`] installs the state.
#[derive(Debug)]
pub struct JournalPlan {
    pub puts: Vec<(Qid, Option<Filter>)>,
    pub state: SchedState,
}

#[derive(Debug)]
pub struct Journal {
    layout: Vec<TierCfg>,
    state: SchedState,
}

impl Journal {
    pub fn new(layout: Vec<TierCfg>) -> Self {
        let state = SchedState::default().sized(layout.len());
        Self { layout, state }
    }

    pub fn from_state(layout: Vec<TierCfg>, state: SchedState) -> Self {
        let state = state.sized(layout.len());
        Self { layout, state }
    }

    pub fn state(&self) -> &SchedState {
        &self.state
    }

    pub fn len(&self) -> usize {
        self.state.tiers.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries, newest first.
    pub fn entries(&self) -> impl Iterator<Item = (Qid, FilterId)> + '_ {
        self.state.tiers.iter().flatten().copied()
    }

    fn load(puts: &[(Qid, Option<Filter>)], be: &dyn Backend, qid: Qid) -> Result<Filter> {
        // a plan may consume entries it staged itself
        for (q, fil) in puts.iter().rev() {
            if *q == qid {
                return fil.clone().ok_or_else(|| ErrorKind::FilQidMissing.into());
            }
        }
        be.get_fil(qid)?.ok_or_else(|| ErrorKind::FilQidMissing.into())
    }

    /// The `back`-th entry counted from the newest.
    pub fn fetch(&self, back: usize, be: &dyn Backend) -> Result<(FilterId, Filter)> {
        let (qid, fid) = self
            .entries()
            .nth(back)
            .ok_or(ErrorKind::FilBackStepsExpected)?;
        let fil = be.get_fil(qid)?.ok_or(ErrorKind::FilQidMissing)?;
        Ok((fid, fil))
    }

    /// The entry with the given id, or with `earlier_ok` the nearest
    /// predecessor.
    pub fn lookup(
        &self,
        fid: FilterId,
        earlier_ok: bool,
        be: &dyn Backend,
    ) -> Result<(FilterId, Filter)> {
        for (qid, have) in self.entries() {
            if have == fid || (earlier_ok && have < fid) {
                let fil = be.get_fil(qid)?.ok_or(ErrorKind::FilQidMissing)?;
                return Ok((have, fil));
            }
        }
        Err(ErrorKind::FilFilterNotFound.into())
    }

    /// Stage a new head entry and any cascading compactions.
    pub fn plan_store(
        &self,
        fil: Filter,
        next_fid: Option<FilterId>,
        be: &dyn Backend,
    ) -> Result<JournalPlan> {
        let mut st = self.state.clone();
        let mut puts: Vec<(Qid, Option<Filter>)> = Vec::new();

        let fid = next_fid.unwrap_or(st.next_fid);
        let qid = make_qid(0, st.next_slot[0]);
        st.next_slot[0] += 1;
        st.next_fid = fid + 1;
        st.tiers[0].insert(0, (qid, fid));
        puts.push((qid, Some(fil)));

        for t in 0..self.layout.len() {
            let cfg = self.layout[t];
            while st.tiers[t].len() > cfg.capacity {
                let tier_len = st.tiers[t].len();
                let width = cfg.width.max(1).min(tier_len);
                let evicted: Vec<(Qid, FilterId)> = st.tiers[t].split_off(tier_len - width);
                if t + 1 == self.layout.len() {
                    trace!("journal: {} entries age out", evicted.len());
                    for (q, _) in &evicted {
                        puts.push((*q, None));
                    }
                    continue;
                }
                // compose before the eviction markers land in `puts`, so
                // entries staged earlier in this very plan still resolve
                let group_len = if cfg.dilution == 0 { 1 } else { cfg.dilution };
                let mut refiled = Vec::new();
                for group in evicted.chunks(group_len) {
                    let mut acc = Self::load(&puts, be, group[0].0)?;
                    for (q, _) in &group[1..] {
                        let older = Self::load(&puts, be, *q)?;
                        acc = Filter::merge(acc, older)?;
                    }
                    refiled.push((group[group.len() - 1].1, acc));
                }
                for (q, _) in &evicted {
                    puts.push((*q, None));
                }
                // evicted runs newest to oldest; refile oldest group
                // first so the tier below stays newest-first
                for (gfid, acc) in refiled.into_iter().rev() {
                    let nq = make_qid(t + 1, st.next_slot[t + 1]);
                    st.next_slot[t + 1] += 1;
                    st.tiers[t + 1].insert(0, (nq, gfid));
                    puts.push((nq, Some(acc)));
                }
            }
        }
        Ok(JournalPlan { puts, state: st })
    }

    /// Stage removal of the `n` newest entries.
    pub fn plan_delete(&self, n: usize) -> Result<JournalPlan> {
        if n > self.len() {
            return Err(ErrorKind::FilBackStepsExpected.into());
        }
        let mut st = self.state.clone();
        let mut puts = Vec::with_capacity(n);
        let mut left = n;
        for tier in st.tiers.iter_mut() {
            while left > 0 && !tier.is_empty() {
                let (qid, _) = tier.remove(0);
                puts.push((qid, None));
                left -= 1;
            }
        }
        Ok(JournalPlan { puts, state: st })
    }

    /// Install a plan after its batch committed.
    pub fn apply(&mut self, plan: JournalPlan) {
        self.state = plan.state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, MemBackend};
    use crate::merkle::HashKey;

    // chained dummy filters so compaction merges are well formed
    fn fil(n: u8) -> Filter {
        Filter {
            src: HashKey::Hash([n; 32]),
            trg: HashKey::Hash([n + 1; 32]),
            ..Default::default()
        }
    }

    fn store(journal: &mut Journal, be: &mut MemBackend, fil: Filter) {
        let plan = journal.plan_store(fil, None, be).unwrap();
        let mut hdl = be.put_beg().unwrap();
        hdl.put_fil(&plan.puts).unwrap();
        hdl.put_fqs(&plan.state).unwrap();
        be.put_end(hdl).unwrap();
        journal.apply(plan);
    }

    #[test]
    fn store_then_fetch_round_trips() {
        let mut be = MemBackend::new();
        let mut journal = Journal::new(DEFAULT_LAYOUT.to_vec());
        store(&mut journal, &mut be, fil(3));
        store(&mut journal, &mut be, fil(2));

        let (fid, got) = journal.fetch(0, &be).unwrap();
        assert_eq!(fid, 2);
        assert_eq!(got, fil(2));
        let (fid, got) = journal.fetch(1, &be).unwrap();
        assert_eq!(fid, 1);
        assert_eq!(got, fil(3));
        assert_eq!(
            journal.fetch(2, &be).unwrap_err().kind,
            ErrorKind::FilBackStepsExpected
        );
    }

    #[test]
    fn lookup_exact_and_predecessor() {
        let mut be = MemBackend::new();
        let mut journal = Journal::new(DEFAULT_LAYOUT.to_vec());
        for n in [5u8, 4, 3] {
            store(&mut journal, &mut be, fil(n));
        }
        assert_eq!(journal.lookup(2, false, &be).unwrap().0, 2);
        assert_eq!(
            journal.lookup(9, false, &be).unwrap_err().kind,
            ErrorKind::FilFilterNotFound
        );
        // nearest predecessor of a missing id
        let plan = journal.plan_delete(1).unwrap();
        let mut hdl = be.put_beg().unwrap();
        hdl.put_fil(&plan.puts).unwrap();
        be.put_end(hdl).unwrap();
        journal.apply(plan);
        assert_eq!(journal.lookup(3, true, &be).unwrap().0, 2);
    }

    #[test]
    fn head_tier_overflow_cascades() {
        let mut be = MemBackend::new();
        let layout = vec![TierCfg::new(2, 2, 3), TierCfg::new(2, 2, 3)];
        let mut journal = Journal::new(layout);
        // chain 1..=6 so every adjacent pair merges cleanly
        for n in (1..=6u8).rev() {
            store(&mut journal, &mut be, fil(n));
        }
        assert_eq!(journal.state().tiers[0].len(), 2);
        assert_eq!(journal.state().tiers[1].len(), 2);
        // tier-1 entries are pairwise compositions
        let (qid, _) = journal.state().tiers[1][0];
        let merged = be.get_fil(qid).unwrap().unwrap();
        assert_eq!(merged.src, fil(3).src);
        assert_eq!(merged.trg, fil(4).trg);
    }

    #[test]
    fn tail_tier_ages_out() {
        let mut be = MemBackend::new();
        let mut journal = Journal::new(vec![TierCfg::new(1, 0, 2)]);
        for n in (1..=5u8).rev() {
            store(&mut journal, &mut be, fil(n));
        }
        assert_eq!(journal.len(), 2);
        // evicted blobs are gone from the backend
        assert_eq!(be.walk_fil().count(), 2);
    }
}
