// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

use std::fmt;

/// Stable dense integer naming a trie vertex within the engine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VertexId(pub u64);

/// Name of the primary state root vertex.
pub const ROOT_VID: VertexId = VertexId(1);

/// Ids below this value are reserved and never pass through the arena.
pub const LEAST_FREE_VID: u64 = 2;

impl VertexId {
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "vid({})", self.0)
    }
}

impl From<u64> for VertexId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Allocator and recycler of vertex ids.
///
/// The state is a sequence of free ids. The last entry doubles as the
/// "next free" sentinel: it and every id above it are free. Entries in
/// front of it are explicitly free and get recycled first.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VidGen {
    free: Vec<VertexId>,
}

impl VidGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_free(free: Vec<VertexId>) -> Self {
        Self { free }
    }

    pub fn as_slice(&self) -> &[VertexId] {
        &self.free
    }

    /// Allocate an id, recycling explicitly freed ones first.
    pub fn fetch(&mut self) -> VertexId {
        match self.free.len() {
            0 => {
                self.free = vec![VertexId(LEAST_FREE_VID + 1)];
                VertexId(LEAST_FREE_VID)
            }
            1 => {
                let vid = self.free[0];
                self.free[0] = VertexId(vid.0 + 1);
                vid
            }
            n => self.free.remove(n - 2),
        }
    }

    /// Return an id to the free sequence, keeping the sentinel last.
    pub fn dispose(&mut self, vid: VertexId) {
        debug_assert!(vid.0 >= LEAST_FREE_VID);
        match self.free.len() {
            0 => self.free.push(vid),
            n => self.free.insert(n - 1, vid),
        }
    }

    /// True while `vid` is handed out: below the sentinel and not on the
    /// explicit free list.
    pub fn is_allocated(&self, vid: VertexId) -> bool {
        if vid.0 < LEAST_FREE_VID {
            return false;
        }
        match self.free.split_last() {
            None => false,
            Some((sentinel, explicit)) => vid < *sentinel && !explicit.contains(&vid),
        }
    }

    /// Compact into canonical form: explicit frees sorted ascending, the
    /// contiguous run just below the sentinel folded into it, and a
    /// sentinel left alone at `LEAST_FREE_VID` dropped entirely (so
    /// "never allocated" and "all freed again" encode identically).
    ///
    /// Required before a filter is persisted so the on-disk blob is
    /// canonical.
    pub fn reorg(&mut self) {
        if self.free.is_empty() {
            return;
        }
        self.free.sort_unstable();
        self.free.dedup();
        while self.free.len() >= 2 {
            let n = self.free.len();
            if self.free[n - 2].0 + 1 == self.free[n - 1].0 {
                self.free.pop();
            } else {
                break;
            }
        }
        if self.free == [VertexId(LEAST_FREE_VID)] {
            self.free.clear();
        }
    }

    /// Canonical generator of an empty trie.
    pub fn canonical_empty() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_counts_up_from_least_free() {
        let mut gen = VidGen::new();
        assert_eq!(gen.fetch(), VertexId(2));
        assert_eq!(gen.fetch(), VertexId(3));
        assert_eq!(gen.fetch(), VertexId(4));
        assert_eq!(gen.as_slice(), &[VertexId(5)]);
    }

    #[test]
    fn dispose_then_fetch_recycles() {
        let mut gen = VidGen::new();
        for _ in 0..4 {
            gen.fetch();
        }
        gen.dispose(VertexId(3));
        assert_eq!(gen.as_slice(), &[VertexId(3), VertexId(6)]);
        assert_eq!(gen.fetch(), VertexId(3));
        assert_eq!(gen.fetch(), VertexId(6));
        assert_eq!(gen.as_slice(), &[VertexId(7)]);
    }

    #[test]
    fn reorg_folds_contiguous_run() {
        // everything freed again reads exactly like never allocated
        let mut gen = VidGen::from_free(
            [4u64, 2, 3, 5].into_iter().map(VertexId).collect(),
        );
        gen.reorg();
        assert_eq!(gen, VidGen::canonical_empty());

        // the fold stops at the first gap below the sentinel
        let mut gen = VidGen::from_free(
            [7u64, 2, 6, 8].into_iter().map(VertexId).collect(),
        );
        gen.reorg();
        assert_eq!(gen.as_slice(), &[VertexId(2), VertexId(6)]);

        let mut gen = VidGen::from_free(vec![VertexId(5)]);
        gen.reorg();
        assert_eq!(gen.as_slice(), &[VertexId(5)]);
    }

    #[test]
    fn allocation_tracking() {
        let mut gen = VidGen::new();
        let a = gen.fetch();
        let b = gen.fetch();
        assert!(gen.is_allocated(a));
        assert!(gen.is_allocated(b));
        assert!(!gen.is_allocated(VertexId(9)));
        gen.dispose(a);
        assert!(!gen.is_allocated(a));
    }
}
