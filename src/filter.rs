// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

use std::collections::HashMap;

use crate::{
    backend::Backend,
    db::Db,
    error::{ErrorKind, Result},
    merkle::{HashKey, Vertex},
    vid::{VertexId, VidGen, ROOT_VID},
};

/// A reversible delta between two trie states.
///
/// Applying the filter to a backend sitting at state-root `src` yields
/// state-root `trg`: vertex and key entries override the backend's, a
/// `None` vertex (or `Empty` key) deletes, and `v_gen` replaces the
/// generator wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub src: HashKey,
    pub trg: HashKey,
    pub s_tab: HashMap<VertexId, Option<Vertex>>,
    pub k_map: HashMap<VertexId, HashKey>,
    pub v_gen: VidGen,
}

impl Filter {
    /// Compose two filters into one equivalent delta: `older` applied
    /// first, then `newer`. Fails with `FilTrgSrcMismatch` unless the
    /// states chain.
    pub fn merge(older: Filter, newer: Filter) -> Result<Filter> {
        if newer.src != older.trg {
            return Err(ErrorKind::FilTrgSrcMismatch.into());
        }
        let Filter {
            src,
            trg: _,
            mut s_tab,
            mut k_map,
            v_gen: _,
        } = older;
        // the newer override wins per id
        s_tab.extend(newer.s_tab);
        k_map.extend(newer.k_map);
        Ok(Filter {
            src,
            trg: newer.trg,
            s_tab,
            k_map,
            v_gen: newer.v_gen,
        })
    }
}

impl Db {
    /// Forward delta of the top layer against the state visible below
    /// it (read-only filter, then backend). Returns `None` when nothing
    /// structural changed and the roots agree.
    pub(crate) fn fil_assemble(&mut self) -> Result<Option<Filter>> {
        let trg = HashKey::Hash(self.hashify()?.root_bytes());
        let src = HashKey::Hash(self.read_key_below(ROOT_VID)?.root_bytes());
        if self.top.delta.vtx.is_empty() && src == trg {
            return Ok(None);
        }
        let mut v_gen = self.top.fin.v_gen.clone();
        v_gen.reorg();
        Ok(Some(Filter {
            src,
            trg,
            s_tab: self.top.delta.vtx.clone(),
            k_map: self.top.delta.key.clone(),
            v_gen,
        }))
    }

    /// Inverse of `fil` relative to the backend's current contents:
    /// applying `fil` and then the result leaves the backend unchanged.
    pub(crate) fn fil_reverse(fil: &Filter, be: &dyn Backend) -> Result<Filter> {
        let mut s_tab = HashMap::with_capacity(fil.s_tab.len());
        for vid in fil.s_tab.keys() {
            s_tab.insert(*vid, be.get_vtx(*vid)?);
        }
        let mut k_map = HashMap::with_capacity(fil.k_map.len());
        for vid in fil.k_map.keys() {
            k_map.insert(*vid, be.get_key(*vid)?);
        }
        Ok(Filter {
            src: fil.trg.clone(),
            trg: fil.src.clone(),
            s_tab,
            k_map,
            v_gen: be.get_idg()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nibbles::NibblePath;
    use crate::merkle::Payload;

    fn leaf(n: u8) -> Option<Vertex> {
        Some(Vertex::Leaf {
            pfx: NibblePath::new(vec![n]),
            payload: Payload::Raw(vec![n]),
        })
    }

    #[test]
    fn merge_prefers_newer_entries() {
        let a = Filter {
            src: HashKey::Hash([1; 32]),
            trg: HashKey::Hash([2; 32]),
            s_tab: [(VertexId(2), leaf(1)), (VertexId(3), leaf(2))].into(),
            k_map: [(VertexId(2), HashKey::Hash([0xaa; 32]))].into(),
            v_gen: VidGen::from_free(vec![VertexId(4)]),
        };
        let b = Filter {
            src: HashKey::Hash([2; 32]),
            trg: HashKey::Hash([3; 32]),
            s_tab: [(VertexId(3), None)].into(),
            k_map: [(VertexId(3), HashKey::Empty)].into(),
            v_gen: VidGen::from_free(vec![VertexId(3)]),
        };
        let m = Filter::merge(a, b).unwrap();
        assert_eq!(m.src, HashKey::Hash([1; 32]));
        assert_eq!(m.trg, HashKey::Hash([3; 32]));
        assert_eq!(m.s_tab[&VertexId(2)], leaf(1));
        assert_eq!(m.s_tab[&VertexId(3)], None);
        assert_eq!(m.k_map[&VertexId(3)], HashKey::Empty);
        assert_eq!(m.v_gen, VidGen::from_free(vec![VertexId(3)]));
    }

    #[test]
    fn merge_rejects_broken_chain() {
        let a = Filter {
            trg: HashKey::Hash([2; 32]),
            ..Default::default()
        };
        let b = Filter {
            src: HashKey::Hash([9; 32]),
            ..Default::default()
        };
        assert_eq!(
            Filter::merge(a, b).unwrap_err().kind,
            ErrorKind::FilTrgSrcMismatch
        );
    }
}
