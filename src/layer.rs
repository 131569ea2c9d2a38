// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

use std::collections::{HashMap, HashSet};

use crate::{
    merkle::{HashKey, Vertex},
    vid::{VertexId, VidGen},
};

/// Copy-on-write overrides recorded on top of the state below.
///
/// A `None` vertex entry marks a deletion; a `HashKey::Empty` key entry
/// marks a key that needs recomputation (or removal) rather than a
/// fall-through to older state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerDelta {
    pub vtx: HashMap<VertexId, Option<Vertex>>,
    pub key: HashMap<VertexId, HashKey>,
}

impl LayerDelta {
    pub fn is_empty(&self) -> bool {
        self.vtx.is_empty() && self.key.is_empty()
    }
}

/// Per-layer bookkeeping that does not override anything below.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerFinal {
    pub v_gen: VidGen,
    /// Ids pinned by a proof import; structural edits refuse to touch
    /// them.
    pub proof_locked: HashSet<VertexId>,
    /// Ids touched since the last hashify run.
    pub dirty: HashSet<VertexId>,
}

/// One copy-on-write view of the trie state. Layers stack while
/// transactions are open; reads walk the stack from the top down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layer {
    pub delta: LayerDelta,
    pub fin: LayerFinal,
    pub tx_uid: u64,
}

impl Layer {
    /// Fresh layer continuing from the given generator state.
    pub fn with_vgen(v_gen: VidGen) -> Self {
        Self {
            fin: LayerFinal {
                v_gen,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
