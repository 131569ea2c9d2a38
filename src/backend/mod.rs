// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

//! Driver contract between the engine and whatever holds the bytes.
//!
//! Readers are keyed by vertex id (vertex and key namespaces), a single
//! slot each for the generator and scheduler state, and queue id for
//! journal filters. Writes only happen through a staged batch: stage
//! everything on a [`PutHdl`], then commit it atomically with
//! [`Backend::put_end`].

use bincode::Options as _;

use crate::{
    codec,
    error::{ErrorKind, Result},
    filter::Filter,
    journal::{Qid, SchedState},
    merkle::{HashKey, Vertex},
    vid::{VertexId, VidGen},
};

mod memory;
pub use memory::{MemBackend, VoidBackend};

/// Namespaced blob writes staged for one atomic commit.
#[derive(Debug, Default)]
pub struct PutHdl {
    pub(crate) vtx: Vec<(u64, Option<Vec<u8>>)>,
    pub(crate) key: Vec<(u64, Option<Vec<u8>>)>,
    pub(crate) idg: Option<Vec<u8>>,
    pub(crate) fil: Vec<(Qid, Option<Vec<u8>>)>,
    pub(crate) fqs: Option<Vec<u8>>,
}

impl PutHdl {
    pub fn put_vtx(&mut self, items: &[(VertexId, Option<Vertex>)]) -> Result<()> {
        for (vid, vtx) in items {
            let blob = match vtx {
                Some(vtx) => Some(codec::encode_vtx(vtx)?),
                None => None,
            };
            self.vtx.push((vid.0, blob));
        }
        Ok(())
    }

    pub fn put_key(&mut self, items: &[(VertexId, HashKey)]) {
        for (vid, key) in items {
            let blob = match key {
                HashKey::Empty => None,
                HashKey::Hash(h) => Some(h.to_vec()),
                HashKey::Rlp(blob) => Some(blob.clone()),
            };
            self.key.push((vid.0, blob));
        }
    }

    pub fn put_idg(&mut self, v_gen: &VidGen) {
        self.idg = Some(codec::encode_vgen(v_gen));
    }

    pub fn put_fil(&mut self, items: &[(Qid, Option<Filter>)]) -> Result<()> {
        for (qid, fil) in items {
            let blob = match fil {
                Some(fil) => Some(codec::encode_filter(fil)?),
                None => None,
            };
            self.fil.push((*qid, blob));
        }
        Ok(())
    }

    pub fn put_fqs(&mut self, state: &SchedState) -> Result<()> {
        let blob = bincode::DefaultOptions::new()
            .serialize(state)
            .map_err(|_| ErrorKind::CodecSizeGarbled)?;
        self.fqs = Some(blob);
        Ok(())
    }
}

/// What the engine asks of a storage driver.
pub trait Backend {
    fn get_vtx(&self, vid: VertexId) -> Result<Option<Vertex>>;

    /// Missing keys read as `HashKey::Empty`.
    fn get_key(&self, vid: VertexId) -> Result<HashKey>;

    fn get_idg(&self) -> Result<VidGen>;

    fn get_fil(&self, qid: Qid) -> Result<Option<Filter>>;

    fn get_fqs(&self) -> Result<Option<SchedState>>;

    /// Open a write batch.
    fn put_beg(&self) -> Result<PutHdl>;

    /// Commit a staged batch atomically.
    fn put_end(&mut self, hdl: PutHdl) -> Result<()>;

    /// Id-ordered sweep over the vertex namespace.
    fn walk_vtx(&self) -> Box<dyn Iterator<Item = (VertexId, Vertex)> + '_>;

    /// Id-ordered sweep over the key namespace.
    fn walk_key(&self) -> Box<dyn Iterator<Item = (VertexId, HashKey)> + '_>;

    /// Queue-ordered sweep over the journal namespace.
    fn walk_fil(&self) -> Box<dyn Iterator<Item = (Qid, Filter)> + '_>;
}

pub(crate) fn decode_fqs(blob: &[u8]) -> Result<SchedState> {
    bincode::DefaultOptions::new()
        .deserialize(blob)
        .map_err(|_| ErrorKind::CodecSizeGarbled.into())
}
