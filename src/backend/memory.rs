// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

use std::collections::BTreeMap;

use super::{decode_fqs, Backend, PutHdl};
use crate::{
    codec,
    error::{ErrorKind, Result},
    filter::Filter,
    journal::{Qid, SchedState},
    merkle::{HashKey, Vertex, KEY_LEN},
    vid::{VertexId, VidGen},
};

/// Blob store over in-process maps. The reference driver: everything a
/// persistent driver must do, minus the disk.
#[derive(Debug, Default)]
pub struct MemBackend {
    vtx: BTreeMap<u64, Vec<u8>>,
    key: BTreeMap<u64, Vec<u8>>,
    idg: Option<Vec<u8>>,
    fil: BTreeMap<Qid, Vec<u8>>,
    fqs: Option<Vec<u8>>,
    read_only: bool,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }
}

fn key_from_blob(blob: &[u8]) -> Result<HashKey> {
    match blob.len() {
        KEY_LEN => Ok(HashKey::Hash(blob.try_into().expect("32 bytes"))),
        n if n > 0 && n < KEY_LEN => Ok(HashKey::Rlp(blob.to_vec())),
        _ => Err(ErrorKind::CodecSizeGarbled.into()),
    }
}

impl Backend for MemBackend {
    fn get_vtx(&self, vid: VertexId) -> Result<Option<Vertex>> {
        match self.vtx.get(&vid.0) {
            None => Ok(None),
            Some(blob) => codec::decode_vtx(blob).map(Some),
        }
    }

    fn get_key(&self, vid: VertexId) -> Result<HashKey> {
        match self.key.get(&vid.0) {
            None => Ok(HashKey::Empty),
            Some(blob) => key_from_blob(blob),
        }
    }

    fn get_idg(&self) -> Result<VidGen> {
        match &self.idg {
            None => Ok(VidGen::new()),
            Some(blob) => codec::decode_vgen(blob),
        }
    }

    fn get_fil(&self, qid: Qid) -> Result<Option<Filter>> {
        match self.fil.get(&qid) {
            None => Ok(None),
            Some(blob) => codec::decode_filter(blob).map(Some),
        }
    }

    fn get_fqs(&self) -> Result<Option<SchedState>> {
        match &self.fqs {
            None => Ok(None),
            Some(blob) => decode_fqs(blob).map(Some),
        }
    }

    fn put_beg(&self) -> Result<PutHdl> {
        Ok(PutHdl::default())
    }

    fn put_end(&mut self, hdl: PutHdl) -> Result<()> {
        if self.read_only {
            return Err(ErrorKind::BackendReadOnly.into());
        }
        for (vid, blob) in hdl.vtx {
            match blob {
                Some(blob) => {
                    self.vtx.insert(vid, blob);
                }
                None => {
                    self.vtx.remove(&vid);
                }
            }
        }
        for (vid, blob) in hdl.key {
            match blob {
                Some(blob) => {
                    self.key.insert(vid, blob);
                }
                None => {
                    self.key.remove(&vid);
                }
            }
        }
        if let Some(blob) = hdl.idg {
            self.idg = Some(blob);
        }
        for (qid, blob) in hdl.fil {
            match blob {
                Some(blob) => {
                    self.fil.insert(qid, blob);
                }
                None => {
                    self.fil.remove(&qid);
                }
            }
        }
        if let Some(blob) = hdl.fqs {
            self.fqs = Some(blob);
        }
        Ok(())
    }

    fn walk_vtx(&self) -> Box<dyn Iterator<Item = (VertexId, Vertex)> + '_> {
        Box::new(self.vtx.iter().filter_map(|(vid, blob)| {
            codec::decode_vtx(blob).ok().map(|vtx| (VertexId(*vid), vtx))
        }))
    }

    fn walk_key(&self) -> Box<dyn Iterator<Item = (VertexId, HashKey)> + '_> {
        Box::new(self.key.iter().filter_map(|(vid, blob)| {
            key_from_blob(blob).ok().map(|key| (VertexId(*vid), key))
        }))
    }

    fn walk_fil(&self) -> Box<dyn Iterator<Item = (Qid, Filter)> + '_> {
        Box::new(self.fil.iter().filter_map(|(qid, blob)| {
            codec::decode_filter(blob).ok().map(|fil| (*qid, fil))
        }))
    }
}

/// Driver stand-in for descriptors running without persistence: reads
/// come up empty and any attempt to open a write batch is refused.
#[derive(Debug, Default)]
pub struct VoidBackend;

impl Backend for VoidBackend {
    fn get_vtx(&self, _vid: VertexId) -> Result<Option<Vertex>> {
        Ok(None)
    }

    fn get_key(&self, _vid: VertexId) -> Result<HashKey> {
        Ok(HashKey::Empty)
    }

    fn get_idg(&self) -> Result<VidGen> {
        Ok(VidGen::new())
    }

    fn get_fil(&self, _qid: Qid) -> Result<Option<Filter>> {
        Ok(None)
    }

    fn get_fqs(&self) -> Result<Option<SchedState>> {
        Ok(None)
    }

    fn put_beg(&self) -> Result<PutHdl> {
        Err(ErrorKind::BackendMissing.into())
    }

    fn put_end(&mut self, _hdl: PutHdl) -> Result<()> {
        Err(ErrorKind::BackendMissing.into())
    }

    fn walk_vtx(&self) -> Box<dyn Iterator<Item = (VertexId, Vertex)> + '_> {
        Box::new(std::iter::empty())
    }

    fn walk_key(&self) -> Box<dyn Iterator<Item = (VertexId, HashKey)> + '_> {
        Box::new(std::iter::empty())
    }

    fn walk_fil(&self) -> Box<dyn Iterator<Item = (Qid, Filter)> + '_> {
        Box::new(std::iter::empty())
    }
}
