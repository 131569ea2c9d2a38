// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

//! Bottom-up Merkle key recomputation. Only vertices whose key entry
//! reads `Empty` get re-encoded; everything else keeps the key found in
//! the stack, the read-only filter or the backend. Encodings shorter
//! than a hash are stored embedded, the way child references appear
//! inside their parent's RLP.

use std::collections::HashSet;

use rlp::RlpStream;

use crate::{
    db::Db,
    error::{ErrorKind, Result},
    merkle::{HashKey, Payload, Vertex, EMPTY_ROOT_HASH, KEY_LEN},
    vid::{VertexId, ROOT_VID},
};

/// RLP preimage of a vertex, child references resolved through
/// `resolve`. A structural child without a key is unresolvable; an
/// absent storage sub-trie hashes as the empty root.
pub(crate) fn vtx_preimage(
    vtx: &Vertex,
    resolve: &mut dyn FnMut(VertexId) -> Result<HashKey>,
) -> Result<Vec<u8>> {
    fn append_child(s: &mut RlpStream, vid: VertexId, key: HashKey) -> Result<()> {
        match key {
            HashKey::Hash(h) => {
                s.append(&h.to_vec());
            }
            HashKey::Rlp(blob) => {
                s.append_raw(&blob, 1);
            }
            HashKey::Empty => return Err(ErrorKind::HashifyVtxUnresolved.at(vid)),
        }
        Ok(())
    }

    match vtx {
        Vertex::Leaf { pfx, payload } => {
            let value = match payload {
                Payload::Raw(data) | Payload::Storage(data) => data.clone(),
                Payload::Account(acc) => {
                    let storage_root = match acc.storage_root {
                        None => EMPTY_ROOT_HASH,
                        Some(sid) => resolve(sid)?.root_bytes(),
                    };
                    let mut s = RlpStream::new_list(4);
                    s.append(&acc.nonce);
                    s.append(&acc.balance);
                    s.append(&storage_root.to_vec());
                    s.append(&acc.code_hash.to_vec());
                    s.out().to_vec()
                }
            };
            let mut s = RlpStream::new_list(2);
            s.append(&pfx.encode(true));
            s.append(&value);
            Ok(s.out().to_vec())
        }
        Vertex::Extension { pfx, child } => {
            let key = resolve(*child)?;
            let mut s = RlpStream::new_list(2);
            s.append(&pfx.encode(false));
            append_child(&mut s, *child, key)?;
            Ok(s.out().to_vec())
        }
        Vertex::Branch { children } => {
            let mut s = RlpStream::new_list(17);
            for slot in children {
                match slot {
                    None => {
                        s.append_empty_data();
                    }
                    Some(vid) => {
                        let key = resolve(*vid)?;
                        append_child(&mut s, *vid, key)?;
                    }
                }
            }
            s.append_empty_data();
            Ok(s.out().to_vec())
        }
    }
}

impl Db {
    /// Bring the key table back into agreement with the vertex table
    /// and return the state root key. Clears the dirty set on success.
    pub fn hashify(&mut self) -> Result<HashKey> {
        let root_key = match self.read_vtx(ROOT_VID)? {
            None => HashKey::Hash(EMPTY_ROOT_HASH),
            Some(root_vtx) => {
                let mut visiting = HashSet::new();
                let registered = self.read_key(ROOT_VID)?;
                if self.is_locked(ROOT_VID) && !registered.is_empty() {
                    // proof mode: the imported root key must agree with
                    // what the vertices hash to
                    let pre = vtx_preimage(&root_vtx, &mut |vid| {
                        self.resolve_key(vid, &mut visiting)
                    })?;
                    let computed = HashKey::from_encoded(pre);
                    if computed.root_bytes() != registered.root_bytes() {
                        return Err(ErrorKind::HashifyProofHashMismatch.at(ROOT_VID));
                    }
                    registered
                } else {
                    self.resolve_key(ROOT_VID, &mut visiting)?
                }
            }
        };
        self.top.fin.dirty.clear();
        Ok(root_key)
    }

    /// The root key in its 32-byte state-root form.
    pub fn root_hash(&mut self) -> Result<[u8; KEY_LEN]> {
        Ok(self.hashify()?.root_bytes())
    }

    /// Key of `vid`, recomputing through the dirty region. Missing
    /// vertices read as `Empty`, which only an absent storage sub-trie
    /// may get away with.
    fn resolve_key(
        &mut self,
        vid: VertexId,
        visiting: &mut HashSet<VertexId>,
    ) -> Result<HashKey> {
        let key = self.read_key(vid)?;
        if !key.is_empty() {
            return Ok(key);
        }
        let Some(vtx) = self.read_vtx(vid)? else {
            return Ok(HashKey::Empty);
        };
        if !visiting.insert(vid) {
            return Err(ErrorKind::HashifyVtxUnresolved.at(vid));
        }
        let pre = vtx_preimage(&vtx, &mut |child| self.resolve_key(child, visiting))?;
        visiting.remove(&vid);
        let key = HashKey::from_encoded(pre);
        self.top.delta.key.insert(vid, key.clone());
        Ok(key)
    }
}
