// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

//! Consistency sweep over a backend: every vertex carries a key, every
//! stored key re-derives from its vertex, and the generator state names
//! exactly the unallocated ids.

use crate::{
    backend::Backend,
    db::Db,
    error::{ErrorKind, Result},
    merkle::{vtx_preimage, HashKey},
    vid::{VertexId, LEAST_FREE_VID, ROOT_VID},
};

/// Check the backend a descriptor reads through.
pub fn check_be(db: &Db) -> Result<()> {
    check_backend(db.shared.borrow().backend.as_ref())
}

pub fn check_backend(be: &dyn Backend) -> Result<()> {
    for (vid, vtx) in be.walk_vtx() {
        let stored = be.get_key(vid)?;
        if stored.is_empty() {
            return Err(ErrorKind::CheckBeKeyMissing.at(vid));
        }
        let pre = vtx_preimage(&vtx, &mut |child| be.get_key(child))
            .map_err(|err| ErrorKind::CheckBeKeyMissing.at(err.ctx))?;
        if HashKey::from_encoded(pre) != stored {
            return Err(ErrorKind::CheckBeKeyMismatch.at(vid));
        }
    }

    let v_gen = be.get_idg()?;
    // every stored id is accounted for as allocated
    for (vid, _) in be.walk_vtx() {
        if vid != ROOT_VID && !v_gen.is_allocated(vid) {
            return Err(ErrorKind::CheckBeVGenGarbled.at(vid));
        }
    }
    // and every allocated id is actually stored
    if let Some((sentinel, _)) = v_gen.as_slice().split_last() {
        for raw in LEAST_FREE_VID..sentinel.0 {
            let vid = VertexId(raw);
            if v_gen.is_allocated(vid) && be.get_vtx(vid)?.is_none() {
                return Err(ErrorKind::CheckBeVGenGarbled.at(vid));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemBackend;
    use crate::merkle::{Payload, Vertex, KEY_LEN};
    use crate::nibbles::NibblePath;
    use crate::vid::VidGen;

    fn leaf(pfx: Vec<u8>, data: Vec<u8>) -> Vertex {
        Vertex::Leaf {
            pfx: NibblePath::new(pfx),
            payload: Payload::Raw(data),
        }
    }

    #[test]
    fn missing_key_is_flagged() {
        let mut be = MemBackend::new();
        let mut hdl = be.put_beg().unwrap();
        hdl.put_vtx(&[(VertexId(2), Some(leaf(vec![1], vec![9])))]).unwrap();
        hdl.put_idg(&VidGen::from_free(vec![VertexId(3)]));
        be.put_end(hdl).unwrap();
        assert_eq!(
            check_backend(&be).unwrap_err().kind,
            ErrorKind::CheckBeKeyMissing
        );
    }

    #[test]
    fn wrong_key_is_flagged() {
        let mut be = MemBackend::new();
        let mut hdl = be.put_beg().unwrap();
        hdl.put_vtx(&[(VertexId(2), Some(leaf(vec![1], vec![9])))]).unwrap();
        hdl.put_key(&[(VertexId(2), HashKey::Hash([0xee; KEY_LEN]))]);
        hdl.put_idg(&VidGen::from_free(vec![VertexId(3)]));
        be.put_end(hdl).unwrap();
        assert_eq!(
            check_backend(&be).unwrap_err().kind,
            ErrorKind::CheckBeKeyMismatch
        );
    }

    #[test]
    fn generator_must_cover_exactly_the_free_ids() {
        let vtx = leaf(vec![1], vec![9]);
        let pre = vtx_preimage(&vtx, &mut |_| Ok(HashKey::Empty)).unwrap();
        let key = HashKey::from_encoded(pre);

        // stored id listed as free
        let mut be = MemBackend::new();
        let mut hdl = be.put_beg().unwrap();
        hdl.put_vtx(&[(VertexId(2), Some(vtx.clone()))]).unwrap();
        hdl.put_key(&[(VertexId(2), key.clone())]);
        hdl.put_idg(&VidGen::from_free(vec![VertexId(2)]));
        be.put_end(hdl).unwrap();
        assert_eq!(
            check_backend(&be).unwrap_err().kind,
            ErrorKind::CheckBeVGenGarbled
        );

        // allocated id with nothing stored
        let mut be = MemBackend::new();
        let mut hdl = be.put_beg().unwrap();
        hdl.put_vtx(&[(VertexId(2), Some(vtx))]).unwrap();
        hdl.put_key(&[(VertexId(2), key)]);
        hdl.put_idg(&VidGen::from_free(vec![VertexId(4)]));
        be.put_end(hdl).unwrap();
        assert_eq!(
            check_backend(&be).unwrap_err().kind,
            ErrorKind::CheckBeVGenGarbled
        );
    }
}
