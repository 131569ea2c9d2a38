// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

//! Removing leaves and whole sub-tries. After a leaf goes, the shape is
//! re-canonicalised on the way up: a branch left with one edge turns
//! into (or merges with) an extension, and absorbed vertices give their
//! ids back to the generator.

use crate::{
    db::Db,
    error::{ErrorKind, Result},
    merkle::{hike::Hike, Payload, Vertex},
    vid::{VertexId, ROOT_VID},
};

impl Db {
    /// Remove the leaf stored under `path`. Deleting an account leaf
    /// also drops its storage sub-trie.
    pub fn delete(&mut self, root: VertexId, path: &[u8]) -> Result<()> {
        let nibbles = crate::nibbles::NibblePath::from_bytes(path);
        let hike = self
            .hike_up(root, &nibbles)
            .map_err(|fail| ErrorKind::DelPathNotFound.at(fail.hike.ctx()))?;
        let leaf = hike.last_leg().expect("successful hike ends in a leaf");
        let leaf_vid = leaf.vid;
        if self.is_locked(leaf_vid) {
            return Err(ErrorKind::DelLeafLocked.at(leaf_vid));
        }
        for leg in &hike.legs[..hike.legs.len() - 1] {
            if self.is_locked(leg.vid) {
                return Err(ErrorKind::DelBranchLocked.at(leg.vid));
            }
        }
        if let Vertex::Leaf {
            payload: Payload::Account(acc),
            ..
        } = &leaf.vtx
        {
            if let Some(sid) = acc.storage_root {
                self.del_tree(sid)?;
            }
        }

        self.void_path_keys(hike.legs.iter().map(|leg| leg.vid).collect::<Vec<_>>());

        if hike.legs.len() == 1 {
            // the leaf was the root itself; the root id stays allocated
            // (a storage root may still be referenced by its account)
            self.set_vtx(leaf_vid, None);
            return Ok(());
        }

        self.set_vtx(leaf_vid, None);
        self.top.fin.v_gen.dispose(leaf_vid);
        self.collapse_above(&hike)
    }

    /// Drop the branch edge that led to the deleted leaf and restore
    /// canonical shape around it.
    fn collapse_above(&mut self, hike: &Hike) -> Result<()> {
        let branch_leg = &hike.legs[hike.legs.len() - 2];
        let branch_vid = branch_leg.vid;
        let (Vertex::Branch { mut children }, Some(nibble)) =
            (branch_leg.vtx.clone(), branch_leg.nibble)
        else {
            return Err(ErrorKind::DelBranchExpected.at(branch_vid));
        };
        children[nibble as usize] = None;
        let branch = Vertex::Branch { children };

        if branch.child_count() >= 2 {
            self.set_vtx(branch_vid, Some(branch));
            return Ok(());
        }
        let (last_nibble, last_child) = branch
            .single_child()
            .ok_or(ErrorKind::DelBranchExpected.at(branch_vid))?;

        // the surviving edge absorbs the branch; what it becomes depends
        // on the child's own shape
        let child_vtx = self
            .read_vtx(last_child)?
            .ok_or(ErrorKind::HikeDanglingEdge.at(last_child))?;
        if self.is_locked(last_child) {
            return Err(ErrorKind::DelBranchLocked.at(last_child));
        }
        let merged = match child_vtx {
            Vertex::Leaf { pfx, payload } => {
                self.set_vtx(last_child, None);
                self.top.fin.v_gen.dispose(last_child);
                Vertex::Leaf {
                    pfx: crate::nibbles::NibblePath::default().join(last_nibble, &pfx),
                    payload,
                }
            }
            Vertex::Extension { pfx, child } => {
                self.set_vtx(last_child, None);
                self.top.fin.v_gen.dispose(last_child);
                Vertex::Extension {
                    pfx: crate::nibbles::NibblePath::default().join(last_nibble, &pfx),
                    child,
                }
            }
            Vertex::Branch { .. } => Vertex::Extension {
                pfx: crate::nibbles::NibblePath::new(vec![last_nibble]),
                child: last_child,
            },
        };

        // an extension above the collapsed branch concatenates with the
        // replacement instead of pointing at a unary vertex
        let above = (hike.legs.len() >= 3).then(|| &hike.legs[hike.legs.len() - 3]);
        match above {
            Some(leg) if leg.vtx.is_extension() => {
                let ext_vid = leg.vid;
                let Vertex::Extension { pfx: ext_pfx, .. } = leg.vtx.clone() else {
                    unreachable!("guarded by is_extension");
                };
                self.set_vtx(branch_vid, None);
                self.top.fin.v_gen.dispose(branch_vid);
                let merged = match merged {
                    Vertex::Leaf { pfx, payload } => Vertex::Leaf {
                        pfx: ext_pfx.join(pfx.at(0), &pfx.suffix(1)),
                        payload,
                    },
                    Vertex::Extension { pfx, child } => Vertex::Extension {
                        pfx: ext_pfx.join(pfx.at(0), &pfx.suffix(1)),
                        child,
                    },
                    Vertex::Branch { .. } => {
                        return Err(ErrorKind::DelBranchExpected.at(branch_vid))
                    }
                };
                self.set_vtx(ext_vid, Some(merged));
            }
            _ => self.set_vtx(branch_vid, Some(merged)),
        }
        Ok(())
    }

    /// Free every vertex reachable from `root` and void their keys.
    /// Refused when the sub-trie exceeds the configured size bound.
    pub fn del_tree(&mut self, root: VertexId) -> Result<()> {
        let limit = self.cfg.del_tree_limit;
        let mut pending = vec![root];
        let mut reach = Vec::new();
        while let Some(vid) = pending.pop() {
            let Some(vtx) = self.read_vtx(vid)? else {
                if vid == root {
                    // already empty; nothing to free
                    return Ok(());
                }
                return Err(ErrorKind::HikeDanglingEdge.at(vid));
            };
            if reach.len() >= limit {
                return Err(ErrorKind::DelSubTreeTooBig.at(root));
            }
            match &vtx {
                Vertex::Leaf { .. } => {
                    if self.is_locked(vid) {
                        return Err(ErrorKind::DelLeafLocked.at(vid));
                    }
                }
                Vertex::Extension { child, .. } => {
                    if self.is_locked(vid) {
                        return Err(ErrorKind::DelBranchLocked.at(vid));
                    }
                    pending.push(*child);
                }
                Vertex::Branch { children } => {
                    if self.is_locked(vid) {
                        return Err(ErrorKind::DelBranchLocked.at(vid));
                    }
                    pending.extend(children.iter().flatten());
                }
            }
            reach.push(vid);
        }
        for vid in reach {
            self.set_vtx(vid, None);
            if vid != ROOT_VID {
                self.top.fin.v_gen.dispose(vid);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbConfig;
    use crate::merkle::AccountData;
    use crate::vid::VidGen;

    fn raw(n: u8) -> Payload {
        Payload::Raw(vec![n])
    }

    fn setup(keys: &[&[u8]]) -> Db {
        let mut db = Db::new_memory(DbConfig::default());
        for (n, key) in keys.iter().enumerate() {
            db.merge(ROOT_VID, key, raw(n as u8)).unwrap();
        }
        db
    }

    #[test]
    fn delete_to_empty_restores_canonical_generator() {
        let keys: [&[u8]; 3] = [&[0x00; 4], &[0x11; 4], &[0x22; 4]];
        let mut db = setup(&keys);
        for key in keys {
            db.delete(ROOT_VID, key).unwrap();
        }
        assert!(db.read_vtx(ROOT_VID).unwrap().is_none());
        let mut v_gen = db.generator().clone();
        v_gen.reorg();
        assert_eq!(v_gen, VidGen::canonical_empty());
    }

    #[test]
    fn branch_collapses_into_sibling_leaf() {
        let mut db = setup(&[&[0x12, 0x34], &[0x12, 0x44]]);
        db.delete(ROOT_VID, &[0x12, 0x44]).unwrap();
        // ext + branch + two leaves collapse back into the root leaf
        let hike = db.hike(ROOT_VID, &[0x12, 0x34]).unwrap();
        assert_eq!(hike.legs.len(), 1);
        assert!(hike.legs[0].vtx.is_leaf());
        assert_eq!(db.fetch(ROOT_VID, &[0x12, 0x34]).unwrap(), raw(0));
    }

    #[test]
    fn branch_with_remaining_edges_stays() {
        let keys: [&[u8]; 3] = [&[0x11; 2], &[0x22; 2], &[0x33; 2]];
        let mut db = setup(&keys);
        db.delete(ROOT_VID, &[0x22; 2]).unwrap();
        assert!(db.fetch(ROOT_VID, &[0x11; 2]).is_ok());
        assert!(db.fetch(ROOT_VID, &[0x33; 2]).is_ok());
        assert_eq!(
            db.delete(ROOT_VID, &[0x22; 2]).unwrap_err().kind,
            ErrorKind::DelPathNotFound
        );
        let hike = db.hike(ROOT_VID, &[0x11; 2]).unwrap();
        assert!(hike.legs[0].vtx.is_branch());
    }

    #[test]
    fn branch_collapses_into_extension_over_branch() {
        // 0x1X fan-out below nibble 1, single 0x2X key aside
        let mut db = setup(&[&[0x11, 0x00], &[0x12, 0x00], &[0x21, 0x00]]);
        db.delete(ROOT_VID, &[0x21, 0x00]).unwrap();
        let hike = db.hike(ROOT_VID, &[0x11, 0x00]).unwrap();
        assert!(hike.legs[0].vtx.is_extension());
        assert!(hike.legs[1].vtx.is_branch());
        assert_eq!(db.fetch(ROOT_VID, &[0x12, 0x00]).unwrap(), raw(1));
    }

    #[test]
    fn extension_above_collapse_concatenates() {
        // shared prefix 0xab, fork below it, then empty one side
        let mut db = setup(&[&[0xab, 0x10], &[0xab, 0x21], &[0xab, 0x22]]);
        db.delete(ROOT_VID, &[0xab, 0x10]).unwrap();
        // root extension now covers a,b,2 and forks at the last nibble
        let hike = db.hike(ROOT_VID, &[0xab, 0x21]).unwrap();
        assert!(hike.legs[0].vtx.is_extension());
        assert!(hike.legs[1].vtx.is_branch());
        assert_eq!(hike.legs.len(), 3);
        assert_eq!(db.fetch(ROOT_VID, &[0xab, 0x22]).unwrap(), raw(2));
    }

    #[test]
    fn deleting_account_drops_its_storage_trie() {
        let mut db = Db::new_memory(DbConfig::default());
        let sid = db.new_storage_root();
        db.merge(sid, &[0x01, 0x02], Payload::Storage(vec![9])).unwrap();
        db.merge(
            ROOT_VID,
            &[0x5a; 4],
            Payload::Account(AccountData {
                storage_root: Some(sid),
                ..Default::default()
            }),
        )
        .unwrap();

        db.delete(ROOT_VID, &[0x5a; 4]).unwrap();
        assert!(db.read_vtx(sid).unwrap().is_none());
        assert!(!db.generator().is_allocated(sid));
    }

    #[test]
    fn del_tree_respects_the_size_bound() {
        let cfg = DbConfig::builder().del_tree_limit(3).build();
        let mut db = Db::new_memory(cfg);
        for n in 0u8..4 {
            db.merge(ROOT_VID, &[n << 4, 0x00], raw(n)).unwrap();
        }
        assert_eq!(
            db.del_tree(ROOT_VID).unwrap_err().kind,
            ErrorKind::DelSubTreeTooBig
        );
        // intact after refusal
        assert!(db.fetch(ROOT_VID, &[0x10, 0x00]).is_ok());
    }

    #[test]
    fn locked_vertices_refuse_deletion() {
        let mut db = setup(&[&[0x12, 0x34], &[0x12, 0x44]]);
        let hike = db.hike(ROOT_VID, &[0x12, 0x34]).unwrap();
        let leaf_vid = hike.last_leg().unwrap().vid;
        db.proof_lock(leaf_vid, crate::merkle::HashKey::Empty);
        assert_eq!(
            db.delete(ROOT_VID, &[0x12, 0x34]).unwrap_err().kind,
            ErrorKind::DelLeafLocked
        );
        assert_eq!(
            db.del_tree(ROOT_VID).unwrap_err().kind,
            ErrorKind::DelLeafLocked
        );
    }
}
