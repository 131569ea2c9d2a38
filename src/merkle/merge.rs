// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

//! Inserting a `(path, payload)` pair. The walk result decides the
//! structural edit; every touched vertex lands in the top layer with its
//! key voided, and the vertex reached by the walk keeps its id so the
//! link from its parent never needs rewriting.

use crate::{
    db::Db,
    error::{ErrorKind, Result},
    merkle::{
        hike::{Hike, HikeFail},
        Payload, Vertex,
    },
    nibbles::NibblePath,
    vid::{VertexId, ROOT_VID},
};

impl Db {
    /// Insert or update the payload stored under `path` in the trie
    /// rooted at `root`.
    ///
    /// Duplicate inserts are reported as `MergeLeafPathCachedAlready`
    /// (payload already present in the layer stack) or
    /// `MergeLeafPathOnBackendAlready` (already committed below); both
    /// leave the trie untouched.
    pub fn merge(&mut self, root: VertexId, path: &[u8], payload: Payload) -> Result<()> {
        if let Payload::Account(acc) = &payload {
            if let Some(sid) = acc.storage_root {
                if self.read_vtx(sid)?.is_none() && !self.top.fin.v_gen.is_allocated(sid) {
                    return Err(ErrorKind::MergeRootMissing.at(sid));
                }
            }
        }
        let nibbles = NibblePath::from_bytes(path);
        match self.hike_up(root, &nibbles) {
            Ok(hike) => self.update_leaf(hike, payload),
            Err(HikeFail { hike, kind }) => match kind {
                ErrorKind::HikeLeafUnexpected => self.split_leaf(hike, payload),
                ErrorKind::HikeBranchMissingEdge => self.fill_branch_slot(hike, payload),
                ErrorKind::HikeExtTailMismatch => self.split_extension(hike, payload),
                ErrorKind::HikeRootMissing => self.plant_root(root, nibbles, payload),
                ErrorKind::HikeEmptyPath => Err(ErrorKind::HikeEmptyPath.into()),
                other => Err(other.at(hike.ctx())),
            },
        }
    }

    fn void_hike_keys(&mut self, hike: &Hike) {
        let vids: Vec<_> = hike.legs.iter().map(|leg| leg.vid).collect();
        self.void_path_keys(vids);
    }

    /// Whole path matched an existing leaf: replace its payload.
    fn update_leaf(&mut self, hike: Hike, payload: Payload) -> Result<()> {
        let leg = hike.last_leg().expect("successful hike ends in a leaf");
        let vid = leg.vid;
        let Vertex::Leaf { pfx, payload: old } = &leg.vtx else {
            return Err(ErrorKind::MergeAssemblyFailed.at(vid));
        };
        if *old == payload {
            let kind = if self.read_vtx_layered(vid).is_some() {
                ErrorKind::MergeLeafPathCachedAlready
            } else {
                ErrorKind::MergeLeafPathOnBackendAlready
            };
            return Err(kind.at(vid));
        }
        if self.is_locked(vid) {
            return Err(ErrorKind::MergeLeafProofModeLock.at(vid));
        }
        let pfx = pfx.clone();
        self.void_hike_keys(&hike);
        self.set_vtx(vid, Some(Vertex::Leaf { pfx, payload }));
        Ok(())
    }

    /// Walk ended in a leaf whose prefix diverges from the tail: fork
    /// both under a fresh branch, wrapped in an extension when they
    /// share a prefix. The old leaf body moves to a new id while the
    /// walked id becomes the branch (or extension), keeping the parent
    /// link intact.
    fn split_leaf(&mut self, hike: Hike, payload: Payload) -> Result<()> {
        let leg = hike.last_leg().expect("failed hike keeps the leaf leg");
        let vid = leg.vid;
        let Vertex::Leaf {
            pfx: old_pfx,
            payload: old_payload,
        } = leg.vtx.clone()
        else {
            return Err(ErrorKind::MergeAssemblyFailed.at(vid));
        };
        if self.is_locked(vid) {
            return Err(ErrorKind::MergeLeafProofModeLock.at(vid));
        }
        let tail = hike.tail.clone();
        let shared = tail.common_prefix_len(&old_pfx);
        if shared == tail.len() || shared == old_pfx.len() {
            // one path is a proper prefix of the other; branches carry
            // no payload slot
            return Err(ErrorKind::MergeBranchGarbledTail.at(vid));
        }

        self.void_hike_keys(&hike);
        let moved = self.top.fin.v_gen.fetch();
        let new_leaf = self.top.fin.v_gen.fetch();
        self.set_vtx(
            moved,
            Some(Vertex::Leaf {
                pfx: old_pfx.suffix(shared + 1),
                payload: old_payload,
            }),
        );
        self.set_vtx(
            new_leaf,
            Some(Vertex::Leaf {
                pfx: tail.suffix(shared + 1),
                payload,
            }),
        );
        let fork = Vertex::new_branch(&[
            (old_pfx.at(shared), moved),
            (tail.at(shared), new_leaf),
        ]);
        if shared == 0 {
            self.set_vtx(vid, Some(fork));
        } else {
            let branch = self.top.fin.v_gen.fetch();
            self.set_vtx(branch, Some(fork));
            self.set_vtx(
                vid,
                Some(Vertex::Extension {
                    pfx: tail.prefix(shared),
                    child: branch,
                }),
            );
        }
        Ok(())
    }

    /// Walk ended at a branch with a free slot under the next nibble:
    /// hang a new leaf there.
    fn fill_branch_slot(&mut self, hike: Hike, payload: Payload) -> Result<()> {
        let leg = hike.last_leg().expect("failed hike keeps the branch leg");
        let vid = leg.vid;
        let (Vertex::Branch { mut children }, Some(nibble)) = (leg.vtx.clone(), leg.nibble)
        else {
            return Err(ErrorKind::MergeAssemblyFailed.at(vid));
        };
        if self.is_locked(vid) {
            return Err(ErrorKind::MergeBranchLinkLockedKey.at(vid));
        }
        let tail = hike.tail.clone();
        self.void_hike_keys(&hike);
        let new_leaf = self.top.fin.v_gen.fetch();
        self.set_vtx(
            new_leaf,
            Some(Vertex::Leaf {
                pfx: tail.suffix(1),
                payload,
            }),
        );
        children[nibble as usize] = Some(new_leaf);
        self.set_vtx(vid, Some(Vertex::Branch { children }));
        Ok(())
    }

    /// Walk diverged inside an extension prefix: split it at the fork
    /// point into (extension?) → branch → (extension?) → old child plus
    /// a new leaf under the diverging nibble.
    fn split_extension(&mut self, hike: Hike, payload: Payload) -> Result<()> {
        let leg = hike.last_leg().expect("failed hike keeps the extension leg");
        let vid = leg.vid;
        let Vertex::Extension {
            pfx: old_pfx,
            child: old_child,
        } = leg.vtx.clone()
        else {
            return Err(ErrorKind::MergeAssemblyFailed.at(vid));
        };
        if self.is_locked(vid) {
            return Err(ErrorKind::MergeBranchLinkLockedKey.at(vid));
        }
        let tail = hike.tail.clone();
        let shared = tail.common_prefix_len(&old_pfx);
        debug_assert!(shared < old_pfx.len());
        if shared == tail.len() {
            return Err(ErrorKind::MergeBranchGarbledTail.at(vid));
        }

        self.void_hike_keys(&hike);
        // remainder of the split extension, or the old child directly
        // when the fork eats the whole prefix but its last nibble
        let old_edge = if shared + 1 == old_pfx.len() {
            old_child
        } else {
            let stub = self.top.fin.v_gen.fetch();
            self.set_vtx(
                stub,
                Some(Vertex::Extension {
                    pfx: old_pfx.suffix(shared + 1),
                    child: old_child,
                }),
            );
            stub
        };
        let new_leaf = self.top.fin.v_gen.fetch();
        self.set_vtx(
            new_leaf,
            Some(Vertex::Leaf {
                pfx: tail.suffix(shared + 1),
                payload,
            }),
        );
        let fork = Vertex::new_branch(&[
            (old_pfx.at(shared), old_edge),
            (tail.at(shared), new_leaf),
        ]);
        if shared == 0 {
            self.set_vtx(vid, Some(fork));
        } else {
            let branch = self.top.fin.v_gen.fetch();
            self.set_vtx(branch, Some(fork));
            self.set_vtx(
                vid,
                Some(Vertex::Extension {
                    pfx: old_pfx.prefix(shared),
                    child: branch,
                }),
            );
        }
        Ok(())
    }

    /// Empty trie under `root`: the whole path becomes the root leaf.
    /// Only the primary root or an allocated storage root may be grown.
    fn plant_root(&mut self, root: VertexId, path: NibblePath, payload: Payload) -> Result<()> {
        if root != ROOT_VID && !self.top.fin.v_gen.is_allocated(root) {
            return Err(ErrorKind::MergeRootMissing.at(root));
        }
        self.set_vtx(root, Some(Vertex::Leaf { pfx: path, payload }));
        Ok(())
    }
}
