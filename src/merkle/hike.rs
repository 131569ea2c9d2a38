// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

use crate::{
    db::Db,
    error::{ErrorKind, Result},
    merkle::{Payload, Vertex},
    nibbles::NibblePath,
    vid::VertexId,
};

/// One step of a resolved path: the vertex, its id, and for a branch the
/// nibble taken towards the next leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leg {
    pub vid: VertexId,
    pub vtx: Vertex,
    pub nibble: Option<u8>,
}

/// A root-to-tip walk. On success the legs end in a leaf and `tail` is
/// empty; a failed walk keeps the offending vertex as its last leg with
/// `tail` still holding the unconsumed nibbles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hike {
    pub root: VertexId,
    pub legs: Vec<Leg>,
    pub tail: NibblePath,
}

impl Hike {
    pub fn last_leg(&self) -> Option<&Leg> {
        self.legs.last()
    }

    /// Context id for error reporting: the deepest vertex reached.
    pub(crate) fn ctx(&self) -> VertexId {
        self.last_leg().map(|leg| leg.vid).unwrap_or(self.root)
    }
}

pub(crate) struct HikeFail {
    pub hike: Hike,
    pub kind: ErrorKind,
}

impl Db {
    /// Walk `path` down from `root`. Errors come back with the partial
    /// hike attached so the caller can turn them into a structural edit.
    pub(crate) fn hike_up(
        &self,
        root: VertexId,
        path: &NibblePath,
    ) -> std::result::Result<Hike, HikeFail> {
        let mut hike = Hike {
            root,
            legs: Vec::new(),
            tail: path.clone(),
        };
        let fail = |hike: Hike, kind| Err(HikeFail { hike, kind });

        if path.is_empty() {
            return fail(hike, ErrorKind::HikeEmptyPath);
        }
        let mut vid = root;
        loop {
            let vtx = match self.read_vtx(vid) {
                Ok(Some(vtx)) => vtx,
                Ok(None) => {
                    let kind = if hike.legs.is_empty() {
                        ErrorKind::HikeRootMissing
                    } else {
                        ErrorKind::HikeDanglingEdge
                    };
                    return fail(hike, kind);
                }
                Err(err) => return fail(hike, err.kind),
            };
            match vtx {
                Vertex::Leaf { ref pfx, .. } => {
                    if *pfx == hike.tail {
                        hike.tail = NibblePath::default();
                        hike.legs.push(Leg {
                            vid,
                            vtx,
                            nibble: None,
                        });
                        return Ok(hike);
                    }
                    hike.legs.push(Leg {
                        vid,
                        vtx,
                        nibble: None,
                    });
                    return fail(hike, ErrorKind::HikeLeafUnexpected);
                }
                Vertex::Extension { ref pfx, child } => {
                    let matched = pfx.common_prefix_len(&hike.tail);
                    if matched < pfx.len() {
                        hike.legs.push(Leg {
                            vid,
                            vtx,
                            nibble: None,
                        });
                        return fail(hike, ErrorKind::HikeExtTailMismatch);
                    }
                    let next_tail = hike.tail.suffix(matched);
                    hike.legs.push(Leg {
                        vid,
                        vtx,
                        nibble: None,
                    });
                    hike.tail = next_tail;
                    vid = child;
                }
                Vertex::Branch { children } => {
                    if hike.tail.is_empty() {
                        hike.legs.push(Leg {
                            vid,
                            vtx,
                            nibble: None,
                        });
                        return fail(hike, ErrorKind::MergeBranchGarbledTail);
                    }
                    let nibble = hike.tail.at(0);
                    match children[nibble as usize] {
                        Some(child) => {
                            hike.legs.push(Leg {
                                vid,
                                vtx,
                                nibble: Some(nibble),
                            });
                            hike.tail = hike.tail.suffix(1);
                            vid = child;
                        }
                        None => {
                            hike.legs.push(Leg {
                                vid,
                                vtx,
                                nibble: Some(nibble),
                            });
                            return fail(hike, ErrorKind::HikeBranchMissingEdge);
                        }
                    }
                }
            }
        }
    }

    /// Resolve `path` to its legs, surfacing walk failures as errors.
    pub fn hike(&self, root: VertexId, path: &[u8]) -> Result<Hike> {
        let path = NibblePath::from_bytes(path);
        self.hike_up(root, &path)
            .map_err(|fail| fail.kind.at(fail.hike.ctx()))
    }

    /// Payload stored under `path`, read through layers, the read-only
    /// filter and the backend.
    pub fn fetch(&self, root: VertexId, path: &[u8]) -> Result<Payload> {
        let nibbles = NibblePath::from_bytes(path);
        let hike = self
            .hike_up(root, &nibbles)
            .map_err(|fail| ErrorKind::GetVtxNotFound.at(fail.hike.ctx()))?;
        match hike.legs.last() {
            Some(Leg {
                vtx: Vertex::Leaf { payload, .. },
                ..
            }) => Ok(payload.clone()),
            _ => Err(ErrorKind::GetVtxNotFound.at(hike.ctx())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Db, DbConfig};
    use crate::vid::ROOT_VID;

    fn raw(n: u8) -> Payload {
        Payload::Raw(vec![n])
    }

    #[test]
    fn walk_shapes() {
        let mut db = Db::new_memory(DbConfig::default());
        // three keys forcing branch + extension shapes
        db.merge(ROOT_VID, &[0x12, 0x34], raw(1)).unwrap();
        db.merge(ROOT_VID, &[0x12, 0x44], raw(2)).unwrap();
        db.merge(ROOT_VID, &[0x99, 0x00], raw(3)).unwrap();

        let hike = db.hike(ROOT_VID, &[0x12, 0x34]).unwrap();
        assert!(hike.tail.is_empty());
        let last = hike.last_leg().unwrap();
        assert!(last.vtx.is_leaf());
        // root branches on the first nibble, extension covers "2,
        // 3/4 divergence" below
        assert!(hike.legs[0].vtx.is_branch());
        assert_eq!(hike.legs[0].nibble, Some(1));

        let err = db.hike(ROOT_VID, &[0x12, 0x35]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::HikeLeafUnexpected);
        let err = db.hike(ROOT_VID, &[0xaa, 0x00]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::HikeBranchMissingEdge);
        let err = db.hike(ROOT_VID, &[]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::HikeEmptyPath);
    }

    #[test]
    fn missing_root() {
        let db = Db::new_memory(DbConfig::default());
        let err = db.hike(ROOT_VID, &[0x01]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::HikeRootMissing);
    }

    #[test]
    fn fetch_reads_back() {
        let mut db = Db::new_memory(DbConfig::default());
        db.merge(ROOT_VID, &[0x12, 0x34], raw(7)).unwrap();
        assert_eq!(db.fetch(ROOT_VID, &[0x12, 0x34]).unwrap(), raw(7));
        assert_eq!(
            db.fetch(ROOT_VID, &[0x12, 0x35]).unwrap_err().kind,
            ErrorKind::GetVtxNotFound
        );
    }
}
