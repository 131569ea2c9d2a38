// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

use std::fmt;

use enum_as_inner::EnumAsInner;
use primitive_types::U256;
use sha3::{Digest, Keccak256};

use crate::{
    error::ErrorKind,
    nibbles::NibblePath,
    vid::VertexId,
};

pub const KEY_LEN: usize = 32;

pub const NBRANCH: usize = 16;

/// Keccak-256 of the RLP encoding of the empty trie.
pub const EMPTY_ROOT_HASH: [u8; KEY_LEN] = [
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8,
    0x6e, 0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63,
    0xb4, 0x21,
];

/// Keccak-256 of the empty byte string.
pub const EMPTY_CODE_HASH: [u8; KEY_LEN] = [
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03,
    0xc0, 0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85,
    0xa4, 0x70,
];

/// Merkle key of a vertex: the Keccak-256 of its RLP encoding, or the
/// encoding itself while shorter than a hash. `Empty` means the key is
/// unknown and must be recomputed (or is pending deletion).
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub enum HashKey {
    #[default]
    Empty,
    Hash([u8; KEY_LEN]),
    Rlp(Vec<u8>),
}

impl HashKey {
    pub fn is_empty(&self) -> bool {
        matches!(self, HashKey::Empty)
    }

    /// Key for an RLP node encoding: embedded when shorter than a hash.
    pub fn from_encoded(encoded: Vec<u8>) -> Self {
        if encoded.len() < KEY_LEN {
            HashKey::Rlp(encoded)
        } else {
            HashKey::Hash(Keccak256::digest(&encoded).into())
        }
    }

    /// 32-byte form as used for state roots: embedded encodings get
    /// hashed, `Empty` maps to the empty-trie root.
    pub fn root_bytes(&self) -> [u8; KEY_LEN] {
        match self {
            HashKey::Empty => EMPTY_ROOT_HASH,
            HashKey::Hash(h) => *h,
            HashKey::Rlp(blob) => Keccak256::digest(blob).into(),
        }
    }
}

impl fmt::Debug for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HashKey::Empty => write!(f, "key(empty)"),
            HashKey::Hash(h) => write!(f, "key({})", hex::encode(h)),
            HashKey::Rlp(blob) => write!(f, "key(rlp:{})", hex::encode(blob)),
        }
    }
}

/// Account column family of a leaf payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountData {
    pub nonce: u64,
    pub balance: U256,
    /// Root vertex of the account's storage sub-trie, if any.
    pub storage_root: Option<VertexId>,
    pub code_hash: [u8; KEY_LEN],
}

impl Default for AccountData {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::zero(),
            storage_root: None,
            code_hash: EMPTY_CODE_HASH,
        }
    }
}

/// Leaf payload variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Raw(Vec<u8>),
    Account(AccountData),
    Storage(Vec<u8>),
}

/// Trie vertex. Child links are vertex ids, never hashes; the key table
/// tracks the Merkle keys separately.
#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum Vertex {
    Leaf {
        pfx: NibblePath,
        payload: Payload,
    },
    Extension {
        pfx: NibblePath,
        child: VertexId,
    },
    Branch {
        children: [Option<VertexId>; NBRANCH],
    },
}

impl Vertex {
    pub fn new_branch(edges: &[(u8, VertexId)]) -> Self {
        let mut children = [None; NBRANCH];
        for (nibble, vid) in edges {
            children[*nibble as usize] = Some(*vid);
        }
        Vertex::Branch { children }
    }

    /// Number of populated branch slots; zero for other variants.
    pub fn child_count(&self) -> usize {
        match self {
            Vertex::Branch { children } => children.iter().flatten().count(),
            _ => 0,
        }
    }

    /// The sole populated slot of a branch, when only one remains.
    pub fn single_child(&self) -> Option<(u8, VertexId)> {
        match self {
            Vertex::Branch { children } => {
                let mut found = None;
                for (n, c) in children.iter().enumerate() {
                    if let Some(vid) = c {
                        if found.is_some() {
                            return None;
                        }
                        found = Some((n as u8, *vid));
                    }
                }
                found
            }
            _ => None,
        }
    }

    /// Structural invariants: extensions carry a non-empty prefix and a
    /// live child link, branches at least two edges. Leaf prefixes may
    /// be empty (paths diverging at their last nibble).
    pub fn check(&self) -> Result<(), ErrorKind> {
        match self {
            Vertex::Leaf { .. } => Ok(()),
            Vertex::Extension { pfx, child } => {
                if pfx.is_empty() || !child.is_valid() {
                    Err(ErrorKind::MergeAssemblyFailed)
                } else {
                    Ok(())
                }
            }
            Vertex::Branch { .. } => {
                if self.child_count() < 2 {
                    Err(ErrorKind::MergeAssemblyFailed)
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_constants_are_keccak_digests() {
        let empty_rlp: [u8; 1] = [0x80];
        let digest: [u8; KEY_LEN] = Keccak256::digest(empty_rlp).into();
        assert_eq!(digest, EMPTY_ROOT_HASH);
        let digest: [u8; KEY_LEN] = Keccak256::digest([]).into();
        assert_eq!(digest, EMPTY_CODE_HASH);
    }

    #[test]
    fn short_encodings_stay_embedded() {
        let small = HashKey::from_encoded(vec![0xc1, 0x80]);
        assert_eq!(small, HashKey::Rlp(vec![0xc1, 0x80]));
        let big = HashKey::from_encoded(vec![0xaa; 40]);
        assert!(matches!(big, HashKey::Hash(_)));
    }

    #[test]
    fn branch_shape_helpers() {
        let b = Vertex::new_branch(&[(3, VertexId(7))]);
        assert_eq!(b.child_count(), 1);
        assert_eq!(b.single_child(), Some((3, VertexId(7))));
        assert!(b.check().is_err());

        let b = Vertex::new_branch(&[(0, VertexId(2)), (0xf, VertexId(3))]);
        assert_eq!(b.child_count(), 2);
        assert_eq!(b.single_child(), None);
        assert!(b.check().is_ok());
    }
}
