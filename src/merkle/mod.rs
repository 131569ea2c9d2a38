// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

//! The trie engine proper: vertex types, the path walker and the three
//! structural operations (merge, delete, hashify). All of them run as
//! methods on [`crate::db::Db`] and only ever write into its top layer.

mod delete;
mod hashify;
mod hike;
mod merge;
mod node;

pub use hike::{Hike, Leg};
pub use node::{
    AccountData, HashKey, Payload, Vertex, EMPTY_CODE_HASH, EMPTY_ROOT_HASH, KEY_LEN, NBRANCH,
};

pub(crate) use hashify::vtx_preimage;
