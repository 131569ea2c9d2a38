// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

//! # Driftwood: a layered Merkle Patricia state engine with journaled deltas.
//!
//! Driftwood keeps one authenticated key-value trie per backend and
//! treats everything above the committed state as cheap, discardable
//! overlays. It grew out of the needs of an EVM-style execution client:
//! block processing wants nested speculative writes with commit and
//! rollback, root hashes must track every change incrementally, and the
//! durable store should be able to answer "what did the state look like
//! a few persists ago" without keeping an archival forest of tries.
//!
//! The engine is built from three cooperating pieces:
//!
//! - **The trie itself** (`merkle`): Branch/Extension/Leaf vertices
//!   named by dense 64-bit ids instead of hashes, so structural edits
//!   never rewrite parent links, plus incremental Keccak-256 key
//!   recomputation (*hashify*) over whatever the last edits dirtied.
//!   Ids are allocated and recycled by a small arena (`vid`).
//!
//! - **The layer stack** (`layer`, `db`): every transaction pushes a
//!   copy-on-write delta of vertex and key tables. Reads walk the stack
//!   top down and fall through to the committed side. A restricted
//!   *execute* mode re-enters a historical layer read-only and restores
//!   the descriptor exactly, whatever the action did.
//!
//! - **The filter pipeline** (`filter`, `journal`, `backend`): on
//!   persist the top layer is projected into a forward delta, merged
//!   into the descriptor's read-only filter, and flushed to the backend
//!   in one atomic batch. The inverse delta goes into a cascaded FIFO
//!   journal, which is what powers `fork(episode)` style historical
//!   reads and keeps sibling descriptors oblivious to the flush.
//!
//! The backend below the batched-write seam is deliberately dumb: five
//! blob namespaces and an atomic batch commit (see [`backend::Backend`]).
//! An in-memory driver ships in-tree; a persistent driver only has to
//! implement the same trait.

pub mod backend;
pub mod check;
pub mod codec;
pub mod db;
pub mod error;
pub mod filter;
pub mod journal;
pub mod layer;
pub(crate) mod logger;
pub mod merkle;
pub mod nibbles;
pub mod vid;

pub use db::{Db, DbConfig, TxId, EXEC_TX_UID};
pub use error::{DbError, ErrorKind, Result};
pub use filter::Filter;
pub use merkle::{
    AccountData, HashKey, Hike, Leg, Payload, Vertex, EMPTY_CODE_HASH, EMPTY_ROOT_HASH,
};
pub use nibbles::NibblePath;
pub use vid::{VertexId, VidGen, LEAST_FREE_VID, ROOT_VID};
