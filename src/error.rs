// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

use crate::vid::VertexId;
use thiserror::Error;

/// Flat list of failure kinds, grouped by subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    // codec
    #[error("codec: blob too short")]
    CodecTooShort,
    #[error("codec: blob size garbled")]
    CodecSizeGarbled,
    #[error("codec: wrong type tag")]
    CodecWrongType,
    #[error("codec: record overflow")]
    CodecOverflow,

    // hike
    #[error("hike: empty path")]
    HikeEmptyPath,
    #[error("hike: root vertex missing")]
    HikeRootMissing,
    #[error("hike: branch has no edge for nibble")]
    HikeBranchMissingEdge,
    #[error("hike: extension prefix diverges from tail")]
    HikeExtTailMismatch,
    #[error("hike: leaf prefix does not match tail")]
    HikeLeafUnexpected,
    #[error("hike: dangling or cyclic edge")]
    HikeDanglingEdge,

    // merge
    #[error("merge: root vertex missing")]
    MergeRootMissing,
    #[error("merge: leaf payload cached already")]
    MergeLeafPathCachedAlready,
    #[error("merge: leaf payload on backend already")]
    MergeLeafPathOnBackendAlready,
    #[error("merge: branch link is proof locked")]
    MergeBranchLinkLockedKey,
    #[error("merge: leaf is proof locked")]
    MergeLeafProofModeLock,
    #[error("merge: path terminates inside the trie")]
    MergeBranchGarbledTail,
    #[error("merge: vertex assembly failed")]
    MergeAssemblyFailed,

    // delete
    #[error("delete: path not found")]
    DelPathNotFound,
    #[error("delete: leaf is proof locked")]
    DelLeafLocked,
    #[error("delete: branch is proof locked")]
    DelBranchLocked,
    #[error("delete: branch vertex expected")]
    DelBranchExpected,
    #[error("delete: sub-tree too big")]
    DelSubTreeTooBig,

    // hashify
    #[error("hashify: vertex unresolved")]
    HashifyVtxUnresolved,
    #[error("hashify: proof root hash mismatch")]
    HashifyProofHashMismatch,

    // transactions
    #[error("tx: not the top transaction")]
    TxNotTopTx,
    #[error("tx: stale transaction handle")]
    TxStaleTx,
    #[error("tx: layer stack underflow")]
    TxStackUnderflow,
    #[error("tx: transactions still pending")]
    TxPendingTx,
    #[error("tx: execute mode may not nest")]
    TxExecNestingAttempt,
    #[error("tx: base transaction is execute locked")]
    TxExecBaseTxLocked,
    #[error("tx: directive rejected in execute mode")]
    TxExecDirectiveLocked,

    // filter / journal
    #[error("filter: source/target state mismatch")]
    FilTrgSrcMismatch,
    #[error("filter: back steps exhausted")]
    FilBackStepsExpected,
    #[error("filter: descriptor does not hold write permission")]
    FilNotCentre,
    #[error("filter: journal entry missing")]
    FilQidMissing,
    #[error("filter: no entry for filter id")]
    FilFilterNotFound,

    // reads
    #[error("get: vertex not found")]
    GetVtxNotFound,

    // backend
    #[error("backend: no backend attached")]
    BackendMissing,
    #[error("backend: write access denied")]
    BackendReadOnly,

    // backend checker
    #[error("check: key missing for vertex")]
    CheckBeKeyMissing,
    #[error("check: stored key does not match vertex")]
    CheckBeKeyMismatch,
    #[error("check: generator state garbled")]
    CheckBeVGenGarbled,
}

impl ErrorKind {
    /// Attach the most specific vertex id implicated.
    pub fn at(self, ctx: VertexId) -> DbError {
        DbError { ctx, kind: self }
    }
}

/// Error value carried by every fallible engine operation: the failure
/// kind plus the context vertex id (zero when no single vertex applies).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{kind} [ctx {ctx}]")]
pub struct DbError {
    pub ctx: VertexId,
    pub kind: ErrorKind,
}

impl From<ErrorKind> for DbError {
    fn from(kind: ErrorKind) -> Self {
        kind.at(VertexId::default())
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
