// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

//! The engine descriptor: one layered view of the trie over a shared
//! backend. Several descriptors may read through the same backend; the
//! single *centre* descriptor holds write permission and is the only one
//! that may persist or touch the journal.

use std::cell::RefCell;
use std::rc::Rc;

use typed_builder::TypedBuilder;

use crate::{
    backend::{Backend, MemBackend, VoidBackend},
    error::{ErrorKind, Result},
    filter::Filter,
    journal::{FilterId, Journal, TierCfg, DEFAULT_LAYOUT},
    layer::Layer,
    logger::{debug, trace},
    merkle::{HashKey, Vertex},
    vid::{VertexId, VidGen},
};

/// Transaction uids at or above this value belong to execute mode.
pub const EXEC_TX_UID: u64 = 1 << 63;

#[derive(Debug, Clone, TypedBuilder)]
pub struct DbConfig {
    /// Refusal threshold for whole-subtree deletion.
    #[builder(default = 1 << 20)]
    pub del_tree_limit: usize,
    #[builder(default = DEFAULT_LAYOUT.to_vec())]
    pub journal_layout: Vec<TierCfg>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Per-descriptor state kept in the shared arena so the centre can
/// rebase siblings during persist.
#[derive(Debug, Default)]
pub(crate) struct DescSlot {
    pub(crate) filter: Option<Filter>,
}

pub(crate) struct Shared {
    pub(crate) backend: Box<dyn Backend>,
    pub(crate) journal: Journal,
    pub(crate) centre: usize,
    pub(crate) slots: Vec<Option<DescSlot>>,
}

impl Shared {
    fn register(&mut self, filter: Option<Filter>) -> usize {
        let slot = Some(DescSlot { filter });
        match self.slots.iter().position(Option::is_none) {
            Some(id) => {
                self.slots[id] = slot;
                id
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        }
    }
}

/// Handle onto one transaction level of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxId {
    pub(crate) uid: u64,
    pub(crate) level: usize,
}

pub struct Db {
    pub(crate) shared: Rc<RefCell<Shared>>,
    pub(crate) id: usize,
    pub(crate) top: Layer,
    pub(crate) stack: Vec<Layer>,
    pub(crate) tx_uid_gen: u64,
    pub(crate) cfg: DbConfig,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("id", &self.id)
            .field("top", &self.top)
            .field("stack", &self.stack)
            .field("tx_uid_gen", &self.tx_uid_gen)
            .field("cfg", &self.cfg)
            .finish()
    }
}

impl Db {
    fn fresh(backend: Box<dyn Backend>, cfg: DbConfig) -> Self {
        let journal = Journal::new(cfg.journal_layout.clone());
        let shared = Shared {
            backend,
            journal,
            centre: 0,
            slots: vec![Some(DescSlot::default())],
        };
        Self {
            shared: Rc::new(RefCell::new(shared)),
            id: 0,
            top: Layer::default(),
            stack: Vec::new(),
            tx_uid_gen: 0,
            cfg,
        }
    }

    /// Centre descriptor over a fresh in-memory backend.
    pub fn new_memory(cfg: DbConfig) -> Self {
        Self::fresh(Box::new(MemBackend::new()), cfg)
    }

    /// Memory-only descriptor with no persistence at all.
    pub fn new_volatile(cfg: DbConfig) -> Self {
        Self::fresh(Box::new(VoidBackend), cfg)
    }

    /// Centre descriptor over an existing backend; generator and journal
    /// state come from the driver.
    pub fn open(backend: Box<dyn Backend>, cfg: DbConfig) -> Result<Self> {
        let v_gen = backend.get_idg()?;
        let journal = match backend.get_fqs()? {
            Some(state) => Journal::from_state(cfg.journal_layout.clone(), state),
            None => Journal::new(cfg.journal_layout.clone()),
        };
        let shared = Shared {
            backend,
            journal,
            centre: 0,
            slots: vec![Some(DescSlot::default())],
        };
        Ok(Self {
            shared: Rc::new(RefCell::new(shared)),
            id: 0,
            top: Layer::with_vgen(v_gen),
            stack: Vec::new(),
            tx_uid_gen: 0,
            cfg,
        })
    }

    // ------------------------------------------------------------------
    // read-through

    /// Vertex as visible from the top layer down: layer stack, then the
    /// read-only filter, then the backend.
    pub(crate) fn read_vtx(&self, vid: VertexId) -> Result<Option<Vertex>> {
        if let Some(entry) = self.read_vtx_layered(vid) {
            return Ok(entry);
        }
        self.read_vtx_below(vid)
    }

    /// Vertex override from the layer stack alone.
    pub(crate) fn read_vtx_layered(&self, vid: VertexId) -> Option<Option<Vertex>> {
        if let Some(entry) = self.top.delta.vtx.get(&vid) {
            return Some(entry.clone());
        }
        for layer in self.stack.iter().rev() {
            if let Some(entry) = layer.delta.vtx.get(&vid) {
                return Some(entry.clone());
            }
        }
        None
    }

    /// Vertex as visible below the layer stack.
    pub(crate) fn read_vtx_below(&self, vid: VertexId) -> Result<Option<Vertex>> {
        let shared = self.shared.borrow();
        if let Some(slot) = &shared.slots[self.id] {
            if let Some(filter) = &slot.filter {
                if let Some(entry) = filter.s_tab.get(&vid) {
                    return Ok(entry.clone());
                }
            }
        }
        shared.backend.get_vtx(vid)
    }

    pub(crate) fn read_key(&self, vid: VertexId) -> Result<HashKey> {
        if let Some(key) = self.top.delta.key.get(&vid) {
            return Ok(key.clone());
        }
        for layer in self.stack.iter().rev() {
            if let Some(key) = layer.delta.key.get(&vid) {
                return Ok(key.clone());
            }
        }
        self.read_key_below(vid)
    }

    pub(crate) fn read_key_below(&self, vid: VertexId) -> Result<HashKey> {
        let shared = self.shared.borrow();
        if let Some(slot) = &shared.slots[self.id] {
            if let Some(filter) = &slot.filter {
                if let Some(key) = filter.k_map.get(&vid) {
                    return Ok(key.clone());
                }
            }
        }
        shared.backend.get_key(vid)
    }

    // ------------------------------------------------------------------
    // top-layer mutation plumbing

    /// Record a vertex override, mark it dirty and void its key.
    pub(crate) fn set_vtx(&mut self, vid: VertexId, vtx: Option<Vertex>) {
        self.top.delta.vtx.insert(vid, vtx);
        self.top.delta.key.insert(vid, HashKey::Empty);
        self.top.fin.dirty.insert(vid);
    }

    /// Void the keys of every vertex on a walked path; their hashes are
    /// stale once anything below changed.
    pub(crate) fn void_path_keys(&mut self, vids: impl IntoIterator<Item = VertexId>) {
        for vid in vids {
            self.top.delta.key.insert(vid, HashKey::Empty);
            self.top.fin.dirty.insert(vid);
        }
    }

    pub(crate) fn is_locked(&self, vid: VertexId) -> bool {
        self.top.fin.proof_locked.contains(&vid)
    }

    /// Allocate the root id for a fresh storage sub-trie.
    pub fn new_storage_root(&mut self) -> VertexId {
        self.top.fin.v_gen.fetch()
    }

    /// Pin a vertex id against structural edits, optionally registering
    /// an externally attested key for it (partial-trie import).
    pub fn proof_lock(&mut self, vid: VertexId, key: HashKey) {
        self.top.fin.proof_locked.insert(vid);
        if !key.is_empty() {
            self.top.delta.key.insert(vid, key);
        }
    }

    // ------------------------------------------------------------------
    // introspection

    pub fn top_layer(&self) -> &Layer {
        &self.top
    }

    pub fn generator(&self) -> &VidGen {
        &self.top.fin.v_gen
    }

    pub fn tx_level(&self) -> usize {
        self.stack.len()
    }

    pub fn is_centre(&self) -> bool {
        self.shared.borrow().centre == self.id
    }

    pub fn journal_len(&self) -> usize {
        self.shared.borrow().journal.len()
    }

    /// The `back`-th journal entry, newest first.
    pub fn journal_fetch(&self, back: usize) -> Result<(FilterId, Filter)> {
        let shared = self.shared.borrow();
        shared.journal.fetch(back, shared.backend.as_ref())
    }

    /// Journal entry by filter id, or its nearest predecessor with
    /// `earlier_ok`.
    pub fn journal_lookup(&self, fid: FilterId, earlier_ok: bool) -> Result<(FilterId, Filter)> {
        let shared = self.shared.borrow();
        shared.journal.lookup(fid, earlier_ok, shared.backend.as_ref())
    }

    /// Handle for the base (implicit) transaction.
    pub fn base_tx(&self) -> TxId {
        TxId { uid: 0, level: 0 }
    }

    // ------------------------------------------------------------------
    // transactions

    fn layer_uid_at(&self, level: usize) -> Option<u64> {
        if level == self.stack.len() {
            Some(self.top.tx_uid)
        } else {
            self.stack.get(level).map(|layer| layer.tx_uid)
        }
    }

    /// `TxStaleTx` when the handle matches no live layer, `TxNotTopTx`
    /// when it matches one that is not the top.
    fn check_top(&self, tx: TxId) -> Result<()> {
        match self.layer_uid_at(tx.level) {
            Some(uid) if uid == tx.uid => {
                if tx.level == self.stack.len() {
                    Ok(())
                } else {
                    Err(ErrorKind::TxNotTopTx.into())
                }
            }
            _ => Err(ErrorKind::TxStaleTx.into()),
        }
    }

    /// Open a nested transaction: the current top is saved and a fresh
    /// uid stamped onto the working layer.
    pub fn tx_begin(&mut self) -> Result<TxId> {
        self.stack.push(self.top.clone());
        self.tx_uid_gen += 1;
        self.top.tx_uid = self.tx_uid_gen;
        Ok(TxId {
            uid: self.top.tx_uid,
            level: self.stack.len(),
        })
    }

    /// Fold the top transaction into its parent.
    pub fn commit(&mut self, tx: TxId) -> Result<()> {
        self.check_top(tx)?;
        if tx.uid >= EXEC_TX_UID {
            return Err(ErrorKind::TxExecBaseTxLocked.into());
        }
        // the saved layer below has been superseded by the current top
        let saved = self.stack.pop().ok_or(ErrorKind::TxStackUnderflow)?;
        self.top.tx_uid = saved.tx_uid;
        Ok(())
    }

    /// Discard the top transaction, restoring the saved layer.
    pub fn rollback(&mut self, tx: TxId) -> Result<()> {
        self.check_top(tx)?;
        if tx.uid >= EXEC_TX_UID {
            return Err(ErrorKind::TxExecBaseTxLocked.into());
        }
        self.top = self.stack.pop().ok_or(ErrorKind::TxStackUnderflow)?;
        Ok(())
    }

    /// Commit or roll back everything from `tx` down to the base
    /// transaction in one step.
    pub fn collapse(&mut self, tx: TxId, commit: bool) -> Result<()> {
        self.check_top(tx)?;
        if tx.uid >= EXEC_TX_UID {
            return Err(ErrorKind::TxExecBaseTxLocked.into());
        }
        if self.stack.is_empty() {
            return Err(ErrorKind::TxStackUnderflow.into());
        }
        if commit {
            self.top.tx_uid = self.stack[0].tx_uid;
            self.stack.clear();
        } else {
            let base = self.stack.swap_remove(0);
            self.stack.clear();
            self.top = base;
        }
        Ok(())
    }

    /// Run a read-only action against the layer belonging to `tx`,
    /// historical or current, then restore the descriptor exactly.
    ///
    /// The action gets a synthetic execute-locked handle; any commit,
    /// rollback or persist against the lock is rejected. Restoration
    /// happens on every return path, including action errors.
    pub fn execute<R>(
        &mut self,
        tx: TxId,
        action: impl FnOnce(&mut Db, TxId) -> Result<R>,
    ) -> Result<R> {
        if self.tx_uid_gen >= EXEC_TX_UID {
            return Err(ErrorKind::TxExecNestingAttempt.into());
        }
        match self.layer_uid_at(tx.level) {
            Some(uid) if uid == tx.uid => {}
            _ => return Err(ErrorKind::TxStaleTx.into()),
        }
        trace!("execute: entering locked mode for uid {}", tx.uid);

        let saved_top = self.top.clone();
        let saved_stack = std::mem::take(&mut self.stack);
        let saved_uid_gen = self.tx_uid_gen;

        if tx.level < saved_stack.len() {
            // materialise the historical view
            self.top = saved_stack[tx.level].clone();
        }
        self.top.tx_uid = EXEC_TX_UID;
        self.tx_uid_gen = EXEC_TX_UID;
        self.stack = vec![Layer::default()];
        let locked = TxId {
            uid: EXEC_TX_UID,
            level: 1,
        };

        let res = action(self, locked);

        self.top = saved_top;
        self.stack = saved_stack;
        self.tx_uid_gen = saved_uid_gen;
        trace!("execute: state restored");
        res
    }

    // ------------------------------------------------------------------
    // persist

    /// Project the top layer onto the read-only filter and, with
    /// `flush`, write the result through to the backend, journalling the
    /// reverse delta and rebasing sibling descriptors.
    pub fn persist(&mut self, flush: bool) -> Result<()> {
        if self.tx_uid_gen >= EXEC_TX_UID {
            return Err(ErrorKind::TxExecDirectiveLocked.into());
        }
        if !self.stack.is_empty() {
            return Err(ErrorKind::TxPendingTx.into());
        }
        if !self.is_centre() {
            return Err(ErrorKind::FilNotCentre.into());
        }

        if let Some(fil) = self.fil_assemble()? {
            let mut v_gen = fil.v_gen.clone();
            {
                let mut shared = self.shared.borrow_mut();
                let slot = shared.slots[self.id]
                    .as_mut()
                    .ok_or(ErrorKind::FilNotCentre)?;
                slot.filter = Some(match slot.filter.clone() {
                    None => fil,
                    Some(older) => Filter::merge(older, fil)?,
                });
            }
            std::mem::swap(&mut v_gen, &mut self.top.fin.v_gen);
            self.top.delta = Default::default();
            self.top.fin.dirty.clear();
        }

        if flush {
            self.flush_filter()?;
        }
        Ok(())
    }

    /// Write the read-only filter through to the backend in one batch.
    fn flush_filter(&mut self) -> Result<()> {
        let mut guard = self.shared.borrow_mut();
        let Shared {
            backend,
            journal,
            slots,
            ..
        } = &mut *guard;

        let Some(fil) = slots[self.id].as_ref().and_then(|s| s.filter.clone()) else {
            return Ok(());
        };

        let rev = Self::fil_reverse(&fil, backend.as_ref())?;

        // a filter that exactly reverses the newest journal entry undoes
        // the previous persist: drop that entry instead of storing
        let overlap = match journal.entries().next() {
            Some((qid, _)) => match backend.get_fil(qid)? {
                Some(head) => {
                    crate::codec::encode_filter(&head)? == crate::codec::encode_filter(&fil)?
                }
                None => false,
            },
            None => false,
        };
        let plan = if overlap {
            debug!("persist: filter reverses journal head, deleting entry");
            journal.plan_delete(1)?
        } else {
            journal.plan_store(rev.clone(), None, backend.as_ref())?
        };

        let mut vtx: Vec<_> = fil.s_tab.iter().map(|(k, v)| (*k, v.clone())).collect();
        vtx.sort_unstable_by_key(|(vid, _)| *vid);
        let mut key: Vec<_> = fil.k_map.iter().map(|(k, v)| (*k, v.clone())).collect();
        key.sort_unstable_by_key(|(vid, _)| *vid);

        let mut hdl = backend.put_beg()?;
        hdl.put_vtx(&vtx)?;
        hdl.put_key(&key);
        hdl.put_idg(&fil.v_gen);
        hdl.put_fil(&plan.puts)?;
        hdl.put_fqs(&plan.state)?;
        backend.put_end(hdl)?;
        journal.apply(plan);
        debug!("persist: flushed {} vertices", vtx.len());

        // siblings keep observing their old state through a rebased
        // filter reading the new backend
        for (id, slot) in slots.iter_mut().enumerate() {
            let Some(slot) = slot else { continue };
            if id == self.id {
                slot.filter = None;
                continue;
            }
            slot.filter = Some(match slot.filter.clone() {
                None => rev.clone(),
                Some(older) => Filter::merge(rev.clone(), older)?,
            });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // descriptor lifecycle

    /// Transfer backend write permission to this descriptor.
    pub fn re_centre(&mut self) {
        self.shared.borrow_mut().centre = self.id;
    }

    /// Sibling descriptor observing the same state through the same
    /// backend. The clone starts with a copy of the committed top layer
    /// and no open transactions.
    pub fn fork_top(&self) -> Result<Db> {
        let mut shared = self.shared.borrow_mut();
        let filter = shared.slots[self.id].as_ref().and_then(|s| s.filter.clone());
        let id = shared.register(filter);
        drop(shared);
        let mut top = self.top.clone();
        top.tx_uid = 0;
        Ok(Db {
            shared: self.shared.clone(),
            id,
            top,
            stack: Vec::new(),
            tx_uid_gen: 0,
            cfg: self.cfg.clone(),
        })
    }

    /// Sibling descriptor pinned `episode` persists back in history, by
    /// composing that many journal entries into its read-only filter.
    pub fn fork(&self, episode: usize) -> Result<Db> {
        let mut shared = self.shared.borrow_mut();
        if episode >= shared.journal.len() {
            return Err(ErrorKind::FilBackStepsExpected.into());
        }
        let mut filter: Option<Filter> = None;
        for back in 0..episode {
            let (_, entry) = shared.journal.fetch(back, shared.backend.as_ref())?;
            // newest entry applies first, older entries override it
            filter = Some(match filter {
                None => entry,
                Some(acc) => Filter::merge(acc, entry)?,
            });
        }
        let v_gen = match &filter {
            Some(fil) => fil.v_gen.clone(),
            None => shared.backend.get_idg()?,
        };
        let id = shared.register(filter);
        drop(shared);
        Ok(Db {
            shared: self.shared.clone(),
            id,
            top: Layer::with_vgen(v_gen),
            stack: Vec::new(),
            tx_uid_gen: 0,
            cfg: self.cfg.clone(),
        })
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        self.shared.borrow_mut().slots[self.id] = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::Payload;
    use crate::vid::ROOT_VID;

    fn key(n: u8) -> Vec<u8> {
        vec![n; 4]
    }

    #[test]
    fn commit_keeps_inner_rollback_discards() {
        let mut db = Db::new_memory(DbConfig::default());
        let outer = db.tx_begin().unwrap();
        db.merge(ROOT_VID, &key(0xa0), Payload::Raw(vec![1])).unwrap();
        let inner = db.tx_begin().unwrap();
        db.merge(ROOT_VID, &key(0xb0), Payload::Raw(vec![2])).unwrap();
        db.rollback(inner).unwrap();
        db.commit(outer).unwrap();

        assert_eq!(db.tx_level(), 0);
        assert_eq!(db.top_layer().tx_uid, 0);
        assert!(db.fetch(ROOT_VID, &key(0xa0)).is_ok());
        assert!(db.fetch(ROOT_VID, &key(0xb0)).is_err());
    }

    #[test]
    fn stale_and_not_top_handles() {
        let mut db = Db::new_memory(DbConfig::default());
        let outer = db.tx_begin().unwrap();
        let inner = db.tx_begin().unwrap();
        assert_eq!(db.commit(outer).unwrap_err().kind, ErrorKind::TxNotTopTx);
        db.rollback(inner).unwrap();
        assert_eq!(db.rollback(inner).unwrap_err().kind, ErrorKind::TxStaleTx);
        db.rollback(outer).unwrap();
    }

    #[test]
    fn collapse_commit_and_discard() {
        let mut db = Db::new_memory(DbConfig::default());
        db.tx_begin().unwrap();
        db.merge(ROOT_VID, &key(1), Payload::Raw(vec![1])).unwrap();
        db.tx_begin().unwrap();
        let t3 = db.tx_begin().unwrap();
        db.merge(ROOT_VID, &key(2), Payload::Raw(vec![2])).unwrap();
        db.collapse(t3, true).unwrap();
        assert_eq!(db.tx_level(), 0);
        assert_eq!(db.top_layer().tx_uid, 0);
        assert!(db.fetch(ROOT_VID, &key(2)).is_ok());

        let t1 = db.tx_begin().unwrap();
        db.merge(ROOT_VID, &key(3), Payload::Raw(vec![3])).unwrap();
        db.collapse(t1, false).unwrap();
        assert_eq!(db.tx_level(), 0);
        assert!(db.fetch(ROOT_VID, &key(3)).is_err());
        assert!(db.fetch(ROOT_VID, &key(1)).is_ok());
    }

    #[test]
    fn execute_restores_state_on_all_paths() {
        let mut db = Db::new_memory(DbConfig::default());
        db.merge(ROOT_VID, &key(1), Payload::Raw(vec![1])).unwrap();
        let base = db.base_tx();
        let tx = db.tx_begin().unwrap();
        db.merge(ROOT_VID, &key(2), Payload::Raw(vec![2])).unwrap();

        let snapshot = (db.top.clone(), db.stack.clone(), db.tx_uid_gen);

        // reads the historical layer, then trips over the lock
        let res: Result<()> = db.execute(base, |db, locked| {
            assert!(db.fetch(ROOT_VID, &key(1)).is_ok());
            assert!(db.fetch(ROOT_VID, &key(2)).is_err());
            assert_eq!(
                db.persist(true).unwrap_err().kind,
                ErrorKind::TxExecDirectiveLocked
            );
            assert_eq!(
                db.commit(locked).unwrap_err().kind,
                ErrorKind::TxExecBaseTxLocked
            );
            Err(ErrorKind::GetVtxNotFound.into())
        });
        assert_eq!(res.unwrap_err().kind, ErrorKind::GetVtxNotFound);
        assert_eq!(snapshot, (db.top.clone(), db.stack.clone(), db.tx_uid_gen));

        // nesting is refused
        db.execute(base, |db, _| {
            let base = db.base_tx();
            assert_eq!(
                db.execute(base, |_, _| Ok(())).unwrap_err().kind,
                ErrorKind::TxExecNestingAttempt
            );
            Ok(())
        })
        .unwrap();

        db.rollback(tx).unwrap();
    }

    #[test]
    fn persist_requires_quiet_centre() {
        let mut db = Db::new_memory(DbConfig::default());
        let tx = db.tx_begin().unwrap();
        assert_eq!(db.persist(true).unwrap_err().kind, ErrorKind::TxPendingTx);
        db.rollback(tx).unwrap();

        let mut sibling = db.fork_top().unwrap();
        assert_eq!(
            sibling.persist(true).unwrap_err().kind,
            ErrorKind::FilNotCentre
        );
        sibling.re_centre();
        assert!(sibling.persist(true).is_ok());
    }

    #[test]
    fn volatile_descriptor_cannot_flush() {
        let mut db = Db::new_volatile(DbConfig::default());
        db.merge(ROOT_VID, &key(9), Payload::Raw(vec![9])).unwrap();
        assert_eq!(db.persist(true).unwrap_err().kind, ErrorKind::BackendMissing);
        // the forward filter still lives in memory
        assert!(db.persist(false).is_ok());
        assert!(db.fetch(ROOT_VID, &key(9)).is_ok());
    }
}
