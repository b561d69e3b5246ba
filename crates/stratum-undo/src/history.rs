use std::collections::VecDeque;
use std::rc::Rc;

use stratum_mask::VoxelMaskWithOrigin;

use crate::layer::{SharedUndoLayer, UndoLayer};
use crate::rollback::UndoTransaction;

/// Who performed an action.
pub type OwnerId = u32;
/// Identifies one action across its lifetime; never reused.
pub type TransactionId = u64;

#[derive(Debug)]
pub struct HistoryEntry {
    pub owner: OwnerId,
    pub transaction: TransactionId,
    pub layer: SharedUndoLayer,
}

/// Chronological, bounded list of completed undo layers for one world.
///
/// When the whole history is full the oldest layer is dropped; nothing precedes it,
/// so no other layer depends on its data. When one owner exceeds `depth_per_owner`,
/// that owner's oldest layer becomes permanent with respect to everything before it.
#[derive(Debug)]
pub struct WorldHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    depth_per_owner: usize,
}

impl WorldHistory {
    pub fn new(capacity: usize, depth_per_owner: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            depth_per_owner: depth_per_owner.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Actions of `owner` still undoable. A split action counts once.
    pub fn depth_of(&self, owner: OwnerId) -> usize {
        self.transactions_where(|e| e.owner == owner)
    }

    fn transactions_where(&self, keep: impl Fn(&HistoryEntry) -> bool) -> usize {
        let mut last = None;
        let mut count = 0;
        for e in &self.entries {
            if keep(e) && last != Some(e.transaction) {
                count += 1;
                last = Some(e.transaction);
            }
        }
        count
    }

    /// Append a finished layer. Empty layers are not kept.
    pub fn record(&mut self, owner: OwnerId, transaction: TransactionId, layer: UndoLayer) -> bool {
        if layer.is_empty() {
            log::debug!(target: "undo", "transaction {} changed nothing, not recorded", transaction);
            return false;
        }
        self.entries.push_back(HistoryEntry {
            owner,
            transaction,
            layer: layer.into_shared(),
        });
        if self.depth_of(owner) > self.depth_per_owner {
            self.retire_oldest_of(owner);
        }
        while self.transactions_where(|_| true) > self.capacity {
            self.evict_front();
        }
        true
    }

    // parts of one transaction sit next to each other, so the front ones go together
    fn evict_front(&mut self) {
        let Some(transaction) = self.entries.front().map(|e| e.transaction) else {
            return;
        };
        while self.entries.front().is_some_and(|e| e.transaction == transaction) {
            self.entries.pop_front();
        }
        log::debug!(target: "undo", "history full, dropping transaction {}", transaction);
    }

    fn retire_oldest_of(&mut self, owner: OwnerId) {
        let Some(transaction) = self.entries.iter().find(|e| e.owner == owner).map(|e| e.transaction) else {
            return;
        };
        while let Some(index) = self.entries.iter().position(|e| e.transaction == transaction) {
            let preceding: Vec<SharedUndoLayer> = self
                .entries
                .iter()
                .take(index)
                .map(|e| Rc::clone(&e.layer))
                .collect();
            if let Some(entry) = self.entries.remove(index) {
                entry.layer.borrow().make_permanent(&preceding);
            }
        }
        log::debug!(target: "undo", "transaction {} of owner {} made permanent", transaction, owner);
    }

    /// Take the newest action of `owner` out of the history and start undoing it
    /// against every layer recorded after it.
    pub fn begin_undo_last(&mut self, owner: OwnerId) -> Option<(TransactionId, UndoTransaction)> {
        let transaction = self.entries.iter().rev().find(|e| e.owner == owner)?.transaction;
        Some((transaction, self.begin_undo_transaction(transaction)))
    }

    /// Remove every part of `transaction`, newest first, pairing each with the layers
    /// recorded after it that belong to other transactions.
    fn begin_undo_transaction(&mut self, transaction: TransactionId) -> UndoTransaction {
        let mut parts = Vec::new();
        while let Some(index) = self.entries.iter().rposition(|e| e.transaction == transaction) {
            let subsequent: Vec<SharedUndoLayer> = self
                .entries
                .iter()
                .skip(index + 1)
                .map(|e| Rc::clone(&e.layer))
                .collect();
            if let Some(entry) = self.entries.remove(index) {
                parts.push(UndoLayer::undo_changes(&entry.layer, subsequent));
            }
        }
        log::info!(target: "undo", "undoing transaction {} in {} part(s)", transaction, parts.len());
        UndoTransaction::new(parts)
    }

    /// Split every recorded layer against a region an in-flight task has locked.
    /// Each layer keeps its cells inside `locked` and the cells outside move to a new
    /// entry directly after it with the same owner and transaction.
    pub fn split_by_locked_region(&mut self, locked: &VoxelMaskWithOrigin) {
        let bounds = locked.world_box();
        let mut out = VecDeque::with_capacity(self.entries.len() * 2);
        for entry in self.entries.drain(..) {
            if !entry.layer.borrow().bounding_box().overlaps(&bounds) {
                out.push_back(entry);
                continue;
            }
            let outside = entry.layer.borrow_mut().split_by_locked_region(locked);
            let (owner, transaction) = (entry.owner, entry.transaction);
            let keep_inside = !entry.layer.borrow().is_empty();
            if keep_inside {
                out.push_back(entry);
            }
            if !outside.is_empty() {
                out.push_back(HistoryEntry {
                    owner,
                    transaction,
                    layer: outside.into_shared(),
                });
            }
        }
        self.entries = out;
    }
}
