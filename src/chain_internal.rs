//! Internal chain structure: the entry arena and the dispatch core.
//!
//! # Architecture
//!
//! Entries live in a generational arena. Slot 0 is the head terminal, slot 1
//! the tail terminal; user entries occupy further slots and are linked
//! through `prev`/`next` ids. An [`EntryId`] carries (index, generation) so a
//! successor proxy held across a removal resolves to nothing instead of
//! aliasing a reused slot.
//!
//! Structural state is guarded by a reentrant mutex wrapping a `RefCell`:
//! mutations lock for their whole protocol (including lifecycle callbacks),
//! while dispatch takes the lock only for the brief moment it resolves a
//! (filter, neighbor) pair. No lock or borrow is ever held across a filter
//! callback, so callbacks may re-enter the chain freely from the same
//! thread.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use log::{trace, warn};
use parking_lot::ReentrantMutex;

use crate::error::Cause;
use crate::filter::{IoFilter, NextFilter};
use crate::future::ConnectFuture;
use crate::session::{IdleStatus, SessionRef, SESSION_CREATED_FUTURE};
use crate::write::{Message, WriteRequest};

/// Handle to one arena slot at one point in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryId {
    index: usize,
    gen: u64,
}

/// One linked entry: a named filter plus its neighborhood.
pub(crate) struct EntrySlot {
    pub(crate) name: String,
    pub(crate) filter: Arc<dyn IoFilter>,
    pub(crate) prev: Option<EntryId>,
    pub(crate) next: Option<EntryId>,
}

struct Slot {
    gen: u64,
    entry: Option<EntrySlot>,
}

/// The doubly-linked entry arena and the name index.
pub(crate) struct ChainGraph {
    slots: Vec<Slot>,
    free: Vec<usize>,
    by_name: HashMap<String, EntryId>,
}

impl ChainGraph {
    pub(crate) const HEAD: EntryId = EntryId { index: 0, gen: 0 };
    pub(crate) const TAIL: EntryId = EntryId { index: 1, gen: 0 };

    pub(crate) fn new(head: Arc<dyn IoFilter>, tail: Arc<dyn IoFilter>) -> Self {
        ChainGraph {
            slots: vec![
                Slot {
                    gen: 0,
                    entry: Some(EntrySlot {
                        name: "head".to_owned(),
                        filter: head,
                        prev: None,
                        next: Some(Self::TAIL),
                    }),
                },
                Slot {
                    gen: 0,
                    entry: Some(EntrySlot {
                        name: "tail".to_owned(),
                        filter: tail,
                        prev: Some(Self::HEAD),
                        next: None,
                    }),
                },
            ],
            free: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub(crate) fn slot(&self, id: EntryId) -> Option<&EntrySlot> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.gen == id.gen)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn slot_mut(&mut self, id: EntryId) -> Option<&mut EntrySlot> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.gen == id.gen)
            .and_then(|slot| slot.entry.as_mut())
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<EntryId> {
        self.by_name.get(name).copied()
    }

    pub(crate) fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Allocates an entry provisionally linked after `prev`.
    ///
    /// The entry records its neighborhood but the neighbors do not point at
    /// it yet, and the name is not indexed: the entry is unreachable until
    /// [`splice`](Self::splice). Fails when `prev` is no longer linked.
    pub(crate) fn alloc(
        &mut self,
        name: &str,
        filter: Arc<dyn IoFilter>,
        prev: EntryId,
    ) -> Option<EntryId> {
        let next = self.slot(prev)?.next?;
        let entry = EntrySlot {
            name: name.to_owned(),
            filter,
            prev: Some(prev),
            next: Some(next),
        };
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.entry = Some(entry);
                EntryId {
                    index,
                    gen: slot.gen,
                }
            }
            None => {
                let index = self.slots.len();
                self.slots.push(Slot {
                    gen: 0,
                    entry: Some(entry),
                });
                EntryId { index, gen: 0 }
            }
        };
        Some(id)
    }

    /// Makes a provisionally allocated entry reachable.
    ///
    /// Re-reads the base's current successor, so topology changes made by an
    /// `on_pre_add` callback are honored. Fails when the recorded base has
    /// meanwhile left the chain.
    pub(crate) fn splice(&mut self, id: EntryId) -> bool {
        let prev = match self.slot(id).and_then(|slot| slot.prev) {
            Some(prev) => prev,
            None => return false,
        };
        let next = match self.slot(prev).and_then(|slot| slot.next) {
            Some(next) => next,
            None => return false,
        };
        if self.slot(next).is_none() {
            return false;
        }
        let name = match self.slot_mut(id) {
            Some(slot) => {
                slot.prev = Some(prev);
                slot.next = Some(next);
                slot.name.clone()
            }
            None => return false,
        };
        if let Some(slot) = self.slot_mut(prev) {
            slot.next = Some(id);
        }
        if let Some(slot) = self.slot_mut(next) {
            slot.prev = Some(id);
        }
        self.by_name.insert(name, id);
        true
    }

    /// Unlinks an entry: neighbors skip it and its name leaves the index.
    ///
    /// The detached slot keeps its own pointers so a successor proxy held
    /// across the removal still resolves the old neighborhood until the slot
    /// is [`release`](Self::release)d.
    pub(crate) fn unsplice(&mut self, id: EntryId) {
        let (prev, next, name) = match self.slot(id) {
            Some(slot) => (slot.prev, slot.next, slot.name.clone()),
            None => return,
        };
        if let Some(prev) = prev {
            if let Some(slot) = self.slot_mut(prev) {
                slot.next = next;
            }
        }
        if let Some(next) = next {
            if let Some(slot) = self.slot_mut(next) {
                slot.prev = prev;
            }
        }
        if self.by_name.get(&name) == Some(&id) {
            self.by_name.remove(&name);
        }
    }

    /// Swaps an entry's filter in place, returning the old one.
    ///
    /// Links, name and index position are untouched; this backs `replace`,
    /// which deliberately skips the lifecycle hooks.
    pub(crate) fn set_filter(
        &mut self,
        id: EntryId,
        filter: Arc<dyn IoFilter>,
    ) -> Option<Arc<dyn IoFilter>> {
        self.slot_mut(id)
            .map(|slot| std::mem::replace(&mut slot.filter, filter))
    }

    /// Frees a slot for reuse, invalidating every id pointing at it.
    pub(crate) fn release(&mut self, id: EntryId) {
        if id == Self::HEAD || id == Self::TAIL {
            return;
        }
        if let Some(slot) = self.slots.get_mut(id.index) {
            if slot.gen == id.gen && slot.entry.is_some() {
                slot.entry = None;
                slot.gen += 1;
                self.free.push(id.index);
            }
        }
    }

    /// User entries in chain order, head and tail excluded.
    pub(crate) fn user_entries(&self) -> Vec<EntryId> {
        let mut out = Vec::new();
        let mut cursor = self.slot(Self::HEAD).and_then(|slot| slot.next);
        while let Some(id) = cursor {
            if id == Self::TAIL {
                break;
            }
            let Some(slot) = self.slot(id) else { break };
            out.push(id);
            cursor = slot.next;
        }
        out
    }
}

/// Shared core of one chain: the session back-reference and the guarded
/// graph, plus the per-entry dispatch the successor proxies call into.
pub(crate) struct ChainCore {
    pub(crate) session: SessionRef,
    pub(crate) state: ReentrantMutex<RefCell<ChainGraph>>,
    /// Self-reference handed to successor proxies, set at construction.
    pub(crate) weak_self: std::sync::Weak<ChainCore>,
}

impl ChainCore {
    pub(crate) fn next_of(&self, id: EntryId) -> Option<EntryId> {
        let guard = self.state.lock();
        let graph = guard.borrow();
        graph.slot(id).and_then(|slot| slot.next)
    }

    pub(crate) fn prev_of(&self, id: EntryId) -> Option<EntryId> {
        let guard = self.state.lock();
        let graph = guard.borrow();
        graph.slot(id).and_then(|slot| slot.prev)
    }

    fn filter_at(&self, id: EntryId) -> Option<Arc<dyn IoFilter>> {
        let guard = self.state.lock();
        let graph = guard.borrow();
        graph.slot(id).map(|slot| Arc::clone(&slot.filter))
    }

    pub(crate) fn proxy(&self, id: EntryId) -> NextFilter {
        NextFilter {
            chain: self.weak_self.clone(),
            entry: id,
        }
    }

    /// Resolves the filter and proxy for one dispatch hop, or reports where
    /// the event went instead.
    fn resolve(
        &self,
        entry: Option<EntryId>,
        event: &str,
    ) -> Option<(Arc<dyn IoFilter>, NextFilter)> {
        let id = match entry {
            Some(id) => id,
            None => {
                trace!("{event} fell off the end of the chain");
                return None;
            }
        };
        match self.filter_at(id) {
            Some(filter) => Some((filter, self.proxy(id))),
            None => {
                trace!("{event} dropped: entry no longer in the chain");
                None
            }
        }
    }

    /// Re-enters the chain at the head with a failure cause.
    pub(crate) fn fire_exception_caught(&self, cause: Cause) {
        self.call_next_exception_caught(Some(ChainGraph::HEAD), cause);
    }

    pub(crate) fn call_next_session_created(&self, entry: Option<EntryId>) {
        let Some((filter, next)) = self.resolve(entry, "session_created") else {
            return;
        };
        if let Err(e) = filter.session_created(&next, &self.session) {
            self.fire_exception_caught(Arc::from(e));
        }
    }

    pub(crate) fn call_next_session_opened(&self, entry: Option<EntryId>) {
        let Some((filter, next)) = self.resolve(entry, "session_opened") else {
            return;
        };
        if let Err(e) = filter.session_opened(&next, &self.session) {
            self.fire_exception_caught(Arc::from(e));
        }
    }

    pub(crate) fn call_next_session_closed(&self, entry: Option<EntryId>) {
        let Some((filter, next)) = self.resolve(entry, "session_closed") else {
            return;
        };
        if let Err(e) = filter.session_closed(&next, &self.session) {
            self.fire_exception_caught(Arc::from(e));
        }
    }

    pub(crate) fn call_next_session_idle(&self, entry: Option<EntryId>, status: IdleStatus) {
        let Some((filter, next)) = self.resolve(entry, "session_idle") else {
            return;
        };
        if let Err(e) = filter.session_idle(&next, &self.session, status) {
            self.fire_exception_caught(Arc::from(e));
        }
    }

    pub(crate) fn call_next_exception_caught(&self, entry: Option<EntryId>, cause: Cause) {
        // Connect still pending: the failure belongs to the connect future,
        // not to the filters. Close hard and settle.
        let pending: Option<ConnectFuture> =
            self.session.attributes().take(&SESSION_CREATED_FUTURE);
        if let Some(future) = pending {
            self.session.close(true);
            future.set_exception(cause);
            return;
        }
        let Some((filter, next)) = self.resolve(entry, "exception_caught") else {
            return;
        };
        if let Err(e) = filter.exception_caught(&next, &self.session, cause) {
            // Not re-fired: an error thrown while handling an error would
            // recurse forever.
            warn!(
                "unexpected error from exception_caught in session {}: {e}",
                self.session.id()
            );
        }
    }

    pub(crate) fn call_next_message_received(&self, entry: Option<EntryId>, message: Message) {
        let Some((filter, next)) = self.resolve(entry, "message_received") else {
            return;
        };
        if let Err(e) = filter.message_received(&next, &self.session, message) {
            self.fire_exception_caught(Arc::from(e));
        }
    }

    pub(crate) fn call_next_message_sent(&self, entry: Option<EntryId>, request: WriteRequest) {
        let Some((filter, next)) = self.resolve(entry, "message_sent") else {
            return;
        };
        if let Err(e) = filter.message_sent(&next, &self.session, request) {
            self.fire_exception_caught(Arc::from(e));
        }
    }

    pub(crate) fn call_previous_filter_write(&self, entry: Option<EntryId>, request: WriteRequest) {
        let Some((filter, next)) = self.resolve(entry, "filter_write") else {
            return;
        };
        let future = request.future().clone();
        if let Err(e) = filter.filter_write(&next, &self.session, request) {
            let cause: Cause = Arc::from(e);
            future.set_exception(Arc::clone(&cause));
            self.fire_exception_caught(cause);
        }
    }

    pub(crate) fn call_previous_filter_close(&self, entry: Option<EntryId>) {
        let Some((filter, next)) = self.resolve(entry, "filter_close") else {
            return;
        };
        if let Err(e) = filter.filter_close(&next, &self.session) {
            self.fire_exception_caught(Arc::from(e));
        }
    }
}
