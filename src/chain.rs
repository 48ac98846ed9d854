//! The filter chain: structural API, event entry points, and the two
//! terminal filters.

use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Instant;

use log::warn;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::chain_internal::{ChainCore, ChainGraph, EntryId};
use crate::error::{Cause, ChainError, EventError, EventResult, LifecycleHook};
use crate::filter::{IoFilter, NextFilter};
use crate::future::ConnectFuture;
use crate::session::{IdleStatus, SessionRef, SESSION_CREATED_FUTURE};
use crate::write::{Message, WriteRequest};

type StateGuard<'a> = ReentrantMutexGuard<'a, RefCell<ChainGraph>>;

/// Snapshot of one user entry: its name and the filter behind it.
#[derive(Clone)]
pub struct EntryInfo {
    name: String,
    filter: Arc<dyn IoFilter>,
}

impl EntryInfo {
    /// The entry's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The filter held by the entry at snapshot time.
    pub fn filter(&self) -> &Arc<dyn IoFilter> {
        &self.filter
    }
}

impl fmt::Debug for EntryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntryInfo").field(&self.name).finish()
    }
}

/// One session's bidirectional filter pipeline.
///
/// Every session owns exactly one chain. Inbound events (`fire_session_*`,
/// `fire_message_*`, `fire_exception_caught`) enter at the fixed head and
/// traverse toward the tail, where the application handler runs; outbound
/// events (`fire_filter_write`, `fire_filter_close`) enter at the fixed tail
/// and traverse toward the head, where the transport acts. User filters are
/// threaded between the two terminals and addressed by unique name.
///
/// # Concurrency
///
/// Structural mutations (`add_*`, `remove*`, `replace*`, `clear`) serialize
/// on the chain's reentrant lock and may be issued from any thread, including
/// from within filter callbacks on the dispatching thread. Event dispatch
/// takes no long-lived lock and assumes the session's single I/O thread
/// drives it; ordering across threads is whatever the caller enforces.
pub struct FilterChain {
    core: Arc<ChainCore>,
}

impl FilterChain {
    /// Creates the chain for a session, containing only head and tail.
    pub fn new(session: SessionRef) -> FilterChain {
        let core = Arc::new_cyclic(|weak: &Weak<ChainCore>| ChainCore {
            session,
            state: ReentrantMutex::new(RefCell::new(ChainGraph::new(
                Arc::new(HeadFilter),
                Arc::new(TailFilter {
                    chain: weak.clone(),
                }),
            ))),
            weak_self: weak.clone(),
        });
        FilterChain { core }
    }

    /// Structurally clones another chain: same session, same filter
    /// instances under the same names, in the same order.
    ///
    /// No `on_pre_add`/`on_post_add` hooks run: this duplicates topology,
    /// it does not re-register the filters.
    pub fn copy_of(source: &FilterChain) -> FilterChain {
        let chain = FilterChain::new(Arc::clone(&source.core.session));
        let entries = source.get_all();
        let guard = chain.core.state.lock();
        let mut prev = ChainGraph::HEAD;
        for entry in entries {
            let mut graph = guard.borrow_mut();
            if let Some(id) = graph.alloc(entry.name(), Arc::clone(entry.filter()), prev) {
                graph.splice(id);
                prev = id;
            }
        }
        drop(guard);
        chain
    }

    pub(crate) fn from_core(core: Arc<ChainCore>) -> FilterChain {
        FilterChain { core }
    }

    /// The session this chain belongs to.
    pub fn session(&self) -> &SessionRef {
        &self.core.session
    }

    // ----- structural mutations -----

    /// Inserts a filter immediately after the head.
    pub fn add_first(&self, name: &str, filter: Arc<dyn IoFilter>) -> Result<(), ChainError> {
        let guard = self.core.state.lock();
        self.check_addable(&guard, name)?;
        self.register(&guard, ChainGraph::HEAD, name, filter)
    }

    /// Inserts a filter immediately before the tail.
    pub fn add_last(&self, name: &str, filter: Arc<dyn IoFilter>) -> Result<(), ChainError> {
        let guard = self.core.state.lock();
        self.check_addable(&guard, name)?;
        let prev = guard
            .borrow()
            .slot(ChainGraph::TAIL)
            .and_then(|slot| slot.prev)
            .unwrap_or(ChainGraph::HEAD);
        self.register(&guard, prev, name, filter)
    }

    /// Inserts a filter just before the named one.
    pub fn add_before(
        &self,
        base_name: &str,
        name: &str,
        filter: Arc<dyn IoFilter>,
    ) -> Result<(), ChainError> {
        let guard = self.core.state.lock();
        let base = self.check_old_name(&guard, base_name)?;
        self.check_addable(&guard, name)?;
        let prev = guard
            .borrow()
            .slot(base)
            .and_then(|slot| slot.prev)
            .unwrap_or(ChainGraph::HEAD);
        self.register(&guard, prev, name, filter)
    }

    /// Inserts a filter just after the named one.
    pub fn add_after(
        &self,
        base_name: &str,
        name: &str,
        filter: Arc<dyn IoFilter>,
    ) -> Result<(), ChainError> {
        let guard = self.core.state.lock();
        let base = self.check_old_name(&guard, base_name)?;
        self.check_addable(&guard, name)?;
        self.register(&guard, base, name, filter)
    }

    /// Removes the named filter, returning it.
    pub fn remove(&self, name: &str) -> Result<Arc<dyn IoFilter>, ChainError> {
        let guard = self.core.state.lock();
        let id = self.check_old_name(&guard, name)?;
        self.deregister(&guard, id)
    }

    /// Removes the first entry (head→tail) holding exactly this filter
    /// instance, returning it.
    pub fn remove_filter(
        &self,
        filter: &Arc<dyn IoFilter>,
    ) -> Result<Arc<dyn IoFilter>, ChainError> {
        let guard = self.core.state.lock();
        let ids = guard.borrow().user_entries();
        for id in ids {
            let matched = guard
                .borrow()
                .slot(id)
                .map_or(false, |slot| Arc::ptr_eq(&slot.filter, filter));
            if matched {
                return self.deregister(&guard, id);
            }
        }
        Err(ChainError::NotFound(
            "no entry holds the given filter".to_owned(),
        ))
    }

    /// Removes the first entry (head→tail) whose filter matches the
    /// predicate, returning it.
    pub fn remove_matching(
        &self,
        predicate: impl Fn(&Arc<dyn IoFilter>) -> bool,
    ) -> Result<Arc<dyn IoFilter>, ChainError> {
        let guard = self.core.state.lock();
        let ids = guard.borrow().user_entries();
        for id in ids {
            let matched = guard
                .borrow()
                .slot(id)
                .map_or(false, |slot| predicate(&slot.filter));
            if matched {
                return self.deregister(&guard, id);
            }
        }
        Err(ChainError::NotFound("no matching filter".to_owned()))
    }

    /// Swaps the named entry's filter in place, returning the old one.
    ///
    /// The entry keeps its name and its position; no lifecycle hooks run on
    /// either filter, those are for topology changes, not swaps.
    pub fn replace(
        &self,
        name: &str,
        new_filter: Arc<dyn IoFilter>,
    ) -> Result<Arc<dyn IoFilter>, ChainError> {
        let guard = self.core.state.lock();
        let id = self.check_old_name(&guard, name)?;
        let result = guard
            .borrow_mut()
            .set_filter(id, new_filter)
            .ok_or_else(|| ChainError::NotFound(name.to_owned()));
        result
    }

    /// Swaps the first entry (head→tail) holding exactly `old_filter`.
    pub fn replace_filter(
        &self,
        old_filter: &Arc<dyn IoFilter>,
        new_filter: Arc<dyn IoFilter>,
    ) -> Result<(), ChainError> {
        let guard = self.core.state.lock();
        let ids = guard.borrow().user_entries();
        for id in ids {
            let matched = guard
                .borrow()
                .slot(id)
                .map_or(false, |slot| Arc::ptr_eq(&slot.filter, old_filter));
            if matched {
                guard.borrow_mut().set_filter(id, new_filter);
                return Ok(());
            }
        }
        Err(ChainError::NotFound(
            "no entry holds the given filter".to_owned(),
        ))
    }

    /// Swaps the first entry (head→tail) whose filter matches the
    /// predicate, returning the old filter.
    pub fn replace_matching(
        &self,
        predicate: impl Fn(&Arc<dyn IoFilter>) -> bool,
        new_filter: Arc<dyn IoFilter>,
    ) -> Result<Arc<dyn IoFilter>, ChainError> {
        let guard = self.core.state.lock();
        let ids = guard.borrow().user_entries();
        for id in ids {
            let matched = guard
                .borrow()
                .slot(id)
                .map_or(false, |slot| predicate(&slot.filter));
            if matched {
                if let Some(old) = guard.borrow_mut().set_filter(id, new_filter) {
                    return Ok(old);
                }
                break;
            }
        }
        Err(ChainError::NotFound("no matching filter".to_owned()))
    }

    /// Removes every user filter, best-effort.
    ///
    /// A lifecycle failure does not stop the sweep: remaining entries are
    /// still deregistered and the first error is returned at the end.
    pub fn clear(&self) -> Result<(), ChainError> {
        let guard = self.core.state.lock();
        let ids = guard.borrow().user_entries();
        let mut first_error: Option<ChainError> = None;
        for id in ids {
            if guard.borrow().slot(id).is_none() {
                // Already gone, e.g. removed by an earlier filter's hook.
                continue;
            }
            if let Err(e) = self.deregister(&guard, id) {
                warn!("clear: {e}");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ----- lookups -----

    /// The filter registered under `name`, if any.
    pub fn get(&self, name: &str) -> Option<Arc<dyn IoFilter>> {
        self.get_entry(name).map(|entry| entry.filter)
    }

    /// The first filter (head→tail) matching the predicate, if any.
    pub fn get_matching(
        &self,
        predicate: impl Fn(&Arc<dyn IoFilter>) -> bool,
    ) -> Option<Arc<dyn IoFilter>> {
        self.get_entry_matching(predicate).map(|entry| entry.filter)
    }

    /// Snapshot of the entry registered under `name`, if any.
    pub fn get_entry(&self, name: &str) -> Option<EntryInfo> {
        let guard = self.core.state.lock();
        let graph = guard.borrow();
        let id = graph.lookup(name)?;
        graph.slot(id).map(|slot| EntryInfo {
            name: slot.name.clone(),
            filter: Arc::clone(&slot.filter),
        })
    }

    /// Snapshot of the first entry (head→tail) matching the predicate.
    pub fn get_entry_matching(
        &self,
        predicate: impl Fn(&Arc<dyn IoFilter>) -> bool,
    ) -> Option<EntryInfo> {
        let guard = self.core.state.lock();
        let graph = guard.borrow();
        for id in graph.user_entries() {
            if let Some(slot) = graph.slot(id) {
                if predicate(&slot.filter) {
                    return Some(EntryInfo {
                        name: slot.name.clone(),
                        filter: Arc::clone(&slot.filter),
                    });
                }
            }
        }
        None
    }

    /// Snapshot of the first entry holding exactly this filter instance.
    pub fn get_entry_for(&self, filter: &Arc<dyn IoFilter>) -> Option<EntryInfo> {
        self.get_entry_matching(|candidate| Arc::ptr_eq(candidate, filter))
    }

    /// The successor proxy of the named entry, if present.
    ///
    /// Lets external code resume traversal from that filter's position, the
    /// same way the filter itself would.
    pub fn get_next_filter(&self, name: &str) -> Option<NextFilter> {
        let guard = self.core.state.lock();
        let id = guard.borrow().lookup(name)?;
        Some(self.core.proxy(id))
    }

    /// The successor proxy of the first entry (head→tail) whose filter
    /// matches the predicate.
    pub fn get_next_filter_matching(
        &self,
        predicate: impl Fn(&Arc<dyn IoFilter>) -> bool,
    ) -> Option<NextFilter> {
        let guard = self.core.state.lock();
        let graph = guard.borrow();
        for id in graph.user_entries() {
            if let Some(slot) = graph.slot(id) {
                if predicate(&slot.filter) {
                    return Some(self.core.proxy(id));
                }
            }
        }
        None
    }

    /// The successor proxy of the first entry holding exactly this filter
    /// instance.
    pub fn get_next_filter_for(&self, filter: &Arc<dyn IoFilter>) -> Option<NextFilter> {
        self.get_next_filter_matching(|candidate| Arc::ptr_eq(candidate, filter))
    }

    /// Whether a filter is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        let guard = self.core.state.lock();
        let contained = guard.borrow().contains_name(name);
        contained
    }

    /// Whether any entry holds exactly this filter instance.
    pub fn contains_filter(&self, filter: &Arc<dyn IoFilter>) -> bool {
        self.get_entry_for(filter).is_some()
    }

    /// Whether any entry's filter matches the predicate.
    pub fn contains_matching(&self, predicate: impl Fn(&Arc<dyn IoFilter>) -> bool) -> bool {
        self.get_entry_matching(predicate).is_some()
    }

    /// Snapshots all user entries in chain order, head and tail excluded.
    pub fn get_all(&self) -> Vec<EntryInfo> {
        let guard = self.core.state.lock();
        let graph = guard.borrow();
        graph
            .user_entries()
            .into_iter()
            .filter_map(|id| {
                graph.slot(id).map(|slot| EntryInfo {
                    name: slot.name.clone(),
                    filter: Arc::clone(&slot.filter),
                })
            })
            .collect()
    }

    /// Snapshots all user entries in reverse chain order.
    pub fn get_all_reversed(&self) -> Vec<EntryInfo> {
        let mut entries = self.get_all();
        entries.reverse();
        entries
    }

    // ----- event entry points -----

    /// Fires `session_created` inbound from the head.
    pub fn fire_session_created(&self) {
        self.core.call_next_session_created(Some(ChainGraph::HEAD));
    }

    /// Fires `session_opened` inbound from the head.
    pub fn fire_session_opened(&self) {
        self.core.call_next_session_opened(Some(ChainGraph::HEAD));
    }

    /// Settles the session's close future, then fires `session_closed`
    /// inbound from the head.
    pub fn fire_session_closed(&self) {
        self.core.session.close_future().set_closed();
        self.core.call_next_session_closed(Some(ChainGraph::HEAD));
    }

    /// Bumps the session's idle counter, then fires `session_idle` inbound
    /// from the head.
    pub fn fire_session_idle(&self, status: IdleStatus) {
        self.core
            .session
            .increase_idle_count(status, Instant::now());
        self.core
            .call_next_session_idle(Some(ChainGraph::HEAD), status);
    }

    /// Accounts read bytes for buffer messages, then fires
    /// `message_received` inbound from the head.
    pub fn fire_message_received(&self, message: Message) {
        if let Some(buffer) = message.as_buffer() {
            self.core
                .session
                .increase_read_bytes(buffer.len(), Instant::now());
        }
        self.core
            .call_next_message_received(Some(ChainGraph::HEAD), message);
    }

    /// Settles the request's write future, then fires `message_sent`
    /// inbound from the head.
    pub fn fire_message_sent(&self, request: WriteRequest) {
        request.future().set_written();
        self.core
            .call_next_message_sent(Some(ChainGraph::HEAD), request);
    }

    /// Fires `exception_caught` inbound from the head.
    ///
    /// While a connect is pending (the session carries
    /// [`SESSION_CREATED_FUTURE`]), the cause is routed to the connect
    /// future instead of the filters and the session is closed forcibly.
    pub fn fire_exception_caught(&self, cause: Cause) {
        self.core.fire_exception_caught(cause);
    }

    /// Fires `filter_write` outbound from the tail.
    pub fn fire_filter_write(&self, request: WriteRequest) {
        self.core
            .call_previous_filter_write(Some(ChainGraph::TAIL), request);
    }

    /// Fires `filter_close` outbound from the tail.
    pub fn fire_filter_close(&self) {
        self.core.call_previous_filter_close(Some(ChainGraph::TAIL));
    }

    // ----- registration protocol -----

    fn check_addable(&self, guard: &StateGuard<'_>, name: &str) -> Result<(), ChainError> {
        if guard.borrow().contains_name(name) {
            return Err(ChainError::DuplicateName(name.to_owned()));
        }
        Ok(())
    }

    fn check_old_name(&self, guard: &StateGuard<'_>, name: &str) -> Result<EntryId, ChainError> {
        guard
            .borrow()
            .lookup(name)
            .ok_or_else(|| ChainError::NotFound(name.to_owned()))
    }

    fn lifecycle_error(&self, hook: LifecycleHook, name: &str, source: EventError) -> ChainError {
        ChainError::Lifecycle {
            hook,
            name: name.to_owned(),
            session_id: self.core.session.id(),
            source,
        }
    }

    /// Links a new entry after `prev`, running the add hooks.
    ///
    /// `on_pre_add` runs against the provisional, still unreachable entry;
    /// failure aborts with nothing changed. After the splice the entry is
    /// live; an `on_post_add` failure rolls it back structurally without
    /// invoking the remove hooks.
    fn register(
        &self,
        guard: &StateGuard<'_>,
        prev: EntryId,
        name: &str,
        filter: Arc<dyn IoFilter>,
    ) -> Result<(), ChainError> {
        let id = match guard.borrow_mut().alloc(name, Arc::clone(&filter), prev) {
            Some(id) => id,
            None => {
                return Err(ChainError::NotFound(format!(
                    "insertion point for '{name}'"
                )))
            }
        };
        let next = self.core.proxy(id);

        if let Err(source) = filter.on_pre_add(self, name, &next) {
            guard.borrow_mut().release(id);
            return Err(self.lifecycle_error(LifecycleHook::PreAdd, name, source));
        }

        if !guard.borrow_mut().splice(id) {
            guard.borrow_mut().release(id);
            return Err(ChainError::NotFound(format!(
                "insertion point for '{name}'"
            )));
        }

        if let Err(source) = filter.on_post_add(self, name, &next) {
            let mut graph = guard.borrow_mut();
            graph.unsplice(id);
            graph.release(id);
            return Err(self.lifecycle_error(LifecycleHook::PostAdd, name, source));
        }
        Ok(())
    }

    /// Unlinks an entry, running the remove hooks.
    ///
    /// An `on_pre_remove` failure aborts with nothing changed. The entry is
    /// unlinked and unindexed before `on_post_remove`, whose proxy still
    /// resolves the old neighborhood; its failure is surfaced although the
    /// filter is already gone.
    fn deregister(
        &self,
        guard: &StateGuard<'_>,
        id: EntryId,
    ) -> Result<Arc<dyn IoFilter>, ChainError> {
        let (name, filter) = match guard.borrow().slot(id) {
            Some(slot) => (slot.name.clone(), Arc::clone(&slot.filter)),
            None => return Err(ChainError::NotFound("entry already removed".to_owned())),
        };
        let next = self.core.proxy(id);

        if let Err(source) = filter.on_pre_remove(self, &name, &next) {
            return Err(self.lifecycle_error(LifecycleHook::PreRemove, &name, source));
        }

        guard.borrow_mut().unsplice(id);
        let post = filter.on_post_remove(self, &name, &next);
        guard.borrow_mut().release(id);

        match post {
            Ok(()) => Ok(filter),
            Err(source) => Err(self.lifecycle_error(LifecycleHook::PostRemove, &name, source)),
        }
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.get_all();
        f.debug_struct("FilterChain")
            .field("session", &self.core.session.id())
            .field(
                "entries",
                &entries.iter().map(EntryInfo::name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Outbound terminal: hands write and close requests to the transport side.
struct HeadFilter;

impl IoFilter for HeadFilter {
    fn filter_write(
        &self,
        _next: &NextFilter,
        session: &SessionRef,
        request: WriteRequest,
    ) -> EventResult {
        if let Some(buffer) = request.message().as_buffer() {
            match buffer.len() {
                // Zero-sized buffers are internal delimiters, not payload.
                0 => {}
                n => session.increase_scheduled_write_bytes(n),
            }
        }
        session.write_queue().offer(session, request);
        if !session.is_write_suspended() {
            session.processor().flush(session);
        }
        Ok(())
    }

    fn filter_close(&self, _next: &NextFilter, session: &SessionRef) -> EventResult {
        session.processor().remove(session);
        Ok(())
    }
}

/// Inbound terminal: delegates to the application handler and settles the
/// session-level glue (connect future, teardown, read-operation polling).
struct TailFilter {
    chain: Weak<ChainCore>,
}

impl IoFilter for TailFilter {
    fn session_created(&self, _next: &NextFilter, session: &SessionRef) -> EventResult {
        let result = session.handler().session_created(session);
        // Completes the pending connect whatever the handler did.
        if let Some(future) = session
            .attributes()
            .take::<ConnectFuture>(&SESSION_CREATED_FUTURE)
        {
            future.set_session(Arc::clone(session));
        }
        result
    }

    fn session_opened(&self, _next: &NextFilter, session: &SessionRef) -> EventResult {
        session.handler().session_opened(session)
    }

    fn session_closed(&self, _next: &NextFilter, session: &SessionRef) -> EventResult {
        let handler_result = session.handler().session_closed(session);
        // Teardown cascade; every step runs even when an earlier one fails.
        session.write_queue().dispose(session);
        session.attributes().dispose();
        let clear_result = match self.chain.upgrade() {
            Some(core) => FilterChain::from_core(core)
                .clear()
                .map_err(|e| Box::new(e) as EventError),
            None => Ok(()),
        };
        if session.use_read_operation() {
            session.offer_closed_read_future();
        }
        handler_result.and(clear_result)
    }

    fn session_idle(
        &self,
        _next: &NextFilter,
        session: &SessionRef,
        status: IdleStatus,
    ) -> EventResult {
        session.handler().session_idle(session, status)
    }

    fn exception_caught(
        &self,
        _next: &NextFilter,
        session: &SessionRef,
        cause: Cause,
    ) -> EventResult {
        let result = session
            .handler()
            .exception_caught(session, Arc::clone(&cause));
        if session.use_read_operation() {
            session.offer_failed_read_future(cause);
        }
        result
    }

    fn message_received(
        &self,
        _next: &NextFilter,
        session: &SessionRef,
        message: Message,
    ) -> EventResult {
        // Buffers are counted as read bytes at the head. Everything else,
        // including the empty buffer marking a message boundary, counts as
        // one received message here.
        let counts_as_message = match message.as_buffer() {
            None => true,
            Some(buffer) => buffer.is_empty(),
        };
        if counts_as_message {
            session.increase_read_messages(Instant::now());
        }
        let result = session.handler().message_received(session, &message);
        if session.use_read_operation() {
            session.offer_read_future(message);
        }
        result
    }

    fn message_sent(
        &self,
        _next: &NextFilter,
        session: &SessionRef,
        request: WriteRequest,
    ) -> EventResult {
        session.handler().message_sent(session, request.message())
    }

    // filter_write and filter_close keep their defaults: the tail is only
    // the outbound entry point, the proxy walks backward from here.
}
