//! The filter contract and the per-entry successor proxy.
//!
//! A filter intercepts the nine session events on their way through the
//! chain. Every event method receives a [`NextFilter`], the handle that
//! resumes traversal, and defaults to plain forwarding, so implementations
//! override only the events they care about, exactly like an adapter.

use std::fmt;
use std::sync::Weak;

use log::trace;

use crate::chain::FilterChain;
use crate::chain_internal::{ChainCore, EntryId};
use crate::error::{Cause, EventResult};
use crate::session::{IdleStatus, SessionRef};
use crate::write::{Message, WriteRequest};

/// A filter threaded into a session's chain.
///
/// Filters are shared: the chain holds them as `Arc<dyn IoFilter>`, the same
/// instance may be threaded into several chains at once (chain copies reuse
/// instances), and all methods take `&self`. State, if any, lives behind the
/// filter's own interior mutability.
///
/// # Event methods
///
/// Inbound events arrive head→tail, outbound events tail→head. A method that
/// does not forward through `next` stops the traversal; a method returning
/// `Err` is converted by the chain into an `exception_caught` event (and, for
/// `filter_write`, additionally settles the request's future with the cause).
///
/// # Lifecycle hooks
///
/// The four `on_*` hooks run only on topology changes (add and remove, not
/// [`replace`](crate::chain::FilterChain::replace)). They observe a
/// consistently linked chain: `on_pre_add` runs before the entry is
/// reachable, `on_post_add` after; `on_pre_remove` runs before the entry is
/// unlinked, `on_post_remove` after. A failing `on_post_add` rolls the entry
/// back structurally without invoking the remove hooks.
pub trait IoFilter: Send + Sync {
    /// Invoked before this filter's entry becomes reachable in `chain`.
    fn on_pre_add(&self, chain: &FilterChain, name: &str, next: &NextFilter) -> EventResult {
        let _ = (chain, name, next);
        Ok(())
    }

    /// Invoked after this filter's entry was spliced into `chain`.
    fn on_post_add(&self, chain: &FilterChain, name: &str, next: &NextFilter) -> EventResult {
        let _ = (chain, name, next);
        Ok(())
    }

    /// Invoked before this filter's entry is unlinked from `chain`.
    fn on_pre_remove(&self, chain: &FilterChain, name: &str, next: &NextFilter) -> EventResult {
        let _ = (chain, name, next);
        Ok(())
    }

    /// Invoked after this filter's entry was unlinked from `chain`.
    fn on_post_remove(&self, chain: &FilterChain, name: &str, next: &NextFilter) -> EventResult {
        let _ = (chain, name, next);
        Ok(())
    }

    /// Inbound: the session was created.
    fn session_created(&self, next: &NextFilter, session: &SessionRef) -> EventResult {
        let _ = session;
        next.session_created();
        Ok(())
    }

    /// Inbound: the session is open for traffic.
    fn session_opened(&self, next: &NextFilter, session: &SessionRef) -> EventResult {
        let _ = session;
        next.session_opened();
        Ok(())
    }

    /// Inbound: the session was closed.
    fn session_closed(&self, next: &NextFilter, session: &SessionRef) -> EventResult {
        let _ = session;
        next.session_closed();
        Ok(())
    }

    /// Inbound: the session idled.
    fn session_idle(
        &self,
        next: &NextFilter,
        session: &SessionRef,
        status: IdleStatus,
    ) -> EventResult {
        let _ = session;
        next.session_idle(status);
        Ok(())
    }

    /// Inbound: an error is traversing the chain.
    fn exception_caught(
        &self,
        next: &NextFilter,
        session: &SessionRef,
        cause: Cause,
    ) -> EventResult {
        let _ = session;
        next.exception_caught(cause);
        Ok(())
    }

    /// Inbound: a message arrived from the transport side.
    fn message_received(
        &self,
        next: &NextFilter,
        session: &SessionRef,
        message: Message,
    ) -> EventResult {
        let _ = session;
        next.message_received(message);
        Ok(())
    }

    /// Inbound: a write request was flushed to the transport.
    fn message_sent(
        &self,
        next: &NextFilter,
        session: &SessionRef,
        request: WriteRequest,
    ) -> EventResult {
        let _ = session;
        next.message_sent(request);
        Ok(())
    }

    /// Outbound: a write request is travelling toward the transport.
    fn filter_write(
        &self,
        next: &NextFilter,
        session: &SessionRef,
        request: WriteRequest,
    ) -> EventResult {
        let _ = session;
        next.filter_write(request);
        Ok(())
    }

    /// Outbound: a close request is travelling toward the transport.
    fn filter_close(&self, next: &NextFilter, session: &SessionRef) -> EventResult {
        let _ = session;
        next.filter_close();
        Ok(())
    }
}

/// Resumes traversal from one entry's position in the chain.
///
/// The proxy is a (chain, entry) pair, not a captured neighbor: it reads the
/// entry's *current* `next` (inbound) or `prev` (outbound) at call time, so a
/// filter may add, remove or replace entries during a callback and the rest
/// of the traversal observes the new topology.
///
/// A proxy outliving its entry or its chain drops events instead of
/// delivering them anywhere stale.
#[derive(Clone)]
pub struct NextFilter {
    pub(crate) chain: Weak<ChainCore>,
    pub(crate) entry: EntryId,
}

impl NextFilter {
    /// The chain this proxy dispatches into, while it is alive.
    ///
    /// Gives filters a way to mutate their own chain from inside an event
    /// callback without holding a strong reference to it.
    pub fn chain(&self) -> Option<FilterChain> {
        self.chain.upgrade().map(FilterChain::from_core)
    }

    fn forward(&self, event: &str, dispatch: impl FnOnce(&ChainCore, Option<EntryId>)) {
        match self.chain.upgrade() {
            Some(core) => {
                let next = core.next_of(self.entry);
                dispatch(&core, next);
            }
            None => trace!("{event} dropped: chain is gone"),
        }
    }

    fn backward(&self, event: &str, dispatch: impl FnOnce(&ChainCore, Option<EntryId>)) {
        match self.chain.upgrade() {
            Some(core) => {
                let prev = core.prev_of(self.entry);
                dispatch(&core, prev);
            }
            None => trace!("{event} dropped: chain is gone"),
        }
    }

    /// Forwards `session_created` to the next entry.
    pub fn session_created(&self) {
        self.forward("session_created", |core, next| {
            core.call_next_session_created(next);
        });
    }

    /// Forwards `session_opened` to the next entry.
    pub fn session_opened(&self) {
        self.forward("session_opened", |core, next| {
            core.call_next_session_opened(next);
        });
    }

    /// Forwards `session_closed` to the next entry.
    pub fn session_closed(&self) {
        self.forward("session_closed", |core, next| {
            core.call_next_session_closed(next);
        });
    }

    /// Forwards `session_idle` to the next entry.
    pub fn session_idle(&self, status: IdleStatus) {
        self.forward("session_idle", |core, next| {
            core.call_next_session_idle(next, status);
        });
    }

    /// Forwards `exception_caught` to the next entry.
    pub fn exception_caught(&self, cause: Cause) {
        self.forward("exception_caught", |core, next| {
            core.call_next_exception_caught(next, cause);
        });
    }

    /// Forwards `message_received` to the next entry.
    pub fn message_received(&self, message: Message) {
        self.forward("message_received", |core, next| {
            core.call_next_message_received(next, message);
        });
    }

    /// Forwards `message_sent` to the next entry.
    pub fn message_sent(&self, request: WriteRequest) {
        self.forward("message_sent", |core, next| {
            core.call_next_message_sent(next, request);
        });
    }

    /// Forwards `filter_write` to the previous entry.
    pub fn filter_write(&self, request: WriteRequest) {
        self.backward("filter_write", |core, prev| {
            core.call_previous_filter_write(prev, request);
        });
    }

    /// Forwards `filter_close` to the previous entry.
    pub fn filter_close(&self) {
        self.backward("filter_close", |core, prev| {
            core.call_previous_filter_close(prev);
        });
    }
}

impl fmt::Debug for dyn IoFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IoFilter")
    }
}
