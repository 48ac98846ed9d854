//! ### What is iochain?
//! `iochain` is the bidirectional I/O filter chain for network sessions: the
//! pipeline layer that sits between a transport and an application handler.
//!
//! It follows the Intercepting Filter pattern the way [Netty](https://netty.io)
//! pipelines and MINA filter chains do: each session owns one
//! [`FilterChain`], protocol concerns (TLS, framing, codecs, logging,
//! metering) are expressed as individually addressable [`IoFilter`]s threaded
//! between a fixed **head** and a fixed **tail**, and every session event
//! traverses the chain filter by filter.
//!
//! ### How does an event flow in a chain?
//! Inbound events (`session_created`, `session_opened`, `session_closed`,
//! `session_idle`, `message_received`, `message_sent`, `exception_caught`)
//! enter at the head and walk toward the tail, where the application
//! [`IoHandler`] runs. Outbound events (`filter_write`, `filter_close`)
//! enter at the tail and walk toward the head, where the transport
//! [`Processor`] acts.
//!
//! ```text
//!                                            | fire_filter_write()
//!   +----------------------------------------+----------------------+
//!   |                 FilterChain            |                      |
//!   |                                       \|/                     |
//!   |    +------------------+---------------+------------------+    |
//!   |    |                    Tail (handler)                   |    |
//!   |    +------------------+---------------+------------------+    |
//!   |             /|\                        |                      |
//!   |              |                        \|/                     |
//!   |    +------------------+---------------+------------------+    |
//!   |    |                    Filter  N                        |    |
//!   |    +------------------+---------------+------------------+    |
//!   |             /|\                        |                      |
//!   |              |                        \|/                     |
//!   |    +------------------+---------------+------------------+    |
//!   |    |                    Filter  1                        |    |
//!   |    +------------------+---------------+------------------+    |
//!   |             /|\                        |                      |
//!   |              |                        \|/                     |
//!   |    +------------------+---------------+------------------+    |
//!   |    |                 Head (write queue, processor)       |    |
//!   |    +------------------+---------------+------------------+    |
//!   |             /|\                        |                      |
//!   +--------------+------------------------+----------------------+
//!                  | fire_message_received() | offer / flush
//!                  |                        \|/
//!   +--------------+------------------------+----------------------+
//!   |           Transport (session processor / I/O thread)         |
//!   +--------------------------------------------------------------+
//! ```
//!
//! ### Dynamic chains
//! Filters are addressed by unique name and can be inserted and removed
//! while the session lives: [`FilterChain::add_first`],
//! [`FilterChain::add_last`], [`FilterChain::add_before`],
//! [`FilterChain::add_after`], [`FilterChain::remove`],
//! [`FilterChain::replace`], [`FilterChain::clear`]. Topology changes run
//! the filter's lifecycle hooks (`on_pre_add`/`on_post_add`/
//! `on_pre_remove`/`on_post_remove`) against a consistently linked chain;
//! `replace` swaps a filter in place without hooks.
//!
//! A filter may mutate the chain from inside one of its own callbacks: the
//! per-entry successor proxy ([`NextFilter`]) resolves its neighbors at call
//! time, so the rest of the traversal observes the new topology.
//!
//! ### Errors become events
//! A filter failing in an event method does not abort the traversal
//! silently: the chain converts the error into an inbound
//! `exception_caught` event, so the failure reaches either the handler or,
//! while a connect is still pending, the session's [`ConnectFuture`]. A
//! failure in the write path additionally settles the request's
//! [`WriteFuture`] with the cause, so writers awaiting the acknowledgement
//! see it too.
//!
//! ### Writing a filter
//! ```
//! use iochain::{EventResult, IoFilter, Message, NextFilter, SessionRef};
//!
//! /// Counts inbound messages, then forwards them untouched.
//! struct CountingFilter {
//!     seen: std::sync::atomic::AtomicUsize,
//! }
//!
//! impl IoFilter for CountingFilter {
//!     fn message_received(
//!         &self,
//!         next: &NextFilter,
//!         _session: &SessionRef,
//!         message: Message,
//!     ) -> EventResult {
//!         self.seen.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         next.message_received(message);
//!         Ok(())
//!     }
//! }
//! ```
//! Every event method defaults to forwarding, so a filter implements only
//! what it intercepts.

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

pub(crate) mod chain;
pub(crate) mod chain_internal;
pub(crate) mod error;
pub(crate) mod filter;
pub(crate) mod future;
pub(crate) mod handler;
pub(crate) mod session;
pub(crate) mod write;

pub use chain::{EntryInfo, FilterChain};
pub use error::{Cause, ChainError, EventError, EventResult, LifecycleHook};
pub use filter::{IoFilter, NextFilter};
pub use future::{CloseFuture, ConnectFuture, ReadEvent, ReadFuture, WriteFuture};
pub use handler::IoHandler;
pub use session::{
    AttributeKey, AttributeMap, IdleStatus, Processor, Session, SessionRef,
    SESSION_CREATED_FUTURE,
};
pub use write::{Message, WriteRequest, WriteRequestQueue};
