//! The application handler invoked at the tail of the chain.

use crate::error::{Cause, EventResult};
use crate::session::{IdleStatus, SessionRef};
use crate::write::Message;

/// Application endpoint of the inbound event flow.
///
/// The chain's tail delegates every inbound event here once it has traversed
/// all user filters. Every method defaults to doing nothing; implement the
/// ones the application cares about. An `Err` return is converted by the
/// chain into an `exception_caught` event, exactly like a failing filter.
///
/// Messages are borrowed: when the session is configured for read-operation
/// polling the tail offers the same message to a read future after the
/// handler returns.
pub trait IoHandler: Send + Sync {
    /// The session was created. Fired once, before any other event.
    fn session_created(&self, session: &SessionRef) -> EventResult {
        let _ = session;
        Ok(())
    }

    /// The session is open for traffic.
    fn session_opened(&self, session: &SessionRef) -> EventResult {
        let _ = session;
        Ok(())
    }

    /// The session was closed. Fired once, after which no message events
    /// arrive.
    fn session_closed(&self, session: &SessionRef) -> EventResult {
        let _ = session;
        Ok(())
    }

    /// The session idled in the given direction.
    fn session_idle(&self, session: &SessionRef, status: IdleStatus) -> EventResult {
        let _ = (session, status);
        Ok(())
    }

    /// An error reached the tail without being handled by a filter.
    fn exception_caught(&self, session: &SessionRef, cause: Cause) -> EventResult {
        let _ = (session, cause);
        Ok(())
    }

    /// A message traversed the chain inbound.
    fn message_received(&self, session: &SessionRef, message: &Message) -> EventResult {
        let _ = (session, message);
        Ok(())
    }

    /// A previously written message was flushed to the transport.
    fn message_sent(&self, session: &SessionRef, message: &Message) -> EventResult {
        let _ = (session, message);
        Ok(())
    }
}
