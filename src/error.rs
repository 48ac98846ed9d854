//! Error types surfaced by chain mutations and event dispatch.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Error type returned by filter event methods and lifecycle hooks.
///
/// Filters are free to fail with any error type; the chain either surfaces
/// the failure to the mutating caller (lifecycle hooks) or converts it into
/// an inbound `exception_caught` event (event methods).
pub type EventError = Box<dyn StdError + Send + Sync>;

/// Result type for filter and handler event methods.
pub type EventResult = Result<(), EventError>;

/// A failure cause travelling through the chain as an `exception_caught`
/// event.
///
/// Causes are shared: the same cause may settle a write future, complete a
/// pending connect future, and still be observed by every filter and the
/// handler, so it is reference-counted.
pub type Cause = Arc<dyn StdError + Send + Sync>;

/// Which lifecycle hook a filter failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleHook {
    /// `IoFilter::on_pre_add`
    PreAdd,
    /// `IoFilter::on_post_add`
    PostAdd,
    /// `IoFilter::on_pre_remove`
    PreRemove,
    /// `IoFilter::on_post_remove`
    PostRemove,
}

impl fmt::Display for LifecycleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleHook::PreAdd => "on_pre_add",
            LifecycleHook::PostAdd => "on_post_add",
            LifecycleHook::PreRemove => "on_pre_remove",
            LifecycleHook::PostRemove => "on_post_remove",
        };
        f.write_str(name)
    }
}

/// Errors returned by the structural chain operations.
#[derive(Debug, Error)]
pub enum ChainError {
    /// An `add_*` operation used a name that is already indexed.
    #[error("another filter is using the name '{0}'")]
    DuplicateName(String),

    /// A lookup or removal did not find the addressed filter.
    #[error("filter not found: {0}")]
    NotFound(String),

    /// A filter failed inside one of its four lifecycle hooks.
    ///
    /// Identifies the hook, the filter's name in the chain, and the owning
    /// session. An `on_post_add` failure additionally means the entry was
    /// rolled back structurally, without remove hooks.
    #[error("{hook} failed for filter '{name}' in session {session_id}")]
    Lifecycle {
        /// The hook that failed.
        hook: LifecycleHook,
        /// The name the filter was being registered or deregistered under.
        name: String,
        /// Id of the session owning the chain.
        session_id: u64,
        /// The filter's own error.
        #[source]
        source: EventError,
    },
}
