//! Lifecycle hook protocol: ordering, failures, rollback, best-effort clear.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use iochain::{ChainError, EventResult, FilterChain, IoFilter, LifecycleHook, NextFilter};

use common::{noop, session_ref, LifecycleProbe, MockSession, ProbeCounts};

fn names(chain: &FilterChain) -> Vec<String> {
    chain
        .get_all()
        .iter()
        .map(|entry| entry.name().to_owned())
        .collect()
}

#[test]
fn add_runs_pre_and_post_hooks_once() {
    let session = MockSession::new();
    let chain = FilterChain::new(session_ref(&session));
    let counts = Arc::new(ProbeCounts::default());

    chain
        .add_last("probe", LifecycleProbe::new(&counts))
        .unwrap();
    assert_eq!(counts.snapshot(), [1, 1, 0, 0]);

    chain.remove("probe").unwrap();
    assert_eq!(counts.snapshot(), [1, 1, 1, 1]);
}

#[test]
fn pre_add_failure_aborts_without_mutation() {
    let session = MockSession::new();
    let chain = FilterChain::new(session_ref(&session));
    let counts = Arc::new(ProbeCounts::default());

    let err = chain
        .add_last("r", LifecycleProbe::failing(&counts, "pre_add"))
        .unwrap_err();

    match err {
        ChainError::Lifecycle {
            hook, name, ..
        } => {
            assert_eq!(hook, LifecycleHook::PreAdd);
            assert_eq!(name, "r");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!chain.contains("r"));
    assert!(names(&chain).is_empty());
    assert_eq!(counts.snapshot(), [1, 0, 0, 0]);
}

#[test]
fn post_add_failure_rolls_back_without_remove_hooks() {
    let session = MockSession::new();
    let chain = FilterChain::new(session_ref(&session));
    chain.add_last("keep", noop()).unwrap();
    let counts = Arc::new(ProbeCounts::default());

    let err = chain
        .add_last("r", LifecycleProbe::failing(&counts, "post_add"))
        .unwrap_err();

    assert!(matches!(
        err,
        ChainError::Lifecycle {
            hook: LifecycleHook::PostAdd,
            ..
        }
    ));
    // The chain is exactly what it was before the add.
    assert!(!chain.contains("r"));
    assert_eq!(names(&chain), ["keep"]);
    // Each add hook ran once; the rollback is structural, no remove hooks.
    assert_eq!(counts.snapshot(), [1, 1, 0, 0]);

    // The name is free again.
    chain.add_last("r", noop()).unwrap();
    assert_eq!(names(&chain), ["keep", "r"]);
}

#[test]
fn pre_remove_failure_leaves_the_entry_in_place() {
    let session = MockSession::new();
    let chain = FilterChain::new(session_ref(&session));
    let counts = Arc::new(ProbeCounts::default());
    chain
        .add_last("stuck", LifecycleProbe::failing(&counts, "pre_remove"))
        .unwrap();

    let err = chain.remove("stuck").unwrap_err();
    assert!(matches!(
        err,
        ChainError::Lifecycle {
            hook: LifecycleHook::PreRemove,
            ..
        }
    ));
    assert!(chain.contains("stuck"));
    assert_eq!(counts.snapshot(), [1, 1, 1, 0]);
}

#[test]
fn post_remove_failure_surfaces_but_the_entry_is_gone() {
    let session = MockSession::new();
    let chain = FilterChain::new(session_ref(&session));
    let counts = Arc::new(ProbeCounts::default());
    chain
        .add_last("gone", LifecycleProbe::failing(&counts, "post_remove"))
        .unwrap();

    let err = chain.remove("gone").unwrap_err();
    assert!(matches!(
        err,
        ChainError::Lifecycle {
            hook: LifecycleHook::PostRemove,
            ..
        }
    ));
    assert!(!chain.contains("gone"));
    assert_eq!(counts.snapshot(), [1, 1, 1, 1]);
}

#[test]
fn clear_is_best_effort_and_surfaces_the_first_error() {
    let session = MockSession::new();
    let chain = FilterChain::new(session_ref(&session));
    let stuck_counts = Arc::new(ProbeCounts::default());
    chain
        .add_last("stuck", LifecycleProbe::failing(&stuck_counts, "pre_remove"))
        .unwrap();
    chain.add_last("a", noop()).unwrap();
    chain.add_last("b", noop()).unwrap();

    let err = chain.clear().unwrap_err();

    // The failing entry's error came back, the rest were still removed.
    match err {
        ChainError::Lifecycle { hook, name, .. } => {
            assert_eq!(hook, LifecycleHook::PreRemove);
            assert_eq!(name, "stuck");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(names(&chain), ["stuck"]);
    assert!(!chain.contains("a"));
    assert!(!chain.contains("b"));
}

/// Captures what the chain looked like from inside each hook.
struct VisibilityProbe {
    reachable_in_pre_add: AtomicBool,
    reachable_in_post_add: AtomicBool,
    reachable_in_pre_remove: AtomicBool,
    reachable_in_post_remove: AtomicBool,
}

impl VisibilityProbe {
    fn new() -> Arc<VisibilityProbe> {
        Arc::new(VisibilityProbe {
            reachable_in_pre_add: AtomicBool::new(false),
            reachable_in_post_add: AtomicBool::new(false),
            reachable_in_pre_remove: AtomicBool::new(false),
            reachable_in_post_remove: AtomicBool::new(false),
        })
    }
}

impl IoFilter for VisibilityProbe {
    fn on_pre_add(&self, chain: &FilterChain, name: &str, _next: &NextFilter) -> EventResult {
        self.reachable_in_pre_add
            .store(chain.contains(name), Ordering::SeqCst);
        Ok(())
    }

    fn on_post_add(&self, chain: &FilterChain, name: &str, _next: &NextFilter) -> EventResult {
        self.reachable_in_post_add
            .store(chain.contains(name), Ordering::SeqCst);
        Ok(())
    }

    fn on_pre_remove(&self, chain: &FilterChain, name: &str, _next: &NextFilter) -> EventResult {
        self.reachable_in_pre_remove
            .store(chain.contains(name), Ordering::SeqCst);
        Ok(())
    }

    fn on_post_remove(&self, chain: &FilterChain, name: &str, _next: &NextFilter) -> EventResult {
        self.reachable_in_post_remove
            .store(chain.contains(name), Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn hooks_observe_the_documented_linkage() {
    let session = MockSession::new();
    let chain = FilterChain::new(session_ref(&session));
    let probe = VisibilityProbe::new();

    chain
        .add_last("probe", Arc::clone(&probe) as Arc<dyn IoFilter>)
        .unwrap();
    chain.remove("probe").unwrap();

    // Reachable exactly between on_pre_add and on_pre_remove inclusive.
    assert!(!probe.reachable_in_pre_add.load(Ordering::SeqCst));
    assert!(probe.reachable_in_post_add.load(Ordering::SeqCst));
    assert!(probe.reachable_in_pre_remove.load(Ordering::SeqCst));
    assert!(!probe.reachable_in_post_remove.load(Ordering::SeqCst));
}

/// Adds a companion filter from inside its own `on_post_add`.
struct SelfExtendingFilter;

impl IoFilter for SelfExtendingFilter {
    fn on_post_add(&self, chain: &FilterChain, _name: &str, _next: &NextFilter) -> EventResult {
        chain
            .add_last("companion", Arc::new(SelfExtendingCompanion))
            .map_err(|e| -> iochain::EventError { Box::new(e) })
    }
}

struct SelfExtendingCompanion;

impl IoFilter for SelfExtendingCompanion {}

#[test]
fn hooks_may_mutate_the_chain_reentrantly() {
    let session = MockSession::new();
    let chain = FilterChain::new(session_ref(&session));

    chain
        .add_last("extender", Arc::new(SelfExtendingFilter))
        .unwrap();

    assert_eq!(names(&chain), ["extender", "companion"]);
}

#[test]
fn lifecycle_error_carries_the_filter_failure() {
    let session = MockSession::new();
    let chain = FilterChain::new(session_ref(&session));
    let counts = Arc::new(ProbeCounts::default());

    let err = chain
        .add_last("r", LifecycleProbe::failing(&counts, "pre_add"))
        .unwrap_err();
    let rendered = format!("{err}");
    assert!(rendered.contains("on_pre_add"));
    assert!(rendered.contains('r'));

    // The original filter error is preserved as the source.
    let source = std::error::Error::source(&err).map(ToString::to_string);
    assert_eq!(source.as_deref(), Some("pre_add refused"));
}
