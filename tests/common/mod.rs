//! Shared test doubles: a recording session, handler and filters.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use iochain::{
    AttributeMap, Cause, CloseFuture, EventError, EventResult, IdleStatus, IoFilter, IoHandler,
    Message, NextFilter, Processor, ReadEvent, Session, SessionRef, WriteRequest,
    WriteRequestQueue,
};

/// Builds an `EventError` out of a plain text.
pub fn failure(text: &str) -> EventError {
    text.to_string().into()
}

/// Builds a shared `Cause` out of a plain text.
pub fn cause(text: &str) -> Cause {
    Arc::from(failure(text))
}

/// Transport processor recording flush/remove calls.
#[derive(Default)]
pub struct MockProcessor {
    pub flushes: AtomicUsize,
    pub removes: AtomicUsize,
}

impl Processor for MockProcessor {
    fn flush(&self, _session: &SessionRef) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn remove(&self, _session: &SessionRef) {
        self.removes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Write queue keeping everything offered to it.
#[derive(Default)]
pub struct MockQueue {
    pub offered: Mutex<Vec<WriteRequest>>,
    pub disposals: AtomicUsize,
}

impl WriteRequestQueue for MockQueue {
    fn offer(&self, _session: &SessionRef, request: WriteRequest) {
        self.offered.lock().push(request);
    }

    fn dispose(&self, _session: &SessionRef) {
        self.disposals.fetch_add(1, Ordering::SeqCst);
    }
}

/// Application handler recording every invocation.
#[derive(Default)]
pub struct RecordingHandler {
    pub events: Mutex<Vec<String>>,
    pub causes: Mutex<Vec<Cause>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl IoHandler for RecordingHandler {
    fn session_created(&self, _session: &SessionRef) -> EventResult {
        self.events.lock().push("created".to_owned());
        Ok(())
    }

    fn session_opened(&self, _session: &SessionRef) -> EventResult {
        self.events.lock().push("opened".to_owned());
        Ok(())
    }

    fn session_closed(&self, _session: &SessionRef) -> EventResult {
        self.events.lock().push("closed".to_owned());
        Ok(())
    }

    fn session_idle(&self, _session: &SessionRef, status: IdleStatus) -> EventResult {
        self.events.lock().push(format!("idle:{status:?}"));
        Ok(())
    }

    fn exception_caught(&self, _session: &SessionRef, cause: Cause) -> EventResult {
        self.events.lock().push("exception".to_owned());
        self.causes.lock().push(cause);
        Ok(())
    }

    fn message_received(&self, _session: &SessionRef, _message: &Message) -> EventResult {
        self.events.lock().push("received".to_owned());
        Ok(())
    }

    fn message_sent(&self, _session: &SessionRef, _message: &Message) -> EventResult {
        self.events.lock().push("sent".to_owned());
        Ok(())
    }
}

/// Session double exposing every counter the chain touches.
pub struct MockSession {
    pub handler: Arc<RecordingHandler>,
    pub processor: Arc<MockProcessor>,
    pub queue: Arc<MockQueue>,
    pub attributes: AttributeMap,
    pub close_future: CloseFuture,
    pub write_suspended: AtomicBool,
    pub read_operation: AtomicBool,
    pub read_bytes: AtomicUsize,
    pub read_messages: AtomicUsize,
    pub scheduled_write_bytes: AtomicUsize,
    pub idle_counts: Mutex<Vec<IdleStatus>>,
    pub closes: Mutex<Vec<bool>>,
    pub read_events: Mutex<Vec<ReadEvent>>,
}

impl MockSession {
    pub fn new() -> Arc<MockSession> {
        Arc::new(MockSession {
            handler: Arc::new(RecordingHandler::default()),
            processor: Arc::new(MockProcessor::default()),
            queue: Arc::new(MockQueue::default()),
            attributes: AttributeMap::new(),
            close_future: CloseFuture::new(),
            write_suspended: AtomicBool::new(false),
            read_operation: AtomicBool::new(false),
            read_bytes: AtomicUsize::new(0),
            read_messages: AtomicUsize::new(0),
            scheduled_write_bytes: AtomicUsize::new(0),
            idle_counts: Mutex::new(Vec::new()),
            closes: Mutex::new(Vec::new()),
            read_events: Mutex::new(Vec::new()),
        })
    }
}

/// The same session as a `SessionRef` for the chain.
pub fn session_ref(session: &Arc<MockSession>) -> SessionRef {
    Arc::clone(session) as SessionRef
}

impl Session for MockSession {
    fn id(&self) -> u64 {
        1
    }

    fn handler(&self) -> Arc<dyn IoHandler> {
        Arc::clone(&self.handler) as Arc<dyn IoHandler>
    }

    fn processor(&self) -> Arc<dyn Processor> {
        Arc::clone(&self.processor) as Arc<dyn Processor>
    }

    fn write_queue(&self) -> Arc<dyn WriteRequestQueue> {
        Arc::clone(&self.queue) as Arc<dyn WriteRequestQueue>
    }

    fn is_write_suspended(&self) -> bool {
        self.write_suspended.load(Ordering::SeqCst)
    }

    fn use_read_operation(&self) -> bool {
        self.read_operation.load(Ordering::SeqCst)
    }

    fn close_future(&self) -> CloseFuture {
        self.close_future.clone()
    }

    fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    fn close(&self, force: bool) {
        self.closes.lock().push(force);
    }

    fn increase_idle_count(&self, status: IdleStatus, _now: Instant) {
        self.idle_counts.lock().push(status);
    }

    fn increase_read_bytes(&self, bytes: usize, _now: Instant) {
        self.read_bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    fn increase_read_messages(&self, _now: Instant) {
        self.read_messages.fetch_add(1, Ordering::SeqCst);
    }

    fn increase_scheduled_write_bytes(&self, bytes: usize) {
        self.scheduled_write_bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    fn offer_read_future(&self, message: Message) {
        self.read_events
            .lock()
            .push(ReadEvent::Message(Arc::new(message)));
    }

    fn offer_closed_read_future(&self) {
        self.read_events.lock().push(ReadEvent::Closed);
    }

    fn offer_failed_read_future(&self, cause: Cause) {
        self.read_events.lock().push(ReadEvent::Failed(cause));
    }
}

/// Filter recording every event under a tag, optionally failing one event.
///
/// Records first, then fails or forwards: a failing event is visible in the
/// log but never reaches the next filter.
pub struct TapFilter {
    pub tag: &'static str,
    pub log: Arc<Mutex<Vec<String>>>,
    pub fail_on: Option<&'static str>,
}

impl TapFilter {
    pub fn new(tag: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<TapFilter> {
        Arc::new(TapFilter {
            tag,
            log: Arc::clone(log),
            fail_on: None,
        })
    }

    pub fn failing(
        tag: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
        event: &'static str,
    ) -> Arc<TapFilter> {
        Arc::new(TapFilter {
            tag,
            log: Arc::clone(log),
            fail_on: Some(event),
        })
    }

    fn note(&self, event: &str) -> EventResult {
        self.log.lock().push(format!("{}:{event}", self.tag));
        match self.fail_on {
            Some(target) if target == event => Err(failure(&format!("{} failed", self.tag))),
            _ => Ok(()),
        }
    }
}

impl IoFilter for TapFilter {
    fn session_created(&self, next: &NextFilter, _session: &SessionRef) -> EventResult {
        self.note("session_created")?;
        next.session_created();
        Ok(())
    }

    fn session_opened(&self, next: &NextFilter, _session: &SessionRef) -> EventResult {
        self.note("session_opened")?;
        next.session_opened();
        Ok(())
    }

    fn session_closed(&self, next: &NextFilter, _session: &SessionRef) -> EventResult {
        self.note("session_closed")?;
        next.session_closed();
        Ok(())
    }

    fn session_idle(
        &self,
        next: &NextFilter,
        _session: &SessionRef,
        status: IdleStatus,
    ) -> EventResult {
        self.note("session_idle")?;
        next.session_idle(status);
        Ok(())
    }

    fn exception_caught(
        &self,
        next: &NextFilter,
        _session: &SessionRef,
        cause: Cause,
    ) -> EventResult {
        self.note("exception_caught")?;
        next.exception_caught(cause);
        Ok(())
    }

    fn message_received(
        &self,
        next: &NextFilter,
        _session: &SessionRef,
        message: Message,
    ) -> EventResult {
        self.note("message_received")?;
        next.message_received(message);
        Ok(())
    }

    fn message_sent(
        &self,
        next: &NextFilter,
        _session: &SessionRef,
        request: WriteRequest,
    ) -> EventResult {
        self.note("message_sent")?;
        next.message_sent(request);
        Ok(())
    }

    fn filter_write(
        &self,
        next: &NextFilter,
        _session: &SessionRef,
        request: WriteRequest,
    ) -> EventResult {
        self.note("filter_write")?;
        next.filter_write(request);
        Ok(())
    }

    fn filter_close(&self, next: &NextFilter, _session: &SessionRef) -> EventResult {
        self.note("filter_close")?;
        next.filter_close();
        Ok(())
    }
}

/// Hook invocation counters shared with the test.
#[derive(Default)]
pub struct ProbeCounts {
    pub pre_add: AtomicUsize,
    pub post_add: AtomicUsize,
    pub pre_remove: AtomicUsize,
    pub post_remove: AtomicUsize,
}

impl ProbeCounts {
    pub fn snapshot(&self) -> [usize; 4] {
        [
            self.pre_add.load(Ordering::SeqCst),
            self.post_add.load(Ordering::SeqCst),
            self.pre_remove.load(Ordering::SeqCst),
            self.post_remove.load(Ordering::SeqCst),
        ]
    }
}

/// Pass-through filter counting its lifecycle hooks, optionally failing one.
pub struct LifecycleProbe {
    pub counts: Arc<ProbeCounts>,
    pub fail_in: Option<&'static str>,
}

impl LifecycleProbe {
    pub fn new(counts: &Arc<ProbeCounts>) -> Arc<LifecycleProbe> {
        Arc::new(LifecycleProbe {
            counts: Arc::clone(counts),
            fail_in: None,
        })
    }

    pub fn failing(counts: &Arc<ProbeCounts>, hook: &'static str) -> Arc<LifecycleProbe> {
        Arc::new(LifecycleProbe {
            counts: Arc::clone(counts),
            fail_in: Some(hook),
        })
    }

    fn hook(&self, name: &'static str, counter: &AtomicUsize) -> EventResult {
        counter.fetch_add(1, Ordering::SeqCst);
        match self.fail_in {
            Some(target) if target == name => Err(failure(&format!("{name} refused"))),
            _ => Ok(()),
        }
    }
}

impl IoFilter for LifecycleProbe {
    fn on_pre_add(
        &self,
        _chain: &iochain::FilterChain,
        _name: &str,
        _next: &NextFilter,
    ) -> EventResult {
        self.hook("pre_add", &self.counts.pre_add)
    }

    fn on_post_add(
        &self,
        _chain: &iochain::FilterChain,
        _name: &str,
        _next: &NextFilter,
    ) -> EventResult {
        self.hook("post_add", &self.counts.post_add)
    }

    fn on_pre_remove(
        &self,
        _chain: &iochain::FilterChain,
        _name: &str,
        _next: &NextFilter,
    ) -> EventResult {
        self.hook("pre_remove", &self.counts.pre_remove)
    }

    fn on_post_remove(
        &self,
        _chain: &iochain::FilterChain,
        _name: &str,
        _next: &NextFilter,
    ) -> EventResult {
        self.hook("post_remove", &self.counts.post_remove)
    }
}

/// Filter with no behavior at all, for structural tests.
pub struct NoopFilter;

impl IoFilter for NoopFilter {}

/// Shorthand for a fresh anonymous pass-through filter.
pub fn noop() -> Arc<dyn IoFilter> {
    Arc::new(NoopFilter)
}
