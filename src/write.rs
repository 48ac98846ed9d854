//! Messages and write requests flowing through the chain.

use std::any::Any;
use std::fmt;

use bytes::BytesMut;

use crate::future::WriteFuture;
use crate::session::SessionRef;

/// A message travelling through the chain, either direction.
///
/// The chain itself is untyped: filters rewrite messages as they pass, a
/// codec near the head sees buffers while the handler near the tail sees
/// decoded objects. Byte buffers are kept as a first-class variant because
/// the chain's read/write accounting keys on them.
pub enum Message {
    /// Raw bytes, as exchanged with the transport.
    Buffer(BytesMut),
    /// Any decoded message object.
    Object(Box<dyn Any + Send + Sync>),
}

impl Message {
    /// Wraps raw bytes.
    pub fn buffer(bytes: impl Into<BytesMut>) -> Self {
        Message::Buffer(bytes.into())
    }

    /// Wraps a decoded message object.
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Message::Object(Box::new(value))
    }

    /// The buffer contents, when this is a byte buffer.
    pub fn as_buffer(&self) -> Option<&BytesMut> {
        match self {
            Message::Buffer(bytes) => Some(bytes),
            Message::Object(_) => None,
        }
    }

    /// Whether this message is a byte buffer.
    pub fn is_buffer(&self) -> bool {
        matches!(self, Message::Buffer(_))
    }

    /// Borrows the decoded object, when it is a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Message::Buffer(_) => None,
            Message::Object(object) => object.downcast_ref(),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Buffer(bytes) => write!(f, "Buffer({} bytes)", bytes.len()),
            Message::Object(_) => f.write_str("Object"),
        }
    }
}

/// A message paired with the future its writer awaits.
///
/// Created by the caller of `fire_filter_write`; filters may transform the
/// message on the way down, and the head finally offers the request to the
/// session's write queue. The future settles when `fire_message_sent`
/// observes the request, or with the cause when a filter fails in the write
/// path.
pub struct WriteRequest {
    message: Message,
    future: WriteFuture,
}

impl WriteRequest {
    /// Creates a request with a fresh pending future.
    pub fn new(message: Message) -> Self {
        WriteRequest {
            message,
            future: WriteFuture::new(),
        }
    }

    /// Creates a request settling an existing future.
    ///
    /// Used by filters that split or re-wrap a request but want the original
    /// writer to observe the outcome.
    pub fn with_future(message: Message, future: WriteFuture) -> Self {
        WriteRequest { message, future }
    }

    /// The message being written.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Replaces the message, keeping the future.
    pub fn set_message(&mut self, message: Message) {
        self.message = message;
    }

    /// The future the writer awaits.
    pub fn future(&self) -> &WriteFuture {
        &self.future
    }

    /// Consumes the request, yielding its message.
    pub fn into_message(self) -> Message {
        self.message
    }
}

impl fmt::Debug for WriteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteRequest")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// The session's outbound queue, consumed by the head filter.
///
/// Implementations are supplied by the session and must be thread-safe; the
/// transport drains the queue when the processor flushes.
pub trait WriteRequestQueue: Send + Sync {
    /// Enqueues a request for the transport.
    fn offer(&self, session: &SessionRef, request: WriteRequest);

    /// Drops all pending requests during session teardown.
    fn dispose(&self, session: &SessionRef);
}
