//! Mutex-protected message queue with a single delivery callback
//!
//! One side posts, the other side drains. The draining side is also the one
//! that registers the callback, so the callback reference is always owned by
//! the context that will invoke it.
//!
//! `drain` holds the queue lock for the whole batch, callback invocations
//! included. A concurrent `post` on the same queue waits until the batch is
//! done. Unobserved queues (no callback) grow without bound.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::error::SerializationError;
use super::message::{Message, message_event};
use crate::script::{self, CallbackRef, ScriptContext};

/// How long a poster waits on a busy lock before re-checking `closed`
pub const DEFAULT_POST_WAIT: Duration = Duration::from_millis(1);

/// FIFO buffer of serialized messages plus one optional callback
#[derive(Debug)]
pub struct MessageQueue {
    messages: Mutex<Vec<Message>>,
    callback: Mutex<Option<CallbackRef>>,
    closed: AtomicBool,
    post_wait: Duration,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::with_post_wait(DEFAULT_POST_WAIT)
    }

    pub fn with_post_wait(post_wait: Duration) -> Self {
        Self {
            messages: Mutex::new(Vec::with_capacity(16)),
            callback: Mutex::new(None),
            closed: AtomicBool::new(false),
            post_wait,
        }
    }

    /// Serialize `value` and append it.
    ///
    /// Nothing is enqueued when serialization fails. Posting to a closed queue
    /// succeeds but the message is dropped.
    pub fn post<T: Serialize + ?Sized>(&self, value: &T) -> Result<(), SerializationError> {
        let message = Message::encode(value)?;
        self.push(message);
        Ok(())
    }

    /// Append an already serialized message
    pub fn push(&self, message: Message) {
        loop {
            if self.is_closed() {
                tracing::trace!(bytes = message.len(), "queue closed, dropping message");
                return;
            }
            // A drain may hold the lock for a long batch. Wake up periodically
            // so a poster is released once the queue is closed underneath it.
            if let Some(mut messages) = self.messages.try_lock_for(self.post_wait) {
                messages.push(message);
                return;
            }
        }
    }

    /// Replace the registered callback, returning the previous one
    pub fn set_callback(&self, callback: Option<CallbackRef>) -> Option<CallbackRef> {
        std::mem::replace(&mut *self.callback.lock(), callback)
    }

    pub fn callback(&self) -> Option<CallbackRef> {
        *self.callback.lock()
    }

    /// Deliver every buffered message to the callback, in post order.
    ///
    /// Does nothing when no callback is registered. Errors raised by the
    /// callback are reported and the batch continues. Returns the number of
    /// messages consumed.
    pub fn drain(&self, context: &mut dyn ScriptContext) -> usize {
        let mut messages = self.messages.lock();
        if self.callback().is_none() {
            return 0;
        }

        let mut consumed = 0;
        for message in messages.iter() {
            // The handler may replace or clear itself mid-batch
            let Some(callback) = self.callback() else {
                break;
            };
            consumed += 1;

            match message.decode() {
                Ok(data) => {
                    if let Err(error) = context.call(callback, &[message_event(data)]) {
                        script::report("onmessage", &error);
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "dropping undecodable message");
                }
            }
        }

        messages.drain(..consumed);
        consumed
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting messages. Already buffered messages can still be drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
