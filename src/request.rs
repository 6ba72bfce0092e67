//! Request handles and the two awaitable completion contracts.
//!
//! Every engine operation returns a [`Request`]: a handle that later reports
//! its outcome as an event on one of several channels, the way the engine
//! notifies callbacks. The engine keeps the matching [`Responder`] and emits:
//!
//! ```text
//! Success(T) | Complete(T)   terminal, operation succeeded
//! Abort(E)   | Error(E)      terminal, operation failed
//! Blocked(VersionChange)     informational, open/delete is waiting
//! ```
//!
//! [`Request::strict`] and [`Request::lenient`] collapse that event stream
//! into one resolution. Strict propagates failures; lenient maps them to
//! `None` for call sites where a failure simply means "nothing there".
//!
//! Cursor requests are the one kind that emits several `Success` events:
//! one per cursor position. They are consumed with
//! [`Request::next_event`] instead of the adapters.

use tokio::sync::mpsc;
use tracing::debug;

use crate::engine::VersionChange;
use crate::error::{Error, Result};

/// One notification emitted by the engine for a request.
#[derive(Debug)]
pub enum RequestEvent<T> {
    Success(T),
    Complete(T),
    Abort(Error),
    Error(Error),
    Blocked(VersionChange),
}

impl<T> RequestEvent<T> {
    /// True for every event except `Blocked`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestEvent::Blocked(_))
    }
}

/// Caller side of an engine operation.
#[derive(Debug)]
pub struct Request<T> {
    label: String,
    events: mpsc::UnboundedReceiver<RequestEvent<T>>,
}

/// Engine side of an engine operation.
#[derive(Debug)]
pub struct Responder<T> {
    label: String,
    events: mpsc::UnboundedSender<RequestEvent<T>>,
}

impl<T> Clone for Responder<T> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            events: self.events.clone(),
        }
    }
}

impl<T> Request<T> {
    /// Creates a pending request and the responder that completes it.
    pub fn channel(label: impl Into<String>) -> (Responder<T>, Request<T>) {
        let label = label.into();
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Responder {
                label: label.clone(),
                events: tx,
            },
            Request { label, events: rx },
        )
    }

    /// A request that has already succeeded.
    pub fn succeeded(label: impl Into<String>, value: T) -> Self {
        let (responder, request) = Self::channel(label);
        responder.success(value);
        request
    }

    /// A request that has already failed.
    pub fn failed(label: impl Into<String>, error: Error) -> Self {
        let (responder, request) = Self::channel(label);
        responder.error(error);
        request
    }

    /// Short description used in logs and errors.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the engine has dropped its responder and every
    /// queued event has been read.
    pub async fn next_event(&mut self) -> Option<RequestEvent<T>> {
        self.events.recv().await
    }

    /// Resolves with the result on success, or the engine's error on
    /// abort/error. `Blocked` notifications are waited through.
    pub async fn strict(mut self) -> Result<T> {
        loop {
            match self.next_event().await {
                Some(RequestEvent::Success(value)) | Some(RequestEvent::Complete(value)) => {
                    return Ok(value);
                }
                Some(RequestEvent::Abort(err)) | Some(RequestEvent::Error(err)) => {
                    debug!(request = %self.label, error = %err, "Request rejected");
                    metrics::counter!("tablekv_requests_rejected_total").increment(1);
                    return Err(err);
                }
                Some(RequestEvent::Blocked(change)) => {
                    debug!(request = %self.label, ?change, "Request blocked, waiting");
                }
                None => {
                    metrics::counter!("tablekv_requests_rejected_total").increment(1);
                    return Err(Error::RequestDropped(self.label));
                }
            }
        }
    }

    /// Resolves with the result on success and with `None` on abort/error.
    pub async fn lenient(self) -> Option<T> {
        let label = self.label.clone();
        match self.strict().await {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(request = %label, error = %err, "Request failure masked");
                metrics::counter!("tablekv_requests_masked_total").increment(1);
                None
            }
        }
    }
}

impl<T> Responder<T> {
    /// Returns false when the caller dropped the request.
    pub fn success(&self, value: T) -> bool {
        self.emit(RequestEvent::Success(value))
    }

    /// Like [`success`](Self::success), but hands the value back when the
    /// caller dropped the request.
    pub fn offer(&self, value: T) -> Option<T> {
        match self.events.send(RequestEvent::Success(value)) {
            Ok(()) => None,
            Err(err) => match err.0 {
                RequestEvent::Success(value) => Some(value),
                _ => None,
            },
        }
    }

    pub fn complete(&self, value: T) -> bool {
        self.emit(RequestEvent::Complete(value))
    }

    pub fn abort(&self, error: Error) -> bool {
        self.emit(RequestEvent::Abort(error))
    }

    pub fn error(&self, error: Error) -> bool {
        self.emit(RequestEvent::Error(error))
    }

    pub fn blocked(&self, change: VersionChange) -> bool {
        self.emit(RequestEvent::Blocked(change))
    }

    /// Reports `result` as success or error.
    pub fn settle(&self, result: Result<T>) -> bool {
        match result {
            Ok(value) => self.success(value),
            Err(err) => self.error(err),
        }
    }

    /// True once the caller has dropped the request.
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn emit(&self, event: RequestEvent<T>) -> bool {
        self.events.send(event).is_ok()
    }
}
