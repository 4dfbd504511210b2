//! Typed data streams between the bridge and user functions.
//!
//! Streams carry erased [`Value`]s underneath so the bridge can stay
//! agnostic of the function's types, while user code sees plain `T`s.
//! Every stream holds at most one in-flight value.

use crate::function::data::{Data, Value};
use crate::function::handler::FunctionError;
use std::fmt;
use std::marker::PhantomData;
use tokio::sync::mpsc;
use tracing::error;

pub use tokio::sync::mpsc::error::TryRecvError;

/// Capacity of every bridge-owned stream.
pub(crate) const STREAM_CAPACITY: usize = 1;

/// Untyped receiving half, as seen by the bridge.
pub type RawReceiver = mpsc::Receiver<Value>;

/// Untyped sending half, as seen by the bridge.
pub type RawSender = mpsc::Sender<Value>;

/// Sending half of a function's error stream.
pub type ErrorSender = mpsc::Sender<FunctionError>;

/// Receiving half of a function's error stream.
pub type ErrorReceiver = mpsc::Receiver<FunctionError>;

/// Create a typed data stream.
pub fn channel<T: Data>() -> (Sender<T>, Receiver<T>) {
    channel_with_capacity(STREAM_CAPACITY)
}

/// Create a typed data stream buffering up to `capacity` values.
pub fn channel_with_capacity<T: Data>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Sender::from_raw(tx), Receiver::from_raw(rx))
}

/// Create an error stream.
pub fn error_channel() -> (ErrorSender, ErrorReceiver) {
    mpsc::channel(STREAM_CAPACITY)
}

/// Error returned when the receiving side of a stream is gone.
pub struct SendError<T>(pub T);

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SendError(..)")
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("stream closed")
    }
}

impl<T> std::error::Error for SendError<T> {}

/// Sending half of a typed stream. Dropping every sender closes the stream.
pub struct Sender<T> {
    inner: RawSender,
    _marker: PhantomData<fn(T)>,
}

impl<T: Data> Sender<T> {
    pub(crate) fn from_raw(inner: RawSender) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// Send a value, waiting for room in the stream.
    pub async fn send(&self, value: T) -> Result<(), SendError<T>> {
        match self.inner.reserve().await {
            Ok(permit) => {
                permit.send(Value::new(value));
                Ok(())
            }
            Err(_) => Err(SendError(value)),
        }
    }

    /// Send a value from a thread outside the async runtime.
    pub fn blocking_send(&self, value: T) -> Result<(), SendError<T>> {
        futures::executor::block_on(self.send(value))
    }

    /// Whether the receiving half has gone away.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

/// Receiving half of a typed stream.
pub struct Receiver<T> {
    inner: RawReceiver,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Data> Receiver<T> {
    pub(crate) fn from_raw(inner: RawReceiver) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub(crate) fn into_raw(self) -> RawReceiver {
        self.inner
    }

    /// Receive the next value, or `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<T> {
        let value = self.inner.recv().await?;
        Self::typed(value)
    }

    /// Receive from a thread outside the async runtime.
    pub fn blocking_recv(&mut self) -> Option<T> {
        let value = self.inner.blocking_recv()?;
        Self::typed(value)
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        let value = self.inner.try_recv()?;
        Self::typed(value).ok_or(TryRecvError::Disconnected)
    }

    /// Stop accepting values. Buffered values can still be received.
    pub fn close(&mut self) {
        self.inner.close();
    }

    fn typed(value: Value) -> Option<T> {
        let found = value.data_type();
        let typed = value.downcast::<T>();
        if typed.is_none() {
            error!(
                "Stream of {} received a value of {}",
                std::any::type_name::<T>(),
                found
            );
        }
        typed
    }
}

/// The bridge's end of a function's inbound stream.
///
/// Closing is idempotent: only the first call drops the sender.
pub(crate) struct InboundStream {
    tx: Option<RawSender>,
}

impl InboundStream {
    pub(crate) fn new() -> (Self, RawReceiver) {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        (Self { tx: Some(tx) }, rx)
    }

    /// Deliver a value. Fails when the stream is closed on either side.
    pub(crate) async fn send(&self, value: Value) -> Result<(), Value> {
        match &self.tx {
            Some(tx) => tx.send(value).await.map_err(|err| err.0),
            None => Err(value),
        }
    }

    pub(crate) fn close(&mut self) {
        self.tx.take();
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}
