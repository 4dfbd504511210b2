//! The seam between a call session and whatever carries its envelopes.

use super::{Envelope, TransportError};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Incoming side of a call.
#[async_trait]
pub trait EnvelopeSource: Send {
    /// Next envelope, or `Ok(None)` at end of input.
    async fn recv(&mut self) -> Result<Option<Envelope>, TransportError>;
}

/// Outgoing side of a call.
#[async_trait]
pub trait EnvelopeSink: Send {
    async fn send(&mut self, envelope: Envelope) -> Result<(), TransportError>;
}

#[async_trait]
impl EnvelopeSource for mpsc::Receiver<Envelope> {
    async fn recv(&mut self) -> Result<Option<Envelope>, TransportError> {
        Ok(mpsc::Receiver::recv(self).await)
    }
}

#[async_trait]
impl EnvelopeSource for mpsc::Receiver<Result<Envelope, TransportError>> {
    async fn recv(&mut self) -> Result<Option<Envelope>, TransportError> {
        mpsc::Receiver::recv(self).await.transpose()
    }
}

#[async_trait]
impl EnvelopeSink for mpsc::Sender<Envelope> {
    async fn send(&mut self, envelope: Envelope) -> Result<(), TransportError> {
        mpsc::Sender::send(self, envelope)
            .await
            .map_err(|_| TransportError::Closed)
    }
}
