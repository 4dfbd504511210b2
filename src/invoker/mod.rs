//! Serving a function over a stream of envelopes.

mod envelope;
mod error;
mod session;
mod transport;

pub use envelope::{Envelope, ACCEPT, CONTENT_TYPE, CORRELATION_ID, ERROR};
pub use error::{ErrorCode, InvokerError, TransportError};
pub use transport::{EnvelopeSink, EnvelopeSource};

use crate::codec::Registry;
use crate::function::{resolve, CanonicalFunction, Handler, LoadedFunction, ResolveError};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// A resolved function ready to serve calls.
///
/// The function is resolved and canonicalized once; every call is a fresh
/// invocation. Cloning is cheap.
#[derive(Clone, Debug)]
pub struct Invoker {
    function: Arc<CanonicalFunction>,
    registry: Registry,
    // Keeps the function's library loaded.
    _loaded: Option<LoadedFunction>,
}

impl Invoker {
    /// Create an invoker for an in-process handler.
    pub fn new(handler: Handler) -> Result<Self, ResolveError> {
        Ok(Self {
            function: Arc::new(CanonicalFunction::new(handler)?),
            registry: Registry::builtin(),
            _loaded: None,
        })
    }

    /// Load the function named by `[file://]<path>?handler=<name>`.
    pub fn from_uri(uri: &str) -> Result<Self, ResolveError> {
        let loaded = resolve(uri)?;
        let function = CanonicalFunction::new(loaded.handler().clone())?;
        info!(
            "Function '{}' ready as {} from {}",
            function.name(),
            function.shape(),
            uri
        );
        Ok(Self {
            function: Arc::new(function),
            registry: Registry::builtin(),
            _loaded: Some(loaded),
        })
    }

    /// Replace the marshaller registry.
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Get the canonical function.
    pub fn function(&self) -> &CanonicalFunction {
        &self.function
    }

    /// Run one streaming call: read envelopes from `source` until end of
    /// input, write results to `sink`. Returns the first error of the call.
    pub async fn call<S, K>(&self, source: S, sink: K) -> Result<(), InvokerError>
    where
        S: EnvelopeSource + 'static,
        K: EnvelopeSink + 'static,
    {
        session::run(&self.function, &self.registry, source, sink).await
    }

    /// Single envelope mode.
    ///
    /// Never fails: errors come back as an envelope whose payload is the
    /// message and whose `error` header is the code. `correlationId` is
    /// copied from the request.
    pub async fn invoke_once(&self, request: Envelope) -> Envelope {
        let correlation = request.header(CORRELATION_ID).map(<[String]>::to_vec);

        let (in_tx, in_rx) = mpsc::channel(1);
        // The receiver is alive, so a one-slot channel always has room.
        let _ = in_tx.send(request).await;
        drop(in_tx);

        let (out_tx, mut out_rx) = mpsc::channel::<Envelope>(1);
        let collect = async move {
            let mut first = None;
            while let Some(envelope) = out_rx.recv().await {
                if first.is_none() {
                    first = Some(envelope);
                }
            }
            first
        };
        let (result, first) = tokio::join!(self.call(in_rx, out_tx), collect);

        let mut response = match result {
            Ok(()) => first.unwrap_or_default(),
            Err(err) => {
                debug!("Single envelope call failed with {}: {}", err.code(), err);
                Envelope::new(err.to_string()).with_header(ERROR, err.code().as_str())
            }
        };
        if let Some(values) = correlation {
            for value in values {
                response.add_header(CORRELATION_ID, value);
            }
        }
        response
    }
}
