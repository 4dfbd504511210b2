//! Per-call coordination between the network and a canonical function.
//!
//! A call runs two tasks. The inbound task reads envelopes, unmarshalls them
//! and feeds the function's input stream. The outbound task drains the
//! function's data and error streams, marshalls values and writes envelopes.
//! Each task, plus the error stream when there is one, sends exactly one
//! report to the controlling future; the first failed report is the result
//! of the call.

use super::envelope::{Envelope, ACCEPT, CONTENT_TYPE};
use super::transport::{EnvelopeSink, EnvelopeSource};
use super::InvokerError;
use crate::codec::{MediaType, Registry, DEFAULT_ACCEPT, TEXT_PLAIN};
use crate::function::stream::InboundStream;
use crate::function::{CanonicalFunction, DataType, ErrorReceiver, Outputs, RawReceiver, Value};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

type Report = Result<(), InvokerError>;

/// Run one call to completion.
pub(crate) async fn run<S, K>(
    function: &CanonicalFunction,
    registry: &Registry,
    source: S,
    sink: K,
) -> Result<(), InvokerError>
where
    S: EnvelopeSource + 'static,
    K: EnvelopeSink + 'static,
{
    let (inbound, input) = InboundStream::new();
    let Outputs { data, errors } = function.invoke(input)?;
    let expected = 2 + usize::from(errors.is_some());

    let (reports_tx, mut reports) = mpsc::channel::<Report>(1);
    let cancel = Arc::new(Cancellation::new());
    let accept = AcceptRelay::default();

    let mut tasks = TaskGuard::default();
    tasks.0.push(tokio::spawn(inbound_task(
        source,
        inbound,
        function.input_type(),
        registry.clone(),
        accept.clone(),
        cancel.subscribe(),
        reports_tx.clone(),
    )));
    tasks.0.push(tokio::spawn(outbound_task(
        sink,
        data,
        errors,
        registry.clone(),
        accept,
        cancel.clone(),
        reports_tx,
    )));

    let mut result = Ok(());
    for received in 0..expected {
        match reports.recv().await {
            Some(Ok(())) => {}
            Some(Err(err)) => {
                debug!("Call of '{}' failed: {}", function.name(), err);
                result = Err(err);
                break;
            }
            None => {
                // A task died without reporting, usually a panic.
                error!(
                    "Call of '{}' lost its tasks after {} of {} reports",
                    function.name(),
                    received,
                    expected
                );
                result = Err(InvokerError::Invocation(format!(
                    "call lost {} of {} reports",
                    expected - received,
                    expected
                )));
                break;
            }
        }
    }
    debug!("Exiting call of '{}', ok = {}", function.name(), result.is_ok());
    result
}

async fn inbound_task<S: EnvelopeSource>(
    mut source: S,
    mut input: InboundStream,
    input_type: DataType,
    registry: Registry,
    accept: AcceptRelay,
    mut done: watch::Receiver<bool>,
    reports: mpsc::Sender<Report>,
) {
    let report = loop {
        let envelope = match source.recv().await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                debug!("[inbound] Reached end of input");
                break Ok(());
            }
            Err(err) => {
                warn!("[inbound] Error receiving envelope: {}", err);
                break Err(InvokerError::Transport(err));
            }
        };

        if let Some(values) = envelope.header(ACCEPT) {
            accept.publish(values.to_vec());
        }

        let value = match unmarshall(&registry, &input_type, &envelope) {
            Ok(value) => value,
            Err(err) => {
                debug!("[inbound] Failed to unmarshall envelope: {}", err);
                break Err(err);
            }
        };

        debug!("[inbound] Sending {:?} to function", value);
        tokio::select! {
            sent = input.send(value) => {
                if sent.is_err() {
                    debug!("[inbound] Function stopped reading its input");
                    break Ok(());
                }
            }
            _ = cancelled(&mut done) => {
                debug!("[inbound] Call cancelled, dropping pending value");
                break Ok(());
            }
        }
    };

    input.close();
    let _ = reports.send(report).await;
    debug!("[inbound] Returning from inbound task");
}

async fn outbound_task<K: EnvelopeSink>(
    mut sink: K,
    data: RawReceiver,
    errors: Option<ErrorReceiver>,
    registry: Registry,
    accept: AcceptRelay,
    cancel: Arc<Cancellation>,
    reports: mpsc::Sender<Report>,
) {
    let mut data = Some(data);
    let mut errors = errors;
    let mut accepted: Option<Vec<String>> = None;
    let mut triggered = false;

    while data.is_some() || errors.is_some() {
        tokio::select! {
            biased;

            value = recv_from(&mut data) => match value {
                Some(value) => {
                    let accept_list = accepted.get_or_insert_with(|| accept.get());
                    debug!("[outbound] Returning {:?}", value);
                    let sent = match marshall(&registry, &value, accept_list.as_slice()) {
                        Ok(envelope) => sink.send(envelope).await.map_err(InvokerError::from),
                        Err(err) => Err(err),
                    };
                    if let Err(err) = sent {
                        warn!("[outbound] Failed to return value: {}", err);
                        let _ = reports.send(Err(err)).await;
                        data = None;
                        if !triggered {
                            cancel.trigger();
                            triggered = true;
                        }
                    }
                }
                None => {
                    debug!("[outbound] Function output closed");
                    let _ = reports.send(Ok(())).await;
                    data = None;
                }
            },

            err = recv_from(&mut errors) => {
                errors = None;
                match err {
                    Some(err) => {
                        debug!("[outbound] Function reported error: {}", err);
                        let _ = reports.send(Err(InvokerError::Function(err))).await;
                        if !triggered {
                            cancel.trigger();
                            triggered = true;
                        }
                    }
                    None => {
                        let _ = reports.send(Ok(())).await;
                    }
                }
            }
        }
    }
    debug!("[outbound] Returning from outbound task");
}

fn unmarshall(
    registry: &Registry,
    ty: &DataType,
    envelope: &Envelope,
) -> Result<Value, InvokerError> {
    let content_type = MediaType::new(envelope.first_header(CONTENT_TYPE).unwrap_or(TEXT_PLAIN));
    let unmarshaller = registry
        .unmarshaller_for(ty, &content_type)
        .ok_or_else(|| InvokerError::ContentTypeNotSupported(content_type.to_string()))?;
    unmarshaller
        .unmarshall(&envelope.payload, ty, &content_type)
        .map_err(InvokerError::Unmarshall)
}

fn marshall(registry: &Registry, value: &Value, accept: &[String]) -> Result<Envelope, InvokerError> {
    let (marshaller, media_type) = registry
        .best_marshaller(accept, &value.data_type())
        .ok_or_else(|| InvokerError::AcceptNotSupported(accept.to_vec()))?;
    let payload = marshaller
        .marshall(value, &media_type)
        .map_err(InvokerError::Marshall)?;
    Ok(Envelope::new(payload).with_header(CONTENT_TYPE, media_type.as_str()))
}

/// Receive from an optional stream. A missing stream never yields.
async fn recv_from<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn cancelled(done: &mut watch::Receiver<bool>) {
    if done.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// One-shot cancellation broadcast.
struct Cancellation {
    tx: watch::Sender<bool>,
}

impl Cancellation {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    fn trigger(&self) {
        let already = self.tx.send_replace(true);
        if already {
            error!("Call cancelled twice");
        }
        debug_assert!(!already, "call cancelled twice");
    }
}

/// First-write-wins slot carrying the caller's `Accept` values.
#[derive(Clone, Default)]
struct AcceptRelay(Arc<OnceLock<Vec<String>>>);

impl AcceptRelay {
    fn publish(&self, values: Vec<String>) {
        let _ = self.0.set(values);
    }

    fn get(&self) -> Vec<String> {
        self.0
            .get()
            .cloned()
            .unwrap_or_else(|| vec![DEFAULT_ACCEPT.to_string()])
    }
}

/// Aborts the call's tasks once the call returns.
#[derive(Default)]
struct TaskGuard(Vec<JoinHandle<()>>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{channel, error_channel, FunctionError, Handler, Receiver};

    #[test]
    fn test_accept_relay_first_write_wins() {
        let relay = AcceptRelay::default();
        assert_eq!(relay.get(), vec!["text/plain".to_string()]);

        relay.publish(vec!["application/json".to_string()]);
        relay.clone().publish(vec!["text/plain".to_string()]);
        assert_eq!(relay.get(), vec!["application/json".to_string()]);
    }

    #[tokio::test]
    async fn test_cancellation_reaches_subscribers() {
        let cancel = Cancellation::new();
        let mut done = cancel.subscribe();
        cancel.trigger();
        tokio::time::timeout(std::time::Duration::from_secs(1), cancelled(&mut done))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_branch_never_yields() {
        let mut rx: Option<mpsc::Receiver<u8>> = None;
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(20), recv_from(&mut rx)).await;
        assert!(waited.is_err());
    }

    async fn call(
        handler: Handler,
        inputs: Vec<Envelope>,
    ) -> (Result<(), InvokerError>, Vec<Envelope>) {
        let function = CanonicalFunction::new(handler).unwrap();
        let registry = Registry::builtin();

        let (in_tx, in_rx) = mpsc::channel(inputs.len().max(1));
        for envelope in inputs {
            in_tx.send(envelope).await.unwrap();
        }
        drop(in_tx);

        let (out_tx, mut out_rx) = mpsc::channel(16);
        let result = run(&function, &registry, in_rx, out_tx).await;

        let mut outputs = Vec::new();
        while let Ok(envelope) = out_rx.try_recv() {
            outputs.push(envelope);
        }
        (result, outputs)
    }

    #[tokio::test]
    async fn test_unmarshall_failure_skips_function() {
        let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = called.clone();
        let handler = Handler::consumer(move |_: u32| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        let (result, outputs) = call(
            handler,
            vec![Envelope::new("nope").with_header(CONTENT_TYPE, "application/json")],
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.code().as_str(), "error-client-unmarshall");
        assert!(outputs.is_empty());
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unsupported_content_type() {
        let handler = Handler::mapper(|s: String| s);
        let (result, _) = call(
            handler,
            vec![Envelope::new("<x/>").with_header(CONTENT_TYPE, "application/xml")],
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "Unsupported Content-Type: application/xml");
    }

    #[tokio::test]
    async fn test_function_error_cancels_inbound() {
        // Reports an error on the first value and never reads again.
        let handler = Handler::streaming_with_errors(|mut rx: Receiver<String>| {
            let (tx, out) = channel::<String>();
            let (errors, error_rx) = error_channel();
            tokio::spawn(async move {
                let _tx = tx;
                if rx.recv().await.is_some() {
                    let _ = errors.send(FunctionError::new("first value rejected")).await;
                }
                std::future::pending::<()>().await;
            });
            (out, error_rx)
        });

        let function = CanonicalFunction::new(handler).unwrap();
        let registry = Registry::builtin();
        let (in_tx, in_rx) = mpsc::channel(4);
        for word in ["a", "b", "c"] {
            in_tx.send(Envelope::new(word)).await.unwrap();
        }
        let (out_tx, _out_rx) = mpsc::channel(4);

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            run(&function, &registry, in_rx, out_tx),
        )
        .await
        .unwrap();
        assert_eq!(result.unwrap_err().to_string(), "first value rejected");
        drop(in_tx);
    }
    #[derive(Debug, serde::Deserialize)]
    struct Boom;

    impl serde::Serialize for Boom {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            panic!("boom")
        }
    }

    impl crate::function::Data for Boom {}

    #[tokio::test]
    async fn test_panicking_task_fails_the_call() {
        let handler = Handler::mapper(|_: String| Boom);
        let (result, outputs) = call(
            handler,
            vec![Envelope::new("x").with_header(ACCEPT, "application/json")],
        )
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, InvokerError::Invocation(_)));
        assert_eq!(err.code().as_str(), "error-server-function-invocation");
        assert!(outputs.is_empty());
    }

    #[tokio::test]
    async fn test_inbound_stops_on_cancellation() {
        // The source never ends and nothing reads the input, so only
        // cancellation lets the inbound task finish.
        let (source_tx, source) = mpsc::channel(4);
        for word in ["a", "b"] {
            source_tx.send(Envelope::new(word)).await.unwrap();
        }
        let (inbound, mut input) = InboundStream::new();
        let cancel = Cancellation::new();
        let (reports_tx, mut reports) = mpsc::channel::<Report>(1);

        let task = tokio::spawn(inbound_task(
            source,
            inbound,
            DataType::of::<String>(),
            Registry::builtin(),
            AcceptRelay::default(),
            cancel.subscribe(),
            reports_tx,
        ));

        let early =
            tokio::time::timeout(std::time::Duration::from_millis(50), reports.recv()).await;
        assert!(early.is_err(), "inbound finished before cancellation");

        cancel.trigger();
        let report = tokio::time::timeout(std::time::Duration::from_secs(1), reports.recv())
            .await
            .unwrap();
        assert!(matches!(report, Some(Ok(()))));
        task.await.unwrap();

        // The buffered value is still delivered, then the input is closed.
        assert_eq!(input.recv().await.and_then(Value::downcast::<String>), Some("a".to_string()));
        assert!(input.recv().await.is_none());
        drop(source_tx);
    }
}
