//! Signature canonicalization.
//!
//! Every supported function shape is normalized into one streaming contract:
//! an inbound stream of `X` in, an outbound stream of `Y` out, plus an
//! optional outbound stream of errors. Direct (non-streaming) functions are
//! wrapped so that the bridge never has to special-case them.

use crate::function::data::{DataType, Value};
use crate::function::handler::{Arg, FunctionError, Handler, Kind, RawFunction, Ret, Signature};
use crate::function::resolver::ResolveError;
use crate::function::stream::{error_channel, ErrorReceiver, RawReceiver, STREAM_CAPACITY};
use crate::invoker::InvokerError;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// The recognised calling convention of a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Streaming,
    StreamingWithErrors,
    Mapper,
    TryMapper,
    Consumer,
    TryConsumer,
    Supplier,
    TrySupplier,
    Runnable,
    TryRunnable,
}

impl Shape {
    /// Whether the function already works on streams.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Shape::Streaming | Shape::StreamingWithErrors)
    }

    fn direct(takes_input: bool, returns_data: bool, returns_error: bool) -> Self {
        match (takes_input, returns_data, returns_error) {
            (true, true, true) => Shape::TryMapper,
            (true, true, false) => Shape::Mapper,
            (true, false, true) => Shape::TryConsumer,
            (true, false, false) => Shape::Consumer,
            (false, true, true) => Shape::TrySupplier,
            (false, true, false) => Shape::Supplier,
            (false, false, true) => Shape::TryRunnable,
            (false, false, false) => Shape::Runnable,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The streams a canonical function hands back when invoked.
#[derive(Debug)]
pub struct Outputs {
    pub data: RawReceiver,
    pub errors: Option<ErrorReceiver>,
}

/// A function in canonical streaming form.
#[derive(Clone)]
pub struct CanonicalFunction {
    name: String,
    shape: Shape,
    input: DataType,
    raw: RawFunction,
}

impl fmt::Debug for CanonicalFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanonicalFunction")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("input", &self.input)
            .finish()
    }
}

impl CanonicalFunction {
    /// Validate a handler's signature and bring it into canonical form.
    pub fn new(handler: Handler) -> Result<Self, ResolveError> {
        let (shape, input) = classify(handler.signature())?;
        debug!(
            "Canonicalized function '{}' {} as {}",
            handler.name(),
            handler.signature(),
            shape
        );
        Ok(Self {
            name: handler.name().to_string(),
            raw: handler.raw(),
            shape,
            input,
        })
    }

    /// Get the function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the recognised shape.
    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Element type of the inbound stream.
    pub fn input_type(&self) -> DataType {
        self.input
    }

    /// Invoke the function on a fresh inbound stream.
    pub fn invoke(&self, input: RawReceiver) -> Result<Outputs, InvokerError> {
        if self.shape.is_streaming() {
            self.invoke_streaming(input)
        } else {
            Ok(self.invoke_direct(input))
        }
    }

    fn invoke_streaming(&self, input: RawReceiver) -> Result<Outputs, InvokerError> {
        let rets = call_raw(&self.raw, vec![Arg::Stream(input)])
            .map_err(|err| InvokerError::Invocation(err.message))?;
        let mut rets = rets.into_iter();
        let outputs = match (rets.next(), rets.next(), rets.next()) {
            (Some(Ret::Stream(data)), None, None) => Outputs { data, errors: None },
            (Some(Ret::Stream(data)), Some(Ret::Errors(errors)), None) => Outputs {
                data,
                errors: Some(errors),
            },
            _ => {
                return Err(InvokerError::Invocation(format!(
                    "function '{}' returned values that do not match its {} signature",
                    self.name, self.shape
                )))
            }
        };
        if self.shape == Shape::StreamingWithErrors && outputs.errors.is_none() {
            return Err(InvokerError::Invocation(format!(
                "function '{}' did not return its error stream",
                self.name
            )));
        }
        Ok(outputs)
    }

    /// Wrap a direct function: receive at most one value, call once, emit the
    /// data or the error, then close both outbound streams.
    fn invoke_direct(&self, mut input: RawReceiver) -> Outputs {
        let (data_tx, data_rx) = mpsc::channel(STREAM_CAPACITY);
        let (error_tx, error_rx) = error_channel();
        let takes_input = matches!(
            self.shape,
            Shape::Mapper | Shape::TryMapper | Shape::Consumer | Shape::TryConsumer
        );
        let raw = self.raw.clone();
        let name = self.name.clone();

        tokio::task::spawn_blocking(move || {
            let args = if takes_input {
                match input.blocking_recv() {
                    Some(value) => vec![Arg::Value(value)],
                    None => {
                        debug!("Input of '{}' closed before a value arrived, skipping call", name);
                        return;
                    }
                }
            } else {
                Vec::new()
            };
            drop(input);

            let outcome = match call_raw(&raw, args) {
                Ok(rets) => split_direct(rets),
                Err(err) => Err(err),
            };
            match outcome {
                Ok(Some(value)) => {
                    if data_tx.blocking_send(value).is_err() {
                        debug!("Output of '{}' dropped before the result was read", name);
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    debug!("Function '{}' failed: {}", name, err);
                    if error_tx.blocking_send(err).is_err() {
                        debug!("Errors of '{}' dropped before the error was read", name);
                    }
                }
            }
        });

        Outputs {
            data: data_rx,
            errors: Some(error_rx),
        }
    }
}

/// Separate a direct function's returns into its data or its error.
fn split_direct(rets: Vec<Ret>) -> Result<Option<Value>, FunctionError> {
    let mut data = None;
    for ret in rets {
        match ret {
            Ret::Value(value) => data = Some(value),
            Ret::Error(Some(err)) => return Err(err),
            Ret::Error(None) => {}
            Ret::Stream(_) | Ret::Errors(_) => {
                return Err(FunctionError::new("direct function returned a stream"))
            }
        }
    }
    Ok(data)
}

fn call_raw(raw: &RawFunction, args: Vec<Arg>) -> Result<Vec<Ret>, FunctionError> {
    match catch_unwind(AssertUnwindSafe(|| raw(args))) {
        Ok(result) => result,
        Err(panic) => {
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            warn!("Function panicked: {}", message);
            Err(FunctionError::new(format!("function panicked: {}", message)))
        }
    }
}

fn invalid(signature: &Signature, reason: &str) -> ResolveError {
    ResolveError::InvalidSignature(format!("{} in {}", reason, signature))
}

fn classify(signature: &Signature) -> Result<(Shape, DataType), ResolveError> {
    let params = signature.params.as_slice();
    let returns = signature.returns.as_slice();

    if returns.len() > 2 {
        return Err(invalid(signature, "too many return values"));
    }

    let first_param = params.first();
    let first_return = returns.first();
    if first_param.is_some_and(Kind::is_stream) && first_return.is_some_and(Kind::is_stream) {
        if params.len() > 1 {
            return Err(invalid(signature, "too many arguments to streaming function"));
        }
        let input = match (first_param, first_return) {
            (Some(Kind::Receiver(input)), Some(Kind::Receiver(_))) => *input,
            _ => return Err(invalid(signature, "wrong direction of streams")),
        };
        return match returns.get(1) {
            None => Ok((Shape::Streaming, input)),
            Some(Kind::ErrorReceiver) => Ok((Shape::StreamingWithErrors, input)),
            Some(_) => Err(invalid(
                signature,
                "second return of a streaming function should be an ErrorReceiver",
            )),
        };
    }

    if params.len() > 1 {
        return Err(invalid(signature, "too many arguments to non streaming function"));
    }
    if params.iter().chain(returns).any(Kind::is_stream) {
        return Err(invalid(signature, "non streaming function cannot mix streams and values"));
    }

    let input = match first_param {
        Some(Kind::Value(ty)) => Some(*ty),
        Some(_) => return Err(invalid(signature, "parameter should be a value")),
        None => None,
    };
    let (returns_data, returns_error) = match returns {
        [] => (false, false),
        [Kind::Value(_)] => (true, false),
        [Kind::Error] => (false, true),
        [Kind::Value(_), Kind::Error] => (true, true),
        _ => return Err(invalid(signature, "expected at most a value and a trailing error")),
    };

    let shape = Shape::direct(input.is_some(), returns_data, returns_error);
    Ok((shape, input.unwrap_or_else(DataType::of::<()>)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::stream::{channel, Receiver};

    fn string() -> DataType {
        DataType::of::<String>()
    }

    async fn drive(function: &CanonicalFunction, inputs: Vec<Value>) -> (Vec<Value>, Vec<FunctionError>) {
        let (tx, rx) = mpsc::channel(inputs.len().max(1));
        for value in inputs {
            tx.send(value).await.unwrap();
        }
        drop(tx);

        let Outputs { mut data, errors } = function.invoke(rx).unwrap();
        let mut values = Vec::new();
        while let Some(value) = data.recv().await {
            values.push(value);
        }
        let mut errs = Vec::new();
        if let Some(mut errors) = errors {
            while let Some(err) = errors.recv().await {
                errs.push(err);
            }
        }
        (values, errs)
    }

    fn all_shapes() -> Vec<(Handler, Shape)> {
        vec![
            (Handler::streaming(|rx: Receiver<String>| rx), Shape::Streaming),
            (
                Handler::streaming_with_errors(|rx: Receiver<String>| {
                    let (_errors, error_rx) = error_channel();
                    (rx, error_rx)
                }),
                Shape::StreamingWithErrors,
            ),
            (Handler::mapper(|s: String| s.len()), Shape::Mapper),
            (Handler::try_mapper(|s: String| s.parse::<u32>()), Shape::TryMapper),
            (Handler::consumer(|_: String| {}), Shape::Consumer),
            (
                Handler::try_consumer(|_: String| Ok::<(), FunctionError>(())),
                Shape::TryConsumer,
            ),
            (Handler::supplier(|| 42u32), Shape::Supplier),
            (Handler::try_supplier(|| Ok::<u32, FunctionError>(5)), Shape::TrySupplier),
            (Handler::runnable(|| {}), Shape::Runnable),
            (Handler::try_runnable(|| Ok::<(), FunctionError>(())), Shape::TryRunnable),
        ]
    }

    #[test]
    fn test_all_shapes_canonicalize() {
        for (handler, shape) in all_shapes() {
            let function = CanonicalFunction::new(handler).unwrap();
            assert_eq!(function.shape(), shape);
        }
    }

    #[tokio::test]
    async fn test_all_shapes_emit_at_most_their_inputs_and_close() {
        for (handler, shape) in all_shapes() {
            let function = CanonicalFunction::new(handler).unwrap();
            let inputs = if function.input_type() == string() {
                vec![Value::new("7".to_string())]
            } else {
                vec![]
            };
            let supplied = if shape == Shape::Supplier || shape == Shape::TrySupplier { 1 } else { 0 };
            let limit = inputs.len() + supplied;
            let (values, errors) = drive(&function, inputs).await;
            assert!(values.len() <= limit, "{} emitted too many values", shape);
            assert!(errors.is_empty(), "{} reported {:?}", shape, errors);
        }
    }

    #[tokio::test]
    async fn test_direct_value_or_error_never_both() {
        let function = CanonicalFunction::new(Handler::try_mapper(|s: String| {
            if s == "Riff" {
                Err("error condition")
            } else {
                Ok(format!("Hello {}", s))
            }
        }))
        .unwrap();

        let (values, errors) = drive(&function, vec![Value::new("world".to_string())]).await;
        assert_eq!(errors.len(), 0);
        assert_eq!(
            values.into_iter().next().and_then(Value::downcast::<String>),
            Some("Hello world".to_string())
        );

        let (values, errors) = drive(&function, vec![Value::new("Riff".to_string())]).await;
        assert!(values.is_empty());
        assert_eq!(errors, vec![FunctionError::new("error condition")]);
    }

    #[tokio::test]
    async fn test_direct_function_is_skipped_when_input_closes_early() {
        let called = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = called.clone();
        let function = CanonicalFunction::new(Handler::consumer(move |_: String| {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }))
        .unwrap();

        let (values, errors) = drive(&function, vec![]).await;
        assert!(values.is_empty());
        assert!(errors.is_empty());
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_zero_arity_function_runs_without_input() {
        let function = CanonicalFunction::new(Handler::supplier(|| 42u32)).unwrap();
        assert_eq!(function.input_type(), DataType::of::<()>());

        let (values, _) = drive(&function, vec![]).await;
        assert_eq!(values.into_iter().next().and_then(Value::downcast::<u32>), Some(42));
    }

    #[tokio::test]
    async fn test_panics_become_function_errors() {
        let function = CanonicalFunction::new(Handler::mapper(|_: String| -> String {
            panic!("boom");
        }))
        .unwrap();

        let (values, errors) = drive(&function, vec![Value::new("x".to_string())]).await;
        assert!(values.is_empty());
        assert_eq!(errors, vec![FunctionError::new("function panicked: boom")]);
    }

    #[tokio::test]
    async fn test_streaming_function_passes_through() {
        let function = CanonicalFunction::new(Handler::streaming(|mut rx: Receiver<String>| {
            let (tx, out) = channel::<usize>();
            tokio::spawn(async move {
                while let Some(word) = rx.recv().await {
                    if tx.send(word.len()).await.is_err() {
                        return;
                    }
                }
            });
            out
        }))
        .unwrap();

        let (values, errors) = drive(
            &function,
            vec![Value::new("ab".to_string()), Value::new("abc".to_string())],
        )
        .await;
        let lengths: Vec<usize> = values.into_iter().filter_map(Value::downcast).collect();
        assert_eq!(lengths, vec![2, 3]);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_invalid_signatures() {
        let noop = |_: Vec<Arg>| Ok(Vec::new());
        let cases = vec![
            Signature::new(vec![Kind::Value(string()), Kind::Value(string())], vec![]),
            Signature::new(vec![], vec![Kind::Value(string()), Kind::Error, Kind::Error]),
            Signature::new(vec![Kind::Receiver(string())], vec![Kind::Value(string())]),
            Signature::new(vec![Kind::Sender(string())], vec![Kind::Receiver(string())]),
            Signature::new(vec![Kind::Receiver(string())], vec![Kind::Sender(string())]),
            Signature::new(
                vec![Kind::Receiver(string())],
                vec![Kind::Receiver(string()), Kind::Receiver(string())],
            ),
            Signature::new(vec![], vec![Kind::Value(string()), Kind::Value(string())]),
            Signature::new(vec![], vec![Kind::Error, Kind::Value(string())]),
            Signature::new(vec![Kind::Error], vec![]),
        ];
        for signature in cases {
            let handler = Handler::dynamic(signature.clone(), noop);
            match CanonicalFunction::new(handler) {
                Err(ResolveError::InvalidSignature(_)) => {}
                other => panic!("{} should be rejected, got {:?}", signature, other),
            }
        }
    }

    #[test]
    fn test_dynamic_signature_is_accepted_when_valid() {
        let signature = Signature::new(vec![Kind::Value(string())], vec![Kind::Error]);
        let handler = Handler::dynamic(signature, |_| Ok(vec![Ret::Error(None)]));
        let function = CanonicalFunction::new(handler).unwrap();
        assert_eq!(function.shape(), Shape::TryConsumer);
    }

    #[tokio::test]
    async fn test_streaming_function_with_mismatched_returns_fails_invocation() {
        let signature = Signature::new(vec![Kind::Receiver(string())], vec![Kind::Receiver(string())]);
        let handler = Handler::dynamic(signature, |_| Ok(vec![]));
        let function = CanonicalFunction::new(handler).unwrap();

        let (_tx, rx) = mpsc::channel(1);
        match function.invoke(rx) {
            Err(InvokerError::Invocation(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
