//! Function handlers and their introspectable signatures.
//!
//! A [`Handler`] pairs an erased callable with the [`Signature`] it declares.
//! The typed constructors cover every supported calling convention:
//!
//! | constructor             | shape                                   |
//! |-------------------------|-----------------------------------------|
//! | `streaming`             | `fn(Receiver<X>) -> Receiver<Y>`        |
//! | `streaming_with_errors` | `fn(Receiver<X>) -> (Receiver<Y>, ErrorReceiver)` |
//! | `mapper`                | `fn(X) -> Y`                            |
//! | `try_mapper`            | `fn(X) -> Result<Y, E>`                 |
//! | `consumer`              | `fn(X)`                                 |
//! | `try_consumer`          | `fn(X) -> Result<(), E>`                |
//! | `supplier`              | `fn() -> Y`                             |
//! | `try_supplier`          | `fn() -> Result<Y, E>`                  |
//! | `runnable`              | `fn()`                                  |
//! | `try_runnable`          | `fn() -> Result<(), E>`                 |
//!
//! [`Handler::dynamic`] accepts a hand-declared signature instead; it is
//! validated when the handler is canonicalized.

use crate::function::data::{Data, DataType, Value};
use crate::function::stream::{ErrorReceiver, RawReceiver, Receiver};
use std::fmt;
use std::sync::Arc;

/// Error produced by a user function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionError {
    /// Human readable message.
    pub message: String,
}

impl FunctionError {
    /// Create a new FunctionError.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Build a FunctionError from anything displayable.
    pub fn from_display(err: impl fmt::Display) -> Self {
        Self::new(err.to_string())
    }
}

impl fmt::Display for FunctionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for FunctionError {}

/// Kind of a single parameter or return slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// A plain value.
    Value(DataType),
    /// A function error.
    Error,
    /// A stream the holder can receive from.
    Receiver(DataType),
    /// A stream the holder can only send to.
    Sender(DataType),
    /// A stream of function errors the holder can receive from.
    ErrorReceiver,
}

impl Kind {
    /// Whether this slot is a stream of any direction.
    pub fn is_stream(&self) -> bool {
        matches!(self, Kind::Receiver(_) | Kind::Sender(_) | Kind::ErrorReceiver)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Value(ty) => write!(f, "{}", ty),
            Kind::Error => write!(f, "FunctionError"),
            Kind::Receiver(ty) => write!(f, "Receiver<{}>", ty),
            Kind::Sender(ty) => write!(f, "Sender<{}>", ty),
            Kind::ErrorReceiver => write!(f, "ErrorReceiver"),
        }
    }
}

/// Parameter and return kinds of a function, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Signature {
    pub params: Vec<Kind>,
    pub returns: Vec<Kind>,
}

impl Signature {
    /// Create a new signature.
    pub fn new(params: Vec<Kind>, returns: Vec<Kind>) -> Self {
        Self { params, returns }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ")")?;
        match self.returns.as_slice() {
            [] => Ok(()),
            [single] => write!(f, " -> {}", single),
            many => {
                write!(f, " -> (")?;
                for (i, ret) in many.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", ret)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// An erased argument.
#[derive(Debug)]
pub enum Arg {
    Value(Value),
    Stream(RawReceiver),
}

/// An erased return slot.
#[derive(Debug)]
pub enum Ret {
    Value(Value),
    Error(Option<FunctionError>),
    Stream(RawReceiver),
    Errors(ErrorReceiver),
}

/// Erased callable. An `Err` means the arguments did not match the callable.
pub type RawFunction = Arc<dyn Fn(Vec<Arg>) -> Result<Vec<Ret>, FunctionError> + Send + Sync>;

/// A user function together with its declared signature.
#[derive(Clone)]
pub struct Handler {
    name: String,
    signature: Signature,
    raw: RawFunction,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish()
    }
}

impl Handler {
    /// Build a handler from a hand-declared signature and an erased callable.
    pub fn dynamic<F>(signature: Signature, raw: F) -> Self
    where
        F: Fn(Vec<Arg>) -> Result<Vec<Ret>, FunctionError> + Send + Sync + 'static,
    {
        Self {
            name: String::from("anonymous"),
            signature,
            raw: Arc::new(raw),
        }
    }

    /// Set the handler name used in diagnostics.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Get the handler name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the declared signature.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub(crate) fn raw(&self) -> RawFunction {
        self.raw.clone()
    }

    /// `fn(Receiver<X>) -> Receiver<Y>`
    pub fn streaming<X, Y, F>(f: F) -> Self
    where
        X: Data,
        Y: Data,
        F: Fn(Receiver<X>) -> Receiver<Y> + Send + Sync + 'static,
    {
        let signature = Signature::new(
            vec![Kind::Receiver(DataType::of::<X>())],
            vec![Kind::Receiver(DataType::of::<Y>())],
        );
        Self::dynamic(signature, move |args| {
            let input = stream_arg::<X>(args)?;
            Ok(vec![Ret::Stream(f(input).into_raw())])
        })
    }

    /// `fn(Receiver<X>) -> (Receiver<Y>, ErrorReceiver)`
    pub fn streaming_with_errors<X, Y, F>(f: F) -> Self
    where
        X: Data,
        Y: Data,
        F: Fn(Receiver<X>) -> (Receiver<Y>, ErrorReceiver) + Send + Sync + 'static,
    {
        let signature = Signature::new(
            vec![Kind::Receiver(DataType::of::<X>())],
            vec![Kind::Receiver(DataType::of::<Y>()), Kind::ErrorReceiver],
        );
        Self::dynamic(signature, move |args| {
            let input = stream_arg::<X>(args)?;
            let (output, errors) = f(input);
            Ok(vec![Ret::Stream(output.into_raw()), Ret::Errors(errors)])
        })
    }

    /// `fn(X) -> Y`
    pub fn mapper<X, Y, F>(f: F) -> Self
    where
        X: Data,
        Y: Data,
        F: Fn(X) -> Y + Send + Sync + 'static,
    {
        let signature = Signature::new(
            vec![Kind::Value(DataType::of::<X>())],
            vec![Kind::Value(DataType::of::<Y>())],
        );
        Self::dynamic(signature, move |args| {
            let x = value_arg::<X>(args)?;
            Ok(vec![Ret::Value(Value::new(f(x)))])
        })
    }

    /// `fn(X) -> Result<Y, E>`
    pub fn try_mapper<X, Y, E, F>(f: F) -> Self
    where
        X: Data,
        Y: Data,
        E: fmt::Display + 'static,
        F: Fn(X) -> Result<Y, E> + Send + Sync + 'static,
    {
        let signature = Signature::new(
            vec![Kind::Value(DataType::of::<X>())],
            vec![Kind::Value(DataType::of::<Y>()), Kind::Error],
        );
        Self::dynamic(signature, move |args| {
            let x = value_arg::<X>(args)?;
            Ok(match f(x) {
                Ok(y) => vec![Ret::Value(Value::new(y)), Ret::Error(None)],
                Err(err) => vec![
                    Ret::Value(Value::new(())),
                    Ret::Error(Some(FunctionError::from_display(err))),
                ],
            })
        })
    }

    /// `fn(X)`
    pub fn consumer<X, F>(f: F) -> Self
    where
        X: Data,
        F: Fn(X) + Send + Sync + 'static,
    {
        let signature = Signature::new(vec![Kind::Value(DataType::of::<X>())], vec![]);
        Self::dynamic(signature, move |args| {
            f(value_arg::<X>(args)?);
            Ok(vec![])
        })
    }

    /// `fn(X) -> Result<(), E>`
    pub fn try_consumer<X, E, F>(f: F) -> Self
    where
        X: Data,
        E: fmt::Display + 'static,
        F: Fn(X) -> Result<(), E> + Send + Sync + 'static,
    {
        let signature = Signature::new(vec![Kind::Value(DataType::of::<X>())], vec![Kind::Error]);
        Self::dynamic(signature, move |args| {
            let x = value_arg::<X>(args)?;
            Ok(vec![Ret::Error(f(x).err().map(FunctionError::from_display))])
        })
    }

    /// `fn() -> Y`
    pub fn supplier<Y, F>(f: F) -> Self
    where
        Y: Data,
        F: Fn() -> Y + Send + Sync + 'static,
    {
        let signature = Signature::new(vec![], vec![Kind::Value(DataType::of::<Y>())]);
        Self::dynamic(signature, move |args| {
            no_args(args)?;
            Ok(vec![Ret::Value(Value::new(f()))])
        })
    }

    /// `fn() -> Result<Y, E>`
    pub fn try_supplier<Y, E, F>(f: F) -> Self
    where
        Y: Data,
        E: fmt::Display + 'static,
        F: Fn() -> Result<Y, E> + Send + Sync + 'static,
    {
        let signature = Signature::new(vec![], vec![Kind::Value(DataType::of::<Y>()), Kind::Error]);
        Self::dynamic(signature, move |args| {
            no_args(args)?;
            Ok(match f() {
                Ok(y) => vec![Ret::Value(Value::new(y)), Ret::Error(None)],
                Err(err) => vec![
                    Ret::Value(Value::new(())),
                    Ret::Error(Some(FunctionError::from_display(err))),
                ],
            })
        })
    }

    /// `fn()`
    pub fn runnable<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::dynamic(Signature::default(), move |args| {
            no_args(args)?;
            f();
            Ok(vec![])
        })
    }

    /// `fn() -> Result<(), E>`
    pub fn try_runnable<E, F>(f: F) -> Self
    where
        E: fmt::Display + 'static,
        F: Fn() -> Result<(), E> + Send + Sync + 'static,
    {
        let signature = Signature::new(vec![], vec![Kind::Error]);
        Self::dynamic(signature, move |args| {
            no_args(args)?;
            Ok(vec![Ret::Error(f().err().map(FunctionError::from_display))])
        })
    }
}

fn mismatch(expected: &str, args: &[Arg]) -> FunctionError {
    FunctionError::new(format!(
        "argument mismatch: expected {}, got {:?}",
        expected, args
    ))
}

fn stream_arg<X: Data>(mut args: Vec<Arg>) -> Result<Receiver<X>, FunctionError> {
    match args.as_slice() {
        [Arg::Stream(_)] => {}
        _ => return Err(mismatch("a single stream", &args)),
    }
    match args.pop() {
        Some(Arg::Stream(rx)) => Ok(Receiver::from_raw(rx)),
        _ => Err(mismatch("a single stream", &args)),
    }
}

fn value_arg<X: Data>(mut args: Vec<Arg>) -> Result<X, FunctionError> {
    if args.len() != 1 {
        return Err(mismatch("a single value", &args));
    }
    match args.pop() {
        Some(Arg::Value(value)) => {
            let found = value.data_type();
            value.downcast::<X>().ok_or_else(|| {
                FunctionError::new(format!(
                    "argument mismatch: expected {}, got {}",
                    std::any::type_name::<X>(),
                    found
                ))
            })
        }
        other => {
            let args: Vec<Arg> = other.into_iter().collect();
            Err(mismatch("a single value", &args))
        }
    }
}

fn no_args(args: Vec<Arg>) -> Result<(), FunctionError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(mismatch("no arguments", &args))
    }
}
