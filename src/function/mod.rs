//! User functions: their data model, registration and canonical form.

pub mod canonical;
pub mod data;
pub mod handler;
pub mod resolver;
pub mod stream;

pub use canonical::{CanonicalFunction, Outputs, Shape};
pub use data::{Data, DataType, Value};
pub use handler::{Arg, FunctionError, Handler, Kind, RawFunction, Ret, Signature};
pub use resolver::{resolve, FunctionUri, LoadedFunction, ResolveError, ABI_SYMBOL, ABI_VERSION};
pub use stream::{
    channel, channel_with_capacity, error_channel, ErrorReceiver, ErrorSender, RawReceiver,
    RawSender, Receiver, SendError, Sender, TryRecvError,
};
