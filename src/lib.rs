//! # Strand - Streaming Function Invoker
//!
//! Strand serves a user function, loaded from a shared library at startup,
//! over a single bidirectional streaming contract: a sequence of envelopes
//! (opaque payload plus headers) in, a sequence of envelopes out.
//!
//! ## Architecture
//!
//! ```text
//!   envelopes ──► inbound task ──► Receiver<X> ──┐
//!                 (unmarshall)                   │
//!                                         user function
//!                                                │
//!   envelopes ◄── outbound task ◄── Receiver<Y> ─┤
//!                 (negotiate,      ErrorReceiver ┘
//!                  marshall)
//! ```
//!
//! Any of ten calling conventions is accepted, from plain `fn(X) -> Y` to
//! fully streaming `fn(Receiver<X>) -> (Receiver<Y>, ErrorReceiver)`. Each is
//! canonicalized into the streaming form once, when the function is loaded.
//!
//! ## Writing a function
//!
//! ```rust,ignore
//! use strand::prelude::*;
//!
//! strand::declare_plugin!();
//!
//! #[strand_function]
//! fn string_in_string_out(name: String) -> Result<String, FunctionError> {
//!     if name == "Riff" {
//!         return Err(FunctionError::new("error condition"));
//!     }
//!     Ok(format!("Hello {}", name))
//! }
//! ```
//!
//! Build the crate as a `cdylib` and point the invoker at it with
//! `file:///path/to/libfunctions.so?handler=StringInStringOut`.
//!
//! ## Calling a function
//!
//! ```rust,no_run
//! use strand::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let invoker = Invoker::new(Handler::mapper(|s: String| s.to_uppercase()))?;
//!     let reply = invoker
//!         .invoke_once(Envelope::new("hello").with_header(CONTENT_TYPE, "text/plain"))
//!         .await;
//!     assert_eq!(&reply.payload[..], b"HELLO");
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod function;
pub mod invoker;
pub mod runtime;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::function::{
        channel, error_channel, Data, ErrorReceiver, ErrorSender, FunctionError, Handler, Receiver,
        Sender,
    };
    pub use crate::invoker::{Envelope, Invoker, InvokerError, ACCEPT, CONTENT_TYPE};
    pub use crate::runtime::{InvokerConfig, InvokerServer};
    pub use strand_macro::strand_function;
}

// Re-export for convenience
pub use codec::Registry;
pub use function::{
    channel, error_channel, CanonicalFunction, Data, ErrorReceiver, ErrorSender, FunctionError,
    Handler, Receiver, ResolveError, Sender, Shape, TryRecvError, ABI_SYMBOL, ABI_VERSION,
};
pub use invoker::{Envelope, ErrorCode, Invoker, InvokerError};
pub use runtime::{InvokerConfig, InvokerServer};
pub use strand_macro::strand_function;

/// Export the ABI version of this crate from a plugin library.
///
/// Invoke once at the root of every function library. The invoker refuses
/// to load libraries built against a different version.
#[macro_export]
macro_rules! declare_plugin {
    () => {
        #[no_mangle]
        pub static STRAND_ABI_VERSION: &str = $crate::ABI_VERSION;
    };
}
