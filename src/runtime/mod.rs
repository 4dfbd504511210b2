//! Network runtime serving an [`Invoker`](crate::Invoker) over HTTP.

mod config;
pub mod frame;
mod server;

pub use config::{ConfigError, InvokerConfig};
pub use frame::{encode_frame, FrameDecoder, StreamFrame};
pub use server::{InvokerServer, FRAMED_CONTENT_TYPE};
