use crate::codec::CodecError;
use crate::function::FunctionError;
use std::fmt;
use thiserror::Error;

/// Machine readable error codes carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ContentTypeUnsupported,
    AcceptTypeUnsupported,
    Unmarshall,
    Marshall,
    FunctionInvocation,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ContentTypeUnsupported => "error-client-content-type-unsupported",
            ErrorCode::AcceptTypeUnsupported => "error-client-accept-type-unsupported",
            ErrorCode::Unmarshall => "error-client-unmarshall",
            ErrorCode::Marshall => "error-client-marshall",
            ErrorCode::FunctionInvocation => "error-server-function-invocation",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures of the envelope transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("stream closed by peer")]
    Closed,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    #[error("malformed frame: {0}")]
    Frame(String),
}

/// The terminal error of a call.
#[derive(Debug, Error)]
pub enum InvokerError {
    #[error("Unsupported Content-Type: {0}")]
    ContentTypeNotSupported(String),

    #[error("unsupported content types: [{}]", .0.join(" "))]
    AcceptNotSupported(Vec<String>),

    #[error("{0}")]
    Unmarshall(#[source] CodecError),

    #[error("{0}")]
    Marshall(#[source] CodecError),

    /// The user function reported an error.
    #[error("{0}")]
    Function(FunctionError),

    /// The function could not be invoked as declared.
    #[error("{0}")]
    Invocation(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl InvokerError {
    /// Wire code of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            InvokerError::ContentTypeNotSupported(_) => ErrorCode::ContentTypeUnsupported,
            InvokerError::AcceptNotSupported(_) => ErrorCode::AcceptTypeUnsupported,
            InvokerError::Unmarshall(_) => ErrorCode::Unmarshall,
            InvokerError::Marshall(_) => ErrorCode::Marshall,
            InvokerError::Function(_)
            | InvokerError::Invocation(_)
            | InvokerError::Transport(_) => ErrorCode::FunctionInvocation,
        }
    }
}

impl From<FunctionError> for InvokerError {
    fn from(err: FunctionError) -> Self {
        InvokerError::Function(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_and_codes() {
        let err = InvokerError::ContentTypeNotSupported("application/xml".to_string());
        assert_eq!(err.to_string(), "Unsupported Content-Type: application/xml");
        assert_eq!(err.code().as_str(), "error-client-content-type-unsupported");

        let err = InvokerError::AcceptNotSupported(vec!["bogus/type".to_string(), "x/y".to_string()]);
        assert_eq!(err.to_string(), "unsupported content types: [bogus/type x/y]");
        assert_eq!(err.code(), ErrorCode::AcceptTypeUnsupported);

        let err = InvokerError::from(FunctionError::new("error condition"));
        assert_eq!(err.to_string(), "error condition");
        assert_eq!(err.code().to_string(), "error-server-function-invocation");

        let err = InvokerError::from(TransportError::Closed);
        assert_eq!(err.code(), ErrorCode::FunctionInvocation);
    }
}
