//! Length-prefixed CBOR frames used by the streaming HTTP endpoint.
//!
//! Each frame is a big-endian `u32` byte length followed by that many bytes
//! of CBOR. Requests carry [`Envelope`]s; responses carry [`StreamFrame`]s,
//! the last of which is always a status.

use crate::invoker::{Envelope, InvokerError, TransportError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Length of the frame header.
pub const HEADER_LEN: usize = 4;

/// Code of the terminal status of a successful call.
pub const STATUS_OK: &str = "ok";

/// One frame of a streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamFrame {
    Envelope(Envelope),
    Status { code: String, message: String },
}

impl StreamFrame {
    /// The terminal status for a call result.
    pub fn status(result: &Result<(), InvokerError>) -> Self {
        match result {
            Ok(()) => StreamFrame::Status {
                code: STATUS_OK.to_string(),
                message: String::new(),
            },
            Err(err) => StreamFrame::Status {
                code: err.code().as_str().to_string(),
                message: err.to_string(),
            },
        }
    }
}

/// Encode one value as a frame.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Bytes, TransportError> {
    let body = serde_cbor::to_vec(value).map_err(|e| TransportError::Frame(e.to_string()))?;
    let len = u32::try_from(body.len())
        .map_err(|_| TransportError::Frame(format!("frame of {} bytes is too large", body.len())))?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + body.len());
    buf.put_u32(len);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Incremental frame decoder over arbitrarily split input.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame: usize,
}

impl FrameDecoder {
    pub fn new(max_frame: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame,
        }
    }

    /// Buffer more input.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Decode the next complete frame, if one is buffered.
    pub fn next_frame<T: DeserializeOwned>(&mut self) -> Result<Option<T>, TransportError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&self.buf[..HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;
        if len > self.max_frame {
            return Err(TransportError::Frame(format!(
                "frame of {} bytes exceeds the limit of {}",
                len, self.max_frame
            )));
        }
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        self.buf.advance(HEADER_LEN);
        let body = self.buf.split_to(len);
        serde_cbor::from_slice(&body)
            .map(Some)
            .map_err(|e| TransportError::Frame(e.to_string()))
    }

    /// Check that no partial frame is left at end of input.
    pub fn finish(&self) -> Result<(), TransportError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(TransportError::Frame(format!(
                "{} trailing bytes at end of stream",
                self.buf.len()
            )))
        }
    }
}
