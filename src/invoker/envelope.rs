use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const CONTENT_TYPE: &str = "Content-Type";
pub const ACCEPT: &str = "Accept";
pub const CORRELATION_ID: &str = "correlationId";
pub const ERROR: &str = "error";

/// One unit of data on the wire: an opaque payload plus headers.
///
/// Header names are matched case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub payload: Bytes,
    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,
}

impl Envelope {
    /// Create an envelope with no headers.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            headers: HashMap::new(),
        }
    }

    /// Append a value to a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_header(name, value);
        self
    }

    /// Append a value to a header, reusing an existing entry of the same name.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let key = self
            .headers
            .keys()
            .find(|existing| existing.eq_ignore_ascii_case(&name))
            .cloned()
            .unwrap_or(name);
        self.headers.entry(key).or_default().push(value.into());
    }

    /// All values of a header.
    pub fn header(&self, name: &str) -> Option<&[String]> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
    }

    /// First value of a header.
    pub fn first_header(&self, name: &str) -> Option<&str> {
        self.header(name)?.first().map(String::as_str)
    }
}
