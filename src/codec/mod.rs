//! Converting between payload bytes and function values.
//!
//! A [`Registry`] holds the available [`Marshaller`]s and [`Unmarshaller`]s.
//! Both are stateless and are queried by the runtime [`DataType`] of the
//! value at hand and by media type.

pub mod json;
pub mod negotiation;
pub mod text;

pub use json::Json;
pub use negotiation::{negotiate_content_type, parse_accept, AcceptSpec, DEFAULT_ACCEPT};
pub use text::PlainText;

use crate::function::{DataType, Value};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub const TEXT_PLAIN: &str = "text/plain";
pub const APPLICATION_JSON: &str = "application/json";

/// A MIME media type as found in `Content-Type` and `Accept` headers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaType(String);

impl MediaType {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The lowercased `type/subtype` without parameters, or `None` when the
    /// value is not a well-formed media type.
    pub fn essence(&self) -> Option<String> {
        let essence = self.0.split(';').next()?.trim();
        let (ty, subtype) = essence.split_once('/')?;
        let valid = |part: &str| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || "!#$&-^_.+*".contains(c))
        };
        if valid(ty) && valid(subtype) {
            Some(essence.to_ascii_lowercase())
        } else {
            None
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MediaType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Errors raised while converting payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("cannot convert {type_name} as {media_type}")]
    Unsupported {
        type_name: &'static str,
        media_type: String,
    },

    #[error("{0}")]
    Unmarshall(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl CodecError {
    pub fn unsupported(ty: DataType, media_type: &MediaType) -> Self {
        Self::Unsupported {
            type_name: ty.name(),
            media_type: media_type.to_string(),
        }
    }
}

/// Converts a runtime value to bytes.
pub trait Marshaller: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Media types this marshaller can produce for `ty`. Empty when `ty` is
    /// not supported. Every returned type is valid for [`Marshaller::marshall`].
    fn supported_media_types(&self, ty: &DataType) -> Vec<MediaType>;

    /// Write `value` out according to `media_type`.
    fn marshall(&self, value: &Value, media_type: &MediaType) -> Result<Bytes, CodecError>;
}

/// Converts bytes to a fresh instance of a runtime type.
pub trait Unmarshaller: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Whether `ty` can be read from `media_type`. When true, a subsequent
    /// [`Unmarshaller::unmarshall`] for the same pair never fails for lack
    /// of support.
    fn can_unmarshall(&self, ty: &DataType, media_type: &MediaType) -> bool;

    /// Read `payload` into a new instance of `ty`.
    fn unmarshall(
        &self,
        payload: &[u8],
        ty: &DataType,
        media_type: &MediaType,
    ) -> Result<Value, CodecError>;
}

/// An ordered set of marshallers and unmarshallers.
#[derive(Clone)]
pub struct Registry {
    marshallers: Vec<Arc<dyn Marshaller>>,
    unmarshallers: Vec<Arc<dyn Unmarshaller>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field(
                "marshallers",
                &self.marshallers.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .field(
                "unmarshallers",
                &self.unmarshallers.iter().map(|u| u.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Registry {
    /// A registry with nothing registered.
    pub fn empty() -> Self {
        Self {
            marshallers: Vec::new(),
            unmarshallers: Vec::new(),
        }
    }

    /// Plain text and JSON, in that order, so wildcard accepts render
    /// textual values as text.
    pub fn builtin() -> Self {
        Self::empty()
            .with_marshaller(PlainText)
            .with_marshaller(Json)
            .with_unmarshaller(PlainText)
            .with_unmarshaller(Json)
    }

    /// Register a marshaller after the existing ones.
    pub fn with_marshaller(mut self, marshaller: impl Marshaller + 'static) -> Self {
        self.marshallers.push(Arc::new(marshaller));
        self
    }

    /// Register an unmarshaller after the existing ones.
    pub fn with_unmarshaller(mut self, unmarshaller: impl Unmarshaller + 'static) -> Self {
        self.unmarshallers.push(Arc::new(unmarshaller));
        self
    }

    /// Every media type some marshaller supports for `ty`, with the first
    /// marshaller claiming each type.
    pub fn offers(&self, ty: &DataType) -> Vec<(MediaType, Arc<dyn Marshaller>)> {
        let mut offers: Vec<(MediaType, Arc<dyn Marshaller>)> = Vec::new();
        for marshaller in &self.marshallers {
            for media_type in marshaller.supported_media_types(ty) {
                if !offers.iter().any(|(existing, _)| *existing == media_type) {
                    offers.push((media_type, marshaller.clone()));
                }
            }
        }
        offers
    }

    /// Pick the marshaller best matching the caller's `Accept` values for
    /// values of `ty`. `None` means no acceptable overlap.
    pub fn best_marshaller<S: AsRef<str>>(
        &self,
        accept: &[S],
        ty: &DataType,
    ) -> Option<(Arc<dyn Marshaller>, MediaType)> {
        let offers = self.offers(ty);
        let names: Vec<&str> = offers.iter().map(|(media_type, _)| media_type.as_str()).collect();
        let chosen = negotiate_content_type(accept, &names, "");
        offers
            .into_iter()
            .find(|(media_type, _)| media_type.as_str() == chosen)
            .map(|(media_type, marshaller)| (marshaller, media_type))
    }

    /// The first unmarshaller able to read `ty` from `media_type`.
    pub fn unmarshaller_for(
        &self,
        ty: &DataType,
        media_type: &MediaType,
    ) -> Option<Arc<dyn Unmarshaller>> {
        self.unmarshallers
            .iter()
            .find(|unmarshaller| unmarshaller.can_unmarshall(ty, media_type))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_essence() {
        assert_eq!(
            MediaType::new("Application/JSON; charset=utf-8").essence(),
            Some("application/json".to_string())
        );
        assert_eq!(MediaType::new("text").essence(), None);
        assert_eq!(MediaType::new("/plain").essence(), None);
        assert_eq!(MediaType::new("text/pl ain").essence(), None);
    }

    #[test]
    fn test_offers_depend_on_runtime_type() {
        let registry = Registry::builtin();

        let offers: Vec<String> = registry
            .offers(&DataType::of::<String>())
            .into_iter()
            .map(|(media_type, _)| media_type.to_string())
            .collect();
        assert_eq!(offers, vec![TEXT_PLAIN, APPLICATION_JSON]);

        let offers = registry.offers(&DataType::of::<serde_json::Value>());
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].0.as_str(), APPLICATION_JSON);
    }

    #[test]
    fn test_best_marshaller() {
        let registry = Registry::builtin();
        let ty = DataType::of::<String>();

        let (marshaller, media_type) = registry.best_marshaller(&["application/json"], &ty).unwrap();
        assert_eq!(media_type.as_str(), APPLICATION_JSON);
        assert_eq!(marshaller.name(), "json");

        let none: [&str; 0] = [];
        let (_, media_type) = registry.best_marshaller(&none, &ty).unwrap();
        assert_eq!(media_type.as_str(), TEXT_PLAIN);

        assert!(registry.best_marshaller(&["bogus/type"], &ty).is_none());

        let (marshaller, media_type) = registry.best_marshaller(&["*/*"], &ty).unwrap();
        assert_eq!(media_type.as_str(), TEXT_PLAIN);
        assert_eq!(marshaller.name(), "text");

        let structured = DataType::of::<serde_json::Value>();
        let (_, media_type) = registry.best_marshaller(&["*/*"], &structured).unwrap();
        assert_eq!(media_type.as_str(), APPLICATION_JSON);
        assert!(registry
            .best_marshaller(&["text/plain"], &DataType::of::<serde_json::Value>())
            .is_none());
    }

    #[test]
    fn test_unmarshaller_lookup() {
        let registry = Registry::builtin();
        let string = DataType::of::<String>();
        let int = DataType::of::<i32>();

        assert_eq!(
            registry
                .unmarshaller_for(&string, &MediaType::new(TEXT_PLAIN))
                .map(|u| u.name()),
            Some("text")
        );
        assert!(registry.unmarshaller_for(&int, &MediaType::new(TEXT_PLAIN)).is_none());
        assert_eq!(
            registry
                .unmarshaller_for(&int, &MediaType::new(APPLICATION_JSON))
                .map(|u| u.name()),
            Some("json")
        );
        assert!(registry.unmarshaller_for(&int, &MediaType::new("bogus")).is_none());
    }
}
