//! Plain text marshalling.

use super::{CodecError, MediaType, Marshaller, Unmarshaller, TEXT_PLAIN};
use crate::function::{DataType, Value};
use bytes::Bytes;

/// Renders textual values as-is and reads payloads into string-like types.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainText;

impl Marshaller for PlainText {
    fn name(&self) -> &'static str {
        "text"
    }

    fn supported_media_types(&self, ty: &DataType) -> Vec<MediaType> {
        if ty.is_textual() {
            vec![MediaType::new(TEXT_PLAIN)]
        } else {
            Vec::new()
        }
    }

    fn marshall(&self, value: &Value, media_type: &MediaType) -> Result<Bytes, CodecError> {
        value
            .to_text()
            .map(Bytes::from)
            .ok_or_else(|| CodecError::unsupported(value.data_type(), media_type))
    }
}

impl Unmarshaller for PlainText {
    fn name(&self) -> &'static str {
        "text"
    }

    fn can_unmarshall(&self, ty: &DataType, media_type: &MediaType) -> bool {
        ty.accepts_text() && media_type.essence().as_deref() == Some(TEXT_PLAIN)
    }

    fn unmarshall(
        &self,
        payload: &[u8],
        ty: &DataType,
        media_type: &MediaType,
    ) -> Result<Value, CodecError> {
        let text = String::from_utf8(payload.to_vec())?;
        ty.from_text(text)
            .ok_or_else(|| CodecError::unsupported(*ty, media_type))
    }
}
