//! JSON marshalling for any [`Data`](crate::function::Data) type.

use super::{CodecError, MediaType, Marshaller, Unmarshaller, APPLICATION_JSON};
use crate::function::{DataType, Value};
use bytes::Bytes;

/// Structural JSON conversion. Output carries no trailing newline.
#[derive(Debug, Default, Clone, Copy)]
pub struct Json;

impl Marshaller for Json {
    fn name(&self) -> &'static str {
        "json"
    }

    fn supported_media_types(&self, _ty: &DataType) -> Vec<MediaType> {
        vec![MediaType::new(APPLICATION_JSON)]
    }

    fn marshall(&self, value: &Value, _media_type: &MediaType) -> Result<Bytes, CodecError> {
        let mut buf = Vec::new();
        let mut serializer = serde_json::Serializer::new(&mut buf);
        erased_serde::serialize(value.as_serialize(), &mut serializer)?;
        Ok(Bytes::from(buf))
    }
}

impl Unmarshaller for Json {
    fn name(&self) -> &'static str {
        "json"
    }

    fn can_unmarshall(&self, _ty: &DataType, media_type: &MediaType) -> bool {
        media_type.essence().as_deref() == Some(APPLICATION_JSON)
    }

    fn unmarshall(
        &self,
        payload: &[u8],
        ty: &DataType,
        _media_type: &MediaType,
    ) -> Result<Value, CodecError> {
        let mut deserializer = serde_json::Deserializer::from_slice(payload);
        let value = {
            let mut erased = <dyn erased_serde::Deserializer>::erase(&mut deserializer);
            ty.deserialize(&mut erased)
                .map_err(|err| CodecError::Unmarshall(err.to_string()))?
        };
        deserializer.end()?;
        Ok(value)
    }
}
