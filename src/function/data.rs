//! Runtime type descriptors and type-erased values.
//!
//! User functions are written against concrete Rust types. The bridge only
//! ever sees [`Value`]s and asks their [`DataType`] which conversions apply,
//! the same way a marshaller would inspect a runtime type.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::fmt;

/// A type that can flow in or out of a user function.
///
/// Every `Data` type round-trips through structured formats such as JSON.
/// Types with a natural plain text form also set [`Data::TEXTUAL`], and
/// string-like types that can be built directly from a text payload set
/// [`Data::FROM_TEXT`].
///
/// User types usually opt in with an empty impl:
///
/// ```rust
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Rle {
///     word: String,
///     count: u32,
/// }
///
/// impl strand::Data for Rle {}
/// ```
pub trait Data: Serialize + DeserializeOwned + Send + 'static {
    /// Whether values of this type render as plain text.
    const TEXTUAL: bool = false;

    /// Whether this type can be built straight from a plain text payload.
    const FROM_TEXT: bool = false;

    /// Plain text rendering, only consulted when `TEXTUAL` is set.
    fn to_text(&self) -> Option<String> {
        None
    }

    /// Builds a value from a plain text payload, only consulted when
    /// `FROM_TEXT` is set.
    fn from_text(text: String) -> Option<Self> {
        let _ = text;
        None
    }
}

impl Data for String {
    const TEXTUAL: bool = true;
    const FROM_TEXT: bool = true;

    fn to_text(&self) -> Option<String> {
        Some(self.clone())
    }

    fn from_text(text: String) -> Option<Self> {
        Some(text)
    }
}

macro_rules! textual_data {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Data for $ty {
                const TEXTUAL: bool = true;

                fn to_text(&self) -> Option<String> {
                    Some(self.to_string())
                }
            }
        )*
    };
}

textual_data!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool, char);

// Inputs of zero-arity functions: any text payload is accepted and ignored.
impl Data for () {
    const FROM_TEXT: bool = true;

    fn from_text(_text: String) -> Option<Self> {
        Some(())
    }
}

impl Data for serde_json::Value {}

impl<T: Data> Data for Vec<T> {}

type Decode = for<'de> fn(&mut dyn erased_serde::Deserializer<'de>) -> Result<Value, erased_serde::Error>;

/// Runtime description of a [`Data`] type.
#[derive(Clone, Copy)]
pub struct DataType {
    name: &'static str,
    id: TypeId,
    textual: bool,
    from_text: bool,
    decode: Decode,
    decode_text: fn(String) -> Option<Value>,
}

impl DataType {
    /// Describe the type `T`.
    pub fn of<T: Data>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            id: TypeId::of::<T>(),
            textual: T::TEXTUAL,
            from_text: T::FROM_TEXT,
            decode: decode::<T>,
            decode_text: decode_text::<T>,
        }
    }

    /// Fully qualified type name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether values of this type render as plain text.
    pub fn is_textual(&self) -> bool {
        self.textual
    }

    /// Whether this type can be built from a plain text payload.
    pub fn accepts_text(&self) -> bool {
        self.from_text
    }

    /// Deserialize a fresh instance of this type from any serde format.
    pub fn deserialize(
        &self,
        deserializer: &mut dyn erased_serde::Deserializer<'_>,
    ) -> Result<Value, erased_serde::Error> {
        (self.decode)(deserializer)
    }

    /// Build a fresh instance of this type from plain text.
    pub fn from_text(&self, text: String) -> Option<Value> {
        if self.from_text {
            (self.decode_text)(text)
        } else {
            None
        }
    }
}

impl PartialEq for DataType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DataType {}

impl fmt::Debug for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

fn decode<'de, T: Data>(
    deserializer: &mut dyn erased_serde::Deserializer<'de>,
) -> Result<Value, erased_serde::Error> {
    erased_serde::deserialize::<T>(deserializer).map(Value::new)
}

fn decode_text<T: Data>(text: String) -> Option<Value> {
    T::from_text(text).map(Value::new)
}

trait ErasedData: Send + 'static {
    fn data_type(&self) -> DataType;
    fn to_text(&self) -> Option<String>;
    fn as_serialize(&self) -> &dyn erased_serde::Serialize;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<T: Data> ErasedData for T {
    fn data_type(&self) -> DataType {
        DataType::of::<T>()
    }

    fn to_text(&self) -> Option<String> {
        Data::to_text(self)
    }

    fn as_serialize(&self) -> &dyn erased_serde::Serialize {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// An owned, type-erased datum travelling between the bridge and a function.
pub struct Value(Box<dyn ErasedData>);

impl Value {
    /// Erase a typed value.
    pub fn new<T: Data>(value: T) -> Self {
        Self(Box::new(value))
    }

    /// Runtime type of the wrapped value.
    pub fn data_type(&self) -> DataType {
        self.0.data_type()
    }

    /// Plain text rendering, if the runtime type has one.
    pub fn to_text(&self) -> Option<String> {
        if self.0.data_type().is_textual() {
            self.0.to_text()
        } else {
            None
        }
    }

    /// Serializable view of the wrapped value.
    pub fn as_serialize(&self) -> &dyn erased_serde::Serialize {
        self.0.as_serialize()
    }

    /// Recover the concrete value. Returns `None` on a type mismatch.
    pub fn downcast<T: Data>(self) -> Option<T> {
        self.0.into_any().downcast::<T>().ok().map(|boxed| *boxed)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value<{}>", self.data_type())
    }
}
