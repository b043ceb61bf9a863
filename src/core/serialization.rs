//! # Serialization Formats
//!
//! The first (forward) and last (reverse) stage of the transform pipeline.
//! Supports bincode (default), JSON (debugging/interop), MessagePack (compact
//! encoding) and a raw UTF-8 format that passes strings through untouched.
//!
//! ## Performance Characteristics
//! - **Bincode**: ~100-200ns (fastest, binary)
//! - **MessagePack**: ~150-300ns (compact, binary)
//! - **JSON**: ~500-1000ns (human-readable, text)
//! - **Raw**: a copy of the string bytes
//!
//! ## Usage
//! ```rust
//! use network_comms::core::serialization::{deserialize, serialize_into, SerializationFormat};
//!
//! let mut out = Vec::new();
//! serialize_into("hello", SerializationFormat::Raw, &mut out).unwrap();
//! assert_eq!(out, b"hello");
//! let back: String = deserialize(&out, SerializationFormat::Raw).unwrap();
//! assert_eq!(back, "hello");
//! ```

use crate::error::{ProtocolError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Supported serialization formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SerializationFormat {
    /// Binary compact format (default, fastest)
    #[default]
    Bincode,
    /// Human-readable JSON format (debugging, interop)
    Json,
    /// Compact binary format (MessagePack, efficient)
    MessagePack,
    /// Strings are written as their UTF-8 bytes; structured values are rejected
    Raw,
}

impl SerializationFormat {
    /// Get the format identifier byte
    pub fn format_byte(self) -> u8 {
        match self {
            SerializationFormat::Bincode => 0x01,
            SerializationFormat::Json => 0x02,
            SerializationFormat::MessagePack => 0x03,
            SerializationFormat::Raw => 0x04,
        }
    }

    /// Detect format from identifier byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(SerializationFormat::Bincode),
            0x02 => Some(SerializationFormat::Json),
            0x03 => Some(SerializationFormat::MessagePack),
            0x04 => Some(SerializationFormat::Raw),
            _ => None,
        }
    }

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            SerializationFormat::Bincode => "Bincode",
            SerializationFormat::Json => "JSON",
            SerializationFormat::MessagePack => "MessagePack",
            SerializationFormat::Raw => "Raw",
        }
    }

    /// Format used for packet headers when this is the connection's serializer.
    ///
    /// Headers are structured, so the raw format falls back to bincode.
    pub fn header_format(self) -> Self {
        match self {
            SerializationFormat::Raw => SerializationFormat::Bincode,
            other => other,
        }
    }
}

/// Serialize `value` with `format`, appending the output to `out`.
pub fn serialize_into<T: Serialize + ?Sized>(
    value: &T,
    format: SerializationFormat,
    out: &mut Vec<u8>,
) -> Result<()> {
    match format {
        SerializationFormat::Bincode => bincode::serialize_into(&mut *out, value)
            .map_err(|e| ProtocolError::Serialization(e.to_string())),
        SerializationFormat::Json => serde_json::to_writer(&mut *out, value)
            .map_err(|e| ProtocolError::Serialization(e.to_string())),
        SerializationFormat::MessagePack => rmp_serde::encode::write(&mut *out, value)
            .map_err(|e| ProtocolError::Serialization(e.to_string())),
        SerializationFormat::Raw => value
            .serialize(raw::RawSerializer { out })
            .map_err(|e| ProtocolError::Serialization(e.to_string())),
    }
}

/// Serialize `value` with `format` into a fresh buffer.
pub fn serialize<T: Serialize + ?Sized>(value: &T, format: SerializationFormat) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    serialize_into(value, format, &mut out)?;
    Ok(out)
}

/// Deserialize a value previously written with `format`.
pub fn deserialize<T: DeserializeOwned>(data: &[u8], format: SerializationFormat) -> Result<T> {
    match format {
        SerializationFormat::Bincode => {
            bincode::deserialize(data).map_err(|e| ProtocolError::Serialization(e.to_string()))
        }
        SerializationFormat::Json => {
            serde_json::from_slice(data).map_err(|e| ProtocolError::Serialization(e.to_string()))
        }
        SerializationFormat::MessagePack => {
            rmp_serde::from_slice(data).map_err(|e| ProtocolError::Serialization(e.to_string()))
        }
        SerializationFormat::Raw => T::deserialize(raw::RawDeserializer { input: data })
            .map_err(|e| ProtocolError::Serialization(e.to_string())),
    }
}

/// Identity serializer for string payloads.
mod raw {
    use serde::ser::Impossible;
    use serde::{de, ser, Serialize};
    use std::fmt;

    const UNSUPPORTED: &str = "raw serializer only accepts string values";

    #[derive(Debug)]
    pub struct RawError(String);

    impl fmt::Display for RawError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl std::error::Error for RawError {}

    impl ser::Error for RawError {
        fn custom<T: fmt::Display>(msg: T) -> Self {
            RawError(msg.to_string())
        }
    }

    impl de::Error for RawError {
        fn custom<T: fmt::Display>(msg: T) -> Self {
            RawError(msg.to_string())
        }
    }

    fn unsupported() -> RawError {
        RawError(UNSUPPORTED.to_string())
    }

    pub struct RawSerializer<'a> {
        pub out: &'a mut Vec<u8>,
    }

    macro_rules! reject_scalars {
        ($($method:ident($ty:ty)),* $(,)?) => {
            $(
                fn $method(self, _v: $ty) -> Result<(), RawError> {
                    Err(unsupported())
                }
            )*
        };
    }

    impl<'a> ser::Serializer for RawSerializer<'a> {
        type Ok = ();
        type Error = RawError;
        type SerializeSeq = Impossible<(), RawError>;
        type SerializeTuple = Impossible<(), RawError>;
        type SerializeTupleStruct = Impossible<(), RawError>;
        type SerializeTupleVariant = Impossible<(), RawError>;
        type SerializeMap = Impossible<(), RawError>;
        type SerializeStruct = Impossible<(), RawError>;
        type SerializeStructVariant = Impossible<(), RawError>;

        reject_scalars!(
            serialize_bool(bool),
            serialize_i8(i8),
            serialize_i16(i16),
            serialize_i32(i32),
            serialize_i64(i64),
            serialize_u8(u8),
            serialize_u16(u16),
            serialize_u32(u32),
            serialize_u64(u64),
            serialize_f32(f32),
            serialize_f64(f64),
            serialize_bytes(&[u8]),
        );

        fn serialize_char(self, v: char) -> Result<(), RawError> {
            let mut buf = [0u8; 4];
            self.out.extend_from_slice(v.encode_utf8(&mut buf).as_bytes());
            Ok(())
        }

        fn serialize_str(self, v: &str) -> Result<(), RawError> {
            self.out.extend_from_slice(v.as_bytes());
            Ok(())
        }

        fn serialize_none(self) -> Result<(), RawError> {
            Err(unsupported())
        }

        fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<(), RawError> {
            value.serialize(self)
        }

        fn serialize_unit(self) -> Result<(), RawError> {
            Err(unsupported())
        }

        fn serialize_unit_struct(self, _name: &'static str) -> Result<(), RawError> {
            Err(unsupported())
        }

        fn serialize_unit_variant(
            self,
            _name: &'static str,
            _index: u32,
            _variant: &'static str,
        ) -> Result<(), RawError> {
            Err(unsupported())
        }

        fn serialize_newtype_struct<T: ?Sized + Serialize>(
            self,
            _name: &'static str,
            value: &T,
        ) -> Result<(), RawError> {
            value.serialize(self)
        }

        fn serialize_newtype_variant<T: ?Sized + Serialize>(
            self,
            _name: &'static str,
            _index: u32,
            _variant: &'static str,
            _value: &T,
        ) -> Result<(), RawError> {
            Err(unsupported())
        }

        fn serialize_seq(self, _len: Option<usize>) -> Result<Self::SerializeSeq, RawError> {
            Err(unsupported())
        }

        fn serialize_tuple(self, _len: usize) -> Result<Self::SerializeTuple, RawError> {
            Err(unsupported())
        }

        fn serialize_tuple_struct(
            self,
            _name: &'static str,
            _len: usize,
        ) -> Result<Self::SerializeTupleStruct, RawError> {
            Err(unsupported())
        }

        fn serialize_tuple_variant(
            self,
            _name: &'static str,
            _index: u32,
            _variant: &'static str,
            _len: usize,
        ) -> Result<Self::SerializeTupleVariant, RawError> {
            Err(unsupported())
        }

        fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, RawError> {
            Err(unsupported())
        }

        fn serialize_struct(
            self,
            _name: &'static str,
            _len: usize,
        ) -> Result<Self::SerializeStruct, RawError> {
            Err(unsupported())
        }

        fn serialize_struct_variant(
            self,
            _name: &'static str,
            _index: u32,
            _variant: &'static str,
            _len: usize,
        ) -> Result<Self::SerializeStructVariant, RawError> {
            Err(unsupported())
        }
    }

    pub struct RawDeserializer<'de> {
        pub input: &'de [u8],
    }

    impl<'de> de::Deserializer<'de> for RawDeserializer<'de> {
        type Error = RawError;

        fn deserialize_any<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, RawError> {
            let text = std::str::from_utf8(self.input).map_err(|e| RawError(e.to_string()))?;
            visitor.visit_borrowed_str(text)
        }

        fn deserialize_option<V: de::Visitor<'de>>(
            self,
            visitor: V,
        ) -> Result<V::Value, RawError> {
            visitor.visit_some(self)
        }

        fn deserialize_newtype_struct<V: de::Visitor<'de>>(
            self,
            _name: &'static str,
            visitor: V,
        ) -> Result<V::Value, RawError> {
            visitor.visit_newtype_struct(self)
        }

        serde::forward_to_deserialize_any! {
            bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
            bytes byte_buf unit unit_struct seq tuple tuple_struct map struct enum
            identifier ignored_any
        }
    }
}
