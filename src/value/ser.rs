use crate::error::Error;
use crate::value::Value;
use serde::Serialize;
use serde::ser::{self, Error as _};
use std::collections::HashMap;

/// Converts a `Serialize` parameter object into the `Value` IR.
///
/// Structs and string-keyed maps become `Value::Map`, sequences and tuples
/// become `Value::List`, scalars land on the variant of matching width.
/// Conventions the engine relies on: `None` is `Null`, a unit parameter
/// (`()`) is an empty map (a statement taking no parameters), and enum
/// unit variants bind as their name's text.
pub fn to_value<T: Serialize + ?Sized>(param: &T) -> crate::Result<Value> {
    param.serialize(ValueSerializer)
}

pub struct ValueSerializer;

type Serialized = Result<Value, Error>;

/// The scalar surface is wide but uniform; generate it.
macro_rules! scalars {
    ($($method:ident($ty:ty) -> $conv:expr;)*) => {$(
        fn $method(self, v: $ty) -> Serialized {
            #[allow(clippy::redundant_closure_call)]
            let value = ($conv)(v);
            Ok(value)
        }
    )*};
}

impl ser::Serializer for ValueSerializer {
    type Ok = Value;
    type Error = Error;
    type SerializeSeq = SeqCollector;
    type SerializeTuple = SeqCollector;
    type SerializeTupleStruct = SeqCollector;
    type SerializeTupleVariant = SeqCollector;
    type SerializeMap = MapCollector;
    type SerializeStruct = MapCollector;
    type SerializeStructVariant = MapCollector;

    scalars! {
        serialize_bool(bool) -> Value::Bool;
        serialize_u8(u8) -> Value::Byte;
        serialize_i16(i16) -> Value::Short;
        serialize_i32(i32) -> Value::Int;
        serialize_i64(i64) -> Value::Long;
        serialize_f64(f64) -> Value::Double;
        // Narrower and unsigned inputs widen to the next signed variant.
        serialize_i8(i8) -> |v: i8| Value::Short(v.into());
        serialize_u16(u16) -> |v: u16| Value::Int(v.into());
        serialize_u32(u32) -> |v: u32| Value::Long(v.into());
        serialize_f32(f32) -> |v: f32| Value::Double(v.into());
        serialize_char(char) -> |v: char| Value::Text(v.to_string());
    }

    fn serialize_u64(self, v: u64) -> Serialized {
        match i64::try_from(v) {
            Ok(n) => Ok(Value::Long(n)),
            Err(_) => Err(Error::custom(format_args!(
                "u64 value {} does not fit a long column",
                v
            ))),
        }
    }

    fn serialize_str(self, v: &str) -> Serialized {
        Ok(Value::Text(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Serialized {
        Ok(Value::Blob(v.to_vec()))
    }

    fn serialize_none(self) -> Serialized {
        Ok(Value::Null)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Serialized {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Serialized {
        // A unit parameter means "no parameters".
        Ok(Value::Map(HashMap::new()))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Serialized {
        Ok(Value::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Serialized {
        Ok(Value::Text(variant.to_string()))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Serialized {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Serialized {
        value.serialize(self)
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqCollector, Error> {
        Ok(SeqCollector::sized(len.unwrap_or(0)))
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqCollector, Error> {
        Ok(SeqCollector::sized(len))
    }

    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> Result<SeqCollector, Error> {
        Ok(SeqCollector::sized(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        len: usize,
    ) -> Result<SeqCollector, Error> {
        Ok(SeqCollector::sized(len))
    }

    fn serialize_map(self, len: Option<usize>) -> Result<MapCollector, Error> {
        Ok(MapCollector::sized(len.unwrap_or(0)))
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> Result<MapCollector, Error> {
        Ok(MapCollector::sized(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        _variant: &'static str,
        len: usize,
    ) -> Result<MapCollector, Error> {
        Ok(MapCollector::sized(len))
    }
}

/// Accumulates sequence/tuple elements into a `List`. One collector backs
/// all four sequence-flavoured serde traits; they differ only in method
/// names.
pub struct SeqCollector {
    items: Vec<Value>,
}

impl SeqCollector {
    fn sized(len: usize) -> Self {
        Self {
            items: Vec::with_capacity(len),
        }
    }

    fn collect<T: ?Sized + Serialize>(&mut self, element: &T) -> Result<(), Error> {
        self.items.push(element.serialize(ValueSerializer)?);
        Ok(())
    }

    fn finish(self) -> Serialized {
        Ok(Value::List(self.items))
    }
}

impl ser::SerializeSeq for SeqCollector {
    type Ok = Value;
    type Error = Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Error> {
        self.collect(value)
    }

    fn end(self) -> Serialized {
        self.finish()
    }
}

impl ser::SerializeTuple for SeqCollector {
    type Ok = Value;
    type Error = Error;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Error> {
        self.collect(value)
    }

    fn end(self) -> Serialized {
        self.finish()
    }
}

impl ser::SerializeTupleStruct for SeqCollector {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Error> {
        self.collect(value)
    }

    fn end(self) -> Serialized {
        self.finish()
    }
}

impl ser::SerializeTupleVariant for SeqCollector {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Error> {
        self.collect(value)
    }

    fn end(self) -> Serialized {
        self.finish()
    }
}

/// Accumulates struct fields / map entries into a `Map`. Map keys must
/// serialize to text, since properties are looked up by name.
pub struct MapCollector {
    fields: HashMap<String, Value>,
    pending_key: Option<String>,
}

impl MapCollector {
    fn sized(len: usize) -> Self {
        Self {
            fields: HashMap::with_capacity(len),
            pending_key: None,
        }
    }

    fn put<T: ?Sized + Serialize>(&mut self, name: String, value: &T) -> Result<(), Error> {
        let v = value.serialize(ValueSerializer)?;
        self.fields.insert(name, v);
        Ok(())
    }

    fn finish(self) -> Serialized {
        Ok(Value::Map(self.fields))
    }
}

impl ser::SerializeMap for MapCollector {
    type Ok = Value;
    type Error = Error;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<(), Error> {
        match key.serialize(ValueSerializer)? {
            Value::Text(name) => {
                self.pending_key = Some(name);
                Ok(())
            }
            other => Err(Error::custom(format_args!(
                "property names must be text, got a {} key",
                other.type_alias()
            ))),
        }
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<(), Error> {
        let name = self
            .pending_key
            .take()
            .ok_or_else(|| Error::custom("map value arrived before its key"))?;
        self.put(name, value)
    }

    fn end(self) -> Serialized {
        self.finish()
    }
}

impl ser::SerializeStruct for MapCollector {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Error> {
        self.put(key.to_string(), value)
    }

    fn end(self) -> Serialized {
        self.finish()
    }
}

impl ser::SerializeStructVariant for MapCollector {
    type Ok = Value;
    type Error = Error;

    fn serialize_field<T: ?Sized + Serialize>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), Error> {
        self.put(key.to_string(), value)
    }

    fn end(self) -> Serialized {
        self.finish()
    }
}
