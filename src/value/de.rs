use crate::error::Error;
use crate::value::Value;
use serde::de::value::StringDeserializer;
use serde::de::{
    self, DeserializeOwned, DeserializeSeed, IntoDeserializer, MapAccess, SeqAccess, Visitor,
};
use std::collections::hash_map;

/// Materializes a `Value` (typically a projected row or row list) into a
/// user type. The inverse of [`super::to_value`].
pub fn from_value<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    T::deserialize(ValueDeserializer { value })
}

pub struct ValueDeserializer {
    value: Value,
}

impl ValueDeserializer {
    fn type_error(&self, expected: &str) -> Error {
        Error::Serialization(format!("expected {}, got {:?}", expected, self.value))
    }
}

impl<'de> de::Deserializer<'de> for ValueDeserializer {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.value {
            Value::Null => visitor.visit_unit(),
            Value::Bool(b) => visitor.visit_bool(b),
            Value::Short(n) => visitor.visit_i16(n),
            Value::Int(n) => visitor.visit_i32(n),
            Value::Long(n) => visitor.visit_i64(n),
            Value::Byte(n) => visitor.visit_u8(n),
            Value::Double(n) => visitor.visit_f64(n),
            Value::Text(s) => visitor.visit_string(s),
            Value::Blob(b) => visitor.visit_byte_buf(b),
            Value::Date(d) => visitor.visit_string(d.to_string()),
            Value::Time(t) => visitor.visit_string(t.to_string()),
            Value::DateTime(dt) => visitor.visit_string(dt.to_string()),
            Value::Timestamp(dt) => visitor.visit_string(dt.to_rfc3339()),
            Value::Decimal(d) => visitor.visit_string(d.to_string()),
            Value::List(items) => visitor.visit_seq(ListAccess {
                iter: items.into_iter(),
            }),
            Value::Map(map) => visitor.visit_map(MapValueAccess {
                iter: map.into_iter(),
                value: None,
            }),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match &self.value {
            Value::Bool(b) => visitor.visit_bool(*b),
            // Drivers without a boolean storage class report 0/1 integers.
            v if v.as_i64().is_some() => visitor.visit_bool(v.as_i64() != Some(0)),
            Value::Text(s) if s == "true" || s == "false" => visitor.visit_bool(s == "true"),
            _ => Err(self.type_error("bool")),
        }
    }

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        self.deserialize_f64(visitor)
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.value.as_f64() {
            Some(f) => visitor.visit_f64(f),
            None => Err(self.type_error("float")),
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        match self.value {
            Value::Null => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Error> {
        visitor.visit_unit()
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Error> {
        match self.value {
            Value::Text(s) => {
                let d: StringDeserializer<Error> = s.into_deserializer();
                visitor.visit_enum(d)
            }
            _ => Err(self.type_error("enum variant name")),
        }
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Error> {
        visitor.visit_unit()
    }

    serde::forward_to_deserialize_any! {
        i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 char str string bytes byte_buf
        seq tuple tuple_struct map struct identifier
    }
}

struct ListAccess {
    iter: std::vec::IntoIter<Value>,
}

impl<'de> SeqAccess<'de> for ListAccess {
    type Error = Error;

    fn next_element_seed<T: DeserializeSeed<'de>>(
        &mut self,
        seed: T,
    ) -> Result<Option<T::Value>, Error> {
        match self.iter.next() {
            Some(value) => seed.deserialize(ValueDeserializer { value }).map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct MapValueAccess {
    iter: hash_map::IntoIter<String, Value>,
    value: Option<Value>,
}

impl<'de> MapAccess<'de> for MapValueAccess {
    type Error = Error;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>, Error> {
        match self.iter.next() {
            Some((key, value)) => {
                self.value = Some(value);
                seed.deserialize(ValueDeserializer {
                    value: Value::Text(key),
                })
                .map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, Error> {
        let value = self
            .value
            .take()
            .ok_or_else(|| Error::Serialization("value requested before key".to_string()))?;
        seed.deserialize(ValueDeserializer { value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::to_value;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct User {
        id: Option<i64>,
        name: String,
        active: bool,
    }

    #[test]
    fn test_row_round_trip() {
        let user = User {
            id: Some(3),
            name: "alice".to_string(),
            active: true,
        };
        let v = to_value(&user).unwrap();
        let back: User = from_value(v).unwrap();
        assert_eq!(back, user);
    }

    #[test]
    fn test_int_coerced_to_bool() {
        let mut row = HashMap::new();
        row.insert("id".to_string(), Value::Long(1));
        row.insert("name".to_string(), Value::Text("bob".to_string()));
        row.insert("active".to_string(), Value::Long(0));
        let user: User = from_value(Value::Map(row)).unwrap();
        assert!(!user.active);
        assert_eq!(user.id, Some(1));
    }

    #[test]
    fn test_list_of_rows() {
        let rows = Value::List(vec![Value::Long(1), Value::Long(2)]);
        let out: Vec<i64> = from_value(rows).unwrap();
        assert_eq!(out, vec![1, 2]);
    }
}
