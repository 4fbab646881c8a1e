mod de;
mod ser;

pub use de::from_value;
pub use ser::{ValueSerializer, to_value};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// The engine's value IR: everything a parameter object or a projected row
/// can hold while it moves between the serde bridges, the dynamic-SQL
/// bindings, the type-converter registry and the driver.
///
/// The variant set mirrors the language side of the JDBC type table that
/// the type-alias registry seeds: one variant per distinct storage shape
/// (`byte`/`short`/`int`/`long`, `double`, `decimal`, the four temporal
/// kinds, text, blobs), plus `List`/`Map` for the composite shapes serde
/// produces for sequences and structs. `Null` doubles as SQL NULL and as
/// "absent" on property reads.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Byte(u8),
    Short(i16),
    Int(i32),
    Long(i64),
    Double(f64),
    /// Fixed-point numeric (`NUMERIC`/`DECIMAL` columns).
    Decimal(Decimal),
    Text(String),
    Blob(Vec<u8>),
    /// Calendar date, no time-of-day component.
    Date(NaiveDate),
    /// Time-of-day, no date component.
    Time(NaiveTime),
    /// Wall-clock date and time, zone-unaware.
    DateTime(NaiveDateTime),
    /// Instant pinned to UTC (`TIMESTAMP` columns).
    Timestamp(DateTime<Utc>),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Value::List(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Widens any of the integral variants.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(n) => Some(i64::from(*n)),
            Value::Short(n) => Some(i64::from(*n)),
            Value::Int(n) => Some(i64::from(*n)),
            Value::Long(n) => Some(*n),
            _ => None,
        }
    }

    /// Widens any numeric variant; decimals go through their text form to
    /// avoid a dependency on the numeric-traits surface.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(f) => Some(*f),
            Value::Decimal(d) => d.to_string().parse().ok(),
            other => other.as_i64().map(|n| n as f64),
        }
    }

    /// The canonical alias of the runtime variant, matching the names the
    /// type-alias registry seeds (`int`, `long`, `string`, ...).
    pub fn type_alias(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Byte(_) => "byte",
            Value::Short(_) => "short",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "string",
            Value::Blob(_) => "bytes",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::DateTime(_) => "datetime",
            Value::Timestamp(_) => "timestamp",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Literal text rendering, used by `${...}` substitution and wherever
    /// a column value must become SQL text (temporal and decimal values
    /// use their canonical ISO/plain forms). Blobs and maps have no
    /// textual form and render empty.
    pub fn to_sql_text(&self) -> String {
        match self {
            Value::Null | Value::Blob(_) | Value::Map(_) => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Text(s) => s.clone(),
            Value::Double(f) => f.to_string(),
            Value::Decimal(d) => d.to_string(),
            Value::Date(d) => d.to_string(),
            Value::Time(t) => t.to_string(),
            Value::DateTime(dt) => dt.to_string(),
            Value::Timestamp(ts) => ts.to_rfc3339(),
            Value::List(items) => items
                .iter()
                .map(Value::to_sql_text)
                .collect::<Vec<_>>()
                .join(", "),
            integral => integral
                .as_i64()
                .map(|n| n.to_string())
                .unwrap_or_default(),
        }
    }
}

/// Stable content hash used as the per-component base hash of a `CacheKey`.
///
/// Lists and strings fold positionally; maps fold order-independently (XOR
/// of entry hashes) since `HashMap` iteration order is unspecified; floats
/// hash by bit pattern so equal keys hash equal without an `Eq` claim.
pub fn value_hash(v: &Value) -> i64 {
    fn fold_bytes(bytes: &[u8]) -> i64 {
        let mut h: i64 = 0;
        for b in bytes {
            h = h.wrapping_mul(31).wrapping_add(i64::from(*b));
        }
        h
    }

    match v {
        Value::Null => 0,
        Value::Bool(b) => {
            if *b {
                1231
            } else {
                1237
            }
        }
        Value::Double(f) => f.to_bits() as i64,
        Value::Text(s) => fold_bytes(s.as_bytes()),
        Value::Blob(b) => fold_bytes(b),
        Value::Date(_)
        | Value::Time(_)
        | Value::DateTime(_)
        | Value::Timestamp(_)
        | Value::Decimal(_) => fold_bytes(v.to_sql_text().as_bytes()),
        Value::List(items) => {
            let mut h: i64 = 1;
            for item in items {
                h = h.wrapping_mul(31).wrapping_add(value_hash(item));
            }
            h
        }
        Value::Map(map) => {
            let mut h: i64 = 0;
            for (k, val) in map {
                h ^= fold_bytes(k.as_bytes())
                    .wrapping_mul(127)
                    .wrapping_add(value_hash(val));
            }
            h
        }
        integral => integral.as_i64().unwrap_or(0),
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {$(
        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        }
    )*};
}

value_from! {
    bool => Bool,
    u8 => Byte,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f64 => Double,
    Decimal => Decimal,
    String => Text,
    NaiveDate => Date,
    NaiveTime => Time,
    NaiveDateTime => DateTime,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_hash_map_order_independent() {
        let mut a = HashMap::new();
        a.insert("x".to_string(), Value::Int(1));
        a.insert("y".to_string(), Value::Text("s".to_string()));
        let mut b = HashMap::new();
        b.insert("y".to_string(), Value::Text("s".to_string()));
        b.insert("x".to_string(), Value::Int(1));
        assert_eq!(value_hash(&Value::Map(a)), value_hash(&Value::Map(b)));
    }

    #[test]
    fn test_value_hash_discriminates() {
        assert_ne!(
            value_hash(&Value::List(vec![Value::Long(1), Value::Long(2)])),
            value_hash(&Value::List(vec![Value::Long(2), Value::Long(1)]))
        );
    }

    #[test]
    fn test_integral_widening() {
        assert_eq!(Value::Byte(7).as_i64(), Some(7));
        assert_eq!(Value::Short(-3).as_i64(), Some(-3));
        assert_eq!(Value::Bool(true).as_i64(), None);
        assert_eq!(Value::Int(2).as_f64(), Some(2.0));
    }

    #[test]
    fn test_to_sql_text() {
        assert_eq!(Value::Long(7).to_sql_text(), "7");
        assert_eq!(Value::Text("id".into()).to_sql_text(), "id");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::Int(2)]).to_sql_text(),
            "1, 2"
        );
        assert_eq!(Value::Null.to_sql_text(), "");
    }
}
