use crate::error::Error;
use crate::value::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// JDBC-side type codes recognized in `#{... ,jdbcType=...}` options and
/// mapping attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JdbcType {
    Bit,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Real,
    Double,
    Numeric,
    Decimal,
    Char,
    Varchar,
    LongVarchar,
    Date,
    Time,
    Timestamp,
    Binary,
    VarBinary,
    LongVarBinary,
    Blob,
    Clob,
    Boolean,
    Cursor,
    Array,
    Null,
    Other,
    Undefined,
}

impl FromStr for JdbcType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let t = match s.to_ascii_uppercase().as_str() {
            "BIT" => JdbcType::Bit,
            "TINYINT" => JdbcType::TinyInt,
            "SMALLINT" => JdbcType::SmallInt,
            "INTEGER" | "INT" => JdbcType::Integer,
            "BIGINT" => JdbcType::BigInt,
            "FLOAT" => JdbcType::Float,
            "REAL" => JdbcType::Real,
            "DOUBLE" => JdbcType::Double,
            "NUMERIC" => JdbcType::Numeric,
            "DECIMAL" => JdbcType::Decimal,
            "CHAR" => JdbcType::Char,
            "VARCHAR" => JdbcType::Varchar,
            "LONGVARCHAR" => JdbcType::LongVarchar,
            "DATE" => JdbcType::Date,
            "TIME" => JdbcType::Time,
            "TIMESTAMP" => JdbcType::Timestamp,
            "BINARY" => JdbcType::Binary,
            "VARBINARY" => JdbcType::VarBinary,
            "LONGVARBINARY" => JdbcType::LongVarBinary,
            "BLOB" => JdbcType::Blob,
            "CLOB" => JdbcType::Clob,
            "BOOLEAN" => JdbcType::Boolean,
            "CURSOR" => JdbcType::Cursor,
            "ARRAY" => JdbcType::Array,
            "NULL" => JdbcType::Null,
            "OTHER" => JdbcType::Other,
            "UNDEFINED" => JdbcType::Undefined,
            other => return Err(Error::builder(format!("unknown jdbcType '{}'", other))),
        };
        Ok(t)
    }
}

/// Converts between driver-reported values and the language-side value a
/// mapping declares. Reads are null-safe: `Null` passes through untouched.
pub trait TypeHandler: Send + Sync {
    fn java_type(&self) -> &'static str;

    /// Normalizes a column value read from the driver.
    fn get_result(&self, raw: &Value) -> crate::Result<Value>;

    /// Prepares a property value for binding as a statement parameter.
    fn set_parameter(&self, value: &Value, jdbc_type: Option<JdbcType>) -> crate::Result<Value> {
        let _ = jdbc_type;
        Ok(value.clone())
    }
}

fn conversion_error(handler: &dyn TypeHandler, raw: &Value) -> Error {
    Error::TypeConversion(format!(
        "cannot convert {:?} to {}",
        raw,
        handler.java_type()
    ))
}

macro_rules! int_handler {
    ($name:ident, $alias:literal, $variant:ident, $ty:ty) => {
        pub struct $name;

        impl TypeHandler for $name {
            fn java_type(&self) -> &'static str {
                $alias
            }

            fn get_result(&self, raw: &Value) -> crate::Result<Value> {
                match raw {
                    Value::Null => Ok(Value::Null),
                    Value::Bool(b) => Ok(Value::$variant(*b as $ty)),
                    v => match v.as_i64() {
                        Some(n) => <$ty>::try_from(n)
                            .map(Value::$variant)
                            .map_err(|_| conversion_error(self, raw)),
                        None => match v {
                            Value::Text(s) => s
                                .trim()
                                .parse::<$ty>()
                                .map(Value::$variant)
                                .map_err(|_| conversion_error(self, raw)),
                            Value::Double(f) => Ok(Value::$variant(*f as $ty)),
                            _ => Err(conversion_error(self, raw)),
                        },
                    },
                }
            }
        }
    };
}

int_handler!(ShortTypeHandler, "short", Short, i16);
int_handler!(IntegerTypeHandler, "int", Int, i32);
int_handler!(LongTypeHandler, "long", Long, i64);
int_handler!(ByteTypeHandler, "byte", Byte, u8);

pub struct BooleanTypeHandler;

impl TypeHandler for BooleanTypeHandler {
    fn java_type(&self) -> &'static str {
        "boolean"
    }

    fn get_result(&self, raw: &Value) -> crate::Result<Value> {
        match raw {
            Value::Null => Ok(Value::Null),
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::Text(s) => match s.trim() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(conversion_error(self, raw)),
            },
            v => match v.as_i64() {
                Some(n) => Ok(Value::Bool(n != 0)),
                None => Err(conversion_error(self, raw)),
            },
        }
    }
}

pub struct DoubleTypeHandler;

impl TypeHandler for DoubleTypeHandler {
    fn java_type(&self) -> &'static str {
        "double"
    }

    fn get_result(&self, raw: &Value) -> crate::Result<Value> {
        match raw {
            Value::Null => Ok(Value::Null),
            Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Double)
                .map_err(|_| conversion_error(self, raw)),
            v => v
                .as_f64()
                .map(Value::Double)
                .ok_or_else(|| conversion_error(self, raw)),
        }
    }
}

pub struct StringTypeHandler;

impl TypeHandler for StringTypeHandler {
    fn java_type(&self) -> &'static str {
        "string"
    }

    fn get_result(&self, raw: &Value) -> crate::Result<Value> {
        match raw {
            Value::Null => Ok(Value::Null),
            Value::Text(s) => Ok(Value::Text(s.clone())),
            Value::Blob(_) | Value::List(_) | Value::Map(_) => Err(conversion_error(self, raw)),
            other => Ok(Value::Text(other.to_sql_text())),
        }
    }
}

pub struct BytesTypeHandler;

impl TypeHandler for BytesTypeHandler {
    fn java_type(&self) -> &'static str {
        "bytes"
    }

    fn get_result(&self, raw: &Value) -> crate::Result<Value> {
        match raw {
            Value::Null => Ok(Value::Null),
            Value::Blob(b) => Ok(Value::Blob(b.clone())),
            Value::Text(s) => Ok(Value::Blob(s.clone().into_bytes())),
            _ => Err(conversion_error(self, raw)),
        }
    }
}

pub struct DateTypeHandler;

impl TypeHandler for DateTypeHandler {
    fn java_type(&self) -> &'static str {
        "date"
    }

    fn get_result(&self, raw: &Value) -> crate::Result<Value> {
        match raw {
            Value::Null => Ok(Value::Null),
            Value::Date(d) => Ok(Value::Date(*d)),
            Value::DateTime(dt) => Ok(Value::Date(dt.date())),
            Value::Text(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|_| conversion_error(self, raw)),
            _ => Err(conversion_error(self, raw)),
        }
    }
}

pub struct TimeTypeHandler;

impl TypeHandler for TimeTypeHandler {
    fn java_type(&self) -> &'static str {
        "time"
    }

    fn get_result(&self, raw: &Value) -> crate::Result<Value> {
        match raw {
            Value::Null => Ok(Value::Null),
            Value::Time(t) => Ok(Value::Time(*t)),
            Value::Text(s) => NaiveTime::parse_from_str(s.trim(), "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(s.trim(), "%H:%M:%S%.f"))
                .map(Value::Time)
                .map_err(|_| conversion_error(self, raw)),
            _ => Err(conversion_error(self, raw)),
        }
    }
}

pub struct DateTimeTypeHandler;

impl TypeHandler for DateTimeTypeHandler {
    fn java_type(&self) -> &'static str {
        "datetime"
    }

    fn get_result(&self, raw: &Value) -> crate::Result<Value> {
        match raw {
            Value::Null => Ok(Value::Null),
            Value::DateTime(dt) => Ok(Value::DateTime(*dt)),
            Value::Timestamp(dt) => Ok(Value::DateTime(dt.naive_utc())),
            Value::Date(d) => d
                .and_hms_opt(0, 0, 0)
                .map(Value::DateTime)
                .ok_or_else(|| conversion_error(self, raw)),
            Value::Text(s) => parse_datetime(s.trim())
                .map(Value::DateTime)
                .ok_or_else(|| conversion_error(self, raw)),
            _ => Err(conversion_error(self, raw)),
        }
    }
}

pub struct TimestampTypeHandler;

impl TypeHandler for TimestampTypeHandler {
    fn java_type(&self) -> &'static str {
        "timestamp"
    }

    fn get_result(&self, raw: &Value) -> crate::Result<Value> {
        match raw {
            Value::Null => Ok(Value::Null),
            Value::Timestamp(dt) => Ok(Value::Timestamp(*dt)),
            Value::DateTime(dt) => Ok(Value::Timestamp(dt.and_utc())),
            Value::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| Value::Timestamp(dt.to_utc()))
                .or_else(|_| {
                    parse_datetime(s.trim())
                        .map(|dt| Value::Timestamp(dt.and_utc()))
                        .ok_or_else(|| conversion_error(self, raw))
                })
                .map_err(|_| conversion_error(self, raw)),
            _ => Err(conversion_error(self, raw)),
        }
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

pub struct DecimalTypeHandler;

impl TypeHandler for DecimalTypeHandler {
    fn java_type(&self) -> &'static str {
        "decimal"
    }

    fn get_result(&self, raw: &Value) -> crate::Result<Value> {
        match raw {
            Value::Null => Ok(Value::Null),
            Value::Decimal(d) => Ok(Value::Decimal(*d)),
            Value::Text(s) => Decimal::from_str(s.trim())
                .map(Value::Decimal)
                .map_err(|_| conversion_error(self, raw)),
            v => match (v.as_i64(), v.as_f64()) {
                (Some(n), _) => Ok(Value::Decimal(Decimal::from(n))),
                (None, Some(f)) => Decimal::try_from(f)
                    .map(Value::Decimal)
                    .map_err(|_| conversion_error(self, raw)),
                _ => Err(conversion_error(self, raw)),
            },
        }
    }
}

/// Fallback converter for untyped mappings: dispatches by the runtime
/// variant the driver produced, passing the value through unchanged.
pub struct UnknownTypeHandler;

impl TypeHandler for UnknownTypeHandler {
    fn java_type(&self) -> &'static str {
        "unknown"
    }

    fn get_result(&self, raw: &Value) -> crate::Result<Value> {
        Ok(raw.clone())
    }
}

/// Resolves type converters by language-side alias and by JDBC type, with
/// the unknown fallback when neither is declared. User handlers register
/// under a name for `typeHandler=` references.
pub struct TypeHandlerRegistry {
    by_java: HashMap<String, Arc<dyn TypeHandler>>,
    by_jdbc: HashMap<JdbcType, Arc<dyn TypeHandler>>,
    named: HashMap<String, Arc<dyn TypeHandler>>,
    unknown: Arc<dyn TypeHandler>,
}

impl Default for TypeHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeHandlerRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            by_java: HashMap::new(),
            by_jdbc: HashMap::new(),
            named: HashMap::new(),
            unknown: Arc::new(UnknownTypeHandler),
        };
        registry.register_defaults();
        registry
    }

    fn register_defaults(&mut self) {
        self.register_java(Arc::new(BooleanTypeHandler), &[JdbcType::Bit, JdbcType::Boolean]);
        self.register_java(Arc::new(ByteTypeHandler), &[JdbcType::TinyInt]);
        self.register_java(Arc::new(ShortTypeHandler), &[JdbcType::SmallInt]);
        self.register_java(Arc::new(IntegerTypeHandler), &[JdbcType::Integer]);
        self.register_java(Arc::new(LongTypeHandler), &[JdbcType::BigInt]);
        self.register_java(
            Arc::new(DoubleTypeHandler),
            &[JdbcType::Float, JdbcType::Real, JdbcType::Double],
        );
        self.register_java(
            Arc::new(DecimalTypeHandler),
            &[JdbcType::Numeric, JdbcType::Decimal],
        );
        self.register_java(
            Arc::new(StringTypeHandler),
            &[JdbcType::Char, JdbcType::Varchar, JdbcType::LongVarchar, JdbcType::Clob],
        );
        self.register_java(
            Arc::new(BytesTypeHandler),
            &[JdbcType::Binary, JdbcType::VarBinary, JdbcType::LongVarBinary, JdbcType::Blob],
        );
        self.register_java(Arc::new(DateTypeHandler), &[JdbcType::Date]);
        self.register_java(Arc::new(TimeTypeHandler), &[JdbcType::Time]);
        self.register_java(Arc::new(DateTimeTypeHandler), &[]);
        self.register_java(Arc::new(TimestampTypeHandler), &[JdbcType::Timestamp]);
    }

    fn register_java(&mut self, handler: Arc<dyn TypeHandler>, jdbc: &[JdbcType]) {
        self.by_java
            .insert(handler.java_type().to_string(), handler.clone());
        for t in jdbc {
            self.by_jdbc.insert(*t, handler.clone());
        }
    }

    pub fn register_named(&mut self, name: impl Into<String>, handler: Arc<dyn TypeHandler>) {
        self.named.insert(name.into(), handler);
    }

    pub fn get_named(&self, name: &str) -> Option<Arc<dyn TypeHandler>> {
        self.named.get(name).cloned()
    }

    pub fn has_java_type(&self, alias: &str) -> bool {
        self.by_java.contains_key(&alias.to_ascii_lowercase())
    }

    /// Java-side alias wins over JDBC type; with neither, the unknown
    /// fallback dispatches by runtime variant.
    pub fn resolve(
        &self,
        java_type: Option<&str>,
        jdbc_type: Option<JdbcType>,
    ) -> Arc<dyn TypeHandler> {
        if let Some(alias) = java_type
            && let Some(h) = self.by_java.get(&alias.to_ascii_lowercase())
        {
            return h.clone();
        }
        if let Some(t) = jdbc_type
            && let Some(h) = self.by_jdbc.get(&t)
        {
            return h.clone();
        }
        self.unknown.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_from_string() {
        let h = IntegerTypeHandler;
        assert_eq!(h.get_result(&Value::Text("42".into())).unwrap(), Value::Int(42));
        assert_eq!(h.get_result(&Value::Long(7)).unwrap(), Value::Int(7));
        assert!(h.get_result(&Value::Text("x".into())).is_err());
    }

    #[test]
    fn test_boolean_from_int() {
        let h = BooleanTypeHandler;
        assert_eq!(h.get_result(&Value::Long(1)).unwrap(), Value::Bool(true));
        assert_eq!(h.get_result(&Value::Long(0)).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_null_passes_through() {
        assert_eq!(LongTypeHandler.get_result(&Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_registry_resolution() {
        let reg = TypeHandlerRegistry::new();
        assert_eq!(reg.resolve(Some("int"), None).java_type(), "int");
        assert_eq!(
            reg.resolve(None, Some(JdbcType::Varchar)).java_type(),
            "string"
        );
        assert_eq!(reg.resolve(None, None).java_type(), "unknown");
    }

    #[test]
    fn test_date_parse() {
        let h = DateTypeHandler;
        let v = h.get_result(&Value::Text("2024-05-01".into())).unwrap();
        assert!(matches!(v, Value::Date(_)));
    }
}
