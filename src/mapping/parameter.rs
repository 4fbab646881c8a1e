use crate::error::Error;
use crate::type_handler::{JdbcType, TypeHandler};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterMode {
    #[default]
    In,
    Out,
    InOut,
}

impl FromStr for ParameterMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_uppercase().as_str() {
            "IN" => Ok(ParameterMode::In),
            "OUT" => Ok(ParameterMode::Out),
            "INOUT" => Ok(ParameterMode::InOut),
            other => Err(Error::builder(format!("unknown parameter mode '{}'", other))),
        }
    }
}

/// Column-binding descriptor for one positional placeholder.
#[derive(Clone, Default)]
pub struct ParameterMapping {
    pub property: String,
    /// Set when the placeholder head was a parenthesised inline expression
    /// rather than a property path.
    pub expression: Option<String>,
    pub java_type: Option<String>,
    pub jdbc_type: Option<JdbcType>,
    pub jdbc_type_name: Option<String>,
    pub mode: ParameterMode,
    pub numeric_scale: Option<u32>,
    /// For cursor-typed OUT parameters.
    pub result_map_id: Option<String>,
    pub type_handler: Option<Arc<dyn TypeHandler>>,
}

impl ParameterMapping {
    pub fn new(property: impl Into<String>) -> Self {
        ParameterMapping {
            property: property.into(),
            ..Default::default()
        }
    }
}

impl fmt::Debug for ParameterMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterMapping")
            .field("property", &self.property)
            .field("java_type", &self.java_type)
            .field("jdbc_type", &self.jdbc_type)
            .field("mode", &self.mode)
            .field(
                "type_handler",
                &self.type_handler.as_ref().map(|h| h.java_type()),
            )
            .finish()
    }
}

impl PartialEq for ParameterMapping {
    fn eq(&self, other: &Self) -> bool {
        self.property == other.property
            && self.java_type == other.java_type
            && self.jdbc_type == other.jdbc_type
            && self.mode == other.mode
    }
}

/// External parameter map declared as `<parameterMap>`.
#[derive(Debug, Clone)]
pub struct ParameterMap {
    pub id: String,
    pub type_alias: Option<String>,
    pub mappings: Vec<ParameterMapping>,
}
