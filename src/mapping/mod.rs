mod bound_sql;
mod parameter;
mod result_map;
mod sql_source;
mod statement;

pub use bound_sql::BoundSql;
pub use parameter::{ParameterMap, ParameterMapping, ParameterMode};
pub use result_map::{Discriminator, ResultFlag, ResultMap, ResultMapping};
pub use sql_source::{SqlSource, StaticSqlSource};
pub use statement::{
    KeyGenerator, MappedStatement, MappedStatementBuilder, SqlCommandType, StatementType,
};

/// Row window applied by the executor while iterating a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowBounds {
    pub offset: usize,
    pub limit: usize,
}

impl RowBounds {
    pub const DEFAULT: RowBounds = RowBounds {
        offset: 0,
        limit: usize::MAX,
    };
}

impl Default for RowBounds {
    fn default() -> Self {
        Self::DEFAULT
    }
}
