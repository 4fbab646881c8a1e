use crate::builder::provider::{ProviderContext, SqlProvider};
use crate::config::Configuration;
use crate::mapping::{BoundSql, ParameterMapping};
use crate::scripting::context::DynamicContext;
use crate::scripting::node::SqlNode;
use crate::scripting::sql_builder;
use crate::value::Value;
use std::sync::Arc;

/// Pre-computed SQL text with its fixed placeholder bindings.
#[derive(Debug, Clone)]
pub struct StaticSqlSource {
    pub sql: String,
    pub parameter_mappings: Vec<ParameterMapping>,
}

impl StaticSqlSource {
    fn bind(&self) -> BoundSql {
        BoundSql::new(self.sql.clone(), self.parameter_mappings.clone())
    }
}

/// The source of a statement's SQL. `Dynamic` re-assembles on every call;
/// the other variants resolve to fixed text at build time or delegate to a
/// user-supplied provider.
pub enum SqlSource {
    Static(StaticSqlSource),
    /// Static text whose `${...}` substitutions were resolved from the
    /// configuration variables at build time.
    Raw(StaticSqlSource),
    Dynamic(SqlNode),
    Provider {
        provider: Arc<dyn SqlProvider>,
        method: String,
        context: ProviderContext,
    },
}

impl std::fmt::Debug for SqlSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlSource::Static(s) => f.debug_tuple("Static").field(&s.sql).finish(),
            SqlSource::Raw(s) => f.debug_tuple("Raw").field(&s.sql).finish(),
            SqlSource::Dynamic(_) => f.write_str("Dynamic"),
            SqlSource::Provider { method, .. } => {
                f.debug_tuple("Provider").field(method).finish()
            }
        }
    }
}

impl SqlSource {
    pub fn new_static(sql: String, parameter_mappings: Vec<ParameterMapping>) -> Self {
        SqlSource::Static(StaticSqlSource {
            sql,
            parameter_mappings,
        })
    }

    /// Produces a fresh `BoundSql` for this call. Shared sources never
    /// retain per-call state; the returned value is owned by the caller.
    pub fn get_bound_sql(
        &self,
        configuration: &Configuration,
        parameter: &Value,
    ) -> crate::Result<BoundSql> {
        match self {
            SqlSource::Static(inner) | SqlSource::Raw(inner) => Ok(inner.bind()),
            SqlSource::Dynamic(root) => {
                let mut context = DynamicContext::new(configuration, parameter);
                root.apply(&mut context)?;
                let bindings = context.into_bindings_and_sql();
                let (sql, parameter_mappings) = sql_builder::parse_placeholders(
                    configuration,
                    &bindings.sql,
                    Some(parameter),
                    &bindings.bindings,
                )?;
                let mut bound = BoundSql::new(sql, parameter_mappings);
                for (name, value) in bindings.bindings {
                    bound.set_additional_parameter(name, value);
                }
                Ok(bound)
            }
            SqlSource::Provider {
                provider,
                method,
                context,
            } => {
                let text = provider.provide_sql(method, context, parameter)?;
                let source = configuration
                    .default_language_driver()
                    .create_sql_source(configuration, &text)?;
                source.get_bound_sql(configuration, parameter)
            }
        }
    }
}
