pub mod context;
pub mod expr;
pub mod node;
pub mod parser;
pub mod sql_builder;
pub mod tokens;

use crate::config::Configuration;
use crate::error::Error;
use crate::mapping::SqlSource;
use crate::scripting::context::DynamicContext;
use crate::scripting::parser::ScriptParser;
use crate::value::Value;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Turns statement script text into an executable `SqlSource`. Statements
/// may override the driver per `lang` attribute.
pub trait LanguageDriver: Send + Sync {
    fn id(&self) -> &'static str;

    fn create_sql_source(
        &self,
        configuration: &Configuration,
        script: &str,
    ) -> crate::Result<Arc<SqlSource>>;
}

/// Default driver: scripts with dynamic tags or `${...}` substitutions
/// become per-call assembled sources; pure text resolves its placeholders
/// once here. Parsed sources are memoized by script text, so a provider
/// emitting the same SQL repeatedly parses it once.
pub struct XmlLanguageDriver {
    cache: DashMap<String, Arc<SqlSource>>,
}

pub const XML_LANG: &str = "xml";
pub const RAW_LANG: &str = "raw";

impl Default for XmlLanguageDriver {
    fn default() -> Self {
        Self {
            cache: DashMap::new(),
        }
    }
}

impl LanguageDriver for XmlLanguageDriver {
    fn id(&self) -> &'static str {
        XML_LANG
    }

    fn create_sql_source(
        &self,
        configuration: &Configuration,
        script: &str,
    ) -> crate::Result<Arc<SqlSource>> {
        if let Some(cached) = self.cache.get(script) {
            return Ok(cached.clone());
        }

        let (root, dynamic) = ScriptParser::new(script).parse()?;
        let source = if dynamic {
            Arc::new(SqlSource::Dynamic(root))
        } else {
            Arc::new(build_static(configuration, &root)?)
        };
        self.cache.insert(script.to_string(), source.clone());
        Ok(source)
    }
}

/// Rejects dynamic content outright; used where a statement declares its
/// text is fixed so placeholder resolution is guaranteed to happen at
/// build time.
pub struct RawLanguageDriver;

impl LanguageDriver for RawLanguageDriver {
    fn id(&self) -> &'static str {
        RAW_LANG
    }

    fn create_sql_source(
        &self,
        configuration: &Configuration,
        script: &str,
    ) -> crate::Result<Arc<SqlSource>> {
        let (root, dynamic) = ScriptParser::new(script).parse()?;
        if dynamic {
            return Err(Error::builder(
                "raw language driver cannot handle dynamic content",
            ));
        }
        match build_static(configuration, &root)? {
            SqlSource::Static(inner) => Ok(Arc::new(SqlSource::Raw(inner))),
            other => Ok(Arc::new(other)),
        }
    }
}

fn build_static(
    configuration: &Configuration,
    root: &crate::scripting::node::SqlNode,
) -> crate::Result<SqlSource> {
    let parameter = Value::Null;
    let mut ctx = DynamicContext::new(configuration, &parameter);
    root.apply(&mut ctx)?;
    let (sql, mappings) =
        sql_builder::parse_placeholders(configuration, &ctx.sql(), None, &HashMap::new())?;
    Ok(SqlSource::new_static(sql, mappings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_script_resolves_placeholders_once() {
        let config = Configuration::new();
        let driver = XmlLanguageDriver::default();
        let source = driver
            .create_sql_source(&config, "SELECT * FROM t WHERE id = #{id}")
            .unwrap();
        match source.as_ref() {
            SqlSource::Static(inner) => {
                assert_eq!(inner.sql, "SELECT * FROM t WHERE id = ?");
                assert_eq!(inner.parameter_mappings.len(), 1);
            }
            other => panic!("expected Static, got {:?}", other),
        }
    }

    #[test]
    fn test_dynamic_script_detected() {
        let config = Configuration::new();
        let driver = XmlLanguageDriver::default();
        let source = driver
            .create_sql_source(&config, r#"<if test="a != null">#{a}</if>"#)
            .unwrap();
        assert!(matches!(source.as_ref(), SqlSource::Dynamic(_)));
    }

    #[test]
    fn test_raw_driver_rejects_dynamic() {
        let config = Configuration::new();
        assert!(
            RawLanguageDriver
                .create_sql_source(&config, "SELECT ${x}")
                .is_err()
        );
    }

    #[test]
    fn test_cache_returns_same_source() {
        let config = Configuration::new();
        let driver = XmlLanguageDriver::default();
        let a = driver.create_sql_source(&config, "SELECT 1").unwrap();
        let b = driver.create_sql_source(&config, "SELECT 1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
