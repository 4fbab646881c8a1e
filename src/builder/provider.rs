use crate::error::Error;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Call-site information handed to a SQL provider.
#[derive(Debug, Clone, Default)]
pub struct ProviderContext {
    pub mapper_type: String,
    pub mapper_method: String,
    pub database_id: Option<String>,
}

/// User-supplied SQL text factory, the descriptor-world counterpart of a
/// provider class: a named table of SQL-producing methods.
pub trait SqlProvider: Send + Sync {
    /// Resolver protocol: a provider may pick the producing method from
    /// the call context instead of the declared method name.
    fn resolve_method(&self, context: &ProviderContext) -> Option<String> {
        let _ = context;
        None
    }

    fn provide_sql(
        &self,
        method: &str,
        context: &ProviderContext,
        parameter: &Value,
    ) -> crate::Result<String>;
}

pub const DEFAULT_PROVIDER_METHOD: &str = "provide_sql";

type ProviderFn = dyn Fn(&ProviderContext, &Value) -> crate::Result<String> + Send + Sync;

/// Closure-table provider for the common case: register named methods,
/// dispatch by name.
#[derive(Default)]
pub struct ProviderMethods {
    methods: HashMap<String, Box<ProviderFn>>,
}

impl ProviderMethods {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(
        mut self,
        name: impl Into<String>,
        f: impl Fn(&ProviderContext, &Value) -> crate::Result<String> + Send + Sync + 'static,
    ) -> Self {
        self.methods.insert(name.into(), Box::new(f));
        self
    }
}

impl SqlProvider for ProviderMethods {
    fn provide_sql(
        &self,
        method: &str,
        context: &ProviderContext,
        parameter: &Value,
    ) -> crate::Result<String> {
        let f = self.methods.get(method).ok_or_else(|| {
            Error::builder(format!(
                "provider for '{}' has no method '{}'",
                context.mapper_type, method
            ))
        })?;
        f(context, parameter)
    }
}

/// Providers registered under their type name, referenced by provider
/// statement annotations.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn SqlProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, type_name: impl Into<String>, provider: Arc<dyn SqlProvider>) {
        self.providers.insert(type_name.into(), provider);
    }

    pub fn get(&self, type_name: &str) -> crate::Result<Arc<dyn SqlProvider>> {
        self.providers.get(type_name).cloned().ok_or_else(|| {
            Error::builder(format!("no sql provider registered as '{}'", type_name))
        })
    }
}
