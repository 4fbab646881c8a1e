pub mod annotation;
pub mod incomplete;
pub mod provider;
pub mod xml;

use crate::cache::{Cache, CacheBuilder, Eviction};
use crate::config::Configuration;
use crate::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Cache state shared between a mapping source's builder and any resolver
/// thunks it parked on the worklists: statements registered while a
/// cache-ref is still unresolved must pick the cache up once it lands.
#[derive(Default)]
pub struct AssistantShared {
    pub current_cache: Option<Arc<dyn Cache>>,
    pub unresolved_cache_ref: bool,
}

/// Namespace-scoped helper carried through the registration of one mapping
/// source: id qualification, the namespace cache, cache-ref plumbing.
#[derive(Clone)]
pub struct MapperBuilderAssistant {
    pub namespace: String,
    pub resource: String,
    pub shared: Arc<Mutex<AssistantShared>>,
}

impl MapperBuilderAssistant {
    pub fn new(namespace: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            resource: resource.into(),
            shared: Arc::new(Mutex::new(AssistantShared::default())),
        }
    }

    /// Qualifies `base` with the current namespace. References already
    /// containing a dot pass through; dots in locally-declared ids are
    /// rejected.
    pub fn apply_namespace(&self, base: &str, is_reference: bool) -> crate::Result<String> {
        if base.is_empty() {
            return Err(Error::builder("empty id"));
        }
        if is_reference {
            if base.contains('.') {
                return Ok(base.to_string());
            }
        } else {
            if base.starts_with(&format!("{}.", self.namespace)) {
                return Ok(base.to_string());
            }
            if base.contains('.') {
                return Err(Error::builder(format!(
                    "dots are not allowed in locally-declared ids: '{}'",
                    base
                )));
            }
        }
        Ok(format!("{}.{}", self.namespace, base))
    }

    /// Builds and registers this namespace's cache.
    #[allow(clippy::too_many_arguments)]
    pub fn use_new_cache(
        &self,
        configuration: &mut Configuration,
        base: Option<Box<dyn Cache>>,
        eviction: Eviction,
        flush_interval: Option<Duration>,
        size: Option<usize>,
        read_write: bool,
        blocking: bool,
    ) -> crate::Result<Arc<dyn Cache>> {
        let mut builder = CacheBuilder::new(self.namespace.clone())
            .eviction(eviction)
            .flush_interval(flush_interval)
            .size(size)
            .read_write(read_write)
            .blocking(blocking);
        if let Some(base) = base {
            builder = builder.base(base);
        }
        let cache = builder.build();
        configuration.add_cache(cache.clone())?;
        let mut shared = self.shared.lock().unwrap();
        shared.current_cache = Some(cache.clone());
        shared.unresolved_cache_ref = false;
        Ok(cache)
    }

    /// Adopts another namespace's cache. A forward reference parks the
    /// namespace in the unresolved state until the other source registers.
    pub fn use_cache_ref(
        &self,
        configuration: &mut Configuration,
        referenced_namespace: &str,
    ) -> crate::Result<()> {
        configuration.add_cache_ref(self.namespace.clone(), referenced_namespace);
        match configuration.get_cache(referenced_namespace) {
            Ok(cache) => {
                let mut shared = self.shared.lock().unwrap();
                shared.current_cache = Some(cache);
                shared.unresolved_cache_ref = false;
                Ok(())
            }
            Err(e) => {
                self.shared.lock().unwrap().unresolved_cache_ref = true;
                Err(e)
            }
        }
    }

    /// The cache statements in this namespace bind to; incomplete while a
    /// cache-ref is pending.
    pub fn current_cache(&self) -> crate::Result<Option<Arc<dyn Cache>>> {
        let shared = self.shared.lock().unwrap();
        if shared.unresolved_cache_ref {
            return Err(Error::incomplete(format!(
                "namespace '{}' waits for an unresolved cache-ref",
                self.namespace
            )));
        }
        Ok(shared.current_cache.clone())
    }
}

/// Iterates every worklist until none makes further progress. Entries that
/// still fail with an incomplete error stay queued for the next source's
/// pass; every other error is fatal.
pub fn resolve_pending(configuration: &mut Configuration) -> crate::Result<()> {
    loop {
        let mut progressed = false;

        let cache_refs = std::mem::take(&mut *configuration.incomplete_cache_refs.lock().unwrap());
        for resolver in cache_refs {
            match resolver.try_resolve(configuration) {
                Ok(()) => progressed = true,
                Err(e) if e.is_incomplete() => {
                    configuration.add_incomplete_cache_ref(resolver);
                }
                Err(e) => return Err(e),
            }
        }

        let result_maps =
            std::mem::take(&mut *configuration.incomplete_result_maps.lock().unwrap());
        for resolver in result_maps {
            match resolver.try_resolve(configuration) {
                Ok(_) => progressed = true,
                Err(e) if e.is_incomplete() => {
                    configuration.add_incomplete_result_map(resolver);
                }
                Err(e) => return Err(e),
            }
        }

        let statements =
            std::mem::take(&mut *configuration.incomplete_statements.lock().unwrap());
        for resolver in statements {
            match resolver.try_resolve(configuration) {
                Ok(()) => progressed = true,
                Err(e) if e.is_incomplete() => {
                    configuration.add_incomplete_statement(resolver);
                }
                Err(e) => return Err(e),
            }
        }

        let methods = std::mem::take(&mut *configuration.incomplete_methods.lock().unwrap());
        for resolver in methods {
            match resolver.try_resolve(configuration) {
                Ok(()) => progressed = true,
                Err(e) if e.is_incomplete() => {
                    configuration.add_incomplete_method(resolver);
                }
                Err(e) => return Err(e),
            }
        }

        if !progressed {
            return Ok(());
        }
    }
}
