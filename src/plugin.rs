use crate::config::Configuration;
use crate::executor::Executor;
use std::sync::Arc;

/// Interceptors wrap each executor as it is constructed for a session,
/// which is where cross-cutting behavior (statistics, query rewriting,
/// auditing) hooks into the engine.
pub trait Interceptor: Send + Sync {
    fn wrap_executor(
        &self,
        executor: Box<dyn Executor>,
        configuration: &Arc<Configuration>,
    ) -> Box<dyn Executor>;
}

/// Applies every registered interceptor in registration order; the last
/// registered ends up outermost.
pub fn apply_interceptors(
    configuration: &Arc<Configuration>,
    mut executor: Box<dyn Executor>,
) -> Box<dyn Executor> {
    for interceptor in configuration.interceptors() {
        executor = interceptor.wrap_executor(executor, configuration);
    }
    executor
}
