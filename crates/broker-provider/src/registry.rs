use std::collections::HashMap;
use std::sync::Arc;

use broker_domain::ProviderStrategy;

use crate::error::ProviderError;
use crate::handler::ProviderHandler;

/// Dispatches a template's `provider_strategy` tag to the concrete
/// [`ProviderHandler`] that implements it.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<ProviderStrategy, Arc<dyn ProviderHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, strategy: ProviderStrategy, handler: Arc<dyn ProviderHandler>) -> &mut Self {
        self.handlers.insert(strategy, handler);
        self
    }

    pub fn resolve(&self, strategy: ProviderStrategy) -> Result<Arc<dyn ProviderHandler>, ProviderError> {
        self.handlers
            .get(&strategy)
            .cloned()
            .ok_or_else(|| ProviderError::HandlerNotConfigured(strategy.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeProviderHandler;

    #[test]
    fn resolve_unregistered_strategy_is_an_error() {
        let registry = HandlerRegistry::new();
        assert!(matches!(
            registry.resolve(ProviderStrategy::DirectLaunch),
            Err(ProviderError::HandlerNotConfigured(_))
        ));
    }

    #[test]
    fn resolve_returns_registered_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            ProviderStrategy::DirectLaunch,
            Arc::new(FakeProviderHandler::new(ProviderStrategy::DirectLaunch)),
        );
        assert!(registry.resolve(ProviderStrategy::DirectLaunch).is_ok());
    }
}
