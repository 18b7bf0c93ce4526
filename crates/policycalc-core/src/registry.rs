//! Handler strategy factory.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::api::ComputeApi;
use crate::cache::ResultCache;
use crate::economy::EconomyHandler;
use crate::error::CalcError;
use crate::handler::CalculationHandler;
use crate::household::HouseholdHandler;
use crate::meta::CalcKind;
use crate::options::EngineConfig;

/// Resolves a calculation kind to its shared handler.
///
/// Handlers are created on first use and cached, so every caller asking
/// for the same kind gets the same `Arc` (and the same in-flight guard)
/// until [`reset`](Self::reset).
pub struct CalcStrategyFactory {
    cache: Arc<dyn ResultCache>,
    api: Arc<dyn ComputeApi>,
    config: Arc<EngineConfig>,
    handlers: RwLock<HashMap<CalcKind, Arc<dyn CalculationHandler>>>,
}

impl CalcStrategyFactory {
    #[must_use]
    pub fn new(
        cache: Arc<dyn ResultCache>,
        api: Arc<dyn ComputeApi>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            cache,
            api,
            config,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    fn create_handler(&self, kind: CalcKind) -> Arc<dyn CalculationHandler> {
        let cache = Arc::clone(&self.cache);
        let api = Arc::clone(&self.api);
        let config = Arc::clone(&self.config);
        match kind {
            CalcKind::Household => Arc::new(HouseholdHandler::new(cache, api, config)),
            CalcKind::Economy => Arc::new(EconomyHandler::new(cache, api, config)),
        }
    }

    /// Shared handler for `kind`.
    pub fn get_strategy(&self, kind: CalcKind) -> Arc<dyn CalculationHandler> {
        if let Some(handler) = self.handlers.read().get(&kind) {
            return Arc::clone(handler);
        }

        // Re-check under the write lock so racing callers share one handler.
        let mut handlers = self.handlers.write();
        let handler = handlers.entry(kind).or_insert_with(|| {
            debug!(kind = %kind, "Creating handler");
            self.create_handler(kind)
        });
        Arc::clone(handler)
    }

    /// Shared handler for a kind given by name.
    pub fn get_strategy_by_name(
        &self,
        name: &str,
    ) -> Result<Arc<dyn CalculationHandler>, CalcError> {
        let kind = name.parse::<CalcKind>()?;
        Ok(self.get_strategy(kind))
    }

    /// Drop every cached handler.
    pub fn reset(&self) {
        self.handlers.write().clear();
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<dyn ResultCache> {
        &self.cache
    }

    #[must_use]
    pub fn api(&self) -> &Arc<dyn ComputeApi> {
        &self.api
    }

    #[must_use]
    pub fn config(&self) -> &Arc<EngineConfig> {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::scripted::ScriptedComputeApi;

    fn factory() -> CalcStrategyFactory {
        CalcStrategyFactory::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(ScriptedComputeApi::new()),
            Arc::new(EngineConfig::default()),
        )
    }

    #[test]
    fn factory_creates_each_kind() {
        let factory = factory();
        assert_eq!(factory.get_strategy(CalcKind::Household).kind(), CalcKind::Household);
        assert_eq!(factory.get_strategy(CalcKind::Economy).kind(), CalcKind::Economy);
    }

    #[test]
    fn factory_caches() {
        let factory = factory();
        let a = factory.get_strategy(CalcKind::Economy);
        let b = factory.get_strategy(CalcKind::Economy);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn reset_discards_instances() {
        let factory = factory();
        let a = factory.get_strategy(CalcKind::Household);
        factory.reset();
        let b = factory.get_strategy(CalcKind::Household);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn lookup_by_name() {
        let factory = factory();
        let by_name = factory.get_strategy_by_name("Economy").unwrap();
        assert!(Arc::ptr_eq(&by_name, &factory.get_strategy(CalcKind::Economy)));
    }

    #[test]
    fn unknown_name_fails_synchronously() {
        let factory = factory();
        let err = factory.get_strategy_by_name("microsimulation").err().unwrap();
        assert_eq!(
            err,
            CalcError::Config("unknown calculation kind: microsimulation".into())
        );
    }
}
