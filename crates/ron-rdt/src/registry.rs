//! The reducer registry
//!
//! A registry is an explicitly constructed value passed down to whoever
//! needs dispatch — there is no process-wide table, so tests and
//! embedded replicas can run isolated registries side by side.

use crate::gcounter::CtrReducer;
use crate::lww::LwwReducer;
use crate::rawlog::LogReducer;
use crate::reduce::Reducer;
use ron_wire::uuid::Uuid;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Tunables for the standard types. The overflow ceiling mirrors the
/// safe-integer bound of the protocol's reference environment; it is a
/// config value, not a constant baked into the merge logic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RdtConfig {
    /// Counter sums beyond this absolute value are an overflow error.
    pub counter_ceiling: i64,
}

impl Default for RdtConfig {
    fn default() -> Self {
        RdtConfig {
            counter_ceiling: (1 << 53) - 1,
        }
    }
}

/// Maps type identifiers to reducers.
#[derive(Clone, Default)]
pub struct Registry {
    reducers: HashMap<String, Arc<dyn Reducer>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Registry {
        Registry::default()
    }

    /// A registry with the standard types: `lww`, `ctr`, `log`.
    pub fn standard(config: RdtConfig) -> Registry {
        let mut registry = Registry::new();
        registry.register(Arc::new(LwwReducer));
        registry.register(Arc::new(CtrReducer::new(config.counter_ceiling)));
        registry.register(Arc::new(LogReducer));
        registry
    }

    /// Register a reducer under its own type id. Re-registering a type
    /// replaces the previous reducer.
    pub fn register(&mut self, reducer: Arc<dyn Reducer>) {
        self.reducers
            .insert(reducer.type_id().to_string(), reducer);
    }

    /// Look up the reducer for a type identifier.
    pub fn get(&self, ty: &Uuid) -> Option<Arc<dyn Reducer>> {
        self.reducers.get(&ty.to_string()).cloned()
    }

    /// Whether a type is registered.
    pub fn knows(&self, ty: &Uuid) -> bool {
        self.reducers.contains_key(&ty.to_string())
    }

    /// Registered type ids, unordered.
    pub fn type_ids(&self) -> Vec<String> {
        self.reducers.keys().cloned().collect()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.reducers.keys().collect();
        types.sort();
        f.debug_struct("Registry").field("types", &types).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_knows_builtins() {
        let registry = Registry::standard(RdtConfig::default());
        assert!(registry.knows(&Uuid::name("lww")));
        assert!(registry.knows(&Uuid::name("ctr")));
        assert!(registry.knows(&Uuid::name("log")));
        assert!(!registry.knows(&Uuid::name("mystery")));
    }

    #[test]
    fn test_registries_are_isolated() {
        let full = Registry::standard(RdtConfig::default());
        let empty = Registry::new();
        assert!(full.knows(&Uuid::name("lww")));
        assert!(!empty.knows(&Uuid::name("lww")));
    }

    #[test]
    fn test_default_ceiling_is_safe_integer_bound() {
        assert_eq!(RdtConfig::default().counter_ceiling, 9_007_199_254_740_991);
    }
}
