//! Registered fallback chains.
//!
//! The chain table is read on every `execute` and written rarely. Writers
//! build a new table and swap the pointer, so a reader that grabbed a chain
//! keeps a consistent view for the whole call.

use bulwark_core::FallbackChain;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

type ChainTable = HashMap<String, Arc<FallbackChain>>;

/// Copy-on-write table of fallback chains keyed by operation.
#[derive(Debug, Default)]
pub struct ChainRegistry {
    table: RwLock<Arc<ChainTable>>,
}

impl ChainRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding these chains.
    pub fn with_chains(chains: impl IntoIterator<Item = FallbackChain>) -> Self {
        let table: ChainTable = chains
            .into_iter()
            .map(|chain| (chain.operation.clone(), Arc::new(chain)))
            .collect();
        Self {
            table: RwLock::new(Arc::new(table)),
        }
    }

    /// Register or replace the chain for its operation.
    ///
    /// Returns the chain it replaced, if any.
    pub fn register(&self, chain: FallbackChain) -> Option<Arc<FallbackChain>> {
        let mut guard = self.table.write();
        let mut next = (**guard).clone();
        let previous = next.insert(chain.operation.clone(), Arc::new(chain));
        *guard = Arc::new(next);
        previous
    }

    /// Remove the chain for an operation.
    pub fn remove(&self, operation: &str) -> Option<Arc<FallbackChain>> {
        let mut guard = self.table.write();
        if !guard.contains_key(operation) {
            return None;
        }
        let mut next = (**guard).clone();
        let previous = next.remove(operation);
        *guard = Arc::new(next);
        previous
    }

    /// Replace every chain at once.
    pub fn replace_all(&self, chains: impl IntoIterator<Item = FallbackChain>) {
        let table: ChainTable = chains
            .into_iter()
            .map(|chain| (chain.operation.clone(), Arc::new(chain)))
            .collect();
        *self.table.write() = Arc::new(table);
    }

    /// Chain for an operation.
    pub fn get(&self, operation: &str) -> Option<Arc<FallbackChain>> {
        self.table.read().get(operation).cloned()
    }

    /// Registered operations, sorted.
    pub fn operations(&self) -> Vec<String> {
        let mut ops: Vec<String> = self.table.read().keys().cloned().collect();
        ops.sort();
        ops
    }

    /// Every provider referenced by any chain, sorted and deduplicated.
    pub fn providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = self
            .table
            .read()
            .values()
            .flat_map(|chain| chain.providers.iter().cloned())
            .collect();
        providers.sort();
        providers.dedup();
        providers
    }
}
