use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::processor::ProcessorRef;

/// Engine-scoped map from processor id to processor reference.
///
/// Shared by workers, the scheduler and the engine front-end; reads take
/// the uncontended fast path of the rwlock. Not a process-wide global:
/// each engine instance owns exactly one.
#[derive(Clone, Default)]
pub struct Registrar {
    inner: Arc<RwLock<HashMap<String, ProcessorRef>>>,
}

impl Registrar {
    pub fn new() -> Self {
        Registrar::default()
    }

    /// Insert only if the id is absent; returns whether insertion occurred.
    pub fn register(&self, processor: &ProcessorRef) -> bool {
        let mut map = self.inner.write();
        if map.contains_key(processor.id()) {
            false
        } else {
            map.insert(processor.id().to_string(), processor.clone());
            true
        }
    }

    pub fn unregister(&self, id: &str) -> Option<ProcessorRef> {
        self.inner.write().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<ProcessorRef> {
        self.inner.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }
}
