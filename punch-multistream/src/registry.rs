//! Protocol handler registry. A single writer lock guards both add/remove and
//! lookup (§5: "single writer lock; reads happen under the same lock for
//! consistency with concurrent add/remove").

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct HandlerRegistry<H: ?Sized> {
    handlers: Mutex<HashMap<String, Arc<H>>>,
}

impl<H: ?Sized + Send + Sync> HandlerRegistry<H> {
    pub fn new() -> Self {
        Self { handlers: Mutex::new(HashMap::new()) }
    }

    pub fn set(&self, protocol: impl Into<String>, handler: Arc<H>) {
        let mut map = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(protocol.into(), handler);
    }

    pub fn remove(&self, protocol: &str) {
        let mut map = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(protocol);
    }

    pub fn get(&self, protocol: &str) -> Option<Arc<H>> {
        let map = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        map.get(protocol).cloned()
    }

    pub fn protocols(&self) -> Vec<String> {
        let map = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        map.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_lookup_remove() {
        let registry: HandlerRegistry<()> = HandlerRegistry::new();
        registry.set("/foo/1.0.0", Arc::new(()));
        assert!(registry.get("/foo/1.0.0").is_some());
        registry.remove("/foo/1.0.0");
        assert!(registry.get("/foo/1.0.0").is_none());
    }
}
