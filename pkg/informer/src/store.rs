use std::collections::HashMap;
use std::sync::RwLock;

/// Thread-safe key→object map; the local mirror of one resource kind.
/// Last writer wins, no history retained. Each Informer owns exactly one
/// Store instance; there is no shared global cache.
pub struct Store<R> {
    items: RwLock<HashMap<String, R>>,
}

impl<R: Clone> Store<R> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<R> {
        self.items.read().unwrap().get(key).cloned()
    }

    pub fn insert(&self, key: String, obj: R) {
        self.items.write().unwrap().insert(key, obj);
    }

    pub fn remove(&self, key: &str) -> Option<R> {
        self.items.write().unwrap().remove(key)
    }

    pub fn list(&self) -> Vec<R> {
        self.items.read().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().unwrap().is_empty()
    }
}

impl<R: Clone> Default for Store<R> {
    fn default() -> Self {
        Self::new()
    }
}
