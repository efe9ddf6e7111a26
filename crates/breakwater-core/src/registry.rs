//! Named-instance registries.
//!
//! A registry caches one instance per name for a primitive kind. Concurrent
//! first access for the same name constructs exactly once; later lookups
//! return the cached instance.

use dashmap::DashMap;
use std::sync::Arc;

/// Name-keyed cache of `Arc<T>` instances.
pub struct Registry<T> {
    entries: DashMap<String, Arc<T>>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Returns the instance registered under `name`, constructing it with
    /// `build` if absent.
    ///
    /// The map shard stays locked while `build` runs, so two racing callers
    /// observe a single construction. `build` must not touch this registry
    /// or it may deadlock.
    pub fn get_or_create<F>(&self, name: &str, build: F) -> Arc<T>
    where
        F: FnOnce() -> T,
    {
        let entry = self
            .entries
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(build()));
        Arc::clone(entry.value())
    }

    /// Returns the instance registered under `name`, if any.
    pub fn find(&self, name: &str) -> Option<Arc<T>> {
        self.entries.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Removes and returns the instance registered under `name`.
    pub fn remove(&self, name: &str) -> Option<Arc<T>> {
        self.entries.remove(name).map(|(_, instance)| instance)
    }

    /// Registers `instance` under `name`, replacing any previous occupant.
    pub fn replace(&self, name: &str, instance: T) -> Arc<T> {
        let instance = Arc::new(instance);
        self.entries.insert(name.to_string(), Arc::clone(&instance));
        instance
    }

    /// Names of all registered instances, in no particular order.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn same_name_returns_same_instance() {
        let registry: Registry<String> = Registry::new();
        let a = registry.get_or_create("a", || "value".to_string());
        let b = registry.get_or_create("a", || "other".to_string());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*b, "value");
    }

    #[test]
    fn find_and_remove() {
        let registry: Registry<u32> = Registry::new();
        assert!(registry.find("n").is_none());

        registry.get_or_create("n", || 7);
        assert_eq!(*registry.find("n").unwrap(), 7);

        let removed = registry.remove("n").unwrap();
        assert_eq!(*removed, 7);
        assert!(registry.find("n").is_none());
    }

    #[test]
    fn replace_swaps_the_instance() {
        let registry: Registry<u32> = Registry::new();
        registry.get_or_create("n", || 1);
        registry.replace("n", 2);
        assert_eq!(*registry.find("n").unwrap(), 2);
    }

    #[test]
    fn concurrent_first_access_constructs_once() {
        let registry: Arc<Registry<u32>> = Arc::new(Registry::new());
        let constructions = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let constructions = Arc::clone(&constructions);
                std::thread::spawn(move || {
                    registry.get_or_create("shared", || {
                        constructions.fetch_add(1, Ordering::SeqCst);
                        42
                    })
                })
            })
            .collect();

        let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        for instance in &instances {
            assert!(Arc::ptr_eq(instance, &instances[0]));
        }
    }

    #[test]
    fn names_lists_all_entries() {
        let registry: Registry<u32> = Registry::new();
        registry.get_or_create("a", || 1);
        registry.get_or_create("b", || 2);

        let mut names = registry.names();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }
}
