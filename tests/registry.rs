//! Registry semantics: per-name idempotence and single construction under
//! concurrent first access.

use breakwater_circuitbreaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use breakwater_core::Registry;
use breakwater_ratelimiter::RateLimiterRegistry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn get_is_idempotent_per_name() {
    let registry = CircuitBreakerRegistry::<std::io::Error>::of_defaults();

    let a = registry.get("payments");
    let b = registry.get("payments");
    let other = registry.get("search");

    assert!(Arc::ptr_eq(&a, &b));
    assert!(!Arc::ptr_eq(&a, &other));
    assert_eq!(a.name(), "payments");

    let mut names = registry.names();
    names.sort();
    assert_eq!(names, vec!["payments".to_string(), "search".to_string()]);
}

#[test]
fn instances_created_through_the_registry_share_state() {
    let registry = CircuitBreakerRegistry::<std::io::Error>::of(
        CircuitBreakerConfig::builder()
            .failure_rate_threshold(50.0)
            .sliding_window_size(2)
            .minimum_number_of_calls(2)
            .build(),
    );

    registry.get("backend").on_error(std::time::Duration::ZERO);
    registry.get("backend").on_error(std::time::Duration::ZERO);

    assert_eq!(
        registry.get("backend").state(),
        breakwater_circuitbreaker::CircuitState::Open
    );
}

#[test]
fn concurrent_first_access_constructs_exactly_once() {
    let registry: Arc<Registry<Vec<u8>>> = Arc::new(Registry::new());
    let constructions = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let constructions = Arc::clone(&constructions);
            std::thread::spawn(move || {
                registry.get_or_create("shared", || {
                    constructions.fetch_add(1, Ordering::SeqCst);
                    vec![1, 2, 3]
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
fn removal_allows_reconstruction() {
    let registry = RateLimiterRegistry::of_defaults();

    let first = registry.get("api");
    let removed = registry.remove("api").unwrap();
    assert!(Arc::ptr_eq(&first, &removed));
    assert!(registry.find("api").is_none());

    let second = registry.get("api");
    assert!(!Arc::ptr_eq(&first, &second));
}
