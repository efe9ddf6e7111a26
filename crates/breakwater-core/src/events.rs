//! In-process pub-sub for policy lifecycle events.
//!
//! Every primitive owns an [`EventPublisher`] parameterized by its own event
//! sum type. Publication is synchronous: subscribers run on the publishing
//! thread, in registration order, and see events in the order they were
//! published for a given instance. A panicking subscriber is isolated so the
//! remaining subscribers still run.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Trait implemented by the event sum type of each primitive.
pub trait PolicyEvent: Send + Sync + fmt::Debug {
    /// Stable tag for the event kind (e.g. `"StateTransition"`).
    fn kind(&self) -> &'static str;

    /// When the event occurred.
    fn timestamp(&self) -> Instant;

    /// Name of the primitive instance that emitted the event.
    fn source(&self) -> &str;
}

/// A subscriber to the events of one primitive instance.
pub trait EventListener<E: PolicyEvent>: Send + Sync {
    fn on_event(&self, event: &E);
}

/// A closure-backed [`EventListener`].
pub struct FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    f: F,
    _marker: std::marker::PhantomData<fn(&E)>,
}

impl<E, F> FnListener<E, F>
where
    F: Fn(&E) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<E, F> EventListener<E> for FnListener<E, F>
where
    E: PolicyEvent,
    F: Fn(&E) + Send + Sync,
{
    fn on_event(&self, event: &E) {
        (self.f)(event)
    }
}

/// Handle to the subscriber list of one primitive instance.
///
/// Cloning the publisher yields another handle to the same subscriber list,
/// so listeners registered through a clone are seen by the instance that
/// owns the original.
pub struct EventPublisher<E: PolicyEvent> {
    listeners: Arc<RwLock<Vec<Arc<dyn EventListener<E>>>>>,
}

impl<E: PolicyEvent> Clone for EventPublisher<E> {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<E: PolicyEvent + 'static> EventPublisher<E> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Registers a subscriber. Listeners cannot be removed; drop the
    /// primitive instead.
    pub fn subscribe<L>(&self, listener: L)
    where
        L: EventListener<E> + 'static,
    {
        self.listeners
            .write()
            .expect("event listener lock poisoned")
            .push(Arc::new(listener));
    }

    /// Registers a closure subscriber.
    pub fn on_event<F>(&self, f: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.subscribe(FnListener::new(f));
    }

    /// Delivers `event` to every subscriber in registration order.
    ///
    /// A panic in one subscriber is caught so the others still run; with the
    /// `tracing` feature the panic is logged as a warning.
    pub fn emit(&self, event: &E) {
        let listeners = self
            .listeners
            .read()
            .expect("event listener lock poisoned")
            .clone();
        for (_index, listener) in listeners.iter().enumerate() {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener.on_event(event);
            }));

            if outcome.is_err() {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    listener_index = _index,
                    source = event.source(),
                    kind = event.kind(),
                    "event listener panicked"
                );

                #[cfg(feature = "metrics")]
                metrics::counter!(
                    "breakwater_listener_panics_total",
                    "source" => event.source().to_string(),
                    "kind" => event.kind().to_string()
                )
                .increment(1);
            }
        }
    }

    /// Returns a publisher with its own copy of the current subscriber
    /// list. Used when one configuration seeds several instances: listeners
    /// registered at config time are carried over, listeners registered on
    /// an instance afterwards stay local to it.
    pub fn fork(&self) -> Self {
        let listeners = self
            .listeners
            .read()
            .expect("event listener lock poisoned")
            .clone();
        Self {
            listeners: Arc::new(RwLock::new(listeners)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listeners
            .read()
            .expect("event listener lock poisoned")
            .is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .expect("event listener lock poisoned")
            .len()
    }
}

impl<E: PolicyEvent + 'static> Default for EventPublisher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: PolicyEvent + 'static> fmt::Debug for EventPublisher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPublisher")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct TestEvent {
        name: String,
        at: Instant,
    }

    impl PolicyEvent for TestEvent {
        fn kind(&self) -> &'static str {
            "test"
        }

        fn timestamp(&self) -> Instant {
            self.at
        }

        fn source(&self) -> &str {
            &self.name
        }
    }

    fn event() -> TestEvent {
        TestEvent {
            name: "t".to_string(),
            at: Instant::now(),
        }
    }

    #[test]
    fn delivers_to_single_listener() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);

        let publisher = EventPublisher::new();
        publisher.on_event(move |_: &TestEvent| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        publisher.emit(&event());
        publisher.emit(&event());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn delivers_in_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let publisher = EventPublisher::new();
        for id in 0..3 {
            let order = Arc::clone(&order);
            publisher.on_event(move |_: &TestEvent| {
                order.lock().unwrap().push(id);
            });
        }

        publisher.emit(&event());
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn clones_share_the_subscriber_list() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);

        let publisher = EventPublisher::new();
        let handle = publisher.clone();
        handle.on_event(move |_: &TestEvent| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        publisher.emit(&event());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_block_the_rest() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);

        let publisher = EventPublisher::new();
        publisher.on_event(|_: &TestEvent| panic!("boom"));
        publisher.on_event(move |_: &TestEvent| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        publisher.emit(&event());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
