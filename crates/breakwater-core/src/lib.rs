//! Shared substrate for the breakwater fault-tolerance primitives:
//! - Typed event publication for observability
//! - Sliding-window call aggregation (count- and time-based)
//! - Named-instance registries
//! - Injectable clock for deterministic tests

pub mod clock;
pub mod events;
pub mod registry;
pub mod window;

pub use clock::{Clock, MockClock, SystemClock};
pub use events::{EventListener, EventPublisher, FnListener, PolicyEvent};
pub use registry::Registry;
pub use window::{
    CountWindow, OutcomeKind, SlidingWindow, TimeWindow, WindowSnapshot, NOT_ENOUGH_DATA,
};
