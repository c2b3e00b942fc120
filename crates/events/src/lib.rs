//! Engine events and the publish/subscribe plumbing that carries them.
//!
//! The engine never formats or ships logs itself; it publishes structured
//! [`EngineSignal`]s to a [`SignalSink`] and an external collector subscribes.

pub mod bus;
pub mod event;
pub mod in_memory_bus;
pub mod signal;

pub use bus::{EventBus, Subscription};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use signal::{
    CycleDetected, DriftDetected, EngineSignal, LockTimeout, NullSink, SignalSink,
};
