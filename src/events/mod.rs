//! Button event pipeline: debounce and dispatch.

pub mod debounce;
pub mod dispatcher;

// Re-export commonly used items
pub use debounce::{DebounceGate, DebounceState, Decision};
pub use dispatcher::{ButtonHandler, DispatchOutcome, DispatchStats, EventDispatcher};
