//! GPIO access for buttons and the indicator LED.
//!
//! The [`PinController`] trait is the narrow surface the rest of the crate
//! needs from the platform. On a Raspberry Pi it is backed by `rppal`
//! (feature-gated); everywhere else, and in tests, by [`mock::MockGpio`].
//!
//! Edge notifications do not call back into application code. Controllers
//! push [`EdgeEvent`]s into a channel through an [`EdgeSink`] and the
//! dispatcher consumes them on its own task.

pub mod mock;

#[cfg(feature = "gpio")]
mod raspberry_pi;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

#[cfg(feature = "gpio")]
pub use raspberry_pi::RaspberryPiGpio;

// Re-export the appropriate controller
#[cfg(feature = "gpio")]
pub use raspberry_pi::RaspberryPiGpio as DefaultPinController;

#[cfg(not(feature = "gpio"))]
pub use mock::MockGpio as DefaultPinController;

/// Output level of a digital pin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    High,
}

/// Idle bias applied to an input pin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Pull {
    Up,
    Down,
    /// No internal resistor
    Floating,
}

/// Signal transition that triggers a notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Edge {
    Rising,
    Falling,
}

/// A raw edge as delivered by a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    /// Pin the listener was armed for
    pub registered_pin: u8,
    /// Pin the controller reported
    pub pin: u8,
    pub at: Instant,
}

pub type EdgeSender = mpsc::UnboundedSender<EdgeEvent>;
pub type EdgeReceiver = mpsc::UnboundedReceiver<EdgeEvent>;

/// Create the channel edge events travel on.
pub fn edge_channel() -> (EdgeSender, EdgeReceiver) {
    mpsc::unbounded_channel()
}

/// Delivery endpoint handed to a controller when a listener is armed.
#[derive(Debug, Clone)]
pub struct EdgeSink {
    registered_pin: u8,
    tx: EdgeSender,
}

impl EdgeSink {
    pub fn new(registered_pin: u8, tx: EdgeSender) -> Self {
        Self { registered_pin, tx }
    }

    pub fn registered_pin(&self) -> u8 {
        self.registered_pin
    }

    /// Deliver an edge observed now. Returns `false` once the dispatcher is gone.
    pub fn deliver(&self, pin: u8) -> bool {
        self.deliver_at(pin, Instant::now())
    }

    pub fn deliver_at(&self, pin: u8, at: Instant) -> bool {
        self.tx
            .send(EdgeEvent {
                registered_pin: self.registered_pin,
                pin,
                at,
            })
            .is_ok()
    }
}

/// Platform GPIO operations.
pub trait PinController: Send {
    /// Claim `pin` as a digital input with the given bias.
    fn configure_input(&mut self, pin: u8, pull: Pull) -> Result<()>;

    /// Claim `pin` as an output and drive it to `initial`.
    fn configure_output(&mut self, pin: u8, initial: Level) -> Result<()>;

    /// Drive a previously configured output pin.
    fn set_output(&mut self, pin: u8, level: Level) -> Result<()>;

    /// Arm edge notification on an input pin.
    ///
    /// Edges arriving within `debounce_window` of the last delivered edge on
    /// the same pin may be coalesced by the controller.
    fn register_edge_listener(
        &mut self,
        pin: u8,
        edge: Edge,
        debounce_window: Duration,
        sink: EdgeSink,
    ) -> Result<()>;

    /// Disarm every listener and release every claimed pin. Idempotent.
    fn release_all(&mut self);
}

/// Shared, owned handle to the process GPIO controller.
///
/// Cloning is cheap; all clones drive the same controller. The inner lock is
/// only ever held for the duration of one synchronous controller call.
#[derive(Clone)]
pub struct GpioHandle {
    inner: Arc<Mutex<Box<dyn PinController>>>,
}

impl GpioHandle {
    pub fn new(controller: impl PinController + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(controller))),
        }
    }

    // A panic inside a controller call leaves no partial state worth
    // protecting, so a poisoned lock is recovered.
    fn lock(&self) -> MutexGuard<'_, Box<dyn PinController>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn configure_input(&self, pin: u8, pull: Pull) -> Result<()> {
        self.lock().configure_input(pin, pull)
    }

    pub fn configure_output(&self, pin: u8, initial: Level) -> Result<()> {
        self.lock().configure_output(pin, initial)
    }

    pub fn set_output(&self, pin: u8, level: Level) -> Result<()> {
        self.lock().set_output(pin, level)
    }

    pub fn register_edge_listener(
        &self,
        pin: u8,
        edge: Edge,
        debounce_window: Duration,
        sink: EdgeSink,
    ) -> Result<()> {
        self.lock()
            .register_edge_listener(pin, edge, debounce_window, sink)
    }

    pub fn release_all(&self) {
        self.lock().release_all()
    }
}

impl std::fmt::Debug for GpioHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpioHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_edge_sink_tags_registered_pin() {
        let (tx, mut rx) = edge_channel();
        let sink = EdgeSink::new(5, tx);
        assert!(sink.deliver(7));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.registered_pin, 5);
        assert_eq!(event.pin, 7);
    }

    #[tokio::test]
    async fn test_edge_sink_reports_closed_channel() {
        let (tx, rx) = edge_channel();
        let sink = EdgeSink::new(5, tx);
        drop(rx);
        assert!(!sink.deliver(5));
    }

    #[test]
    fn test_level_serialization() {
        let serialized = serde_json::to_string(&Level::High).unwrap();
        assert_eq!(serialized, "\"High\"");
    }
}
