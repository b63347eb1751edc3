//! In-memory GPIO controller for systems without GPIO support.
//!
//! `MockGpio` enforces the same claim rules as real hardware and records
//! every output transition with the (tokio) instant it happened, so tests
//! can check pulse ordering and width. A [`MockProbe`] keeps access to that
//! record after the controller itself has been moved into a [`GpioHandle`].
//!
//! [`GpioHandle`]: super::GpioHandle

use super::{Edge, EdgeSink, Level, PinController, Pull};
use crate::error::{PiMoodError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// One recorded output transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputChange {
    pub pin: u8,
    pub level: Level,
    pub at: Instant,
}

#[derive(Default)]
struct MockState {
    inputs: HashMap<u8, Pull>,
    outputs: HashMap<u8, Level>,
    listeners: HashMap<u8, EdgeSink>,
    history: Vec<OutputChange>,
    unavailable: HashSet<u8>,
    release_count: usize,
}

impl MockState {
    fn is_claimed(&self, pin: u8) -> bool {
        self.inputs.contains_key(&pin) || self.outputs.contains_key(&pin)
    }

    fn claim_check(&self, pin: u8) -> Result<()> {
        if self.unavailable.contains(&pin) {
            return Err(PiMoodError::hardware_fault(format!(
                "Pin {} is not available",
                pin
            )));
        }
        if self.is_claimed(pin) {
            return Err(PiMoodError::hardware_fault(format!(
                "Pin {} is already claimed",
                pin
            )));
        }
        Ok(())
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock GPIO controller.
#[derive(Default)]
pub struct MockGpio {
    state: Arc<Mutex<MockState>>,
}

impl MockGpio {
    pub fn new() -> Result<Self> {
        Ok(Self::default())
    }

    /// A controller on which claiming any of `pins` fails with a hardware fault.
    pub fn with_unavailable_pins(pins: impl IntoIterator<Item = u8>) -> Self {
        let mock = Self::default();
        lock(&mock.state).unavailable.extend(pins);
        mock
    }

    /// Observation handle sharing this controller's state.
    pub fn probe(&self) -> MockProbe {
        MockProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl PinController for MockGpio {
    fn configure_input(&mut self, pin: u8, pull: Pull) -> Result<()> {
        let mut state = lock(&self.state);
        state.claim_check(pin)?;
        state.inputs.insert(pin, pull);
        Ok(())
    }

    fn configure_output(&mut self, pin: u8, initial: Level) -> Result<()> {
        let mut state = lock(&self.state);
        state.claim_check(pin)?;
        state.outputs.insert(pin, initial);
        state.history.push(OutputChange {
            pin,
            level: initial,
            at: Instant::now(),
        });
        Ok(())
    }

    fn set_output(&mut self, pin: u8, level: Level) -> Result<()> {
        let mut state = lock(&self.state);
        match state.outputs.get_mut(&pin) {
            Some(current) => *current = level,
            None => {
                return Err(PiMoodError::hardware_fault(format!(
                    "Pin {} is not configured as an output",
                    pin
                )))
            }
        }
        state.history.push(OutputChange {
            pin,
            level,
            at: Instant::now(),
        });
        Ok(())
    }

    fn register_edge_listener(
        &mut self,
        pin: u8,
        _edge: Edge,
        _debounce_window: Duration,
        sink: EdgeSink,
    ) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.inputs.contains_key(&pin) {
            return Err(PiMoodError::hardware_fault(format!(
                "Pin {} is not configured as an input",
                pin
            )));
        }
        state.listeners.insert(pin, sink);
        Ok(())
    }

    fn release_all(&mut self) {
        let mut state = lock(&self.state);
        state.listeners.clear();
        state.inputs.clear();
        state.outputs.clear();
        state.release_count += 1;
    }
}

/// Test-side view of a [`MockGpio`].
#[derive(Clone)]
pub struct MockProbe {
    state: Arc<Mutex<MockState>>,
}

impl MockProbe {
    /// Fire an edge on `pin` now. Returns `false` if no listener is armed
    /// or the dispatcher has gone away.
    pub fn trigger_edge(&self, pin: u8) -> bool {
        self.trigger_edge_at(pin, Instant::now())
    }

    /// Fire an edge on `pin` stamped with `at`.
    pub fn trigger_edge_at(&self, pin: u8, at: Instant) -> bool {
        self.deliver_from(pin, pin, at)
    }

    /// Make the listener armed on `registered` report an edge for `delivered`.
    pub fn deliver_from(&self, registered: u8, delivered: u8, at: Instant) -> bool {
        let sink = lock(&self.state).listeners.get(&registered).cloned();
        match sink {
            Some(sink) => sink.deliver_at(delivered, at),
            None => false,
        }
    }

    /// All transitions recorded for `pin`, oldest first.
    pub fn output_history(&self, pin: u8) -> Vec<OutputChange> {
        lock(&self.state)
            .history
            .iter()
            .filter(|change| change.pin == pin)
            .copied()
            .collect()
    }

    /// Number of times `pin` has been driven high.
    pub fn high_count(&self, pin: u8) -> usize {
        self.output_history(pin)
            .iter()
            .filter(|change| change.level == Level::High)
            .count()
    }

    pub fn level(&self, pin: u8) -> Option<Level> {
        lock(&self.state).outputs.get(&pin).copied()
    }

    pub fn pull(&self, pin: u8) -> Option<Pull> {
        lock(&self.state).inputs.get(&pin).copied()
    }

    pub fn is_claimed(&self, pin: u8) -> bool {
        lock(&self.state).is_claimed(pin)
    }

    pub fn has_listener(&self, pin: u8) -> bool {
        lock(&self.state).listeners.contains_key(&pin)
    }

    pub fn release_count(&self) -> usize {
        lock(&self.state).release_count
    }
}
