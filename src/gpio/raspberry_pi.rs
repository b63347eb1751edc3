//! Raspberry Pi GPIO controller using rppal.
//!
//! Pin numbers are BCM GPIO numbers.

use super::{Edge, EdgeSink, Level, PinController, Pull};
use crate::error::{PiMoodError, Result};
use rppal::gpio::{Gpio, InputPin, OutputPin, Trigger};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Raspberry Pi GPIO controller.
pub struct RaspberryPiGpio {
    gpio: Gpio,
    inputs: HashMap<u8, InputPin>,
    outputs: HashMap<u8, OutputPin>,
}

impl RaspberryPiGpio {
    /// Open the GPIO peripheral.
    pub fn new() -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| {
            PiMoodError::hardware_fault(format!("Failed to initialize GPIO: {}", e))
        })?;

        Ok(Self {
            gpio,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
        })
    }

    fn claim(&self, pin: u8) -> Result<rppal::gpio::Pin> {
        if self.inputs.contains_key(&pin) || self.outputs.contains_key(&pin) {
            return Err(PiMoodError::hardware_fault(format!(
                "Pin {} is already claimed",
                pin
            )));
        }
        self.gpio
            .get(pin)
            .map_err(|e| PiMoodError::hardware_fault(format!("Failed to claim pin {}: {}", pin, e)))
    }
}

impl PinController for RaspberryPiGpio {
    fn configure_input(&mut self, pin: u8, pull: Pull) -> Result<()> {
        let claimed = self.claim(pin)?;
        let input = match pull {
            Pull::Up => claimed.into_input_pullup(),
            Pull::Down => claimed.into_input_pulldown(),
            Pull::Floating => claimed.into_input(),
        };
        self.inputs.insert(pin, input);
        Ok(())
    }

    fn configure_output(&mut self, pin: u8, initial: Level) -> Result<()> {
        let claimed = self.claim(pin)?;
        let output = match initial {
            Level::Low => claimed.into_output_low(),
            Level::High => claimed.into_output_high(),
        };
        self.outputs.insert(pin, output);
        Ok(())
    }

    fn set_output(&mut self, pin: u8, level: Level) -> Result<()> {
        let output = self.outputs.get_mut(&pin).ok_or_else(|| {
            PiMoodError::hardware_fault(format!("Pin {} is not configured as an output", pin))
        })?;
        match level {
            Level::Low => output.set_low(),
            Level::High => output.set_high(),
        }
        Ok(())
    }

    fn register_edge_listener(
        &mut self,
        pin: u8,
        edge: Edge,
        debounce_window: Duration,
        sink: EdgeSink,
    ) -> Result<()> {
        let input = self.inputs.get_mut(&pin).ok_or_else(|| {
            PiMoodError::hardware_fault(format!("Pin {} is not configured as an input", pin))
        })?;

        let trigger = match edge {
            Edge::Rising => Trigger::RisingEdge,
            Edge::Falling => Trigger::FallingEdge,
        };

        // Driver-level coalescing: drop edges closer than the window to the
        // last one delivered on this pin.
        let mut last_delivered: Option<Instant> = None;
        input
            .set_async_interrupt(trigger, move |_level| {
                let now = Instant::now();
                let coalesce = last_delivered
                    .map(|last| now.saturating_duration_since(last) < debounce_window)
                    .unwrap_or(false);
                if !coalesce {
                    last_delivered = Some(now);
                    sink.deliver_at(pin, now);
                }
            })
            .map_err(|e| {
                PiMoodError::hardware_fault(format!(
                    "Failed to arm edge detection on pin {}: {}",
                    pin, e
                ))
            })
    }

    fn release_all(&mut self) {
        for (pin, input) in self.inputs.iter_mut() {
            if let Err(e) = input.clear_async_interrupt() {
                warn!("Failed to disarm edge detection on pin {}: {}", pin, e);
            }
        }
        // Dropping the pins resets them to their original mode.
        self.inputs.clear();
        self.outputs.clear();
    }
}

impl Drop for RaspberryPiGpio {
    fn drop(&mut self) {
        self.release_all();
    }
}
