//! Indicator LED pulses.

use crate::config::IndicatorSpec;
use crate::gpio::{GpioHandle, Level};
use tokio::sync::Mutex;
use tracing::{debug, error};

/// The single indicator output shared by every button.
///
/// Pulses are mutually exclusive: a second flash waits for the first one to
/// finish, so one button's "off" never cuts short another button's "on".
pub struct Indicator {
    gpio: GpioHandle,
    spec: IndicatorSpec,
    lock: Mutex<()>,
}

impl Indicator {
    pub fn new(gpio: GpioHandle, spec: IndicatorSpec) -> Self {
        Self {
            gpio,
            spec,
            lock: Mutex::new(()),
        }
    }

    pub fn spec(&self) -> IndicatorSpec {
        self.spec
    }

    /// Drive the LED high for the configured duration, then low.
    ///
    /// Output faults are logged; they never propagate to the caller.
    pub async fn flash(&self) {
        let _guard = self.lock.lock().await;

        debug!("Turning LED on.");
        if let Err(e) = self.gpio.set_output(self.spec.pin, Level::High) {
            error!("Failed to turn LED on: {}", e);
            return;
        }

        tokio::time::sleep(self.spec.flash_duration).await;

        if let Err(e) = self.gpio.set_output(self.spec.pin, Level::Low) {
            error!("Failed to turn LED off: {}", e);
            return;
        }
        debug!("Turned LED off.");
    }
}
