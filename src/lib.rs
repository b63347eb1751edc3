//! # pi_mood - Raspberry Pi Mood Buttons
//!
//! Watches a set of push-buttons wired to GPIO inputs. Every accepted press
//! is recorded as a point in InfluxDB and acknowledged by flashing an LED.
//!
//! ## Features
//!
//! - **Edge-driven input**: rising-edge notifications delivered over a channel
//! - **Two-layer debounce**: controller-level coalescing plus a per-pin software gate
//! - **Ordered actions**: measurement upload, then a mutually exclusive LED pulse
//! - **Guaranteed cleanup**: pins are released exactly once on every exit path
//! - **Off-Pi builds**: an in-memory controller stands in when the `gpio` feature is off
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pi_mood::{lifecycle, Config, DefaultPinController, InfluxClient};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("config.yaml")?;
//!     let store = Arc::new(InfluxClient::connect(&config.influxdb).await?);
//!     let shutdown = lifecycle::shutdown_signal()?;
//!     let controller = DefaultPinController::new()?;
//!
//!     lifecycle::serve(controller, &config, store, shutdown).await?;
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod config;
pub mod error;
pub mod events;
pub mod gpio;
pub mod lifecycle;

// Re-export public API
pub use actions::{ActionPipeline, Indicator, InfluxClient, MeasurementPoint, TimeSeriesStore};
pub use config::{ButtonSpec, Config, IndicatorSpec, InfluxDbConfig, DEFAULT_CONFIG_PATH};
pub use error::{PiMoodError, Result};
pub use events::{ButtonHandler, DebounceGate, DispatchOutcome, DispatchStats, EventDispatcher};
pub use gpio::{DefaultPinController, GpioHandle, Level, PinController, Pull};
pub use lifecycle::{Lifecycle, LifecycleState, ShutdownSignal};
