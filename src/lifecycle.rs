//! Startup, steady state and shutdown of the button daemon.
//!
//! [`Lifecycle`] is the sole owner of the GPIO controller. It moves through
//! `Uninitialized -> Armed -> ShuttingDown -> Released` and guarantees that
//! the controller's `release_all` runs exactly once, whether the process
//! stops on a signal, on a failed startup, or by unwinding.

use crate::actions::{ActionPipeline, Indicator, TimeSeriesStore};
use crate::config::Config;
use crate::error::{PiMoodError, Result};
use crate::events::{ButtonHandler, DispatchStats, EventDispatcher};
use crate::gpio::{GpioHandle, Level, PinController, Pull};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Externally visible lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    Uninitialized,
    Armed,
    ShuttingDown,
    Released,
}

struct ArmedSession {
    stop: oneshot::Sender<()>,
    dispatcher: JoinHandle<DispatchStats>,
}

/// Owner of the GPIO controller for one process run.
pub struct Lifecycle {
    gpio: GpioHandle,
    state: LifecycleState,
    session: Option<ArmedSession>,
}

impl Lifecycle {
    pub fn new(controller: impl PinController + 'static) -> Self {
        Self {
            gpio: GpioHandle::new(controller),
            state: LifecycleState::Uninitialized,
            session: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn gpio(&self) -> &GpioHandle {
        &self.gpio
    }

    /// Configure the indicator and every button, then start dispatching.
    ///
    /// Must be called from within a tokio runtime. On failure every pin
    /// claimed so far is released and the lifecycle ends in `Released`.
    pub fn arm(&mut self, config: &Config, store: Arc<dyn TimeSeriesStore>) -> Result<()> {
        if self.state != LifecycleState::Uninitialized {
            return Err(PiMoodError::config_error(format!(
                "Cannot arm GPIO from state {:?}",
                self.state
            )));
        }

        match self.try_arm(config, store) {
            Ok(session) => {
                self.session = Some(session);
                self.state = LifecycleState::Armed;
                info!("GPIO init complete.");
                Ok(())
            }
            Err(e) => {
                error!("GPIO init failed: {}", e);
                self.release();
                Err(e)
            }
        }
    }

    fn try_arm(&self, config: &Config, store: Arc<dyn TimeSeriesStore>) -> Result<ArmedSession> {
        let indicator_spec = config.indicator();
        self.gpio.configure_output(indicator_spec.pin, Level::Low)?;
        let indicator = Arc::new(Indicator::new(self.gpio.clone(), indicator_spec));

        let handler: Arc<dyn ButtonHandler> =
            Arc::new(ActionPipeline::from_config(config, store, indicator));

        let mut dispatcher = EventDispatcher::new(config.bouncetime());
        for button in config.button_specs() {
            self.gpio.configure_input(button.pin, Pull::Down)?;
            dispatcher.register(&self.gpio, button.clone(), Arc::clone(&handler))?;
        }

        let (stop, stopped) = oneshot::channel::<()>();
        let dispatcher = tokio::spawn(dispatcher.run(async move {
            // A dropped sender counts as a stop request.
            let _ = stopped.await;
        }));

        Ok(ArmedSession { stop, dispatcher })
    }

    /// Wait in `Armed` until `shutdown` resolves, logging liveness periodically.
    ///
    /// Also returns if the dispatcher stops on its own.
    pub async fn run_until<F>(&mut self, shutdown: F, liveness_interval: Duration)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(liveness_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested.");
                    break;
                }
                _ = ticker.tick() => {
                    let dispatcher_gone = self
                        .session
                        .as_ref()
                        .map(|session| session.dispatcher.is_finished())
                        .unwrap_or(true);
                    if dispatcher_gone {
                        error!("Event dispatcher stopped unexpectedly.");
                        break;
                    }
                    debug!("Still alive...");
                }
            }
        }
    }

    /// Stop dispatching, give in-flight presses up to `grace` to finish,
    /// then release every pin.
    ///
    /// Returns the dispatcher's totals when it stopped cleanly.
    pub async fn shutdown(&mut self, grace: Duration) -> Option<DispatchStats> {
        let Some(session) = self.session.take() else {
            self.release();
            return None;
        };

        self.state = LifecycleState::ShuttingDown;
        info!("Shutting down; waiting up to {:?} for in-flight presses.", grace);
        let _ = session.stop.send(());

        let mut dispatcher = session.dispatcher;
        let stats = match tokio::time::timeout(grace, &mut dispatcher).await {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(e)) => {
                error!("Event dispatcher ended abnormally: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    "In-flight presses did not finish within {:?}; abandoning them.",
                    grace
                );
                dispatcher.abort();
                let _ = dispatcher.await;
                None
            }
        };

        self.release();
        stats
    }

    /// Release every pin. Only the first call reaches the controller.
    pub fn release(&mut self) {
        if self.state == LifecycleState::Released {
            return;
        }
        if let Some(session) = self.session.take() {
            let _ = session.stop.send(());
            session.dispatcher.abort();
        }

        info!("Closing GPIO.");
        self.gpio.release_all();
        self.state = LifecycleState::Released;
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Arm, wait for `shutdown`, and tear down: one complete process run.
pub async fn serve<F>(
    controller: impl PinController + 'static,
    config: &Config,
    store: Arc<dyn TimeSeriesStore>,
    shutdown: F,
) -> Result<Option<DispatchStats>>
where
    F: Future<Output = ()>,
{
    let mut lifecycle = Lifecycle::new(controller);
    lifecycle.arm(config, store)?;
    lifecycle
        .run_until(shutdown, config.liveness_interval())
        .await;
    Ok(lifecycle.shutdown(config.shutdown_grace()).await)
}

/// SIGINT and SIGTERM listeners, installed when the value is created.
///
/// Install before claiming any pin: a signal that arrives while the
/// lifecycle is still arming is then held until [`ShutdownSignal::recv`]
/// is polled, instead of killing the process with the pins still claimed.
pub struct ShutdownSignal {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(not(unix))]
    interrupt: tokio::signal::windows::CtrlC,
}

#[cfg(unix)]
impl ShutdownSignal {
    /// Register the handlers. Must be called from within a tokio runtime.
    pub fn install() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Resolves on the first SIGINT or SIGTERM received since installation.
    pub async fn recv(mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => info!("Received interrupt."),
            _ = self.terminate.recv() => info!("Received SIGTERM."),
        }
    }
}

#[cfg(not(unix))]
impl ShutdownSignal {
    /// Register the handler. Must be called from within a tokio runtime.
    pub fn install() -> Result<Self> {
        Ok(Self {
            interrupt: tokio::signal::windows::ctrl_c()?,
        })
    }

    /// Resolves on the first Ctrl-C received since installation.
    pub async fn recv(mut self) {
        self.interrupt.recv().await;
        info!("Received interrupt.");
    }
}

/// Install the signal handlers now and return a future resolving on SIGINT or SIGTERM.
pub fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    Ok(ShutdownSignal::install()?.recv())
}
