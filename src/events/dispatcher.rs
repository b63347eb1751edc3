//! Edge-to-handler dispatch.
//!
//! A single consumption loop owns the pin table and every pin's debounce
//! state, so the accept/reject check-and-update for a pin is never raced.
//! Accepted presses are queued to a worker task per pin: presses of one
//! button run their handler one after another, presses of different buttons
//! run concurrently.

use crate::config::ButtonSpec;
use crate::error::{PiMoodError, Result};
use crate::events::debounce::{DebounceGate, DebounceState, Decision};
use crate::gpio::{edge_channel, Edge, EdgeEvent, EdgeReceiver, EdgeSender, EdgeSink, GpioHandle};
use async_trait::async_trait;
use futures_util::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Work performed for each accepted button press.
#[async_trait]
pub trait ButtonHandler: Send + Sync {
    async fn handle(&self, button: &ButtonSpec);
}

/// What happened to a single raw edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Forwarded to the button's handler
    Accepted,
    /// Dropped inside the bouncetime window
    Debounced,
    /// No button registered on the reported pin
    Unmapped,
}

/// Running totals kept by the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub accepted: u64,
    pub debounced: u64,
    pub unmapped: u64,
    pub mismatched: u64,
}

struct Registration {
    button: Arc<ButtonSpec>,
    debounce: DebounceState,
    handler: Arc<dyn ButtonHandler>,
    worker: Option<mpsc::UnboundedSender<Arc<ButtonSpec>>>,
}

/// Owns the pin-to-button table and turns raw edges into handler calls.
pub struct EventDispatcher {
    gate: DebounceGate,
    mapping: HashMap<u8, Registration>,
    sender: EdgeSender,
    receiver: EdgeReceiver,
    workers: JoinSet<()>,
    stats: DispatchStats,
}

impl EventDispatcher {
    pub fn new(bouncetime: Duration) -> Self {
        let (sender, receiver) = edge_channel();
        Self {
            gate: DebounceGate::new(bouncetime),
            mapping: HashMap::new(),
            sender,
            receiver,
            workers: JoinSet::new(),
            stats: DispatchStats::default(),
        }
    }

    /// Arm a rising-edge listener for `button` and route its presses to `handler`.
    ///
    /// Registering a pin twice is a configuration error and leaves the
    /// existing registration untouched.
    pub fn register(
        &mut self,
        gpio: &GpioHandle,
        button: ButtonSpec,
        handler: Arc<dyn ButtonHandler>,
    ) -> Result<()> {
        if self.mapping.contains_key(&button.pin) {
            return Err(PiMoodError::config_error(format!(
                "Pin {} is already registered to button {:?}",
                button.pin, self.mapping[&button.pin].button.label
            )));
        }

        gpio.register_edge_listener(
            button.pin,
            Edge::Rising,
            self.gate.bouncetime(),
            EdgeSink::new(button.pin, self.sender.clone()),
        )?;

        debug!("Registered button {:?} on pin {}", button.label, button.pin);
        self.mapping.insert(
            button.pin,
            Registration {
                button: Arc::new(button),
                debounce: DebounceState::default(),
                handler,
                worker: None,
            },
        );
        Ok(())
    }

    /// Registered pins in ascending order.
    pub fn registered_pins(&self) -> Vec<u8> {
        let mut pins: Vec<u8> = self.mapping.keys().copied().collect();
        pins.sort_unstable();
        pins
    }

    /// A sender feeding this dispatcher's event queue.
    pub fn sender(&self) -> EdgeSender {
        self.sender.clone()
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Route one raw edge. Must be called from within a tokio runtime.
    pub fn dispatch(&mut self, event: EdgeEvent) -> DispatchOutcome {
        let Some(registration) = self.mapping.get_mut(&event.pin) else {
            self.stats.unmapped += 1;
            error!("{}", PiMoodError::UnmappedPinEvent { pin: event.pin });
            return DispatchOutcome::Unmapped;
        };

        if event.registered_pin != event.pin {
            self.stats.mismatched += 1;
            error!(
                "{}",
                PiMoodError::MismatchedPinEvent {
                    registered: event.registered_pin,
                    delivered: event.pin,
                }
            );
        }

        if self.gate.check(&mut registration.debounce, event.at) == Decision::Reject {
            self.stats.debounced += 1;
            debug!("Ignoring bounce on pin {}", event.pin);
            return DispatchOutcome::Debounced;
        }

        self.stats.accepted += 1;
        info!(
            "Button {:?} was pressed on pin {}",
            registration.button.label, event.pin
        );

        if registration.worker.is_none() {
            registration.worker = Some(spawn_worker(
                &mut self.workers,
                event.pin,
                Arc::clone(&registration.handler),
            ));
        }
        if let Some(worker) = &registration.worker {
            if worker.send(Arc::clone(&registration.button)).is_err() {
                error!("Worker for pin {} is gone; press dropped", event.pin);
            }
        }

        DispatchOutcome::Accepted
    }

    /// Consume edges until `shutdown` resolves, then wait for in-flight handlers.
    ///
    /// Edges already queued when shutdown is requested are still dispatched.
    pub async fn run<F>(mut self, shutdown: F) -> DispatchStats
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                event = self.receiver.recv() => match event {
                    Some(event) => {
                        self.dispatch(event);
                    }
                    None => break,
                },
                _ = &mut shutdown => break,
            }
        }

        self.drain().await;
        self.stats
    }

    /// Close every worker queue and wait for the workers to finish.
    pub async fn drain(&mut self) {
        for registration in self.mapping.values_mut() {
            registration.worker = None;
        }
        while let Some(joined) = self.workers.join_next().await {
            if let Err(e) = joined {
                error!("Button worker ended abnormally: {}", e);
            }
        }
    }
}

fn spawn_worker(
    workers: &mut JoinSet<()>,
    pin: u8,
    handler: Arc<dyn ButtonHandler>,
) -> mpsc::UnboundedSender<Arc<ButtonSpec>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Arc<ButtonSpec>>();
    workers.spawn(async move {
        while let Some(button) = rx.recv().await {
            // A panicking handler must not take the pin's worker down with it.
            let handled = AssertUnwindSafe(handler.handle(&button))
                .catch_unwind()
                .await;
            if handled.is_err() {
                error!(
                    "Handler for button {:?} on pin {} panicked",
                    button.label, pin
                );
            }
        }
    });
    tx
}
