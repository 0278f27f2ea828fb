//! Engine context
//!
//! Owns the single active transport, the sequencer and the observer. The two
//! event sources, transport readiness and the sequencer deadline, are handled
//! one at a time either by the caller (`tick`/`on_deadline` with explicit
//! instants) or by the async [`Engine::run`] loop.

use std::future::Future;
use std::time::Instant;
use tokio::time::MissedTickBehavior;

use crate::config::TestConfig;
use crate::session::{Counters, SessionObserver, Sequencer, Step};
use crate::transport::{Transport, TransportError};

/// Single-session test engine
pub struct Engine<O: SessionObserver> {
    config: TestConfig,
    transport: Option<Box<dyn Transport>>,
    sequencer: Sequencer,
    observer: O,
    last_error: Option<String>,
}

impl<O: SessionObserver> Engine<O> {
    /// Create an engine with no active transport
    pub fn new(config: TestConfig, observer: O) -> Self {
        let sequencer = Sequencer::new(&config);
        Self {
            config,
            transport: None,
            sequencer,
            observer,
            last_error: None,
        }
    }

    /// Make `transport` the active channel.
    ///
    /// Any previously active transport is closed and dropped, and a running
    /// session is abandoned.
    pub fn activate(&mut self, transport: Box<dyn Transport>) {
        self.deactivate();
        tracing::info!(
            channel = %transport.kind(),
            "Activated {}",
            transport.name()
        );
        self.transport = Some(transport);
    }

    /// Close the active transport, if any, and return the sequencer to idle
    pub fn deactivate(&mut self) {
        self.sequencer.stop(&mut self.observer);
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.last_error = None;
    }

    /// Stop a running session without closing the transport
    pub fn stop(&mut self) {
        self.sequencer.stop(&mut self.observer);
    }

    /// Poll the transport once and feed a ready burst to the sequencer
    pub fn poll(&mut self, now: Instant) -> Result<(), TransportError> {
        let Some(link) = self.transport.as_mut() else {
            return Ok(());
        };

        if link.poll(now)? {
            let raw = link.read();
            self.sequencer
                .on_received(&raw, link.as_mut(), &mut self.observer, now);
        }
        Ok(())
    }

    /// Fire the session deadline if it has passed
    pub fn on_deadline(&mut self, now: Instant) -> bool {
        self.sequencer.on_deadline(&mut self.observer, now)
    }

    /// One synchronous step: poll, then check the deadline.
    ///
    /// Transport errors are logged, once per distinct error.
    pub fn tick(&mut self, now: Instant) {
        match self.poll(now) {
            Ok(()) => self.last_error = None,
            Err(e) => {
                let message = e.to_string();
                if self.last_error.as_deref() != Some(message.as_str()) {
                    tracing::warn!("Transport error: {}", message);
                    self.last_error = Some(message);
                }
            }
        }
        self.on_deadline(now);
    }

    /// Drive the engine until `shutdown` resolves
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.sequencer.deadline();
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick(clock_now());
                }
                _ = wait_for(deadline) => {
                    self.on_deadline(clock_now());
                }
            }
        }

        self.deactivate();
    }

    /// Active transport
    pub fn transport(&self) -> Option<&dyn Transport> {
        self.transport.as_deref()
    }

    /// Sequencer
    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    /// Current step
    pub fn step(&self) -> Step {
        self.sequencer.step()
    }

    /// Counter snapshot
    pub fn counters(&self) -> Counters {
        self.sequencer.counters()
    }

    /// Observer
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// Observer, mutably
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }
}

/// Current time from the tokio clock, so paused-time tests stay consistent
fn clock_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}
