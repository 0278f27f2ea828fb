//! Test sequencer
//!
//! Two-step state machine driving the echo test. While `Idle` it waits for
//! the one-byte start payload; while `Running` every accepted frame completes
//! one round: measure, check the length against the index, send a descending
//! payload of `index` bytes, arm the deadline, advance. The session ends at
//! the ceiling or when a deadline fires.
//!
//! Malformed frames, index mismatches and failed sends are soft errors: they
//! are counted and the session carries on.

use chrono::Utc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::{Counters, Outcome, SessionObserver, SessionReport, Step, TestSession};
use crate::config::TestConfig;
use crate::protocol::{self, PROTOCOL_OVERHEAD, START_PAYLOAD};
use crate::transport::Transport;

/// Payload sent in round `index`: `index` bytes valued `index, index-1, .., 1`
/// truncated to 8 bits.
pub fn echo_payload(index: u32) -> Vec<u8> {
    (1..=index).rev().map(|i| i as u8).collect()
}

/// Owns the test session and turns inbound frames into outbound ones
#[derive(Debug)]
pub struct Sequencer {
    session: TestSession,
    session_id: Uuid,
    ceiling: u32,
    margin: Duration,
    deadline: Option<Instant>,
}

impl Sequencer {
    /// Create an idle sequencer
    pub fn new(config: &TestConfig) -> Self {
        Self {
            session: TestSession::default(),
            session_id: Uuid::nil(),
            ceiling: u32::from(config.index_ceiling),
            margin: config.frame_margin(),
            deadline: None,
        }
    }

    /// Current session state
    pub fn session(&self) -> &TestSession {
        &self.session
    }

    /// Current step
    pub fn step(&self) -> Step {
        self.session.step
    }

    /// Deadline of the pending round, if one is armed
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Counter snapshot
    pub fn counters(&self) -> Counters {
        Counters {
            rx: self.session.rx_count,
            tx: self.session.tx_count,
            errors: self.session.error_count,
            index: self.session.index,
            ceiling: self.ceiling,
        }
    }

    /// Handle a raw burst read from the transport.
    ///
    /// Every byte counts toward the transferred size, valid or not.
    pub fn on_received(
        &mut self,
        raw: &[u8],
        link: &mut dyn Transport,
        observer: &mut dyn SessionObserver,
        now: Instant,
    ) {
        self.session.total_bytes += raw.len() as u64;

        match protocol::unwrap(raw) {
            Ok(payload) => self.on_frame(payload, link, observer, now),
            Err(e) => {
                tracing::warn!("Protocol: {}", e);
                tracing::warn!("Not a valid packet");
                self.soft_error(observer);
            }
        }
    }

    /// Handle an unwrapped payload
    pub fn on_frame(
        &mut self,
        payload: &[u8],
        link: &mut dyn Transport,
        observer: &mut dyn SessionObserver,
        now: Instant,
    ) {
        match self.session.step {
            Step::Idle => {
                if payload != START_PAYLOAD {
                    tracing::warn!(len = payload.len(), "Wrong start request received");
                    self.soft_error(observer);
                    return;
                }
                self.start(link, observer, now);
                // The start frame itself is the first round's inbound frame
                self.round_trip(payload, link, observer, now);
            }
            Step::Running => {
                if self.session.index == 0 {
                    tracing::warn!("Wrong state");
                    self.soft_error(observer);
                    return;
                }
                self.round_trip(payload, link, observer, now);
            }
        }
    }

    /// Fire the deadline if it has passed. Returns whether the session timed out.
    pub fn on_deadline(&mut self, observer: &mut dyn SessionObserver, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline && self.session.step == Step::Running => {
                tracing::warn!(index = self.session.index, "Timeout");
                self.finish(Outcome::TimedOut, observer, now);
                true
            }
            _ => false,
        }
    }

    /// Abort any running session without a report
    pub fn stop(&mut self, observer: &mut dyn SessionObserver) {
        self.deadline = None;
        self.session.index = 0;
        if self.session.step == Step::Running {
            self.session.step = Step::Idle;
            tracing::info!("Stopped");
            observer.on_state_changed(Step::Idle);
        }
    }

    fn start(&mut self, link: &dyn Transport, observer: &mut dyn SessionObserver, now: Instant) {
        self.session = TestSession::begin(link.kind(), now);
        self.session_id = Uuid::new_v4();
        self.deadline = None;

        tracing::info!(channel = %link.kind(), session = %self.session_id, "Started");
        observer.on_state_changed(Step::Running);
        observer.on_counters_changed(self.counters());
    }

    fn round_trip(
        &mut self,
        payload: &[u8],
        link: &mut dyn Transport,
        observer: &mut dyn SessionObserver,
        now: Instant,
    ) {
        let index = self.session.index;

        if index > 1 {
            let elapsed = match (link.last_sent_at(), link.last_received_at()) {
                (Some(sent), Some(received)) => received.saturating_duration_since(sent),
                _ => Duration::ZERO,
            };
            self.session.accumulated_link_time += elapsed;
        }

        self.session.rx_count += 1;
        tracing::debug!("RX");

        // The start frame carried one byte for index 1, so every later echo
        // is one byte shorter than its index.
        let mut observed = payload.len() as u32;
        if index > 1 {
            observed += 1;
        }
        if observed != index {
            tracing::warn!(index, observed, "Wrong index");
            self.session.error_count += 1;
        }
        tracing::debug!("Index {} / {}", index, observed);

        let frame = protocol::wrap(&echo_payload(index));
        self.session.total_bytes += frame.len() as u64;

        match link.write(&frame, now) {
            Ok(()) => {
                let timeout =
                    link.per_size_timeout(PROTOCOL_OVERHEAD + index as usize) + self.margin;
                self.deadline = Some(now + timeout);
                self.session.tx_count += 1;
                tracing::debug!(deadline_ms = timeout.as_millis() as u64, "TX");
            }
            Err(e) => {
                tracing::warn!("Send failed: {}", e);
                self.session.error_count += 1;
            }
        }

        self.session.index += 1;
        observer.on_counters_changed(self.counters());

        if self.session.index > self.ceiling {
            let outcome = if self.session.error_count == 0 {
                Outcome::Success
            } else {
                Outcome::CompletedWithErrors
            };
            self.finish(outcome, observer, now);
        }
    }

    fn soft_error(&mut self, observer: &mut dyn SessionObserver) {
        self.session.error_count += 1;
        observer.on_counters_changed(self.counters());
    }

    fn finish(&mut self, outcome: Outcome, observer: &mut dyn SessionObserver, now: Instant) {
        self.deadline = None;
        self.session.finished = Some(now);
        let report = self.report(outcome, now);

        self.session.step = Step::Idle;
        self.session.index = 0;

        match outcome {
            Outcome::Success => tracing::info!("Finished successfully"),
            Outcome::CompletedWithErrors => {
                tracing::warn!(errors = report.error_count, "Finished with errors")
            }
            Outcome::TimedOut => tracing::warn!("Test timed out"),
        }
        tracing::info!("Duration : {} ms", report.duration_ms);
        tracing::info!("Communication time : {} ms", report.link_time_ms);
        tracing::info!("Transferred data size {} bytes", report.total_bytes);
        if let Some(rate) = report.data_rate_kbps {
            tracing::info!("Data rate {} KBps", rate);
        }

        observer.on_state_changed(Step::Idle);
        observer.on_session_finished(&report);
    }

    fn report(&self, outcome: Outcome, now: Instant) -> SessionReport {
        let duration = self
            .session
            .started
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default();
        let started_at = self.session.started_at.unwrap_or_else(Utc::now);
        let finished_at = started_at
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());

        let link_time_ms = self.session.accumulated_link_time.as_millis() as u64;
        let data_rate_kbps = if link_time_ms > 0 {
            Some(self.session.total_bytes / link_time_ms)
        } else {
            None
        };

        SessionReport {
            id: self.session_id,
            outcome,
            channel: self.session.channel,
            started_at,
            finished_at,
            duration_ms: duration.as_millis() as u64,
            link_time_ms,
            total_bytes: self.session.total_bytes,
            data_rate_kbps,
            rx_count: self.session.rx_count,
            tx_count: self.session.tx_count,
            error_count: self.session.error_count,
            last_index: self.session.index,
        }
    }
}
