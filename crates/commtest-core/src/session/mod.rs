//! Test Sessions
//!
//! State of one echo test run, the report produced when it ends, and the
//! observer interface through which the outside world follows progress.

mod sequencer;

pub use sequencer::{echo_payload, Sequencer};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::transport::ChannelKind;

/// Sequencer step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Step {
    /// Waiting for a start frame from the device
    #[default]
    Idle,
    /// Ramping round trips
    Running,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Reached the ceiling without a single error
    Success,
    /// Reached the ceiling, but errors were counted on the way
    CompletedWithErrors,
    /// An echo did not arrive before its deadline
    TimedOut,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "Test finished successfully"),
            Outcome::CompletedWithErrors => write!(f, "Test finished with errors"),
            Outcome::TimedOut => write!(f, "Test timed out"),
        }
    }
}

/// Mutable state of one test run
#[derive(Debug, Clone, Default)]
pub struct TestSession {
    /// Current step
    pub step: Step,
    /// Round index, meaningful only while running
    pub index: u32,
    /// Channel the session runs on
    pub channel: Option<ChannelKind>,
    /// When the start frame was accepted
    pub started: Option<Instant>,
    /// When the session ended
    pub finished: Option<Instant>,
    /// Wall clock at start, for reporting
    pub started_at: Option<DateTime<Utc>>,
    /// Sum of measured send-to-receive times
    pub accumulated_link_time: Duration,
    /// Wire bytes seen in both directions
    pub total_bytes: u64,
    /// Frames accepted into a round
    pub rx_count: u32,
    /// Frames sent
    pub tx_count: u32,
    /// Soft errors
    pub error_count: u32,
}

impl TestSession {
    /// Fresh, zeroed session entering its first round
    pub fn begin(channel: ChannelKind, now: Instant) -> Self {
        Self {
            step: Step::Running,
            index: 1,
            channel: Some(channel),
            started: Some(now),
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }
}

/// Counter snapshot pushed to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Counters {
    /// Frames accepted
    pub rx: u32,
    /// Frames sent
    pub tx: u32,
    /// Soft errors
    pub errors: u32,
    /// Current round index
    pub index: u32,
    /// Index at which the session completes
    pub ceiling: u32,
}

/// Result summary of a finished session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    /// Unique session id
    pub id: Uuid,
    /// How the session ended
    pub outcome: Outcome,
    /// Channel used
    pub channel: Option<ChannelKind>,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Wall-clock end
    pub finished_at: DateTime<Utc>,
    /// Start to finish, in milliseconds
    pub duration_ms: u64,
    /// Accumulated link time, in milliseconds
    pub link_time_ms: u64,
    /// Wire bytes in both directions
    pub total_bytes: u64,
    /// Bytes per millisecond of link time (roughly KB/s)
    pub data_rate_kbps: Option<u64>,
    /// Frames accepted
    pub rx_count: u32,
    /// Frames sent
    pub tx_count: u32,
    /// Soft errors
    pub error_count: u32,
    /// Index reached
    pub last_index: u32,
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.outcome)?;
        writeln!(f, "Duration : {} ms", self.duration_ms)?;
        writeln!(f, "Communication time : {} ms", self.link_time_ms)?;
        write!(f, "Transferred data size {} bytes", self.total_bytes)?;
        if let Some(rate) = self.data_rate_kbps {
            write!(f, "\nData rate {} KBps", rate)?;
        }
        write!(
            f,
            "\nRX {} / TX {} / Errors {}",
            self.rx_count, self.tx_count, self.error_count
        )
    }
}

/// Receives session progress. All methods are fire-and-forget.
pub trait SessionObserver {
    /// The sequencer moved to `step`
    fn on_state_changed(&mut self, _step: Step) {}

    /// A counter changed
    fn on_counters_changed(&mut self, _counters: Counters) {}

    /// A session ended
    fn on_session_finished(&mut self, _report: &SessionReport) {}
}

/// Observer that ignores everything
impl SessionObserver for () {}

impl<O: SessionObserver + ?Sized> SessionObserver for Box<O> {
    fn on_state_changed(&mut self, step: Step) {
        (**self).on_state_changed(step)
    }

    fn on_counters_changed(&mut self, counters: Counters) {
        (**self).on_counters_changed(counters)
    }

    fn on_session_finished(&mut self, report: &SessionReport) {
        (**self).on_session_finished(report)
    }
}
