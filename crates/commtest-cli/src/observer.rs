//! Console rendering of session progress

use std::sync::Arc;
use tokio::sync::Notify;

use commtest_core::session::{Counters, Outcome, SessionObserver, SessionReport, Step};

/// Prints session results to stdout and signals when a session ends
pub struct ConsoleObserver {
    json: bool,
    finished: Arc<Notify>,
    last_outcome: Option<Outcome>,
    last_counters: Option<Counters>,
}

impl ConsoleObserver {
    pub fn new(json: bool, finished: Arc<Notify>) -> Self {
        Self {
            json,
            finished,
            last_outcome: None,
            last_counters: None,
        }
    }

    /// Outcome of the most recent session
    pub fn last_outcome(&self) -> Option<Outcome> {
        self.last_outcome
    }

    fn render(&self, report: &SessionReport) -> String {
        if self.json {
            serde_json::to_string_pretty(report).unwrap_or_else(|e| {
                tracing::error!("Failed to serialize report: {}", e);
                report.to_string()
            })
        } else {
            report.to_string()
        }
    }
}

impl SessionObserver for ConsoleObserver {
    fn on_state_changed(&mut self, step: Step) {
        if !self.json && step == Step::Running {
            println!("Test started");
        }
    }

    fn on_counters_changed(&mut self, counters: Counters) {
        // Progress every 10%
        let previous = self.last_counters.map_or(0, |c| progress_decile(&c));
        if progress_decile(&counters) > previous {
            tracing::info!(
                rx = counters.rx,
                tx = counters.tx,
                errors = counters.errors,
                "Progress {}/{}",
                counters.index.saturating_sub(1),
                counters.ceiling
            );
        }
        self.last_counters = Some(counters);
    }

    fn on_session_finished(&mut self, report: &SessionReport) {
        println!("{}", self.render(report));
        self.last_outcome = Some(report.outcome);
        self.last_counters = None;
        self.finished.notify_one();
    }
}

fn progress_decile(counters: &Counters) -> u32 {
    if counters.ceiling == 0 {
        return 0;
    }
    counters.index.saturating_sub(1).min(counters.ceiling) * 10 / counters.ceiling
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn counters(index: u32) -> Counters {
        Counters {
            rx: index.saturating_sub(1),
            tx: index.saturating_sub(1),
            errors: 0,
            index,
            ceiling: 400,
        }
    }

    #[test]
    fn test_progress_decile() {
        assert_eq!(progress_decile(&counters(1)), 0);
        assert_eq!(progress_decile(&counters(41)), 1);
        assert_eq!(progress_decile(&counters(401)), 10);
        assert_eq!(
            progress_decile(&Counters {
                ceiling: 0,
                ..counters(5)
            }),
            0
        );
    }

    #[test]
    fn test_finish_signals_waiter() {
        let finished = Arc::new(Notify::new());
        let mut observer = ConsoleObserver::new(true, finished.clone());
        observer.on_counters_changed(counters(100));

        let report = SessionReport {
            id: Default::default(),
            outcome: Outcome::TimedOut,
            channel: None,
            started_at: Default::default(),
            finished_at: Default::default(),
            duration_ms: 505,
            link_time_ms: 0,
            total_bytes: 8,
            data_rate_kbps: None,
            rx_count: 1,
            tx_count: 1,
            error_count: 0,
            last_index: 2,
        };
        observer.on_session_finished(&report);

        assert_eq!(observer.last_outcome(), Some(Outcome::TimedOut));
        assert!(observer.render(&report).contains("\"outcome\": \"timed_out\""));
    }
}
