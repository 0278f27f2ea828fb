use commtest_core::config::TestConfig;
use commtest_core::demo::{DemoConfig, DemoDevice, DemoFault};
use commtest_core::engine::Engine;
use commtest_core::session::{Counters, Outcome, SessionObserver, SessionReport, Step};
use commtest_core::transport::{ChannelKind, TimeoutModel};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

#[derive(Default)]
struct Recorder {
    steps: Vec<Step>,
    last_counters: Option<Counters>,
    reports: Vec<SessionReport>,
    finished: Option<Arc<Notify>>,
}

impl SessionObserver for Recorder {
    fn on_state_changed(&mut self, step: Step) {
        self.steps.push(step);
    }

    fn on_counters_changed(&mut self, counters: Counters) {
        self.last_counters = Some(counters);
    }

    fn on_session_finished(&mut self, report: &SessionReport) {
        self.reports.push(report.clone());
        if let Some(finished) = &self.finished {
            finished.notify_one();
        }
    }
}

/// Tick a demo-backed engine on a simulated clock until a report appears
fn run_demo(demo: DemoConfig) -> SessionReport {
    let mut engine = Engine::new(TestConfig::default(), Recorder::default());
    engine.activate(Box::new(DemoDevice::new(demo)));

    let start = Instant::now();
    let mut now = start;
    while engine.observer().reports.is_empty() {
        now += Duration::from_millis(1);
        assert!(now - start < Duration::from_secs(600), "session never finished");
        engine.tick(now);
    }
    engine.observer().reports[0].clone()
}

#[test]
fn test_demo_session_succeeds() {
    let report = run_demo(DemoConfig::default());

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.channel, Some(ChannelKind::Network));
    assert_eq!(report.rx_count, 400);
    assert_eq!(report.tx_count, 400);
    assert_eq!(report.error_count, 0);
    assert_eq!(report.last_index, 401);
    assert!(report.link_time_ms > 0);
    assert!(report.data_rate_kbps.is_some());
}

#[test]
fn test_demo_serial_timing_with_jitter() {
    let report = run_demo(DemoConfig {
        jitter: Duration::from_millis(3),
        seed: 7,
        timeout: TimeoutModel::serial(115200, 12),
        ..DemoConfig::default()
    });

    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.channel, Some(ChannelKind::Serial));
    assert_eq!(report.rx_count, 400);
}

#[test]
fn test_dropped_echo_times_out() {
    let report = run_demo(DemoConfig::default().with_fault(50, DemoFault::Drop));

    assert_eq!(report.outcome, Outcome::TimedOut);
    assert_eq!(report.rx_count, 50);
    assert_eq!(report.tx_count, 50);
    assert_eq!(report.error_count, 0);
    assert_eq!(report.last_index, 51);
}

#[test]
fn test_corrupted_echo_times_out_with_error() {
    let report = run_demo(DemoConfig::default().with_fault(30, DemoFault::CorruptChecksum));

    assert_eq!(report.outcome, Outcome::TimedOut);
    assert_eq!(report.error_count, 1);
    assert_eq!(report.rx_count, 30);
}

#[test]
fn test_truncated_echo_completes_with_errors() {
    let report = run_demo(DemoConfig::default().with_fault(100, DemoFault::Truncate));

    assert_eq!(report.outcome, Outcome::CompletedWithErrors);
    assert_eq!(report.error_count, 1);
    assert_eq!(report.rx_count, 400);
    assert_eq!(report.tx_count, 400);
}

#[test]
fn test_deactivate_abandons_session() {
    let mut engine = Engine::new(TestConfig::default(), Recorder::default());
    engine.activate(Box::new(DemoDevice::new(DemoConfig::default())));

    let mut now = Instant::now();
    for _ in 0..50 {
        now += Duration::from_millis(1);
        engine.tick(now);
    }
    assert_eq!(engine.step(), Step::Running);
    let progressed = engine.counters();
    assert!(progressed.index > 1);
    assert_eq!(engine.observer().last_counters, Some(progressed));

    engine.deactivate();

    assert!(engine.transport().is_none());
    assert_eq!(engine.step(), Step::Idle);
    assert!(engine.observer().reports.is_empty());
    assert_eq!(engine.observer().steps, vec![Step::Running, Step::Idle]);
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_completes_session() {
    let finished = Arc::new(Notify::new());
    let observer = Recorder {
        finished: Some(finished.clone()),
        ..Recorder::default()
    };

    let mut engine = Engine::new(TestConfig::default(), observer);
    engine.activate(Box::new(DemoDevice::new(DemoConfig::default())));

    let result = tokio::time::timeout(
        Duration::from_secs(120),
        engine.run(async move { finished.notified().await }),
    )
    .await;

    assert!(result.is_ok(), "run loop did not stop");
    let report = &engine.observer().reports[0];
    assert_eq!(report.outcome, Outcome::Success);
    assert_eq!(report.rx_count, 400);
    assert!(engine.transport().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_fires_deadline() {
    let finished = Arc::new(Notify::new());
    let observer = Recorder {
        finished: Some(finished.clone()),
        ..Recorder::default()
    };

    let config = TestConfig {
        poll_interval_ms: 5,
        ..TestConfig::default()
    };
    let mut engine = Engine::new(config, observer);
    engine.activate(Box::new(DemoDevice::new(
        DemoConfig::default().with_fault(3, DemoFault::Drop),
    )));

    engine
        .run(async move { finished.notified().await })
        .await;

    let report = &engine.observer().reports[0];
    assert_eq!(report.outcome, Outcome::TimedOut);
    assert_eq!(report.last_index, 4);
}
