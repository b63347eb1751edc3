use async_trait::async_trait;
use chrono::Utc;
use pi_mood::{
    gpio::mock::{MockGpio, MockProbe},
    Config, Level, Lifecycle, LifecycleState, MeasurementPoint, PiMoodError, Result,
    TimeSeriesStore,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

const LED_PIN: u8 = 6;

/// Store that records every write together with how many times the LED
/// had been driven high when the write started.
struct RecordingStore {
    probe: MockProbe,
    writes: Mutex<Vec<(MeasurementPoint, usize)>>,
    delay: Option<Duration>,
    fail: bool,
}

impl RecordingStore {
    fn new(probe: MockProbe) -> Self {
        Self {
            probe,
            writes: Mutex::new(Vec::new()),
            delay: None,
            fail: false,
        }
    }

    fn failing(probe: MockProbe) -> Self {
        Self {
            fail: true,
            ..Self::new(probe)
        }
    }

    fn slow(probe: MockProbe, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(probe)
        }
    }

    fn writes(&self) -> Vec<(MeasurementPoint, usize)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl TimeSeriesStore for RecordingStore {
    async fn ensure_database(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn write_point(&self, point: &MeasurementPoint) -> Result<()> {
        let highs = self.probe.high_count(LED_PIN);
        self.writes.lock().unwrap().push((point.clone(), highs));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(PiMoodError::upload_error("database unavailable"));
        }
        Ok(())
    }
}

fn config(extra_influx: &str) -> Config {
    Config::from_yaml_str(&format!(
        r#"
buttons:
  - {{pin: 5, label: happy, value: 1}}
  - {{pin: 13, label: sad, value: -1}}
led: {{pin: 6, flash_time_ms: 200}}
bouncetime: 200
influxdb: {{database_name: moods{}}}
"#,
        extra_influx
    ))
    .expect("Should parse test configuration")
}

/// (high instant, low instant) for every LED pulse, asserting strict alternation.
fn pulses(probe: &MockProbe) -> Vec<(Instant, Instant)> {
    let history = probe.output_history(LED_PIN);
    assert_eq!(history[0].level, Level::Low, "LED must start low");

    let transitions = &history[1..];
    assert_eq!(transitions.len() % 2, 0, "every pulse must end low");
    transitions
        .chunks(2)
        .map(|pair| {
            assert_eq!(pair[0].level, Level::High);
            assert_eq!(pair[1].level, Level::Low);
            (pair[0].at, pair[1].at)
        })
        .collect()
}

/// Log output captured by a subscriber scoped to the test's thread.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    fn lines_containing(&self, needle: &str) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_string)
            .collect()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Single button scenario: accepted at 0ms, bounced at 50ms, accepted at 250ms.
#[tokio::test(start_paused = true)]
async fn test_press_bounce_press_scenario() {
    let mock = MockGpio::new().unwrap();
    let probe = mock.probe();
    let store = Arc::new(RecordingStore::new(probe.clone()));
    let mut lifecycle = Lifecycle::new(mock);
    assert_ok!(lifecycle.arm(&config(""), store.clone()));

    let before = Utc::now();
    let t0 = Instant::now();
    assert!(probe.trigger_edge_at(5, t0));
    assert!(probe.trigger_edge_at(5, t0 + ms(50)));
    assert!(probe.trigger_edge_at(5, t0 + ms(250)));

    let stats = lifecycle
        .shutdown(Duration::from_secs(5))
        .await
        .expect("Dispatcher should stop cleanly");
    let after = Utc::now();

    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.debounced, 1);

    let writes = store.writes();
    assert_eq!(writes.len(), 2);
    let (point, _) = &writes[0];
    assert_eq!(point.measurement, "pi_mood");
    assert_eq!(point.fields.len(), 1);
    assert_eq!(point.fields["happy"], 1);
    assert!(point.time >= before && point.time <= after);

    let pulses = pulses(&probe);
    assert_eq!(pulses.len(), 2);
    for (high, low) in pulses {
        assert!(low - high >= ms(200));
    }
}

/// The measurement is submitted before the LED goes high for the same press.
#[tokio::test(start_paused = true)]
async fn test_upload_precedes_flash() {
    let mock = MockGpio::new().unwrap();
    let probe = mock.probe();
    let store = Arc::new(RecordingStore::new(probe.clone()));
    let mut lifecycle = Lifecycle::new(mock);
    assert_ok!(lifecycle.arm(&config(""), store.clone()));

    let t0 = Instant::now();
    probe.trigger_edge_at(5, t0);
    probe.trigger_edge_at(5, t0 + ms(400));
    lifecycle.shutdown(Duration::from_secs(5)).await;

    let highs_seen: Vec<usize> = store.writes().iter().map(|(_, highs)| *highs).collect();
    assert_eq!(highs_seen, vec![0, 1]);
    assert_eq!(probe.high_count(LED_PIN), 2);
}

/// Near-simultaneous presses on different buttons never interleave LED pulses.
#[tokio::test(start_paused = true)]
async fn test_concurrent_presses_serialize_indicator() {
    let mock = MockGpio::new().unwrap();
    let probe = mock.probe();
    let store = Arc::new(RecordingStore::new(probe.clone()));
    let mut lifecycle = Lifecycle::new(mock);
    assert_ok!(lifecycle.arm(&config(""), store.clone()));

    let t0 = Instant::now();
    probe.trigger_edge_at(5, t0);
    probe.trigger_edge_at(13, t0);
    lifecycle.shutdown(Duration::from_secs(5)).await;

    let mut labels: Vec<String> = store
        .writes()
        .iter()
        .flat_map(|(point, _)| point.fields.keys().cloned())
        .collect();
    labels.sort();
    assert_eq!(labels, vec!["happy".to_string(), "sad".to_string()]);

    let pulses = pulses(&probe);
    assert_eq!(pulses.len(), 2);
    for (high, low) in &pulses {
        assert!(*low - *high >= ms(200));
    }
    assert!(pulses[1].0 >= pulses[0].1, "second pulse started before first ended");
}

/// A failed upload is logged and the LED still flashes.
#[tokio::test(start_paused = true)]
async fn test_upload_failure_still_flashes() {
    let mock = MockGpio::new().unwrap();
    let probe = mock.probe();
    let store = Arc::new(RecordingStore::failing(probe.clone()));
    let mut lifecycle = Lifecycle::new(mock);
    assert_ok!(lifecycle.arm(&config(""), store.clone()));

    probe.trigger_edge(5);
    let stats = lifecycle.shutdown(Duration::from_secs(5)).await.unwrap();

    assert_eq!(stats.accepted, 1);
    assert_eq!(store.writes().len(), 1);
    assert_eq!(pulses(&probe).len(), 1);
}

/// A bounded upload gives up and lets the flash proceed.
#[tokio::test(start_paused = true)]
async fn test_upload_timeout_bounds_slow_store() {
    let mock = MockGpio::new().unwrap();
    let probe = mock.probe();
    let store = Arc::new(RecordingStore::slow(probe.clone(), Duration::from_secs(60)));
    let mut lifecycle = Lifecycle::new(mock);
    assert_ok!(lifecycle.arm(&config(", upload_timeout_ms: 100"), store.clone()));

    let t0 = Instant::now();
    probe.trigger_edge_at(5, t0);
    lifecycle.shutdown(Duration::from_secs(5)).await.unwrap();

    let pulses = pulses(&probe);
    assert_eq!(pulses.len(), 1);
    let (high, _) = pulses[0];
    assert!(high - t0 >= ms(100));
    assert!(high - t0 < Duration::from_secs(60));
}

/// Shutdown with a stuck handler is bounded by the grace period and still releases.
#[tokio::test(start_paused = true)]
async fn test_shutdown_grace_abandons_stuck_handler() {
    let mock = MockGpio::new().unwrap();
    let probe = mock.probe();
    let store = Arc::new(RecordingStore::slow(probe.clone(), Duration::from_secs(3600)));
    let mut lifecycle = Lifecycle::new(mock);
    assert_ok!(lifecycle.arm(&config(""), store.clone()));

    probe.trigger_edge(5);
    let stats = lifecycle.shutdown(ms(50)).await;

    assert!(stats.is_none());
    assert_eq!(lifecycle.state(), LifecycleState::Released);
    assert_eq!(probe.release_count(), 1);
    assert_eq!(probe.high_count(LED_PIN), 0);
}

/// An edge reported for an unregistered pin is logged once as an error and
/// produces no handler call.
#[tokio::test(start_paused = true)]
async fn test_unmapped_edge_is_dropped() {
    let logs = CapturedLogs::default();
    let _guard = logs.install();

    let mock = MockGpio::new().unwrap();
    let probe = mock.probe();
    let store = Arc::new(RecordingStore::new(probe.clone()));
    let mut lifecycle = Lifecycle::new(mock);
    assert_ok!(lifecycle.arm(&config(""), store.clone()));

    assert!(probe.deliver_from(5, 21, Instant::now()));
    let stats = lifecycle.shutdown(Duration::from_secs(5)).await.unwrap();

    assert_eq!(stats.unmapped, 1);
    assert_eq!(stats.accepted, 0);
    assert!(store.writes().is_empty());
    assert_eq!(probe.high_count(LED_PIN), 0);

    let logged = logs.lines_containing("unmapped pin 21");
    assert_eq!(logged.len(), 1);
    assert!(logged[0].contains("ERROR"));
}

/// A listener reporting another registered pin is logged and the reported
/// pin's button is used.
#[tokio::test(start_paused = true)]
async fn test_mismatched_edge_uses_reported_button() {
    let mock = MockGpio::new().unwrap();
    let probe = mock.probe();
    let store = Arc::new(RecordingStore::new(probe.clone()));
    let mut lifecycle = Lifecycle::new(mock);
    assert_ok!(lifecycle.arm(&config(""), store.clone()));

    probe.deliver_from(5, 13, Instant::now());
    let stats = lifecycle.shutdown(Duration::from_secs(5)).await.unwrap();

    assert_eq!(stats.mismatched, 1);
    let writes = store.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0.fields["sad"], -1);
}

/// Pins are released exactly once across shutdown, explicit release and drop.
#[tokio::test]
async fn test_release_exactly_once() {
    let mock = MockGpio::new().unwrap();
    let probe = mock.probe();
    let store = Arc::new(RecordingStore::new(probe.clone()));
    let mut lifecycle = Lifecycle::new(mock);
    assert_ok!(lifecycle.arm(&config(""), store));

    lifecycle.shutdown(Duration::from_secs(1)).await;
    lifecycle.release();
    drop(lifecycle);

    assert_eq!(probe.release_count(), 1);
    assert!(!probe.is_claimed(LED_PIN));
    assert!(!probe.has_listener(5));
}

/// A hardware fault on the indicator pin aborts startup and releases.
#[tokio::test]
async fn test_indicator_fault_aborts_startup() {
    let mock = MockGpio::with_unavailable_pins([LED_PIN]);
    let probe = mock.probe();
    let store = Arc::new(RecordingStore::new(probe.clone()));
    let mut lifecycle = Lifecycle::new(mock);

    let err = assert_err!(lifecycle.arm(&config(""), store));
    assert!(err.is_fatal());
    assert_eq!(lifecycle.state(), LifecycleState::Released);
    assert_eq!(probe.release_count(), 1);
}

/// Duplicate pins never make it past configuration.
#[test]
fn test_duplicate_pins_rejected_before_startup() {
    let raw = r#"
buttons:
  - {pin: 5, label: happy, value: 1}
  - {pin: 5, label: sad, value: -1}
led: {pin: 6}
influxdb: {database_name: moods}
"#;
    let err = assert_err!(Config::from_yaml_str(raw));
    assert!(matches!(err, PiMoodError::Configuration(_)));
}
