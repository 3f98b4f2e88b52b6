//! Ingested-record counter and periodic throughput log

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Monotonic count of records consumed from sources
///
/// Cheap to clone; all clones share one counter. Reads may observe a value
/// slightly behind concurrent increments.
#[derive(Debug, Clone, Default)]
pub struct IngestCounter(Arc<AtomicU64>);

impl IngestCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Records per second between two samples taken `interval` apart
pub fn rate_per_sec(previous: u64, current: u64, interval: Duration) -> f64 {
    let secs = interval.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    current.saturating_sub(previous) as f64 / secs
}

/// Rate as logged, in thousands of records per second
pub fn format_rate(rate: f64) -> String {
    format!("{:.1}k records / second", rate / 1000.0)
}

/// Background task logging ingest rate every interval
pub struct ThroughputReporter;

impl ThroughputReporter {
    /// Spawn the reporter; it exits when `cancel` fires
    ///
    /// The first report covers records counted from the moment of the call.
    pub fn spawn(counter: IngestCounter, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let first_tick = tokio::time::Instant::now() + interval;
        let mut previous = counter.get();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(total = counter.get(), "Throughput reporter stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let current = counter.get();
                        let rate = rate_per_sec(previous, current, interval);
                        info!(total = current, "{}", format_rate(rate));
                        previous = current;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tracing_subscriber::fmt::MakeWriter;

    /// Collects formatted log output for assertions
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(2_500.0), "2.5k records / second");
        assert_eq!(format_rate(0.0), "0.0k records / second");
        assert_eq!(format_rate(123_456.0), "123.5k records / second");
    }

    #[test]
    fn test_counter_is_shared_between_clones() {
        let counter = IngestCounter::new();
        let clone = counter.clone();
        counter.increment();
        clone.add(9);
        assert_eq!(counter.get(), 10);
    }

    #[test]
    fn test_rate_per_sec() {
        assert_eq!(rate_per_sec(0, 50_000, Duration::from_secs(10)), 5_000.0);
        assert_eq!(rate_per_sec(100, 100, Duration::from_secs(10)), 0.0);
        assert_eq!(rate_per_sec(10, 5, Duration::from_secs(1)), 0.0);
        assert_eq!(rate_per_sec(0, 5, Duration::ZERO), 0.0);
    }

    #[tokio::test]
    async fn test_counter_concurrent_increments() {
        let counter = IngestCounter::new();
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                tokio::spawn(async move {
                    for _ in 0..1000 {
                        counter.increment();
                    }
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(counter.get(), 8000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_logs_rate_and_stops_on_cancel() {
        // current-thread runtime: the reporter task logs on this thread
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let counter = IngestCounter::new();
        let cancel = CancellationToken::new();
        let handle = ThroughputReporter::spawn(counter.clone(), Duration::from_secs(10), cancel.clone());

        counter.add(25_000);
        tokio::time::sleep(Duration::from_secs(35)).await;

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        let logged = captured.text();
        let rates: Vec<&str> = logged
            .lines()
            .filter(|line| line.contains("records / second"))
            .collect();
        assert_eq!(rates.len(), 3, "{logged}");
        assert!(rates[0].contains("2.5k records / second"), "{logged}");
        assert!(rates[1].contains("0.0k records / second"), "{logged}");
        assert!(rates[0].contains("total=25000"), "{logged}");
    }
}
