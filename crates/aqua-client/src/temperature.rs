//! Water temperature logging.
//!
//! Reads a 1-Wire probe at a fixed cadence, aggregates a batch of readings
//! into its median and writes one InfluxDB line-protocol point per batch:
//!
//! ```text
//! temp,name=water value=24.5
//! ```
//!
//! The sleep after each reading is shortened by the time spent reading and
//! sending, so the cadence does not drift. Failed readings and failed writes
//! are logged and the loop carries on.

use async_trait::async_trait;
use reqwest::Client;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::error::{ClientError, Result};

/// Where the kernel exposes 1-Wire devices.
pub const W1_DEVICES_DIR: &str = "/sys/bus/w1/devices";

/// Value a DS18B20 reports after a power-on reset instead of a measurement.
const RESET_MILLIDEGREES: i64 = 85_000;

/// Timeout for one write to the measurement database.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Something that yields temperatures in degrees Celsius.
pub trait TemperatureSource: Send {
    /// Take one reading.
    fn read_celsius(&mut self) -> Result<f64>;
}

/// Destination of aggregated temperatures.
#[async_trait]
pub trait MeasurementSink: Send + Sync {
    /// Store one aggregated water temperature.
    async fn write_temperature(&self, celsius: f64) -> Result<()>;
}

/// DS18B20-style probe read through the `w1_slave` sysfs file.
#[derive(Debug, Clone)]
pub struct W1Sensor {
    path: PathBuf,
}

impl W1Sensor {
    /// Sensor reading the given `w1_slave` file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// First thermometer (family `28-`) under `devices_dir`.
    pub fn discover(devices_dir: impl AsRef<Path>) -> Result<Self> {
        let devices_dir = devices_dir.as_ref();
        let mut probes: Vec<PathBuf> = fs::read_dir(devices_dir)?
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("28-"))
            .map(|entry| entry.path().join("w1_slave"))
            .collect();
        probes.sort();
        probes
            .into_iter()
            .next()
            .map(Self::new)
            .ok_or_else(|| {
                ClientError::Sensor(format!(
                    "no 1-Wire thermometer found in {}",
                    devices_dir.display()
                ))
            })
    }

    /// File this sensor reads.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TemperatureSource for W1Sensor {
    fn read_celsius(&mut self) -> Result<f64> {
        parse_w1_slave(&fs::read_to_string(&self.path)?)
    }
}

/// Parse the two-line `w1_slave` format.
///
/// ```text
/// 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
/// 72 01 4b 46 7f ff 0e 10 57 t=23125
/// ```
pub fn parse_w1_slave(contents: &str) -> Result<f64> {
    let mut lines = contents.lines();
    let crc_line = lines.next().unwrap_or_default();
    if !crc_line.trim_end().ends_with("YES") {
        return Err(ClientError::Sensor("CRC check failed".into()));
    }
    let raw = lines
        .next()
        .and_then(|line| line.split_once("t="))
        .map(|(_, value)| value.trim())
        .ok_or_else(|| ClientError::Sensor("no temperature in sensor output".into()))?;
    let millidegrees: i64 = raw
        .parse()
        .map_err(|_| ClientError::Sensor(format!("invalid temperature '{raw}'")))?;
    if millidegrees == RESET_MILLIDEGREES {
        return Err(ClientError::Sensor("sensor reports power-on reset value".into()));
    }
    Ok(millidegrees as f64 / 1000.0)
}

/// Median of `values`; the mean of the two middle values for an even count.
#[must_use]
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// How often to read and how many readings make one point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementSchedule {
    send_interval: Duration,
    batch_size: u32,
}

impl MeasurementSchedule {
    /// One point every `send_interval`, the median of `batch_size` readings.
    pub fn new(send_interval: Duration, batch_size: u32) -> Result<Self> {
        if batch_size == 0 {
            return Err(ClientError::InvalidValue("batch size must be at least 1".into()));
        }
        if send_interval.is_zero() {
            return Err(ClientError::InvalidValue("send interval must be positive".into()));
        }
        Ok(Self {
            send_interval,
            batch_size,
        })
    }

    /// Time between two readings.
    #[must_use]
    pub fn measure_interval(&self) -> Duration {
        self.send_interval / self.batch_size
    }

    /// Readings aggregated into one point.
    #[must_use]
    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Sleep after a reading that took `processing`.
    #[must_use]
    pub fn sleep_after(&self, processing: Duration) -> Duration {
        self.measure_interval().saturating_sub(processing)
    }
}

/// Writes points to an InfluxDB 1.x `/write` endpoint.
#[derive(Debug, Clone)]
pub struct InfluxWriter {
    http: Client,
    url: Url,
}

impl InfluxWriter {
    /// Writer for `database` on the server at `base_url`.
    pub fn new(base_url: &str, database: &str, timeout: Duration) -> Result<Self> {
        let base = base_url.trim();
        if base.is_empty() {
            return Err(ClientError::InvalidValue("database URL cannot be empty".into()));
        }
        let url = Url::parse_with_params(
            &format!("{}/write", base.trim_end_matches('/')),
            &[("db", database)],
        )
        .map_err(|e| ClientError::InvalidValue(format!("database URL '{base}': {e}")))?;
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("aquarium/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, url })
    }

    /// Full write URL including the database parameter.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Line-protocol point for a water temperature.
#[must_use]
pub fn water_temperature_line(celsius: f64) -> String {
    format!("temp,name=water value={celsius}")
}

#[async_trait]
impl MeasurementSink for InfluxWriter {
    async fn write_temperature(&self, celsius: f64) -> Result<()> {
        let response = self
            .http
            .post(self.url.clone())
            .body(water_temperature_line(celsius))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                url: self.url.to_string(),
            });
        }
        Ok(())
    }
}

/// Counters of a logger run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggerStats {
    /// Successful sensor readings.
    pub readings: u64,
    /// Sensor readings that failed.
    pub read_failures: u64,
    /// Points written.
    pub points_sent: u64,
    /// Points the database did not accept.
    pub send_failures: u64,
}

/// Periodic read, aggregate and write loop.
pub struct TemperatureLogger<S, W> {
    source: S,
    sink: W,
    schedule: MeasurementSchedule,
    batch: Vec<f64>,
    stats: LoggerStats,
}

impl<S: TemperatureSource, W: MeasurementSink> TemperatureLogger<S, W> {
    /// Logger reading `source` and writing to `sink`.
    pub fn new(source: S, sink: W, schedule: MeasurementSchedule) -> Self {
        Self {
            source,
            sink,
            schedule,
            batch: Vec::with_capacity(schedule.batch_size() as usize),
            stats: LoggerStats::default(),
        }
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> LoggerStats {
        self.stats
    }

    /// Run until `shutdown` resolves; returns the counters.
    pub async fn run<F: Future<Output = ()>>(mut self, shutdown: F) -> LoggerStats {
        tracing::info!(
            measure_interval_s = self.schedule.measure_interval().as_secs_f64(),
            batch_size = self.schedule.batch_size(),
            "Temperature logger started"
        );
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                () = self.tick() => {}
            }
        }
        tracing::info!(
            readings = self.stats.readings,
            points = self.stats.points_sent,
            "Temperature logger stopped"
        );
        self.stats
    }

    /// One reading, a write when the batch is full, then the paced sleep.
    async fn tick(&mut self) {
        let started = Instant::now();
        self.measure_once().await;
        tokio::time::sleep(self.schedule.sleep_after(started.elapsed())).await;
    }

    /// Take one reading and send the batch median once the batch is full.
    pub async fn measure_once(&mut self) {
        match self.source.read_celsius() {
            Ok(celsius) => {
                self.stats.readings += 1;
                tracing::trace!(celsius, "Temperature reading");
                self.batch.push(celsius);
            }
            Err(e) => {
                self.stats.read_failures += 1;
                tracing::warn!(error = %e, "Temperature reading failed");
            }
        }

        if self.batch.len() < self.schedule.batch_size() as usize {
            return;
        }
        let Some(celsius) = median(&self.batch) else {
            return;
        };
        self.batch.clear();

        tracing::info!(celsius, "Logging water temperature");
        match self.sink.write_temperature(celsius).await {
            Ok(()) => self.stats.points_sent += 1,
            Err(e) => {
                self.stats.send_failures += 1;
                tracing::error!(error = %e, "Failed to write temperature");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::sync::oneshot;

    const W1_OK: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n\
                         72 01 4b 46 7f ff 0e 10 57 t=23125\n";

    #[test]
    fn test_parse_w1_slave() {
        assert_eq!(parse_w1_slave(W1_OK).unwrap(), 23.125);
        let negative = "ff ff : crc=aa YES\nff ff t=-1250\n";
        assert_eq!(parse_w1_slave(negative).unwrap(), -1.25);
    }

    #[test]
    fn test_parse_w1_slave_rejects_bad_output() {
        let bad_crc = W1_OK.replace("YES", "NO");
        assert!(matches!(parse_w1_slave(&bad_crc), Err(ClientError::Sensor(_))));
        assert!(parse_w1_slave("00 : crc=00 YES\n").is_err());
        assert!(parse_w1_slave("00 : crc=00 YES\n00 t=warm\n").is_err());
        assert!(parse_w1_slave("00 : crc=00 YES\n00 t=85000\n").is_err());
    }

    #[test]
    fn test_w1_sensor_discovery() {
        let dir = tempfile::tempdir().unwrap();
        assert!(W1Sensor::discover(dir.path()).is_err());

        fs::create_dir(dir.path().join("w1_bus_master1")).unwrap();
        let probe = dir.path().join("28-0316a2795aff");
        fs::create_dir(&probe).unwrap();
        fs::write(probe.join("w1_slave"), W1_OK).unwrap();

        let mut sensor = W1Sensor::discover(dir.path()).unwrap();
        assert_eq!(sensor.path(), probe.join("w1_slave"));
        assert_eq!(sensor.read_celsius().unwrap(), 23.125);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[24.0]), Some(24.0));
        assert_eq!(median(&[25.0, 23.0, 24.0]), Some(24.0));
        assert_eq!(median(&[23.0, 26.0, 24.0, 25.0]), Some(24.5));
        // One outlier does not move the result
        assert_eq!(median(&[24.1, 24.2, 85.0, 24.0, 24.3]), Some(24.2));
    }

    #[test]
    fn test_schedule_intervals() {
        let schedule = MeasurementSchedule::new(Duration::from_secs(180), 6).unwrap();
        assert_eq!(schedule.measure_interval(), Duration::from_secs(30));
        assert_eq!(
            schedule.sleep_after(Duration::from_secs(4)),
            Duration::from_secs(26)
        );
        assert_eq!(schedule.sleep_after(Duration::from_secs(45)), Duration::ZERO);

        assert!(MeasurementSchedule::new(Duration::from_secs(180), 0).is_err());
        assert!(MeasurementSchedule::new(Duration::ZERO, 6).is_err());
    }

    #[test]
    fn test_influx_write_url_and_line() {
        let writer =
            InfluxWriter::new("http://influx.local:8086/", "aquarium", DEFAULT_WRITE_TIMEOUT)
                .unwrap();
        assert_eq!(writer.url().as_str(), "http://influx.local:8086/write?db=aquarium");
        assert_eq!(water_temperature_line(24.5), "temp,name=water value=24.5");

        assert!(InfluxWriter::new(" ", "aquarium", DEFAULT_WRITE_TIMEOUT).is_err());
        assert!(InfluxWriter::new("not a url", "aquarium", DEFAULT_WRITE_TIMEOUT).is_err());
    }

    /// Returns scripted readings and records when each was taken.
    struct ScriptedSensor {
        readings: Vec<Result<f64>>,
        taken_at: Arc<Mutex<Vec<Instant>>>,
    }

    impl TemperatureSource for ScriptedSensor {
        fn read_celsius(&mut self) -> Result<f64> {
            self.taken_at.lock().unwrap().push(Instant::now());
            if self.readings.is_empty() {
                Ok(24.0)
            } else {
                self.readings.remove(0)
            }
        }
    }

    /// Records written points; can fail or take time to answer.
    #[derive(Clone, Default)]
    struct RecordingSink {
        points: Arc<Mutex<Vec<f64>>>,
        latency: Duration,
        fail: bool,
    }

    #[async_trait]
    impl MeasurementSink for RecordingSink {
        async fn write_temperature(&self, celsius: f64) -> Result<()> {
            tokio::time::sleep(self.latency).await;
            if self.fail {
                return Err(ClientError::Status {
                    status: 500,
                    url: "http://influx.local:8086/write?db=aquarium".into(),
                });
            }
            self.points.lock().unwrap().push(celsius);
            Ok(())
        }
    }

    fn sensor(readings: Vec<Result<f64>>) -> (ScriptedSensor, Arc<Mutex<Vec<Instant>>>) {
        let taken_at = Arc::new(Mutex::new(Vec::new()));
        (
            ScriptedSensor {
                readings,
                taken_at: taken_at.clone(),
            },
            taken_at,
        )
    }

    fn offsets(start: Instant, taken_at: &Mutex<Vec<Instant>>) -> Vec<u64> {
        taken_at
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.duration_since(start).as_secs())
            .collect()
    }

    #[tokio::test]
    async fn test_batch_median_is_written() {
        let (source, _) = sensor(vec![Ok(24.0), Ok(26.0), Ok(25.0), Ok(23.0)]);
        let sink = RecordingSink::default();
        let schedule = MeasurementSchedule::new(Duration::from_secs(120), 3).unwrap();
        let mut logger = TemperatureLogger::new(source, sink.clone(), schedule);

        for _ in 0..3 {
            logger.measure_once().await;
        }
        logger.measure_once().await;

        assert_eq!(*sink.points.lock().unwrap(), vec![25.0]);
        assert_eq!(logger.stats().readings, 4);
        assert_eq!(logger.stats().points_sent, 1);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_fatal() {
        let (source, _) = sensor(vec![
            Ok(24.0),
            Err(ClientError::Sensor("CRC check failed".into())),
            Ok(24.4),
        ]);
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let schedule = MeasurementSchedule::new(Duration::from_secs(60), 2).unwrap();
        let mut logger = TemperatureLogger::new(source, sink, schedule);

        for _ in 0..3 {
            logger.measure_once().await;
        }

        let stats = logger.stats();
        assert_eq!(stats.readings, 2);
        assert_eq!(stats.read_failures, 1);
        assert_eq!(stats.send_failures, 1);
        assert_eq!(stats.points_sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_readings_follow_measure_interval() {
        let (source, taken_at) = sensor(Vec::new());
        let sink = RecordingSink::default();
        let schedule = MeasurementSchedule::new(Duration::from_secs(180), 6).unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let start = Instant::now();
        let run = tokio::spawn(TemperatureLogger::new(source, sink.clone(), schedule).run(
            async move {
                let _ = stop_rx.await;
            },
        ));

        tokio::time::sleep(Duration::from_secs(365)).await;
        stop_tx.send(()).unwrap();
        let stats = run.await.unwrap();

        assert_eq!(
            offsets(start, &taken_at),
            vec![0, 30, 60, 90, 120, 150, 180, 210, 240, 270, 300, 330, 360]
        );
        assert_eq!(*sink.points.lock().unwrap(), vec![24.0, 24.0]);
        assert_eq!(stats.points_sent, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_write_does_not_shift_cadence() {
        let (source, taken_at) = sensor(Vec::new());
        let sink = RecordingSink {
            latency: Duration::from_secs(10),
            ..RecordingSink::default()
        };
        let schedule = MeasurementSchedule::new(Duration::from_secs(90), 3).unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let start = Instant::now();
        let run = tokio::spawn(TemperatureLogger::new(source, sink, schedule).run(async move {
            let _ = stop_rx.await;
        }));

        tokio::time::sleep(Duration::from_secs(125)).await;
        stop_tx.send(()).unwrap();
        run.await.unwrap();

        // The write after the third reading takes 10s of its 30s slot
        assert_eq!(offsets(start, &taken_at), vec![0, 30, 60, 90, 120]);
    }
}
