//! Sensor telemetry polling and chart history.

use crate::backend::Backend;
use crate::lifecycle::{run_every, PollOutcome, Teardown};
use crate::state::{ErrorNotice, StateStore};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Chart points retained when no capacity is configured.
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// Wall-clock format used for reading timestamps and chart labels.
const TIME_FORMAT: &str = "%H:%M:%S";

/// Body of the sensor snapshot endpoint. Pressure is in pascals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
}

/// Latest sensor values with the local time they were received.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub temperature: f64,
    pub humidity: f64,
    /// Pascals, as reported.
    pub pressure: f64,
    /// `HH:MM:SS`
    pub updated_at: String,
}

impl SensorReading {
    /// Stamp `sample` with `time`.
    pub fn new(sample: SensorSample, time: impl Into<String>) -> Self {
        Self {
            temperature: sample.temperature,
            humidity: sample.humidity,
            pressure: sample.pressure,
            updated_at: time.into(),
        }
    }
}

/// One point on the telemetry chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub time: String,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure_kpa: f64,
}

impl ChartPoint {
    /// Chart values for `sample`, rounded to two decimals with pressure in kPa.
    pub fn from_sample(sample: &SensorSample, time: impl Into<String>) -> Self {
        Self {
            time: time.into(),
            temperature: round2(sample.temperature),
            humidity: round2(sample.humidity),
            pressure_kpa: pascals_to_kpa(sample.pressure),
        }
    }
}

/// Round to two decimal places.
#[must_use]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Pascals to kilopascals, rounded to two decimals. `101325.0` gives `101.33`.
#[must_use]
pub fn pascals_to_kpa(pascals: f64) -> f64 {
    // Pa / 1000 * 100 == Pa / 10
    (pascals / 10.0).round() / 100.0
}

/// Bounded, insertion-ordered chart history.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorHistory {
    points: VecDeque<ChartPoint>,
    capacity: usize,
}

impl SensorHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `point`, evicting the oldest entries past capacity.
    pub fn push(&mut self, point: ChartPoint) {
        self.points.push_back(point);
        while self.points.len() > self.capacity {
            self.points.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Points in display order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ChartPoint> {
        self.points.iter()
    }

    pub fn latest(&self) -> Option<&ChartPoint> {
        self.points.back()
    }
}

/// Periodically fetches sensor readings into the state store.
#[derive(Clone)]
pub struct TelemetryPoller {
    backend: Arc<dyn Backend>,
    store: StateStore,
    period: Duration,
}

impl TelemetryPoller {
    pub fn new(backend: Arc<dyn Backend>, store: StateStore, period: Duration) -> Self {
        Self {
            backend,
            store,
            period,
        }
    }

    /// Fetch once and apply the result unless teardown fired meanwhile.
    pub async fn poll_once(&self, teardown: &Teardown) -> PollOutcome {
        let result = self.backend.fetch_sensors().await;

        if teardown.is_cancelled() {
            debug!("Discarding sensor response received after teardown");
            return PollOutcome::Discarded;
        }

        match result {
            Ok(sample) => {
                let now = Local::now().format(TIME_FORMAT).to_string();
                let point = ChartPoint::from_sample(&sample, now.clone());
                self.store.update(|s| {
                    s.sensor = Some(SensorReading::new(sample, now));
                    s.history.push(point);
                });
                PollOutcome::Applied
            }
            Err(e) => {
                warn!(error = %e, "Sensor fetch failed");
                self.store.set_error(ErrorNotice::SensorOffline);
                PollOutcome::Failed
            }
        }
    }

    /// Run [`TelemetryPoller::poll_once`] every period until teardown.
    pub fn spawn(self, teardown: Teardown) -> JoinHandle<()> {
        let period = self.period;
        let poller = Arc::new(self);
        let latch = teardown.clone();
        run_every("telemetry", period, teardown, move || {
            let poller = poller.clone();
            let latch = latch.clone();
            async move { poller.poll_once(&latch).await }
        })
    }
}
