//! Periodic two-metric sensor fed by ping.
//!
//! A [`TwoMetricSource`] produces a pair of raw values per read; [`DualSensor`]
//! filters them, keeps the last good reading and packages it for publishing.

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::ping::ProbeRequest;
use crate::session::HostProbe;

/// Smoothing applied to consecutive raw values of one metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Filter {
    #[default]
    None,
    Average { size: usize },
    Median { size: usize },
}

impl Filter {
    fn window(&self) -> usize {
        match *self {
            Filter::None => 1,
            Filter::Average { size } | Filter::Median { size } => size.max(1),
        }
    }

    fn apply(&self, values: &VecDeque<f64>) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        match self {
            Filter::None => values.back().copied(),
            Filter::Average { .. } => Some(values.iter().sum::<f64>() / values.len() as f64),
            Filter::Median { .. } => {
                let mut sorted: Vec<f64> = values.iter().copied().collect();
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    Some((sorted[mid - 1] + sorted[mid]) / 2.0)
                } else {
                    Some(sorted[mid])
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricInfo {
    pub name: String,
    pub unit: String,
}

impl MetricInfo {
    pub fn new(name: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
        }
    }
}

/// Source of two related measurements taken together.
pub trait TwoMetricSource {
    fn primary(&self) -> MetricInfo;
    fn secondary(&self) -> MetricInfo;
    /// Take one measurement; `None` when the read failed.
    fn read(&mut self) -> Option<(f64, f64)>;
    /// Optional value derived from the two filtered values.
    fn combine(&self, _primary: f64, _secondary: f64) -> Option<f64> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct MetricItem {
    info: MetricInfo,
    filter: Filter,
    history: VecDeque<f64>,
    raw: Option<f64>,
    value: Option<f64>,
}

impl MetricItem {
    pub fn new(info: MetricInfo, filter: Filter) -> Self {
        Self {
            info,
            filter,
            history: VecDeque::with_capacity(filter.window()),
            raw: None,
            value: None,
        }
    }

    fn push(&mut self, raw: f64) {
        if self.history.len() == self.filter.window() {
            self.history.pop_front();
        }
        self.history.push_back(raw);
        self.raw = Some(raw);
        self.value = self.filter.apply(&self.history);
    }

    pub fn raw(&self) -> Option<f64> {
        self.raw
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    fn snapshot(&self) -> Option<MetricValue> {
        Some(MetricValue {
            name: self.info.name.clone(),
            unit: self.info.unit.clone(),
            raw: self.raw?,
            value: self.value?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricValue {
    pub name: String,
    pub unit: String,
    pub raw: f64,
    pub value: f64,
}

/// What gets published after a successful read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub timestamp: DateTime<Local>,
    pub primary: MetricValue,
    pub secondary: MetricValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combined: Option<f64>,
}

pub struct DualSensor<S> {
    source: S,
    primary: MetricItem,
    secondary: MetricItem,
    combine: bool,
    last_read: Option<DateTime<Local>>,
    errors: u32,
}

impl<S: TwoMetricSource> DualSensor<S> {
    pub fn new(source: S, primary_filter: Filter, secondary_filter: Filter) -> Self {
        let primary = MetricItem::new(source.primary(), primary_filter);
        let secondary = MetricItem::new(source.secondary(), secondary_filter);
        Self {
            source,
            primary,
            secondary,
            combine: false,
            last_read: None,
            errors: 0,
        }
    }

    pub fn with_combined(mut self, enabled: bool) -> Self {
        self.combine = enabled;
        self
    }

    pub fn primary(&self) -> &MetricItem {
        &self.primary
    }

    pub fn secondary(&self) -> &MetricItem {
        &self.secondary
    }

    pub fn errors(&self) -> u32 {
        self.errors
    }

    pub fn last_read(&self) -> Option<DateTime<Local>> {
        self.last_read
    }

    /// One scheduled read. On failure the previous values are kept and the
    /// error counter goes up.
    pub fn read_data(&mut self) -> Option<SensorReading> {
        let Some((primary, secondary)) = self.source.read() else {
            self.errors += 1;
            warn!(target: "sensor", "Failed to read {}/{} ({} errors)",
                self.primary.info.name, self.secondary.info.name, self.errors);
            return None;
        };

        self.primary.push(primary);
        self.secondary.push(secondary);
        let timestamp = Local::now();
        self.last_read = Some(timestamp);

        let primary = self.primary.snapshot()?;
        let secondary = self.secondary.snapshot()?;
        let combined = if self.combine {
            self.source.combine(primary.value, secondary.value)
        } else {
            None
        };
        debug!(target: "sensor", "{} = {:.1} {}, {} = {:.1} {}",
            primary.name, primary.value, primary.unit,
            secondary.name, secondary.value, secondary.unit);

        Some(SensorReading {
            timestamp,
            primary,
            secondary,
            combined,
        })
    }

    /// Read every `interval`, handing each good reading to `publish`.
    /// Stops after `reads` attempts, or never when `None`.
    pub fn run(
        &mut self,
        interval: Duration,
        reads: Option<u32>,
        mut publish: impl FnMut(&SensorReading),
    ) {
        let mut attempts = 0u32;
        while reads.is_none_or(|limit| attempts < limit) {
            if attempts > 0 {
                thread::sleep(interval);
            }
            if let Some(reading) = self.read_data() {
                publish(&reading);
            }
            attempts += 1;
        }
    }
}

/// Average round-trip time and packet loss of one host.
pub struct PingSource<P> {
    prober: P,
    request: ProbeRequest,
}

impl<P: HostProbe> PingSource<P> {
    pub fn new(prober: P, request: ProbeRequest) -> Self {
        Self { prober, request }
    }
}

impl<P: HostProbe> TwoMetricSource for PingSource<P> {
    fn primary(&self) -> MetricInfo {
        MetricInfo::new("timeout", "ms")
    }

    fn secondary(&self) -> MetricInfo {
        MetricInfo::new("loss", "%")
    }

    fn read(&mut self) -> Option<(f64, f64)> {
        let result = self.prober.probe(&self.request);
        result
            .is_completed()
            .then(|| (result.duration as f64, result.loss as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ping::{ProbeResult, ProbeStatus};
    use std::cell::RefCell;
    use std::net::{IpAddr, Ipv4Addr};

    struct Replay(RefCell<Rows>);

    impl HostProbe for Replay {
        fn probe(&self, request: &ProbeRequest) -> ProbeResult {
            match self.0.borrow_mut().remove(0) {
                Some((transmitted, received, total_ms)) => ProbeResult::completed(
                    &request.hostname,
                    IpAddr::V4(Ipv4Addr::LOCALHOST),
                    transmitted,
                    received,
                    total_ms,
                    None,
                ),
                None => ProbeResult::failure(&request.hostname, None, ProbeStatus::ResolveFailed),
            }
        }
    }

    type Rows = Vec<Option<(u32, u32, u32)>>;

    fn ping_sensor(rows: Rows, filter: Filter) -> DualSensor<PingSource<Replay>> {
        let source = PingSource::new(Replay(RefCell::new(rows)), ProbeRequest::new("gw"));
        DualSensor::new(source, filter, filter)
    }

    #[test]
    fn test_ping_source_feeds_duration_and_loss() {
        let mut sensor = ping_sensor(vec![Some((4, 3, 120))], Filter::None);
        let reading = sensor.read_data().unwrap();

        assert_eq!(reading.primary.name, "timeout");
        assert_eq!(reading.primary.value, 30.0);
        assert_eq!(reading.secondary.name, "loss");
        assert_eq!(reading.secondary.value, 25.0);
        assert!(reading.combined.is_none());
        assert_eq!(sensor.last_read(), Some(reading.timestamp));
    }

    #[test]
    fn test_failed_read_keeps_previous_values() {
        let mut sensor = ping_sensor(vec![Some((2, 2, 20)), None], Filter::None);
        sensor.read_data().unwrap();

        assert!(sensor.read_data().is_none());
        assert_eq!(sensor.errors(), 1);
        assert_eq!(sensor.primary().value(), Some(10.0));
        assert_eq!(sensor.secondary().value(), Some(0.0));
    }

    #[test]
    fn test_average_filter() {
        let rows = vec![Some((1, 1, 10)), Some((1, 1, 20)), Some((1, 1, 30)), Some((1, 1, 40))];
        let mut sensor = ping_sensor(rows, Filter::Average { size: 3 });
        for _ in 0..4 {
            sensor.read_data();
        }
        assert_eq!(sensor.primary().raw(), Some(40.0));
        assert_eq!(sensor.primary().value(), Some(30.0));
    }

    #[test]
    fn test_median_filter_ignores_spike() {
        let rows = vec![Some((1, 1, 10)), Some((1, 1, 900)), Some((1, 1, 12))];
        let mut sensor = ping_sensor(rows, Filter::Median { size: 3 });
        for _ in 0..3 {
            sensor.read_data();
        }
        assert_eq!(sensor.primary().value(), Some(12.0));
    }

    struct Pair;

    impl TwoMetricSource for Pair {
        fn primary(&self) -> MetricInfo {
            MetricInfo::new("a", "")
        }

        fn secondary(&self) -> MetricInfo {
            MetricInfo::new("b", "")
        }

        fn read(&mut self) -> Option<(f64, f64)> {
            Some((3.0, 4.0))
        }

        fn combine(&self, primary: f64, secondary: f64) -> Option<f64> {
            Some(primary * secondary)
        }
    }

    #[test]
    fn test_combined_value_only_when_enabled() {
        let mut plain = DualSensor::new(Pair, Filter::None, Filter::None);
        assert_eq!(plain.read_data().unwrap().combined, None);

        let mut combined = DualSensor::new(Pair, Filter::None, Filter::None).with_combined(true);
        assert_eq!(combined.read_data().unwrap().combined, Some(12.0));
    }

    #[test]
    fn test_run_stops_after_limit() {
        let mut sensor = DualSensor::new(Pair, Filter::None, Filter::None);
        let mut published = Vec::new();
        sensor.run(Duration::ZERO, Some(3), |reading| published.push(reading.clone()));
        assert_eq!(published.len(), 3);
    }

    #[test]
    fn test_run_with_zero_reads_does_nothing() {
        let source = PingSource::new(Replay(RefCell::new(Vec::new())), ProbeRequest::new("gw"));
        let mut sensor = DualSensor::new(source, Filter::None, Filter::None);
        let mut published = 0;
        sensor.run(Duration::ZERO, Some(0), |_| published += 1);
        assert_eq!(published, 0);
        assert_eq!(sensor.errors(), 0);
        assert!(sensor.last_read().is_none());
    }

    #[test]
    fn test_reading_serializes() {
        let mut sensor = DualSensor::new(Pair, Filter::None, Filter::None);
        let reading = sensor.read_data().unwrap();
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["primary"]["name"], "a");
        assert_eq!(json["secondary"]["value"], 4.0);
        assert!(json.get("combined").is_none());
    }

    #[test]
    fn test_filter_from_config() {
        let filter: Filter = serde_json::from_str(r#"{"kind":"median","size":5}"#).unwrap();
        assert_eq!(filter, Filter::Median { size: 5 });
    }
}
