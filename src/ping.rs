use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

const DEFAULT_COUNT: u32 = 5;
const DEFAULT_INTERVAL_MS: u64 = 1000;
const DEFAULT_TIMEOUT_MS: u64 = 1000;
const DEFAULT_DATA_SIZE: usize = 32;

/// Loss and round-trip limits a host must stay under to count as available.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub max_loss_percent: f32,
    pub max_duration_ms: u32,
}

impl Thresholds {
    pub fn new(max_loss_percent: f32, max_duration_ms: u32) -> Self {
        Self {
            max_loss_percent,
            max_duration_ms,
        }
    }

    pub fn classify(&self, loss: f32, duration: u32) -> bool {
        classify(loss, duration, self.max_loss_percent, self.max_duration_ms)
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::new(50.0, 500)
    }
}

/// Both bounds are strict: sitting exactly on a threshold is "not available".
pub fn classify(loss: f32, duration: u32, max_loss: f32, max_duration: u32) -> bool {
    loss < max_loss && duration < max_duration
}

/// Parameters of one echo sequence against one host.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRequest {
    pub hostname: String,
    pub count: u32,
    pub interval: Duration,
    pub timeout: Duration,
    pub data_size: usize,
    pub thresholds: Option<Thresholds>,
    /// Log every reply and every lost packet, not just the summary.
    pub verbose: bool,
    /// Extra slack on top of the session bound after which the caller stops
    /// waiting. `None` waits for the engine unconditionally.
    pub wait_ceiling: Option<Duration>,
}

impl ProbeRequest {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            count: DEFAULT_COUNT,
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            data_size: DEFAULT_DATA_SIZE,
            thresholds: None,
            verbose: false,
            wait_ceiling: None,
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_data_size(mut self, data_size: usize) -> Self {
        self.data_size = data_size;
        self
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = Some(thresholds);
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_wait_ceiling(mut self, margin: Duration) -> Self {
        self.wait_ceiling = Some(margin);
        self
    }

    /// Upper bound on how long the engine needs: `count * max(interval, timeout)`,
    /// saturating at `Duration::MAX`.
    pub fn session_bound(&self) -> Duration {
        self.interval
            .max(self.timeout)
            .checked_mul(self.count)
            .unwrap_or(Duration::MAX)
    }
}

/// How a probe ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Completed,
    ResolveFailed,
    SessionFailed,
    TimedOut,
}

impl From<&ProbeError> for ProbeStatus {
    fn from(err: &ProbeError) -> Self {
        match err {
            ProbeError::Resolution(_) => ProbeStatus::ResolveFailed,
            ProbeError::WaitTimeout(_) => ProbeStatus::TimedOut,
            ProbeError::SessionCreate(_)
            | ProbeError::SessionStart(_)
            | ProbeError::CompletionLost => ProbeStatus::SessionFailed,
        }
    }
}

/// Statistics of one finished probe.
///
/// A probe that could not run at all carries zeroed counters and
/// `available == false`, the same as a host that answered nothing; `status`
/// tells the two apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub hostname: String,
    pub resolved_address: Option<IpAddr>,
    pub transmitted: u32,
    pub received: u32,
    /// Average round-trip time in ms over transmitted packets.
    pub duration: u32,
    /// Packet loss in percent.
    pub loss: f32,
    /// Only meaningful when the request carried thresholds.
    pub available: bool,
    pub status: ProbeStatus,
}

impl ProbeResult {
    /// Derive loss and average time from the final session counters.
    pub fn completed(
        hostname: impl Into<String>,
        address: IpAddr,
        transmitted: u32,
        received: u32,
        total_ms: u32,
        thresholds: Option<Thresholds>,
    ) -> Self {
        let received = received.min(transmitted);
        let (duration, loss) = if transmitted > 0 {
            let loss = (1.0 - received as f32 / transmitted as f32) * 100.0;
            (total_ms / transmitted, loss.clamp(0.0, 100.0))
        } else {
            (0, 0.0)
        };
        let available = thresholds.is_some_and(|t| t.classify(loss, duration));

        Self {
            hostname: hostname.into(),
            resolved_address: Some(address),
            transmitted,
            received,
            duration,
            loss,
            available,
            status: ProbeStatus::Completed,
        }
    }

    pub fn failure(
        hostname: impl Into<String>,
        address: Option<IpAddr>,
        status: ProbeStatus,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            resolved_address: address,
            transmitted: 0,
            received: 0,
            duration: 0,
            loss: 0.0,
            available: false,
            status,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ProbeStatus::Completed
    }

    /// At least one reply came back.
    pub fn is_reachable(&self) -> bool {
        self.is_completed() && self.transmitted > 0 && self.loss < 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

    #[test]
    fn test_loss_and_average_duration() {
        let result = ProbeResult::completed("gw", ADDR, 4, 3, 200, None);
        assert_eq!(result.transmitted, 4);
        assert_eq!(result.received, 3);
        assert_eq!(result.duration, 50);
        assert!((result.loss - 25.0).abs() < f32::EPSILON);
        assert!(!result.available);
        assert!(result.is_reachable());
    }

    #[test]
    fn test_zero_transmitted_is_not_nan() {
        let result = ProbeResult::completed("gw", ADDR, 0, 0, 1234, None);
        assert_eq!(result.duration, 0);
        assert_eq!(result.loss, 0.0);
        assert!(!result.is_reachable());
    }

    #[test]
    fn test_loss_stays_in_range() {
        for transmitted in 1..=20u32 {
            for received in 0..=transmitted + 2 {
                let result = ProbeResult::completed("gw", ADDR, transmitted, received, 0, None);
                assert!(result.received <= result.transmitted);
                assert!((0.0..=100.0).contains(&result.loss));
                let expected = (1.0 - result.received as f32 / transmitted as f32) * 100.0;
                assert!((result.loss - expected).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_classify_is_strict() {
        assert!(classify(10.0, 100, 20.0, 200));
        assert!(!classify(20.0, 100, 20.0, 200));
        assert!(!classify(10.0, 200, 20.0, 200));
    }

    #[test]
    fn test_classify_flips_once_past_threshold() {
        let thresholds = Thresholds::new(30.0, 150);
        let mut seen_unavailable = false;
        for loss in 0..=100 {
            let available = thresholds.classify(loss as f32, 10);
            if seen_unavailable {
                assert!(!available, "loss {loss} came back available");
            }
            seen_unavailable |= !available;
        }
        let mut seen_unavailable = false;
        for duration in (0..400).step_by(10) {
            let available = thresholds.classify(0.0, duration);
            if seen_unavailable {
                assert!(!available, "duration {duration} came back available");
            }
            seen_unavailable |= !available;
        }
    }

    #[test]
    fn test_available_uses_thresholds() {
        let thresholds = Thresholds::new(50.0, 100);
        let good = ProbeResult::completed("gw", ADDR, 5, 5, 250, Some(thresholds));
        assert!(good.available);
        let slow = ProbeResult::completed("gw", ADDR, 5, 5, 500, Some(thresholds));
        assert!(!slow.available);
    }

    #[test]
    fn test_failure_is_zeroed() {
        let result = ProbeResult::failure("nowhere", None, ProbeStatus::ResolveFailed);
        assert_eq!(result.transmitted, 0);
        assert_eq!(result.received, 0);
        assert_eq!(result.duration, 0);
        assert_eq!(result.loss, 0.0);
        assert!(!result.available);
        assert!(!result.is_reachable());
    }

    #[test]
    fn test_session_bound() {
        let request = ProbeRequest::new("gw")
            .with_count(4)
            .with_interval(Duration::from_millis(200))
            .with_timeout(Duration::from_millis(500));
        assert_eq!(request.session_bound(), Duration::from_millis(2000));
    }

    #[test]
    fn test_session_bound_saturates() {
        let request = ProbeRequest::new("gw")
            .with_count(u32::MAX)
            .with_timeout(Duration::from_secs(u64::MAX / 2));
        assert_eq!(request.session_bound(), Duration::MAX);
    }
}
