//! Host reachability probing over ICMP echo.
//!
//! [`Prober`] runs one echo sequence against a host and blocks until the
//! engine reports completion, returning loss and average round-trip time.
//! [`InternetChecker`] combines up to three hosts into one verdict,
//! [`Watchdog`] waits for a host to come back, and [`PingSource`] feeds the
//! statistics into a periodic [`DualSensor`].

pub mod config;
pub mod dns_cache;
pub mod engine;
pub mod error;
pub mod internet;
pub mod ping;
pub mod resolver;
pub mod sensor;
pub mod session;
pub mod watchdog;

pub use config::{AppConfig, ConfigError};
pub use dns_cache::CachingResolver;
pub use engine::{EchoEngine, EchoSession, SurgeEngine};
pub use error::ProbeError;
pub use internet::{InternetChecker, InternetStatus};
pub use ping::{ProbeRequest, ProbeResult, ProbeStatus, Thresholds, classify};
pub use resolver::{Resolver, SystemResolver};
pub use sensor::{DualSensor, Filter, PingSource, SensorReading, TwoMetricSource};
pub use session::{HostProbe, Prober};
pub use watchdog::{
    AlwaysConnected, LinkMonitor, LogIndicator, LogNotifier, Notifier, NotifyTemplates,
    StatusIndicator, Watchdog,
};
