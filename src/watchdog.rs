//! Blocks until the network link and, optionally, a host are reachable.
//!
//! Status signals and notifications are edge-triggered: they fire once when a
//! check goes down and once when it comes back, never on repeated failures.

use std::thread;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::ping::ProbeRequest;
use crate::session::HostProbe;

pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(30);
pub const DEFAULT_LINK_POLL: Duration = Duration::from_secs(1);
pub const LINK_CHANNEL: &str = "wifi";
pub const HOST_CHANNEL: &str = "ping";

/// Link-layer connectivity, e.g. the Wi-Fi station state.
pub trait LinkMonitor {
    fn is_connected(&self) -> bool;
    /// Wait up to `timeout` for the link; `true` once connected.
    fn wait_connected(&self, timeout: Duration) -> bool;
}

/// A status indicator with a "down" state per channel (LED, display, ...).
pub trait StatusIndicator {
    fn set_down(&self, channel: &str);
    fn clear_down(&self, channel: &str);
}

pub trait Notifier {
    /// `template` may contain `{host}`. Returns `false` when the message
    /// could not be queued.
    fn send(&self, urgent: bool, device_id: &str, template: &str, hostname: &str) -> bool;
}

/// Message templates for host state changes; `None` disables the message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifyTemplates {
    pub failure: Option<String>,
    pub recovery: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpDown {
    #[default]
    Up,
    Down,
}

#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub backoff: Duration,
    pub link_poll: Duration,
    pub device_id: String,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_BACKOFF,
            link_poll: DEFAULT_LINK_POLL,
            device_id: "ping-probe".to_string(),
        }
    }
}

pub struct Watchdog<P, L, S, N> {
    prober: P,
    link: L,
    indicator: S,
    notifier: N,
    settings: WatchdogSettings,
    link_state: UpDown,
    host_state: UpDown,
}

impl<P, L, S, N> Watchdog<P, L, S, N>
where
    P: HostProbe,
    L: LinkMonitor,
    S: StatusIndicator,
    N: Notifier,
{
    pub fn new(prober: P, link: L, indicator: S, notifier: N, settings: WatchdogSettings) -> Self {
        Self {
            prober,
            link,
            indicator,
            notifier,
            settings,
            link_state: UpDown::Up,
            host_state: UpDown::Up,
        }
    }

    pub fn host_state(&self) -> UpDown {
        self.host_state
    }

    /// Wait for the link, then, if `use_probe` is set, retry `request` until
    /// at least one reply comes back. Only returns once both hold.
    pub fn ensure_reachable(
        &mut self,
        request: &ProbeRequest,
        use_probe: bool,
        templates: &NotifyTemplates,
    ) -> bool {
        self.wait_for_link();
        if use_probe {
            self.wait_for_host(request, templates);
        }
        true
    }

    fn wait_for_link(&mut self) {
        if self.link.is_connected() {
            return;
        }

        if self.link_state == UpDown::Up {
            self.link_state = UpDown::Down;
            self.indicator.set_down(LINK_CHANNEL);
            warn!(target: "ping", "Network link is down, waiting for connection");
        }
        while !self.link.wait_connected(self.settings.link_poll) {}

        self.link_state = UpDown::Up;
        self.indicator.clear_down(LINK_CHANNEL);
        info!(target: "ping", "Network link restored");
    }

    fn wait_for_host(&mut self, request: &ProbeRequest, templates: &NotifyTemplates) {
        loop {
            let result = self.prober.probe(request);
            if result.is_reachable() {
                break;
            }

            if self.host_state == UpDown::Up {
                self.host_state = UpDown::Down;
                self.indicator.set_down(HOST_CHANNEL);
                warn!(target: "ping", "Host [{}] is unreachable", request.hostname);
                self.notify(true, templates.failure.as_deref(), &request.hostname);
            }
            thread::sleep(self.settings.backoff);
        }

        if self.host_state == UpDown::Down {
            self.host_state = UpDown::Up;
            self.indicator.clear_down(HOST_CHANNEL);
            info!(target: "ping", "Host [{}] is reachable again", request.hostname);
            self.notify(false, templates.recovery.as_deref(), &request.hostname);
        }
    }

    fn notify(&self, urgent: bool, template: Option<&str>, hostname: &str) {
        let Some(template) = template else {
            return;
        };
        if !self.notifier.send(urgent, &self.settings.device_id, template, hostname) {
            warn!(target: "ping", "Failed to queue notification for [{}]", hostname);
        }
    }
}

/// For hosts where the operating system manages the link.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysConnected;

impl LinkMonitor for AlwaysConnected {
    fn is_connected(&self) -> bool {
        true
    }

    fn wait_connected(&self, _timeout: Duration) -> bool {
        true
    }
}

/// Reports status changes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogIndicator;

impl StatusIndicator for LogIndicator {
    fn set_down(&self, channel: &str) {
        warn!(target: "status", "[{}] down", channel);
    }

    fn clear_down(&self, channel: &str) {
        info!(target: "status", "[{}] up", channel);
    }
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, urgent: bool, device_id: &str, template: &str, hostname: &str) -> bool {
        let message = render_template(template, hostname);
        if urgent {
            warn!(target: "notify", "{}: {}", device_id, message);
        } else {
            info!(target: "notify", "{}: {}", device_id, message);
        }
        true
    }
}

pub fn render_template(template: &str, hostname: &str) -> String {
    template.replace("{host}", hostname)
}
