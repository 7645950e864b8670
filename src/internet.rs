//! Internet reachability across a short list of well-known hosts.

use log::{info, warn};
use serde::Serialize;

use crate::ping::{ProbeRequest, ProbeResult, ProbeStatus, Thresholds};
use crate::session::HostProbe;

pub const MAX_INTERNET_HOSTS: usize = 3;

/// Per-host results plus the combined verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InternetStatus {
    pub hosts: Vec<ProbeResult>,
    pub aggregate: ProbeResult,
}

impl InternetStatus {
    pub fn is_available(&self) -> bool {
        self.aggregate.available
    }
}

/// Running means over the hosts probed so far.
#[derive(Debug, Clone)]
struct Aggregate {
    result: ProbeResult,
    loss_sum: f32,
    duration_sum: u64,
    count: u32,
}

impl Aggregate {
    fn seed(first: &ProbeResult) -> Self {
        Self {
            result: first.clone(),
            loss_sum: first.loss,
            duration_sum: first.duration as u64,
            count: 1,
        }
    }

    fn fold(mut self, next: &ProbeResult) -> Self {
        self.count += 1;
        self.loss_sum += next.loss;
        self.duration_sum += next.duration as u64;

        let result = &mut self.result;
        result.available |= next.available;
        result.transmitted += next.transmitted;
        result.received += next.received;
        result.loss = self.loss_sum / self.count as f32;
        result.duration = (self.duration_sum / self.count as u64) as u32;
        if next.is_completed() {
            result.status = ProbeStatus::Completed;
        }
        self
    }
}

/// Probes each configured host in order and combines the results.
pub struct InternetChecker<P> {
    prober: P,
    hosts: Vec<String>,
    template: ProbeRequest,
}

impl<P: HostProbe> InternetChecker<P> {
    /// `template` supplies packet parameters shared by every host; its
    /// hostname is ignored. Only the first three hosts are used.
    pub fn new(
        prober: P,
        hosts: Vec<String>,
        template: ProbeRequest,
        thresholds: Thresholds,
    ) -> Self {
        let mut hosts = hosts;
        if hosts.len() > MAX_INTERNET_HOSTS {
            warn!(
                target: "ping",
                "Only the first {} internet hosts are checked", MAX_INTERNET_HOSTS
            );
            hosts.truncate(MAX_INTERNET_HOSTS);
        }
        Self {
            prober,
            hosts,
            template: template.with_thresholds(thresholds),
        }
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Hosts are probed one after another, never concurrently. Returns
    /// `None` when no host is configured.
    pub fn check_internet(&self) -> Option<InternetStatus> {
        let mut results = Vec::with_capacity(self.hosts.len());
        let mut aggregate: Option<Aggregate> = None;

        for host in &self.hosts {
            let request = ProbeRequest {
                hostname: host.clone(),
                ..self.template.clone()
            };
            let result = self.prober.probe(&request);
            aggregate = Some(match aggregate {
                None => Aggregate::seed(&result),
                Some(running) => running.fold(&result),
            });
            results.push(result);
        }

        let aggregate = aggregate?.result;
        if aggregate.available {
            info!(target: "ping", "Internet access is available");
        } else {
            warn!(target: "ping", "Internet access is not available");
        }

        Some(InternetStatus {
            hosts: results,
            aggregate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr};

    struct TableProbe {
        table: HashMap<&'static str, (u32, u32, u32)>,
        calls: RefCell<Vec<String>>,
    }

    impl TableProbe {
        fn new(rows: &[(&'static str, (u32, u32, u32))]) -> Self {
            Self {
                table: rows.iter().copied().collect(),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl HostProbe for TableProbe {
        fn probe(&self, request: &ProbeRequest) -> ProbeResult {
            self.calls.borrow_mut().push(request.hostname.clone());
            match self.table.get(request.hostname.as_str()) {
                Some(&(transmitted, received, total_ms)) => ProbeResult::completed(
                    &request.hostname,
                    IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                    transmitted,
                    received,
                    total_ms,
                    request.thresholds,
                ),
                None => ProbeResult::failure(&request.hostname, None, ProbeStatus::ResolveFailed),
            }
        }
    }

    fn checker<'a>(probe: &'a TableProbe, hosts: &[&str]) -> InternetChecker<&'a TableProbe> {
        InternetChecker::new(
            probe,
            hosts.iter().map(|h| h.to_string()).collect(),
            ProbeRequest::new(""),
            Thresholds::new(40.0, 25),
        )
    }

    #[test]
    fn test_single_host_is_copied_verbatim() {
        let probe = TableProbe::new(&[("a", (4, 4, 40))]);
        let status = checker(&probe, &["a"]).check_internet().unwrap();

        assert_eq!(status.hosts.len(), 1);
        assert_eq!(status.aggregate, status.hosts[0]);
        assert!(status.is_available());
    }

    #[test]
    fn test_two_hosts_average_loss_and_duration() {
        // a: loss 0, duration 10; b: loss 50, duration 30
        let probe = TableProbe::new(&[("a", (4, 4, 40)), ("b", (4, 2, 120))]);
        let status = checker(&probe, &["a", "b"]).check_internet().unwrap();

        let aggregate = &status.aggregate;
        assert_eq!(aggregate.loss, 25.0);
        assert_eq!(aggregate.duration, 20);
        assert_eq!(aggregate.transmitted, 8);
        assert_eq!(aggregate.received, 6);
        assert!(status.hosts[0].available);
        assert!(!status.hosts[1].available);
        assert!(aggregate.available);
    }

    #[test]
    fn test_three_hosts_mean_not_derived_from_sums() {
        let probe = TableProbe::new(&[
            ("a", (2, 2, 20)),
            ("b", (4, 0, 400)),
            ("c", (10, 5, 300)),
        ]);
        let status = checker(&probe, &["a", "b", "c"]).check_internet().unwrap();

        let aggregate = &status.aggregate;
        // losses 0, 100, 50
        assert_eq!(aggregate.loss, 50.0);
        // durations 10, 100, 30
        assert_eq!(aggregate.duration, 46);
        assert_eq!(aggregate.transmitted, 16);
        assert_eq!(aggregate.received, 7);
        assert!(aggregate.available);
    }

    #[test]
    fn test_all_hosts_down() {
        let probe = TableProbe::new(&[("a", (4, 0, 4000))]);
        let status = checker(&probe, &["a", "missing"]).check_internet().unwrap();

        assert!(!status.is_available());
        assert_eq!(status.hosts[1].status, ProbeStatus::ResolveFailed);
        assert_eq!(status.aggregate.loss, 50.0);
    }

    #[test]
    fn test_hosts_probed_in_order_and_capped() {
        let probe = TableProbe::new(&[]);
        let checker = checker(&probe, &["a", "b", "c", "d"]);
        assert_eq!(checker.hosts().len(), MAX_INTERNET_HOSTS);

        checker.check_internet();
        assert_eq!(*probe.calls.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_no_hosts() {
        let probe = TableProbe::new(&[]);
        assert!(checker(&probe, &[]).check_internet().is_none());
    }
}
