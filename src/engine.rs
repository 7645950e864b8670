//! Callback-driven echo engine.
//!
//! A session is created with a target, packet parameters and a set of hooks,
//! started once, and runs on its own worker thread. The engine reports every
//! reply and every lost packet through the optional hooks and calls the
//! completion hook exactly once after the last packet. Dropping the session
//! destroys it.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};
use surge_ping::{Client, Config, ICMP, IcmpPacket, PingIdentifier, PingSequence};
use tokio::runtime::Runtime;
use tokio::time::MissedTickBehavior;

use crate::error::ProbeError;
use crate::ping::ProbeRequest;

/// One echo reply as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    pub seq: u16,
    pub ttl: Option<u8>,
    pub size: usize,
    pub rtt: Duration,
}

/// Final counters of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EchoSummary {
    pub transmitted: u32,
    pub received: u32,
    /// Elapsed time of the whole exchange: reply times plus the timeout
    /// spent on every lost packet.
    pub total: Duration,
}

impl EchoSummary {
    pub fn total_ms(&self) -> u32 {
        self.total.as_millis().min(u32::MAX as u128) as u32
    }
}

pub type SuccessHook = Box<dyn FnMut(&EchoReply) + Send>;
pub type TimeoutHook = Box<dyn FnMut(u16) + Send>;
pub type CompleteHook = Box<dyn FnOnce(EchoSummary) + Send>;

pub struct EchoCallbacks {
    pub on_success: Option<SuccessHook>,
    pub on_timeout: Option<TimeoutHook>,
    pub on_complete: CompleteHook,
}

impl EchoCallbacks {
    pub fn new(on_complete: CompleteHook) -> Self {
        Self {
            on_success: None,
            on_timeout: None,
            on_complete,
        }
    }

    pub fn with_success(mut self, hook: SuccessHook) -> Self {
        self.on_success = Some(hook);
        self
    }

    pub fn with_timeout(mut self, hook: TimeoutHook) -> Self {
        self.on_timeout = Some(hook);
        self
    }

    pub(crate) fn reply(&mut self, reply: &EchoReply) {
        if let Some(hook) = self.on_success.as_mut() {
            hook(reply);
        }
    }

    pub(crate) fn lost(&mut self, seq: u16) {
        if let Some(hook) = self.on_timeout.as_mut() {
            hook(seq);
        }
    }

    pub(crate) fn complete(self, summary: EchoSummary) {
        (self.on_complete)(summary)
    }
}

impl std::fmt::Debug for EchoCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EchoCallbacks")
            .field("on_success", &self.on_success.is_some())
            .field("on_timeout", &self.on_timeout.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoConfig {
    pub target: IpAddr,
    pub count: u32,
    pub interval: Duration,
    pub timeout: Duration,
    pub data_size: usize,
}

impl EchoConfig {
    pub fn new(request: &ProbeRequest, target: IpAddr) -> Self {
        Self {
            target,
            count: request.count,
            interval: request.interval,
            timeout: request.timeout,
            data_size: request.data_size,
        }
    }
}

pub trait EchoEngine: Send + Sync {
    fn create(
        &self,
        config: EchoConfig,
        callbacks: EchoCallbacks,
    ) -> Result<Box<dyn EchoSession>, ProbeError>;
}

/// A created session. Dropping it releases every resource it holds.
pub trait EchoSession: Send {
    fn start(&mut self) -> Result<(), ProbeError>;

    /// Stop the session without waiting for its worker. Dropping a detached
    /// session returns immediately.
    fn detach(&mut self) {}
}

/// Echo engine backed by `surge-ping`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SurgeEngine;

impl EchoEngine for SurgeEngine {
    fn create(
        &self,
        config: EchoConfig,
        callbacks: EchoCallbacks,
    ) -> Result<Box<dyn EchoSession>, ProbeError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ProbeError::SessionCreate(e.to_string()))?;

        // The ICMP socket registers with the reactor, so it must be opened
        // inside the runtime that will drive it.
        let client = {
            let _guard = runtime.enter();
            let icmp_config = match config.target {
                IpAddr::V4(_) => Config::default(),
                IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
            };
            Client::new(&icmp_config).map_err(|e| ProbeError::SessionCreate(e.to_string()))?
        };

        Ok(Box::new(SurgeSession {
            config,
            pending: Some((runtime, client, callbacks)),
            cancelled: Arc::new(AtomicBool::new(false)),
            worker: None,
        }))
    }
}

struct SurgeSession {
    config: EchoConfig,
    pending: Option<(Runtime, Client, EchoCallbacks)>,
    cancelled: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl EchoSession for SurgeSession {
    fn start(&mut self) -> Result<(), ProbeError> {
        let (runtime, client, callbacks) = self
            .pending
            .take()
            .ok_or_else(|| ProbeError::SessionStart("session already started".to_string()))?;

        let config = self.config;
        let cancelled = Arc::clone(&self.cancelled);
        let worker = thread::Builder::new()
            .name("ping".to_string())
            .spawn(move || {
                runtime.block_on(run_session(client, config, callbacks, cancelled));
            })
            .map_err(|e| ProbeError::SessionStart(e.to_string()))?;

        self.worker = Some(worker);
        Ok(())
    }

    fn detach(&mut self) {
        self.cancelled.store(true, Ordering::Relaxed);
        if self.worker.take().is_some() {
            debug!(target: "ping", "Detached ping worker for [{}]", self.config.target);
        }
    }
}

impl Drop for SurgeSession {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(target: "ping", "Ping worker for [{}] panicked", self.config.target);
            }
        }
    }
}

async fn run_session(
    client: Client,
    config: EchoConfig,
    mut callbacks: EchoCallbacks,
    cancelled: Arc<AtomicBool>,
) {
    let mut pinger = client
        .pinger(config.target, PingIdentifier(rand::random()))
        .await;
    pinger.timeout(config.timeout);

    let payload = vec![0u8; config.data_size];
    let mut ticker = tokio::time::interval(config.interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut summary = EchoSummary::default();

    for n in 0..config.count {
        ticker.tick().await;
        // Caller is gone, nobody is waiting for completion
        if cancelled.load(Ordering::Relaxed) {
            debug!(target: "ping", "Ping session for [{}] cancelled", config.target);
            return;
        }

        let seq = (n % u16::MAX as u32) as u16 + 1;
        summary.transmitted += 1;
        match pinger.ping(PingSequence(seq), &payload).await {
            Ok((packet, rtt)) => {
                summary.received += 1;
                summary.total += rtt;
                let (ttl, size): (Option<u8>, usize) = match packet {
                    IcmpPacket::V4(reply) => (reply.get_ttl().into(), reply.get_size()),
                    IcmpPacket::V6(reply) => (None, reply.get_size()),
                };
                callbacks.reply(&EchoReply { seq, ttl, size, rtt });
            }
            Err(e) => {
                debug!(target: "ping", "icmp_seq = {} to [{}] failed: {}", seq, config.target, e);
                summary.total += config.timeout;
                callbacks.lost(seq);
            }
        }
    }

    callbacks.complete(summary);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Mutex;

    #[test]
    fn test_summary_total_ms_saturates() {
        let summary = EchoSummary {
            transmitted: 1,
            received: 1,
            total: Duration::from_secs(u64::MAX / 4),
        };
        assert_eq!(summary.total_ms(), u32::MAX);
    }

    #[test]
    fn test_config_from_request() {
        let request = ProbeRequest::new("gw")
            .with_count(3)
            .with_interval(Duration::from_millis(250))
            .with_timeout(Duration::from_millis(750))
            .with_data_size(56);
        let target = IpAddr::V4(Ipv4Addr::new(10, 1, 1, 1));
        let config = EchoConfig::new(&request, target);
        assert_eq!(config.target, target);
        assert_eq!(config.count, 3);
        assert_eq!(config.interval, Duration::from_millis(250));
        assert_eq!(config.timeout, Duration::from_millis(750));
        assert_eq!(config.data_size, 56);
    }

    #[test]
    fn test_callbacks_dispatch() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let on_success = Arc::clone(&events);
        let on_timeout = Arc::clone(&events);
        let on_complete = Arc::clone(&events);

        let mut callbacks = EchoCallbacks::new(Box::new(move |summary: EchoSummary| {
            on_complete
                .lock()
                .unwrap()
                .push(format!("done {}/{}", summary.received, summary.transmitted));
        }))
        .with_success(Box::new(move |reply: &EchoReply| {
            on_success.lock().unwrap().push(format!("reply {}", reply.seq));
        }))
        .with_timeout(Box::new(move |seq: u16| {
            on_timeout.lock().unwrap().push(format!("lost {seq}"));
        }));

        callbacks.reply(&EchoReply {
            seq: 1,
            ttl: Some(64),
            size: 40,
            rtt: Duration::from_millis(3),
        });
        callbacks.lost(2);
        callbacks.complete(EchoSummary {
            transmitted: 2,
            received: 1,
            total: Duration::from_millis(1003),
        });

        assert_eq!(
            *events.lock().unwrap(),
            vec!["reply 1".to_string(), "lost 2".to_string(), "done 1/2".to_string()]
        );
    }

    #[test]
    fn test_optional_hooks_may_be_absent() {
        let mut callbacks = EchoCallbacks::new(Box::new(|_: EchoSummary| {}));
        callbacks.reply(&EchoReply {
            seq: 1,
            ttl: None,
            size: 0,
            rtt: Duration::ZERO,
        });
        callbacks.lost(1);
        callbacks.complete(EchoSummary::default());
    }
}
