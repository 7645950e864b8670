//! Blocking probe on top of the callback-driven echo engine.
//!
//! Each call owns its callbacks and a one-shot completion channel. The
//! completion hook derives the statistics on the engine's worker and hands
//! them over the channel; the caller blocks on the other end. Nothing is
//! shared between calls, so independent callers may probe concurrently if the
//! engine allows it.

use std::net::IpAddr;
use std::sync::mpsc::{self, RecvTimeoutError};

use log::{debug, error, info, warn};

use crate::engine::{EchoCallbacks, EchoConfig, EchoEngine, EchoReply, EchoSummary, SurgeEngine};
use crate::error::ProbeError;
use crate::ping::{ProbeRequest, ProbeResult, ProbeStatus};
use crate::resolver::{Resolver, SystemResolver};

/// Anything that can run one probe to completion.
pub trait HostProbe {
    fn probe(&self, request: &ProbeRequest) -> ProbeResult;
}

impl<P: HostProbe + ?Sized> HostProbe for &P {
    fn probe(&self, request: &ProbeRequest) -> ProbeResult {
        (**self).probe(request)
    }
}

pub struct Prober<R = SystemResolver, E = SurgeEngine> {
    resolver: R,
    engine: E,
}

impl<R: Resolver, E: EchoEngine> Prober<R, E> {
    pub fn new(resolver: R, engine: E) -> Self {
        Self { resolver, engine }
    }

    /// Run `request` and block until the engine reports completion.
    ///
    /// Never fails: unknown hosts and engine errors are logged and come back
    /// as a zeroed result tagged with the matching [`ProbeStatus`].
    pub fn probe(&self, request: &ProbeRequest) -> ProbeResult {
        let address = match self.resolver.resolve(&request.hostname) {
            Ok(address) => address,
            Err(e) => {
                warn!(target: "ping", "{}", e);
                return ProbeResult::failure(&request.hostname, None, ProbeStatus::from(&e));
            }
        };

        match self.exchange(request, address) {
            Ok(result) => result,
            Err(e) => {
                error!(
                    target: "ping",
                    "Ping of [{}] ({}) failed: {}", request.hostname, address, e
                );
                ProbeResult::failure(&request.hostname, Some(address), ProbeStatus::from(&e))
            }
        }
    }

    fn exchange(&self, request: &ProbeRequest, address: IpAddr) -> Result<ProbeResult, ProbeError> {
        let (done_tx, done_rx) = mpsc::sync_channel::<ProbeResult>(1);

        let hostname = request.hostname.clone();
        let thresholds = request.thresholds;
        let on_complete = Box::new(move |summary: EchoSummary| {
            let result = ProbeResult::completed(
                hostname,
                address,
                summary.transmitted,
                summary.received,
                summary.total_ms(),
                thresholds,
            );
            info!(
                target: "ping",
                "Ping statistics for [{}]: {} packets transmitted, {} received, \
                 {:.1}% packet loss, average time {} ms",
                address,
                result.transmitted,
                result.received,
                result.loss,
                result.duration
            );
            // Receiver is gone only when the caller gave up waiting
            let _ = done_tx.send(result);
        });

        let mut callbacks = EchoCallbacks::new(on_complete);
        if request.verbose {
            callbacks = callbacks
                .with_success(Box::new(move |reply: &EchoReply| {
                    debug!(
                        target: "ping",
                        "Received of {} bytes from [{}] : icmp_seq = {}, ttl = {}, time = {} ms",
                        reply.size,
                        address,
                        reply.seq,
                        reply.ttl.map_or_else(|| "?".to_string(), |ttl| ttl.to_string()),
                        reply.rtt.as_millis()
                    );
                }))
                .with_timeout(Box::new(move |seq: u16| {
                    warn!(target: "ping", "Packet loss for [{}]: icmp_seq = {}", address, seq);
                }));
        }

        let mut session = self
            .engine
            .create(EchoConfig::new(request, address), callbacks)?;
        session.start()?;
        info!(target: "ping", "Ping started for host [{}]...", request.hostname);

        let outcome = match request.wait_ceiling {
            None => done_rx.recv().map_err(|_| ProbeError::CompletionLost),
            Some(margin) => {
                let ceiling = request.session_bound().saturating_add(margin);
                done_rx.recv_timeout(ceiling).map_err(|e| match e {
                    RecvTimeoutError::Timeout => ProbeError::WaitTimeout(ceiling),
                    RecvTimeoutError::Disconnected => ProbeError::CompletionLost,
                })
            }
        };

        // A stalled worker must not hold the caller past the ceiling
        if let Err(ProbeError::WaitTimeout(_)) = outcome {
            session.detach();
        }
        drop(session);
        outcome
    }
}

impl<R: Resolver, E: EchoEngine> HostProbe for Prober<R, E> {
    fn probe(&self, request: &ProbeRequest) -> ProbeResult {
        Prober::probe(self, request)
    }
}
