// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::cmp;
use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::FutureExt;
use futures::{pin_mut, select};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::plan::ReadinessSpec;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(2);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// A signal that the backend can take requests
#[async_trait]
pub trait Probe: fmt::Display + Send + Sync {
    async fn is_ready(&self) -> bool;
}

/// Ready once something accepts a TCP connection on `address`
#[derive(Clone, Debug)]
pub struct TcpProbe {
    address: String,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl fmt::Display for TcpProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}", self.address)
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn is_ready(&self) -> bool {
        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(self.address.as_str())).await
        {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(probe = %self, error = %e, "not ready");
                false
            }
            Err(_) => false,
        }
    }
}

/// How the wait between the two services ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadinessOutcome {
    /// Only the fixed delay was applied
    FixedDelay,
    /// The probe succeeded, `after` is measured from the backend start attempt
    Ready { after: Duration },
    /// The probe never succeeded within its budget
    TimedOut { after: Duration },
}

impl fmt::Display for ReadinessOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessOutcome::FixedDelay => f.write_str("fixed delay"),
            ReadinessOutcome::Ready { after } => write!(f, "ready after {:.1}s", after.as_secs_f64()),
            ReadinessOutcome::TimedOut { after } => {
                write!(f, "not ready after {:.1}s", after.as_secs_f64())
            }
        }
    }
}

/// The wait between starting the backend and starting the frontend.
///
/// `floor` is always honoured, measured from the backend start attempt. With a
/// probe the gate additionally polls with exponential backoff until the probe
/// succeeds or `max_wait` runs out. Running out is not an error.
pub struct ReadinessGate {
    floor: Duration,
    probe: Option<(Box<dyn Probe>, Duration)>,
}

impl ReadinessGate {
    pub fn fixed(floor: Duration) -> Self {
        Self { floor, probe: None }
    }

    pub fn with_probe(floor: Duration, probe: Box<dyn Probe>, max_wait: Duration) -> Self {
        Self {
            floor,
            probe: Some((probe, max_wait)),
        }
    }

    pub fn from_spec(floor: Duration, spec: &ReadinessSpec) -> Self {
        match spec {
            ReadinessSpec::Disabled => Self::fixed(floor),
            ReadinessSpec::Tcp { address, max_wait } => {
                Self::with_probe(floor, Box::new(TcpProbe::new(address.as_str())), *max_wait)
            }
        }
    }

    /// Wait for the backend, `probe_backend` is false when there is nothing to probe
    pub async fn wait(&self, since: Instant, probe_backend: bool) -> ReadinessOutcome {
        let outcome = match &self.probe {
            Some((probe, max_wait)) if probe_backend => {
                info!(probe = %probe, "waiting for backend");
                let poll = poll_until_ready(probe.as_ref()).fuse();
                let deadline = tokio::time::sleep(*max_wait).fuse();
                pin_mut!(poll, deadline);

                select! {
                    () = poll => ReadinessOutcome::Ready { after: since.elapsed() },
                    () = deadline => {
                        let after = since.elapsed();
                        warn!(probe = %probe, "backend not ready after {:.1}s, starting frontend anyway", after.as_secs_f64());
                        ReadinessOutcome::TimedOut { after }
                    }
                }
            }
            _ => ReadinessOutcome::FixedDelay,
        };

        let elapsed = since.elapsed();
        if elapsed < self.floor {
            tokio::time::sleep(self.floor - elapsed).await;
        }

        outcome
    }
}

async fn poll_until_ready(probe: &dyn Probe) {
    let mut backoff = INITIAL_BACKOFF;

    while !probe.is_ready().await {
        tokio::time::sleep(backoff).await;
        backoff = cmp::min(backoff * 2, MAX_BACKOFF);
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    fn closed_port() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        addr.to_string()
    }

    #[tokio::test]
    async fn test_fixed_delay_is_a_floor() {
        let start = Instant::now();
        let outcome = ReadinessGate::fixed(Duration::from_millis(300))
            .wait(start, true)
            .await;

        assert_eq!(outcome, ReadinessOutcome::FixedDelay);
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_probe_succeeds_against_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let address = listener.local_addr().expect("addr").to_string();

        let gate = ReadinessGate::with_probe(
            Duration::from_millis(0),
            Box::new(TcpProbe::new(address)),
            Duration::from_secs(5),
        );
        let outcome = gate.wait(Instant::now(), true).await;

        assert!(matches!(outcome, ReadinessOutcome::Ready { .. }));
    }

    #[tokio::test]
    async fn test_probe_times_out_but_floor_still_holds() {
        let start = Instant::now();
        let gate = ReadinessGate::with_probe(
            Duration::from_millis(500),
            Box::new(TcpProbe::new(closed_port())),
            Duration::from_millis(200),
        );
        let outcome = gate.wait(start, true).await;

        assert!(matches!(outcome, ReadinessOutcome::TimedOut { .. }));
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_probe_skipped_when_backend_did_not_start() {
        let gate = ReadinessGate::from_spec(
            Duration::from_millis(100),
            &ReadinessSpec::Tcp {
                address: closed_port(),
                max_wait: Duration::from_secs(30),
            },
        );
        let start = Instant::now();
        let outcome = gate.wait(start, false).await;

        assert_eq!(outcome, ReadinessOutcome::FixedDelay);
        assert!(start.elapsed() < Duration::from_secs(30));
    }
}
