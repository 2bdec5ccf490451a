//! Readiness Probe
//!
//! TCP reachability check used to detect that a node's SSH daemon is
//! listening. Outcomes are classified so that expected "not yet" conditions,
//! unexpected network failures and failures of the probe itself can be told
//! apart in the logs.

use std::io;
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use tracing::{info, trace, warn};

/// Default connect timeout for a single probe
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Upper bound on the connect timeout; readiness is polled repeatedly
pub const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// How probes are run and how unclassified failures are judged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePolicy {
    pub connect_timeout: Duration,
    /// Report the node as ready when the probe itself fails in an
    /// unclassified way, so the real launch attempt reports the problem
    pub fail_open: bool,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            fail_open: true,
        }
    }
}

impl ProbePolicy {
    /// Policy with a usable connect timeout. Zero falls back to the default
    /// and anything above [`MAX_CONNECT_TIMEOUT`] is capped.
    pub fn normalized(self) -> Self {
        let connect_timeout = if self.connect_timeout.is_zero() {
            DEFAULT_CONNECT_TIMEOUT
        } else {
            self.connect_timeout.min(MAX_CONNECT_TIMEOUT)
        };
        Self {
            connect_timeout,
            ..self
        }
    }
}

/// Result of a single probe
#[derive(Debug)]
pub enum ProbeOutcome {
    /// Port accepted the connection
    Open,
    /// Refused, unreachable or timed out: nothing listening yet
    NotListening(io::Error),
    /// Any other network failure, including name resolution
    Unexpected(io::Error),
    /// The probe could not run as intended
    Unclassified(String),
}

impl ProbeOutcome {
    /// Map the outcome onto a readiness answer under `policy`
    pub fn is_ready(&self, policy: &ProbePolicy) -> bool {
        match self {
            ProbeOutcome::Open => true,
            ProbeOutcome::NotListening(_) | ProbeOutcome::Unexpected(_) => false,
            ProbeOutcome::Unclassified(_) => policy.fail_open,
        }
    }
}

/// TCP probe, stateless apart from its policy
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe {
    policy: ProbePolicy,
}

impl TcpProbe {
    pub fn new(policy: ProbePolicy) -> Self {
        let normalized = policy.normalized();
        if normalized.connect_timeout != policy.connect_timeout {
            warn!(
                requested_ms = policy.connect_timeout.as_millis() as u64,
                connect_timeout_ms = normalized.connect_timeout.as_millis() as u64,
                "Adjusted connect timeout"
            );
        }
        Self { policy: normalized }
    }

    pub fn policy(&self) -> &ProbePolicy {
        &self.policy
    }

    /// Open and immediately close a connection to `address:port`
    pub fn probe(&self, address: Option<&str>, port: u16) -> ProbeOutcome {
        self.attempt_with(address, port, connect)
    }

    /// Probe and log the outcome, returning whether the port is considered open
    pub fn is_ready(&self, address: Option<&str>, port: u16) -> bool {
        let outcome = self.probe(address, port);
        self.report(address, port, outcome)
    }

    fn attempt_with<F>(&self, address: Option<&str>, port: u16, connect: F) -> ProbeOutcome
    where
        F: FnOnce(&str, u16, Duration) -> ProbeOutcome,
    {
        let Some(address) = address else {
            return ProbeOutcome::Unclassified("no address to probe".to_string());
        };

        let timeout = self.policy.connect_timeout;
        match panic::catch_unwind(AssertUnwindSafe(|| connect(address, port, timeout))) {
            Ok(outcome) => outcome,
            Err(payload) => ProbeOutcome::Unclassified(panic_message(payload.as_ref())),
        }
    }

    fn report(&self, address: Option<&str>, port: u16, outcome: ProbeOutcome) -> bool {
        let target = address.unwrap_or("<none>");

        match &outcome {
            ProbeOutcome::Open => {
                trace!(address = %target, port, "Port open");
            }
            ProbeOutcome::NotListening(e) => {
                trace!(address = %target, port, error = %e, "Port not open (yet)");
            }
            ProbeOutcome::Unexpected(e) => {
                info!(address = %target, port, error = %e, "Port not (yet) open?");
            }
            ProbeOutcome::Unclassified(reason) => {
                warn!(
                    address = %target,
                    port,
                    reason = %reason,
                    fail_open = self.policy.fail_open,
                    "Probe failed"
                );
            }
        }

        outcome.is_ready(&self.policy)
    }
}

fn connect(address: &str, port: u16, timeout: Duration) -> ProbeOutcome {
    let addr = match resolve(address, port) {
        Ok(addr) => addr,
        Err(e) => return ProbeOutcome::Unexpected(e),
    };

    match TcpStream::connect_timeout(&addr, timeout) {
        Ok(stream) => {
            // Nothing is exchanged; a failed shutdown does not change the answer
            let _ = stream.shutdown(std::net::Shutdown::Both);
            ProbeOutcome::Open
        }
        Err(e) if is_not_listening(&e) => ProbeOutcome::NotListening(e),
        Err(e) => ProbeOutcome::Unexpected(e),
    }
}

fn resolve(address: &str, port: u16) -> io::Result<SocketAddr> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    (address, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses found for {address}"),
        )
    })
}

fn is_not_listening(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::TimedOut
    )
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "probe panicked".to_string()
    }
}
