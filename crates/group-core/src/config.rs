//! Group server configuration.

use crate::error::{GroupError, Result};
use std::net::SocketAddrV4;
use std::time::Duration;

/// Suspicion count used when none is configured.
pub const DEFAULT_FAILURE_THRESHOLD: u64 = 30;

/// Failure-detector cycle used when none is configured.
pub const DEFAULT_PING_CYCLE: Duration = Duration::from_secs(5);

/// Dial and read deadline for every outbound protocol call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry behaviour of the join/bootstrap sequence.
#[derive(Debug, Clone)]
pub struct JoinPolicy {
    /// Outer join attempts
    pub attempts: u32,
    /// Persisted-leader reads per attempt
    pub leader_reads: u32,
    /// Upper bound of the random backoff between reads and after
    /// transient join failures
    pub max_jitter: Duration,
    /// Backoff after `AddrInUse` or `UnknownErr`
    pub hard_backoff: Duration,
}

impl Default for JoinPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            leader_reads: 3,
            max_jitter: Duration::from_millis(1000),
            hard_backoff: Duration::from_secs(5),
        }
    }
}

/// Configuration of one group member.
#[derive(Debug, Clone)]
pub struct GroupConfig {
    /// Own address as `ipv4:port`; doubles as the listen address
    pub address: String,
    /// Interval between failure-detector rounds
    pub ping_cycle: Duration,
    /// Suspicion count at which a suspect process is declared failed
    pub failure_threshold: u64,
    /// Deadline for outbound protocol calls
    pub request_timeout: Duration,
    pub join: JoinPolicy,
}

impl GroupConfig {
    /// Configuration with defaults for everything but the address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ping_cycle: DEFAULT_PING_CYCLE,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            join: JoinPolicy::default(),
        }
    }

    /// Set the ping cycle; zero selects the default.
    pub fn with_ping_cycle(mut self, cycle: Duration) -> Self {
        self.ping_cycle = if cycle.is_zero() {
            DEFAULT_PING_CYCLE
        } else {
            cycle
        };
        self
    }

    /// Set the failure threshold; zero selects the default.
    pub fn with_failure_threshold(mut self, threshold: u64) -> Self {
        self.failure_threshold = if threshold == 0 {
            DEFAULT_FAILURE_THRESHOLD
        } else {
            threshold
        };
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_join_policy(mut self, join: JoinPolicy) -> Self {
        self.join = join;
        self
    }

    /// Check the own address.
    pub fn validate(&self) -> Result<()> {
        validate_address(&self.address)
    }
}

/// Accept only `a.b.c.d:port` with a non-zero port.
pub fn validate_address(address: &str) -> Result<()> {
    match address.parse::<SocketAddrV4>() {
        Ok(addr) if addr.port() != 0 => Ok(()),
        _ => Err(GroupError::InvalidAddress(address.to_string())),
    }
}
