//! Station configuration.

use std::time::Duration;

use crate::types::Ioa;

/// Default IEC 104 port.
pub const DEFAULT_PORT: u16 = 2404;

/// Default maximum number of unacknowledged sent I-frames.
pub const DEFAULT_K: u16 = 12;

/// Default number of received I-frames after which an S-frame is sent.
pub const DEFAULT_W: u16 = 8;

/// Default outbound queue capacity per session.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default periodic reporting interval.
pub const DEFAULT_PERIODIC_INTERVAL: Duration = Duration::from_secs(1);

/// Default address of the periodically reported measurement.
pub const DEFAULT_PERIODIC_IOA: u32 = 110;

/// Default common address of the station.
pub const DEFAULT_COMMON_ADDRESS: u16 = 1;

/// Broadcast common address.
pub const BROADCAST_ADDRESS: u16 = 0xFFFF;

/// Default limit of concurrently connected masters.
pub const DEFAULT_MAX_CONNECTIONS: usize = 5;

/// Outstation configuration.
///
/// ```rust
/// use std::time::Duration;
/// use voltage_outstation::StationConfig;
///
/// let config = StationConfig::new("127.0.0.1:2404")
///     .common_address(3)
///     .queue_capacity(16)
///     .periodic_interval(Some(Duration::from_millis(500)));
/// assert_eq!(config.common_address, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationConfig {
    /// Listen address (e.g., "0.0.0.0:2404")
    pub bind_address: String,
    /// Common address of this station
    pub common_address: u16,
    /// Max unacknowledged sent I-frames (k)
    pub k: u16,
    /// Received I-frames before acknowledging (w)
    pub w: u16,
    /// Outbound queue capacity per session
    pub queue_capacity: usize,
    /// Limit of concurrently connected masters
    pub max_connections: usize,
    /// Periodic reporting interval, `None` disables the reporter
    pub periodic_interval: Option<Duration>,
    /// Address of the periodically reported measurement
    pub periodic_ioa: Ioa,
}

impl StationConfig {
    /// Create a new configuration listening on `bind_address`.
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self {
            bind_address: bind_address.into(),
            ..Self::default()
        }
    }

    /// Set the common address.
    pub fn common_address(mut self, common_address: u16) -> Self {
        self.common_address = common_address;
        self
    }

    /// Set the send window (k). Clamped to at least 1.
    pub fn k(mut self, k: u16) -> Self {
        self.k = k.max(1);
        self
    }

    /// Set the acknowledge threshold (w). Clamped to at least 1.
    pub fn w(mut self, w: u16) -> Self {
        self.w = w.max(1);
        self
    }

    /// Set the outbound queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the maximum number of connected masters.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set or disable the periodic reporting interval.
    pub fn periodic_interval(mut self, interval: Option<Duration>) -> Self {
        self.periodic_interval = interval;
        self
    }

    /// Set the address of the periodic measurement.
    pub fn periodic_ioa(mut self, ioa: u32) -> Self {
        self.periodic_ioa = Ioa::new(ioa);
        self
    }

    /// Whether an ASDU with `common_address` is meant for this station.
    #[inline]
    pub fn accepts_address(&self, common_address: u16) -> bool {
        common_address == self.common_address
            || common_address == BROADCAST_ADDRESS
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{}", DEFAULT_PORT),
            common_address: DEFAULT_COMMON_ADDRESS,
            k: DEFAULT_K,
            w: DEFAULT_W,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            periodic_interval: Some(DEFAULT_PERIODIC_INTERVAL),
            periodic_ioa: Ioa::new(DEFAULT_PERIODIC_IOA),
        }
    }
}
