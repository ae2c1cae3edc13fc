//! Configuration types for ngas-client

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for [`NgasClient`](crate::NgasClient)
///
/// Fields are organized into logical sub-configs:
/// - `endpoints` - the ordered failover list of archive servers
/// - [`connection`](ConnectionConfig) - timeouts, cooldown, redirect bound, retries
/// - [`receiver`](ReceiverConfig) - the local listener used by subscriptions
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Archive server endpoints, in failover priority order (at least one required)
    pub endpoints: Vec<EndpointConfig>,

    /// HTTP command path settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Subscription receiver settings
    #[serde(default)]
    pub receiver: ReceiverConfig,
}

impl Config {
    /// Build a configuration with default settings for the given endpoints
    pub fn with_endpoints(endpoints: Vec<EndpointConfig>) -> Self {
        Self {
            endpoints,
            ..Default::default()
        }
    }

    /// Check the configuration before any network activity
    ///
    /// # Errors
    /// Returns [`Error::Config`] for an empty endpoint list, an endpoint without
    /// a host, a zero receiver block size or a zero header bound.
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(Error::config(
                "at least one archive server endpoint is required",
                "endpoints",
            ));
        }
        if let Some(bad) = self.endpoints.iter().find(|e| e.host.trim().is_empty()) {
            return Err(Error::config(
                format!("endpoint with port {} has an empty host", bad.port),
                "endpoints",
            ));
        }
        if self.receiver.block_size == 0 {
            return Err(Error::config(
                "block size must be greater than zero",
                "receiver.block_size",
            ));
        }
        if self.receiver.max_header_bytes == 0 {
            return Err(Error::config(
                "header bound must be greater than zero",
                "receiver.max_header_bytes",
            ));
        }
        if self.receiver.header_timeout.is_zero() {
            return Err(Error::config(
                "header timeout must be greater than zero",
                "receiver.header_timeout",
            ));
        }
        Ok(())
    }
}

/// Archive server endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Server hostname or address
    pub host: String,

    /// Server port (NG/AMS servers conventionally listen on 7777)
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl EndpointConfig {
    /// Create an endpoint configuration
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Settings for the HTTP command path (Connection Manager)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Timeout for establishing a TCP connection to one endpoint (default: 10 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Per-attempt timeout for GET commands (default: 60 seconds)
    ///
    /// Bounds the wait for response headers and, separately, the read of a
    /// status reply body. Archive uploads and retrieve downloads are not
    /// bounded by this timeout; they are cancelled through a cancellation
    /// token instead.
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// How long a failed endpoint is skipped before it is tried again (default: 60 seconds)
    ///
    /// Zero means a failed endpoint is eligible again on the very next call.
    #[serde(default = "default_cooldown", with = "duration_serde")]
    pub cooldown: Duration,

    /// Maximum number of redirects followed for one command (default: 20)
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// When set, every GET command carries a trailing `time_out=<secs>` parameter
    #[serde(default, with = "optional_duration_serde")]
    pub timeout_parameter: Option<Duration>,

    /// Pool-level retries once every endpoint has failed (default: none)
    #[serde(default = "default_pool_retry")]
    pub retry: RetryConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            cooldown: default_cooldown(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
            timeout_parameter: None,
            retry: default_pool_retry(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A retry policy that never retries
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }
}

/// Settings for the subscription receiver
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Local address the receiver binds to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// Local port the receiver listens on (default: 7778, 0 = ephemeral)
    #[serde(default = "default_receiver_port")]
    pub port: u16,

    /// Directory where pushed files are stored (default: "./incoming")
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Number of bytes copied per read while storing a push (default: 1024)
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Upper bound on the size of a push header (default: 64 KiB)
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,

    /// How long a connection may take to deliver its push header (default: 30 seconds)
    ///
    /// The body that follows is not time-limited.
    #[serde(default = "default_header_timeout", with = "duration_serde")]
    pub header_timeout: Duration,

    /// How long subscribe waits for the receiver to become ready (default: 10 seconds)
    #[serde(default = "default_ready_timeout", with = "duration_serde")]
    pub ready_timeout: Duration,

    /// How long a stop request waits for an in-flight push (default: 30 seconds)
    #[serde(default = "default_shutdown_timeout", with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Host name advertised in the default subscription URL
    ///
    /// Defaults to the `HOSTNAME` environment variable, falling back to "localhost".
    #[serde(default)]
    pub advertised_host: Option<String>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_receiver_port(),
            storage_dir: default_storage_dir(),
            block_size: default_block_size(),
            max_header_bytes: default_max_header_bytes(),
            header_timeout: default_header_timeout(),
            ready_timeout: default_ready_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
            advertised_host: None,
        }
    }
}

impl ReceiverConfig {
    /// Host name to put into the default subscription URL
    pub fn advertised_host(&self) -> String {
        self.advertised_host
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| "localhost".to_string())
    }
}

// Default value functions
fn default_server_port() -> u16 {
    7777
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_cooldown() -> Duration {
    Duration::from_secs(60)
}

fn default_max_redirects() -> usize {
    20
}

fn default_user_agent() -> String {
    format!("ngas-client/{}", env!("CARGO_PKG_VERSION"))
}

fn default_pool_retry() -> RetryConfig {
    RetryConfig::disabled()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_receiver_port() -> u16 {
    7778
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("incoming")
}

fn default_block_size() -> usize {
    1024
}

fn default_max_header_bytes() -> usize {
    64 * 1024
}

fn default_header_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_ready_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
