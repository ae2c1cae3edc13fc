//! Error types for ngas-client
//!
//! This module provides the error taxonomy of the client:
//! - Connectivity errors (refused or timed-out endpoints), recovered by failover
//! - Protocol errors (unbounded or malformed redirect chains)
//! - Local precondition and configuration errors
//! - Receiver framing errors for inbound pushes
//!
//! Remote errors (non-200 replies) are not errors at this level: they are
//! returned as a [`Status`](crate::status::Status) with `ok == false`.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for ngas-client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for ngas-client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "endpoints")
        key: Option<String>,
    },

    /// Every endpoint in the pool was either cooling down or failed during this call
    #[error("no server available ({attempted} attempted, {cooling_down} cooling down)")]
    NoServerAvailable {
        /// Number of endpoints contacted during this call
        attempted: usize,
        /// Number of endpoints skipped because their cooldown had not elapsed
        cooling_down: usize,
    },

    /// The redirect chain for one command exceeded the configured bound
    #[error("too many redirects (more than {max})")]
    TooManyRedirects {
        /// The configured maximum number of redirects
        max: usize,
    },

    /// A redirect reply carried no usable Location header
    #[error("invalid redirect: {0}")]
    InvalidRedirect(String),

    /// Transport error from the HTTP stack
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// An attempt did not produce a response within the per-attempt timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Push framing error in the subscription receiver
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// Malformed status document
    #[error("malformed status document: {0}")]
    Xml(String),

    /// Subscription receiver could not be started or is gone
    #[error("receiver error: {0}")]
    Receiver(String),

    /// Listener registry used while no receiver exists
    #[error("no active subscription: call subscribe() first")]
    NoSubscription,

    /// Operation cancelled by its cancellation token
    #[error("operation cancelled")]
    Cancelled,
}

/// Framing errors raised while parsing an inbound push
#[derive(Debug, Error)]
pub enum FramingError {
    /// The header terminator was not found within the size bound
    #[error("header terminator not found within {limit} bytes")]
    HeaderTooLarge {
        /// Maximum number of header bytes accepted
        limit: usize,
    },

    /// The sender closed the connection before completing the header
    #[error("connection closed before end of header")]
    ConnectionClosed,

    /// No `filename="..."` token in the header
    #[error("filename not specified in push header")]
    MissingFilename,

    /// A `length:` token was present but not a valid byte count
    #[error("invalid length token: {0}")]
    InvalidLength(String),

    /// The sender closed the connection before delivering the declared body
    #[error("body ended after {received} of {expected} bytes")]
    IncompleteBody {
        /// Declared body length
        expected: u64,
        /// Bytes actually received
        received: u64,
    },
}

impl Error {
    /// Machine-readable error code (e.g. "no_server_available")
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::NoServerAvailable { .. } => "no_server_available",
            Error::TooManyRedirects { .. } => "too_many_redirects",
            Error::InvalidRedirect(_) => "invalid_redirect",
            Error::Network(_) => "network_error",
            Error::Timeout(_) => "timeout",
            Error::Io(_) => "io_error",
            Error::Framing(e) => match e {
                FramingError::HeaderTooLarge { .. } => "header_too_large",
                FramingError::ConnectionClosed => "connection_closed",
                FramingError::MissingFilename => "missing_filename",
                FramingError::InvalidLength(_) => "invalid_length",
                FramingError::IncompleteBody { .. } => "incomplete_body",
            },
            Error::Xml(_) => "xml_error",
            Error::Receiver(_) => "receiver_error",
            Error::NoSubscription => "no_subscription",
            Error::Cancelled => "cancelled",
        }
    }

    /// Whether the server answered but the exchange broke protocol
    ///
    /// Such errors end the call and are reported as a failure [`crate::Status`].
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Error::TooManyRedirects { .. } | Error::InvalidRedirect(_)
        )
    }

    /// Shorthand for a configuration error tied to a config key
    pub(crate) fn config(message: impl Into<String>, key: &str) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}
