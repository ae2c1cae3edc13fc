//! Core types for ngas-client

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::config::EndpointConfig;

/// One archive server address the client may contact
///
/// Identity is the `(host, port)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Hostname or address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Absolute URL of `path` on this endpoint
    pub(crate) fn url(&self, path: &str) -> String {
        format!("http://{}:{}/{}", self.host, self.port, path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<&EndpointConfig> for Endpoint {
    fn from(config: &EndpointConfig) -> Self {
        Self::new(config.host.clone(), config.port)
    }
}

/// Identifier returned when registering a file-received listener
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListenerId(pub u64);

impl ListenerId {
    /// Get the inner value
    pub fn get(&self) -> u64 {
        self.0
    }
}

/// Notification delivered after a pushed file has been stored
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReceivedEvent {
    /// Number of files received in this session, including this one
    pub count: u64,
    /// Where the body was stored
    pub path: PathBuf,
    /// Filename announced by the sender
    pub declared_filename: String,
    /// Body length announced by the sender
    pub declared_length: u64,
    /// When the transfer completed
    pub received_at: DateTime<Utc>,
}

/// Event emitted by the client
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// An endpoint failed at the connection level and entered its cooldown
    EndpointFailed {
        /// The failed endpoint
        endpoint: Endpoint,
        /// Error description
        error: String,
    },

    /// A previously failed endpoint served a request again
    EndpointRecovered {
        /// The recovered endpoint
        endpoint: Endpoint,
    },

    /// A redirect reply was followed
    RedirectFollowed {
        /// Server that sent the redirect
        from: Endpoint,
        /// Redirect target
        to: Endpoint,
        /// Number of redirects followed so far for this command
        hop: usize,
    },

    /// A command completed (any HTTP status)
    CommandCompleted {
        /// Command name, e.g. "STATUS"
        command: String,
        /// Endpoint that produced the final reply
        endpoint: Endpoint,
        /// HTTP status code
        http_code: u16,
    },

    /// The subscription receiver is accepting pushes
    SubscriptionStarted {
        /// URL the archive pushes to
        url: String,
    },

    /// The subscription receiver was stopped
    SubscriptionStopped {
        /// Files received during the session
        received: u64,
    },

    /// A pushed file was stored
    FileReceived(FileReceivedEvent),
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_and_display() {
        let endpoint = Endpoint::new("archive-1", 7777);
        assert_eq!(endpoint.to_string(), "archive-1:7777");
        assert_eq!(
            endpoint.url("STATUS?disk_id=d1"),
            "http://archive-1:7777/STATUS?disk_id=d1"
        );
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = Event::EndpointRecovered {
            endpoint: Endpoint::new("a", 1),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "endpoint_recovered");
        assert_eq!(json["endpoint"]["port"], 1);
    }
}
