//! Client facade
//!
//! [`NgasClient`] ties the components together. Its methods are organized by domain:
//! - [`commands`] - simple GET commands (STATUS, CLONE, LABEL, REMFILE, ...)
//! - [`transfer`] - ARCHIVE uploads and RETRIEVE downloads
//! - [`subscription`] - SUBSCRIBE/UNSUBSCRIBE and the local push receiver

mod commands;
mod subscription;
mod transfer;

pub use commands::{CloneOptions, RemFileOptions};
pub use subscription::SubscribeOptions;
pub use transfer::{ArchiveOptions, RetrieveOptions};

use crate::command::{Command, Directives, encode};
use crate::config::{Config, EndpointConfig};
use crate::connection::{ConnectionManager, Exchange, Request};
use crate::error::{Error, Result};
use crate::receiver::ReceiverHandle;
use crate::status::Status;
use crate::types::{Endpoint, Event};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Subscription session owned by one client
#[derive(Debug, Default)]
struct SubscriptionState {
    /// Running push receiver, if any
    receiver: Option<Arc<ReceiverHandle>>,
    /// Default subscription URL of the running receiver
    default_url: Option<String>,
    /// Whether the default URL is subscribed
    subscribed: bool,
}

/// Resilient client for NG/AMS archive servers
///
/// Commands fail over between the configured endpoints; subscriptions run a
/// local receiver that stores files pushed back by the archive.
///
/// # Example
///
/// ```no_run
/// use ngas_client::{NgasClient, config::EndpointConfig};
///
/// # async fn example() -> ngas_client::Result<()> {
/// let client = NgasClient::from_endpoints(vec![
///     EndpointConfig::new("ngas1.example.org", 7777),
///     EndpointConfig::new("ngas2.example.org", 7777),
/// ])?;
///
/// let status = client.status().await?;
/// if status.ok() {
///     println!("archive state: {:?}", status.state());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct NgasClient {
    config: Config,
    connection: ConnectionManager,
    directives: std::sync::Mutex<Directives>,
    subscription: tokio::sync::Mutex<SubscriptionState>,
    event_tx: broadcast::Sender<Event>,
}

impl NgasClient {
    /// Create a client
    ///
    /// # Errors
    /// Returns [`Error::Config`](crate::Error::Config) for an invalid configuration
    /// (e.g. no endpoints) before any network activity.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(1000);
        let endpoints = config.endpoints.iter().map(Endpoint::from).collect();
        let connection = ConnectionManager::new(endpoints, &config.connection, event_tx.clone())?;

        tracing::info!(
            endpoints = config.endpoints.len(),
            cooldown = ?config.connection.cooldown,
            max_redirects = config.connection.max_redirects,
            "archive client created"
        );

        Ok(Self {
            config,
            connection,
            directives: std::sync::Mutex::new(Directives::default()),
            subscription: tokio::sync::Mutex::new(SubscriptionState::default()),
            event_tx,
        })
    }

    /// Create a client with default settings for the given endpoints
    pub fn from_endpoints(endpoints: Vec<EndpointConfig>) -> Result<Self> {
        Self::new(Config::with_endpoints(endpoints))
    }

    /// The configuration this client was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscribe to client events
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Apply a processing plug-in to the next command only
    pub fn set_processing(&self, name: impl Into<String>) {
        self.directives
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_processing(name);
    }

    /// Apply processing parameters to the next command only
    pub fn set_processing_parameters(&self, pars: impl Into<String>) {
        self.directives
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_processing_parameters(pars);
    }

    /// Send an arbitrary GET command and wrap its reply
    ///
    /// Non-200 replies and broken redirect chains are returned as a
    /// [`Status`] with `ok() == false`.
    ///
    /// # Errors
    /// Connectivity failures and timeouts; see [`ConnectionManager::execute`].
    pub async fn send_command(&self, command: Command) -> Result<Status> {
        let name = command.name().to_string();
        let outcome = match self.execute_get(command).await {
            Ok(exchange) => self.read_status(&name, exchange).await,
            Err(e) => Err(e),
        };
        settle(&name, outcome)
    }

    /// Stop any running receiver; no UNSUBSCRIBE is sent
    pub async fn shutdown(&self) {
        let receiver = self.subscription.lock().await.receiver.clone();
        if let Some(receiver) = &receiver {
            let received = receiver.stop().await;
            self.emit_event(Event::SubscriptionStopped { received });
        }
        self.release_receiver(receiver.as_ref()).await;
        tracing::info!("archive client shut down");
    }

    /// Encode a GET command, consuming pending directives, and execute it
    pub(crate) async fn execute_get(&self, command: Command) -> Result<Exchange> {
        let path = self.encode(command);
        tracing::debug!(path = %path, "sending command");
        self.connection.execute(&Request::Get { path }).await
    }

    /// Encode a GET command: `time_out` first when configured, then directives
    fn encode(&self, command: Command) -> String {
        let command = match self.config.connection.timeout_parameter {
            Some(timeout) => command.param("time_out", timeout.as_secs().to_string()),
            None => command,
        };
        self.encode_with_directives(command)
    }

    /// Encode a command with the pending directives only
    pub(crate) fn encode_with_directives(&self, command: Command) -> String {
        let mut directives = self.directives.lock().unwrap_or_else(|e| e.into_inner());
        encode(&command, &mut directives)
    }

    /// Read the reply body and build the command's status
    pub(crate) async fn read_status(&self, name: &str, exchange: Exchange) -> Result<Status> {
        let Exchange { endpoint, response } = exchange;
        let code = response.status();
        let reason = code.canonical_reason().unwrap_or_default().to_string();
        let limit = self.config.connection.request_timeout;
        let body = tokio::time::timeout(limit, response.text())
            .await
            .map_err(|_| Error::Timeout(limit))??;

        if !code.is_success() {
            tracing::warn!(command = name, endpoint = %endpoint, status = code.as_u16(), "command failed");
        }
        self.emit_event(Event::CommandCompleted {
            command: name.to_string(),
            endpoint,
            http_code: code.as_u16(),
        });

        Ok(Status::from_http(code.as_u16(), reason, Some(body)))
    }

    pub(crate) fn emit_event(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }
}

/// Turn a protocol error into the call's failure status
pub(crate) fn settle(command: &str, outcome: Result<Status>) -> Result<Status> {
    match outcome {
        Err(e) if e.is_protocol() => {
            tracing::warn!(command, error = %e, "command ended by protocol error");
            Ok(Status::from_error(&e))
        }
        other => other,
    }
}
