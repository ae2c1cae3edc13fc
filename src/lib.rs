//! # ngas-client
//!
//! Resilient client library for NG/AMS archive servers.
//!
//! ## Design Philosophy
//!
//! ngas-client is designed to be:
//! - **Failure tolerant** - Commands fail over between several interchangeable servers,
//!   skip failed servers for a cooldown period and follow redirects up to a bound
//! - **Sensible defaults** - Only the endpoint list is required
//! - **Library-first** - No CLI, purely a Rust crate for embedding
//! - **Event-driven** - Pushed files are announced to listeners and on an event channel
//!
//! ## Quick Start
//!
//! ```no_run
//! use ngas_client::{NgasClient, SubscribeOptions, config::EndpointConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = NgasClient::from_endpoints(vec![
//!         EndpointConfig::new("ngas1.example.org", 7777),
//!         EndpointConfig::new("ngas2.example.org", 7777),
//!     ])?;
//!
//!     let status = client.disk_status("disk-001").await?;
//!     println!("mounted at {:?}", status.mount_point());
//!
//!     // Receive files pushed by the archive
//!     client.subscribe(&SubscribeOptions::default()).await?;
//!     client
//!         .add_file_received_listener(Arc::new(|event: &ngas_client::FileReceivedEvent| -> ngas_client::Result<()> {
//!             println!("file #{} stored at {}", event.count, event.path.display());
//!             Ok(())
//!         }))
//!         .await?;
//!
//!     ngas_client::run_until_signal(&client).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Client facade
pub mod client;
/// Command codec
pub mod command;
/// Configuration types
pub mod config;
/// Connection Manager: endpoint selection, failover and redirects
pub mod connection;
/// Error types
pub mod error;
/// Subscription receiver for pushed files
pub mod receiver;
/// Retry logic with exponential backoff
pub mod retry;
/// Status / response model
pub mod status;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use client::{
    ArchiveOptions, CloneOptions, NgasClient, RemFileOptions, RetrieveOptions, SubscribeOptions,
};
pub use command::Command;
pub use config::{Config, ConnectionConfig, EndpointConfig, ReceiverConfig, RetryConfig};
pub use error::{Error, FramingError, Result};
pub use receiver::FileReceivedListener;
pub use status::{Status, StatusElement};
pub use types::{Endpoint, Event, FileReceivedEvent, ListenerId};

/// Wait for a termination signal, then end the subscription and stop the client.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with a `ctrl_c` fallback if registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Errors
/// Connectivity failures while sending UNSUBSCRIBE; the receiver is stopped regardless.
pub async fn run_until_signal(client: &NgasClient) -> Result<()> {
    wait_for_signal().await;

    let result = if client.is_subscribed().await {
        client.unsubscribe(None).await.map(|status| {
            if !status.ok() {
                tracing::warn!(error = ?status.error_description(), "UNSUBSCRIBE rejected");
            }
        })
    } else {
        Ok(())
    };
    client.shutdown().await;
    result
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                _ = sigint.recv() => tracing::info!("received SIGINT"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "could not register signal handlers, falling back to ctrl_c");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
    }
}
