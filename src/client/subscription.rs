//! Subscription lifecycle
//!
//! `subscribe` starts (or reuses) the local push receiver, waits until it can
//! accept connections and only then asks the archive to start pushing.
//! `unsubscribe` tells the archive to stop and releases the receiver.

use super::NgasClient;
use crate::command::Command;
use crate::error::{Error, Result};
use crate::receiver::{FileReceivedListener, Receiver, ReceiverHandle};
use crate::status::Status;
use crate::types::{Event, ListenerId};
use std::sync::Arc;

/// Parameters of a SUBSCRIBE command
///
/// Absent fields are omitted from the command.
#[derive(Clone, Debug, Default)]
pub struct SubscribeOptions {
    /// Filter plug-in applied by the archive before pushing
    pub filter_plug_in: Option<String>,
    /// Parameters for the filter plug-in
    pub plug_in_pars: Option<String>,
    /// Delivery priority; higher numbers mean lower priority
    pub priority: Option<String>,
    /// Only push files archived after this date
    pub start_date: Option<String>,
    /// Where the archive should push to (default: this client's receiver)
    pub url: Option<String>,
}

impl NgasClient {
    /// Start receiving pushed files
    ///
    /// If the default URL is already subscribed, nothing is sent and a
    /// successful local status is returned.
    ///
    /// # Errors
    /// [`Error::Receiver`] when the local receiver cannot bind or does not
    /// become ready; nothing is sent to the archive in that case.
    pub async fn subscribe(&self, options: &SubscribeOptions) -> Result<Status> {
        let mut state = self.subscription.lock().await;

        let reusable = state.receiver.clone().filter(|r| r.is_running());
        let started_here = reusable.is_none();
        let receiver = match reusable {
            Some(receiver) => receiver,
            None => {
                let handle = Arc::new(
                    Receiver::new(self.config.receiver.clone())
                        .with_events(self.event_tx.clone())
                        .start()
                        .await?,
                );
                state.receiver = Some(handle.clone());
                state.default_url = Some(self.default_url(handle.local_addr().port()));
                state.subscribed = false;
                handle
            }
        };

        let default_url = state
            .default_url
            .clone()
            .unwrap_or_else(|| self.default_url(receiver.local_addr().port()));
        let url = options.url.clone().unwrap_or_else(|| default_url.clone());
        let is_default = url == default_url;

        if is_default && state.subscribed {
            tracing::warn!(url = %url, "already subscribed, SUBSCRIBE not sent");
            return Ok(Status::local(
                true,
                format!("{url} is already subscribed; no SUBSCRIBE sent"),
            ));
        }
        drop(state);

        if !is_default {
            tracing::info!(url = %url, default = %default_url, "subscribing a non-default URL");
        }

        let command = Command::new("SUBSCRIBE")
            .param_opt("filter_plug_in", options.filter_plug_in.as_deref())
            .param_opt("plug_in_pars", options.plug_in_pars.as_deref())
            .param_opt("priority", options.priority.as_deref())
            .param_opt("start_date", options.start_date.as_deref())
            .param("url", url.as_str());

        let result = self.send_command(command).await;

        let mut state = self.subscription.lock().await;
        let current = state
            .receiver
            .as_ref()
            .is_some_and(|r| Arc::ptr_eq(r, &receiver));
        match &result {
            Ok(status) if status.ok() => {
                if is_default && current {
                    state.subscribed = true;
                }
                drop(state);
                tracing::info!(url = %url, "subscription active");
                self.emit_event(Event::SubscriptionStarted { url });
            }
            _ => {
                if started_here && current && !state.subscribed {
                    state.receiver = None;
                    state.default_url = None;
                    drop(state);
                    receiver.stop().await;
                }
            }
        }

        result
    }

    /// Stop receiving pushed files
    ///
    /// `url` defaults to this client's receiver URL; if that URL is not
    /// subscribed nothing is sent. The receiver is stopped in every case,
    /// after any in-flight push has completed. Receiver queries keep
    /// answering while the stop waits for that push.
    ///
    /// # Errors
    /// Connectivity failures while sending UNSUBSCRIBE.
    pub async fn unsubscribe(&self, url: Option<&str>) -> Result<Status> {
        let (url, is_default, subscribed, receiver) = {
            let state = self.subscription.lock().await;
            let default_url = state
                .default_url
                .clone()
                .unwrap_or_else(|| self.default_url(self.config.receiver.port));
            let url = url.map_or_else(|| default_url.clone(), str::to_string);
            let is_default = url == default_url;
            (url, is_default, state.subscribed, state.receiver.clone())
        };

        let result = if is_default && !subscribed {
            tracing::warn!(url = %url, "not subscribed, UNSUBSCRIBE not sent");
            Ok(Status::local(
                true,
                format!("{url} is not subscribed; no UNSUBSCRIBE sent"),
            ))
        } else {
            self.send_command(Command::new("UNSUBSCRIBE").param("url", url.as_str()))
                .await
        };

        if let Some(receiver) = &receiver {
            let received = receiver.stop().await;
            self.emit_event(Event::SubscriptionStopped { received });
        }
        self.release_receiver(receiver.as_ref()).await;

        result
    }

    /// Forget the receiver if it is still the one that was stopped
    pub(crate) async fn release_receiver(&self, stopped: Option<&Arc<ReceiverHandle>>) {
        let mut state = self.subscription.lock().await;
        let same = match (state.receiver.as_ref(), stopped) {
            (Some(current), Some(stopped)) => Arc::ptr_eq(current, stopped),
            (current, stopped) => current.is_none() && stopped.is_none(),
        };
        if same {
            state.receiver = None;
            state.default_url = None;
            state.subscribed = false;
        }
    }

    /// Whether the default receiver URL is subscribed
    pub async fn is_subscribed(&self) -> bool {
        self.subscription.lock().await.subscribed
    }

    /// URL the archive pushes to while a receiver is running
    pub async fn subscription_url(&self) -> Option<String> {
        self.subscription.lock().await.default_url.clone()
    }

    /// Whether the receiver is storing a push right now
    pub async fn is_receiving_file(&self) -> bool {
        self.subscription
            .lock()
            .await
            .receiver
            .as_ref()
            .is_some_and(|r| r.is_receiving())
    }

    /// Files received during the current session
    pub async fn received_count(&self) -> u64 {
        self.subscription
            .lock()
            .await
            .receiver
            .as_ref()
            .map_or(0, |r| r.received_count())
    }

    /// Register a listener for stored pushes
    ///
    /// # Errors
    /// [`Error::NoSubscription`] when no receiver is running.
    pub async fn add_file_received_listener(
        &self,
        listener: Arc<dyn FileReceivedListener>,
    ) -> Result<ListenerId> {
        let state = self.subscription.lock().await;
        let receiver = state.receiver.as_ref().ok_or(Error::NoSubscription)?;
        Ok(receiver.add_listener(listener))
    }

    /// Unregister a listener; `Ok(false)` if it was not registered
    ///
    /// # Errors
    /// [`Error::NoSubscription`] when no receiver is running.
    pub async fn remove_file_received_listener(&self, id: ListenerId) -> Result<bool> {
        let state = self.subscription.lock().await;
        let receiver = state.receiver.as_ref().ok_or(Error::NoSubscription)?;
        Ok(receiver.remove_listener(id))
    }

    fn default_url(&self, port: u16) -> String {
        format!(
            "http://{}:{}/ARCHIVE",
            self.config.receiver.advertised_host(),
            port
        )
    }
}
