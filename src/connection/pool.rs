//! Host pool with per-endpoint cooldown
//!
//! The pool keeps the configured endpoints in failover priority order together
//! with the time each one last failed. Selection starts at a rotating cursor
//! that moves past the endpoint that served the last successful call, so load
//! spreads across healthy endpoints instead of always landing on the first.

use crate::error::{Error, Result};
use crate::types::Endpoint;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct HostState {
    endpoint: Endpoint,
    last_failure: Option<Instant>,
}

/// Ordered endpoint list with failover memory
#[derive(Debug)]
pub struct HostPool {
    hosts: Vec<HostState>,
    cursor: usize,
    cooldown: Duration,
}

/// Endpoints to try for one call, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidates {
    /// `(pool index, endpoint)` pairs eligible right now
    pub eligible: Vec<(usize, Endpoint)>,
    /// Number of endpoints skipped because their cooldown has not elapsed
    pub cooling_down: usize,
}

impl HostPool {
    /// Create a pool
    ///
    /// # Errors
    /// Returns [`Error::Config`] when `endpoints` is empty.
    pub fn new(endpoints: Vec<Endpoint>, cooldown: Duration) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::config(
                "at least one archive server endpoint is required",
                "endpoints",
            ));
        }
        Ok(Self {
            hosts: endpoints
                .into_iter()
                .map(|endpoint| HostState {
                    endpoint,
                    last_failure: None,
                })
                .collect(),
            cursor: 0,
            cooldown,
        })
    }

    /// Number of endpoints in the pool
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Always false; construction rejects an empty pool
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Configured endpoints in priority order
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.hosts.iter().map(|h| &h.endpoint)
    }

    /// Endpoints eligible at `now`, starting from the round-robin cursor
    pub fn candidates(&self, now: Instant) -> Candidates {
        let len = self.hosts.len();
        let mut eligible = Vec::with_capacity(len);
        let mut cooling_down = 0;

        for offset in 0..len {
            let index = (self.cursor + offset) % len;
            let host = &self.hosts[index];
            if self.is_cooling_down(host, now) {
                tracing::debug!(endpoint = %host.endpoint, "skipping endpoint in cooldown");
                cooling_down += 1;
            } else {
                eligible.push((index, host.endpoint.clone()));
            }
        }

        Candidates {
            eligible,
            cooling_down,
        }
    }

    /// Record a connection-level failure of the endpoint at `index`
    pub fn mark_failed(&mut self, index: usize, now: Instant) {
        if let Some(host) = self.hosts.get_mut(index) {
            host.last_failure = Some(now);
        }
    }

    /// Record a successful exchange; returns true if the endpoint had failed before
    pub fn mark_success(&mut self, index: usize) -> bool {
        let len = self.hosts.len();
        let Some(host) = self.hosts.get_mut(index) else {
            return false;
        };
        self.cursor = (index + 1) % len;
        host.last_failure.take().is_some()
    }

    fn is_cooling_down(&self, host: &HostState, now: Instant) -> bool {
        match host.last_failure {
            Some(failed_at) => now.saturating_duration_since(failed_at) < self.cooldown,
            None => false,
        }
    }
}
