//! Connection Manager
//!
//! Resolves a live archive server for each request:
//!
//! 1. Walk the [`HostPool`] from its round-robin cursor, skipping endpoints in cooldown.
//! 2. Send the request to the first eligible endpoint. Connect errors and
//!    per-attempt timeouts mark the endpoint failed and move on to the next one.
//! 3. Follow 3xx replies to their `Location` target, up to `max_redirects` per call.
//! 4. Return the first non-redirect reply, whatever its status code. 4xx/5xx
//!    replies are handed back to the caller, never retried.
//!
//! When every endpoint is exhausted the call fails with
//! [`Error::NoServerAvailable`], optionally after pool-level retries.

pub mod pool;
pub mod redirect;

pub use pool::{Candidates, HostPool};

use crate::config::{ConnectionConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::with_retry;
use crate::types::{Endpoint, Event};
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, LOCATION};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, broadcast};
use tokio_util::io::ReaderStream;

/// Request body of a POST command
#[derive(Clone, Debug)]
pub enum Payload {
    /// File streamed from disk; re-opened for every attempt
    File(PathBuf),
    /// In-memory payload
    Bytes(Bytes),
}

/// One logical request, replayable against any endpoint
#[derive(Clone, Debug)]
pub enum Request {
    /// Simple command sent as an HTTP GET
    Get {
        /// Encoded command path, e.g. `STATUS?disk_id=d1`
        path: String,
    },
    /// Command with a body sent as an HTTP POST
    Post {
        /// Encoded command path, e.g. `ARCHIVE`
        path: String,
        /// Request body
        payload: Payload,
        /// Extra headers such as `Content-Type` and `Content-Disposition`
        headers: HeaderMap,
    },
}

impl Request {
    /// Encoded command path
    pub fn path(&self) -> &str {
        match self {
            Request::Get { path } | Request::Post { path, .. } => path,
        }
    }
}

/// Final reply of a request together with the endpoint that produced it
#[derive(Debug)]
pub struct Exchange {
    /// Endpoint that sent the final (non-redirect) reply
    pub endpoint: Endpoint,
    /// The reply; its body has not been read yet
    pub response: reqwest::Response,
}

/// How a single endpoint attempt failed
enum AttemptError {
    /// The endpoint (or its redirect target) could not be reached
    Unreachable { error: Error, at_origin: bool },
    /// Terminal for the whole call
    Fatal(Error),
}

/// Selects endpoints, follows redirects and fails over between archive servers
#[derive(Debug)]
pub struct ConnectionManager {
    http: reqwest::Client,
    pool: Mutex<HostPool>,
    request_timeout: Duration,
    max_redirects: usize,
    retry: RetryConfig,
    event_tx: broadcast::Sender<Event>,
}

impl ConnectionManager {
    /// Build the HTTP stack and the host pool
    ///
    /// # Errors
    /// Returns [`Error::Config`] for an empty endpoint list and
    /// [`Error::Network`] if the HTTP client cannot be built.
    pub fn new(
        endpoints: Vec<Endpoint>,
        config: &ConnectionConfig,
        event_tx: broadcast::Sender<Event>,
    ) -> Result<Self> {
        let pool = HostPool::new(endpoints, config.cooldown)?;

        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            http,
            pool: Mutex::new(pool),
            request_timeout: config.request_timeout,
            max_redirects: config.max_redirects,
            retry: config.retry.clone(),
            event_tx,
        })
    }

    /// Configured endpoints in priority order
    pub async fn endpoints(&self) -> Vec<Endpoint> {
        self.pool.lock().await.endpoints().cloned().collect()
    }

    /// Send `request` to a live endpoint and return its final reply
    ///
    /// # Errors
    /// - [`Error::NoServerAvailable`] when every endpoint is cooling down or failed
    /// - [`Error::TooManyRedirects`] / [`Error::InvalidRedirect`] for bad redirect chains
    /// - [`Error::Io`] when a file payload cannot be opened
    pub async fn execute(&self, request: &Request) -> Result<Exchange> {
        with_retry(&self.retry, || self.execute_once(request)).await
    }

    async fn execute_once(&self, request: &Request) -> Result<Exchange> {
        let Candidates {
            eligible,
            cooling_down,
        } = self.pool.lock().await.candidates(Instant::now());

        let mut attempted = 0;
        let mut redirects = 0;

        for (index, endpoint) in eligible {
            attempted += 1;
            match self.attempt(request, &endpoint, &mut redirects).await {
                Ok(exchange) => {
                    let recovered = self.pool.lock().await.mark_success(index);
                    if recovered {
                        tracing::info!(endpoint = %endpoint, "endpoint recovered");
                        self.emit_event(Event::EndpointRecovered { endpoint });
                    }
                    return Ok(exchange);
                }
                Err(AttemptError::Unreachable { error, at_origin }) => {
                    if at_origin {
                        self.pool.lock().await.mark_failed(index, Instant::now());
                        tracing::warn!(
                            endpoint = %endpoint,
                            error = %error,
                            "endpoint unreachable, failing over"
                        );
                        self.emit_event(Event::EndpointFailed {
                            endpoint,
                            error: error.to_string(),
                        });
                    } else {
                        tracing::warn!(
                            endpoint = %endpoint,
                            error = %error,
                            "redirect target unreachable, failing over"
                        );
                    }
                }
                Err(AttemptError::Fatal(error)) => return Err(error),
            }
        }

        tracing::warn!(attempted, cooling_down, "no archive server available");
        Err(Error::NoServerAvailable {
            attempted,
            cooling_down,
        })
    }

    /// Try one pool endpoint, following its redirect chain
    async fn attempt(
        &self,
        request: &Request,
        origin: &Endpoint,
        redirects: &mut usize,
    ) -> std::result::Result<Exchange, AttemptError> {
        let mut target = origin.clone();

        loop {
            let at_origin = target == *origin;
            let response = match self.send(request, &target).await {
                Ok(response) => response,
                Err(error @ (Error::Network(_) | Error::Timeout(_))) => {
                    return Err(AttemptError::Unreachable { error, at_origin });
                }
                Err(error) => return Err(AttemptError::Fatal(error)),
            };

            if !response.status().is_redirection() {
                let status = response.status();
                if status.is_success() {
                    tracing::debug!(endpoint = %target, status = status.as_u16(), "request served");
                } else {
                    tracing::warn!(
                        endpoint = %target,
                        status = status.as_u16(),
                        path = request.path(),
                        "archive server returned an error reply"
                    );
                }
                return Ok(Exchange {
                    endpoint: target,
                    response,
                });
            }

            *redirects += 1;
            if *redirects > self.max_redirects {
                tracing::warn!(max = self.max_redirects, path = request.path(), "redirect bound exceeded");
                return Err(AttemptError::Fatal(Error::TooManyRedirects {
                    max: self.max_redirects,
                }));
            }

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    AttemptError::Fatal(Error::InvalidRedirect(format!(
                        "{} reply without Location header",
                        response.status()
                    )))
                })?;
            let next = redirect::parse_location(location).map_err(AttemptError::Fatal)?;

            tracing::info!(from = %target, to = %next, hop = *redirects, "following redirect");
            self.emit_event(Event::RedirectFollowed {
                from: target,
                to: next.clone(),
                hop: *redirects,
            });
            target = next;
        }
    }

    /// Issue one HTTP exchange against `endpoint`
    ///
    /// GETs are bounded by the per-attempt timeout. POSTs upload their whole
    /// body before a reply can arrive, so only the connect timeout and the
    /// caller's cancellation token bound them.
    async fn send(&self, request: &Request, endpoint: &Endpoint) -> Result<reqwest::Response> {
        let builder = match request {
            Request::Get { path } => {
                let pending = self.http.get(endpoint.url(path)).send();
                return match tokio::time::timeout(self.request_timeout, pending).await {
                    Ok(result) => Ok(result?),
                    Err(_) => Err(Error::Timeout(self.request_timeout)),
                };
            }
            Request::Post {
                path,
                payload,
                headers,
            } => {
                let (body, length) = match payload {
                    Payload::Bytes(data) => (reqwest::Body::from(data.clone()), data.len() as u64),
                    Payload::File(file_path) => {
                        let file = tokio::fs::File::open(file_path).await?;
                        let length = file.metadata().await?.len();
                        (reqwest::Body::wrap_stream(ReaderStream::new(file)), length)
                    }
                };
                self.http
                    .post(endpoint.url(path))
                    .headers(headers.clone())
                    .header(CONTENT_LENGTH, length)
                    .body(body)
            }
        };

        Ok(builder.send().await?)
    }

    pub(crate) fn emit_event(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager(endpoints: Vec<Endpoint>, config: ConnectionConfig) -> ConnectionManager {
        let (tx, _) = broadcast::channel(64);
        ConnectionManager::new(endpoints, &config, tx).unwrap()
    }

    fn endpoint_of(server: &MockServer) -> Endpoint {
        let addr = server.address();
        Endpoint::new(addr.ip().to_string(), addr.port())
    }

    /// A local port with nothing listening on it
    async fn closed_endpoint() -> Endpoint {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        Endpoint::new("127.0.0.1", port)
    }

    fn get(p: &str) -> Request {
        Request::Get { path: p.into() }
    }

    #[tokio::test]
    async fn error_replies_are_returned_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/STATUS"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let cm = manager(vec![endpoint_of(&server)], ConnectionConfig::default());
        let exchange = cm.execute(&get("STATUS")).await.unwrap();
        assert_eq!(exchange.response.status().as_u16(), 500);
    }

    #[tokio::test]
    async fn unreachable_endpoint_enters_cooldown() {
        let dead = closed_endpoint().await;
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let (tx, mut rx) = broadcast::channel(64);
        let cm = ConnectionManager::new(
            vec![dead.clone(), endpoint_of(&server)],
            &ConnectionConfig::default(),
            tx,
        )
        .unwrap();

        let exchange = cm.execute(&get("STATUS")).await.unwrap();
        assert_eq!(exchange.endpoint, endpoint_of(&server));
        assert!(matches!(
            rx.recv().await.unwrap(),
            Event::EndpointFailed { endpoint, .. } if endpoint == dead
        ));

        let candidates = cm.pool.lock().await.candidates(Instant::now());
        assert_eq!(candidates.cooling_down, 1);
    }

    #[tokio::test]
    async fn all_endpoints_down_is_terminal() {
        let cm = manager(
            vec![closed_endpoint().await, closed_endpoint().await],
            ConnectionConfig::default(),
        );

        match cm.execute(&get("STATUS")).await.unwrap_err() {
            Error::NoServerAvailable {
                attempted,
                cooling_down,
            } => {
                assert_eq!(attempted, 2);
                assert_eq!(cooling_down, 0);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Both are now in cooldown; the next call fails without any attempt
        match cm.execute(&get("STATUS")).await.unwrap_err() {
            Error::NoServerAvailable {
                attempted,
                cooling_down,
            } => {
                assert_eq!(attempted, 0);
                assert_eq!(cooling_down, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn redirect_without_location_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(302))
            .mount(&server)
            .await;

        let cm = manager(vec![endpoint_of(&server)], ConnectionConfig::default());
        let err = cm.execute(&get("STATUS")).await.unwrap_err();
        assert_eq!(err.error_code(), "invalid_redirect");
    }

    #[tokio::test]
    async fn unreachable_redirect_target_fails_over_without_cooldown() {
        let dead = closed_endpoint().await;
        let redirector = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", dead.to_string()))
            .mount(&redirector)
            .await;
        let healthy = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&healthy)
            .await;

        let cm = manager(
            vec![endpoint_of(&redirector), endpoint_of(&healthy)],
            ConnectionConfig::default(),
        );
        let exchange = cm.execute(&get("STATUS")).await.unwrap();
        assert_eq!(exchange.endpoint, endpoint_of(&healthy));

        let candidates = cm.pool.lock().await.candidates(Instant::now());
        assert_eq!(candidates.cooling_down, 0);
    }

    #[tokio::test]
    async fn post_payload_is_sent_with_length() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ARCHIVE"))
            .and(wiremock::matchers::header("content-length", "5"))
            .and(wiremock::matchers::body_bytes(b"hello".to_vec()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let cm = manager(vec![endpoint_of(&server)], ConnectionConfig::default());
        let request = Request::Post {
            path: "ARCHIVE".into(),
            payload: Payload::Bytes(Bytes::from_static(b"hello")),
            headers: HeaderMap::new(),
        };
        let exchange = cm.execute(&request).await.unwrap();
        assert!(exchange.response.status().is_success());
    }

    #[tokio::test]
    async fn missing_payload_file_is_fatal() {
        let server = MockServer::start().await;
        let cm = manager(vec![endpoint_of(&server)], ConnectionConfig::default());
        let request = Request::Post {
            path: "ARCHIVE".into(),
            payload: Payload::File(PathBuf::from("/definitely/not/here.fits")),
            headers: HeaderMap::new(),
        };
        let err = cm.execute(&request).await.unwrap_err();
        assert_eq!(err.error_code(), "io_error");
    }
}
