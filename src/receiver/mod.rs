//! Subscription Receiver
//!
//! A local listener that accepts files pushed by an archive server once a
//! subscription is active. Lifecycle:
//!
//! ```text
//! Created -> Binding -> Ready -> (Receiving <-> Idle) -> Stopped
//! ```
//!
//! [`Receiver::start`] spawns the listener task and waits for its readiness
//! signal, so a SUBSCRIBE command is only sent once pushes can be accepted.
//! Each connection is served on its own task, so a slow or silent sender
//! stalls only its own connection. A sender must deliver its header within
//! `header_timeout`; the body is not time-limited. Each stored push
//! increments the session counter and is announced to every registered
//! listener. [`ReceiverHandle::stop`] closes the socket, drops connections
//! still waiting for a header and lets body transfers in progress finish.

pub mod framing;
pub mod notifier;

pub use notifier::{FileReceivedListener, Notifier};

use crate::config::ReceiverConfig;
use crate::error::{Error, FramingError, Result};
use crate::types::{Event, FileReceivedEvent, ListenerId};
use chrono::Utc;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, broadcast, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Pause after a failed accept (e.g. file descriptor exhaustion)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// State shared between the listener task and its handle
#[derive(Debug)]
struct Shared {
    storage_dir: PathBuf,
    block_size: usize,
    max_header_bytes: usize,
    header_timeout: Duration,
    /// Connections currently being served
    in_flight: AtomicUsize,
    /// Next `incoming_<n>` index; reserved when a body transfer starts
    next_index: AtomicU64,
    received: AtomicU64,
    notifier: Notifier,
    event_tx: Option<broadcast::Sender<Event>>,
}

/// Receiver configured but not yet started
#[derive(Debug)]
pub struct Receiver {
    config: ReceiverConfig,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl Receiver {
    /// Create a receiver from its configuration
    pub fn new(config: ReceiverConfig) -> Self {
        Self {
            config,
            event_tx: None,
        }
    }

    /// Also publish a [`Event::FileReceived`] on `event_tx` for every stored push
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Bind the listener and wait until it is ready to accept pushes
    ///
    /// # Errors
    /// - [`Error::Io`] when the storage directory cannot be created
    /// - [`Error::Receiver`] when binding fails or readiness is not signalled within `ready_timeout`
    pub async fn start(self) -> Result<ReceiverHandle> {
        let Receiver { config, event_tx } = self;

        tokio::fs::create_dir_all(&config.storage_dir).await?;

        let shared = Arc::new(Shared {
            storage_dir: config.storage_dir.clone(),
            block_size: config.block_size.max(1),
            max_header_bytes: config.max_header_bytes,
            header_timeout: config.header_timeout,
            in_flight: AtomicUsize::new(0),
            next_index: AtomicU64::new(0),
            received: AtomicU64::new(0),
            notifier: Notifier::new(),
            event_tx,
        });

        let bind_addr = SocketAddr::new(config.bind_address, config.port);
        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(run(bind_addr, shared.clone(), cancel.clone(), ready_tx));

        let local_addr = match tokio::time::timeout(config.ready_timeout, ready_rx).await {
            Ok(Ok(Ok(addr))) => addr,
            Ok(Ok(Err(e))) => {
                return Err(Error::Receiver(format!("cannot bind {bind_addr}: {e}")));
            }
            Ok(Err(_)) => {
                return Err(Error::Receiver(
                    "receiver task ended before signalling readiness".into(),
                ));
            }
            Err(_) => {
                cancel.cancel();
                task.abort();
                return Err(Error::Receiver(format!(
                    "receiver not ready within {:?}",
                    config.ready_timeout
                )));
            }
        };

        tracing::info!(addr = %local_addr, storage_dir = %config.storage_dir.display(), "receiver ready");

        Ok(ReceiverHandle {
            local_addr,
            shared,
            cancel,
            task: Mutex::new(Some(task)),
            shutdown_timeout: config.shutdown_timeout,
        })
    }
}

/// Handle to a running receiver session
///
/// Dropping the handle requests a stop without waiting for it.
#[derive(Debug)]
pub struct ReceiverHandle {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    shutdown_timeout: Duration,
}

impl ReceiverHandle {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether any push connection is being served right now
    pub fn is_receiving(&self) -> bool {
        self.shared.in_flight.load(Ordering::SeqCst) > 0
    }

    /// Number of pushes stored during this session
    pub fn received_count(&self) -> u64 {
        self.shared.received.load(Ordering::SeqCst)
    }

    /// Whether the listener task is still accepting
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Register a file-received listener
    pub fn add_listener(&self, listener: Arc<dyn FileReceivedListener>) -> ListenerId {
        self.shared.notifier.register(listener)
    }

    /// Unregister a file-received listener; returns false if it was unknown
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.notifier.unregister(id)
    }

    /// Stop accepting and release the socket
    ///
    /// Body transfers in progress may finish first, bounded by
    /// `shutdown_timeout`; after that the task and its connections are
    /// aborted. Returns the session's received count.
    pub async fn stop(&self) -> u64 {
        self.cancel.cancel();

        if let Some(task) = self.task.lock().await.take() {
            let abort = task.abort_handle();
            match tokio::time::timeout(self.shutdown_timeout, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "receiver task ended abnormally"),
                Err(_) => {
                    tracing::warn!(
                        timeout = ?self.shutdown_timeout,
                        "in-flight push did not finish in time, aborting receiver"
                    );
                    abort.abort();
                }
            }
            tracing::info!(addr = %self.local_addr, received = self.received_count(), "receiver stopped");
        }

        self.received_count()
    }
}

impl Drop for ReceiverHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Listener task: bind, signal readiness, then accept until cancelled
async fn run(
    bind_addr: SocketAddr,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    ready_tx: oneshot::Sender<std::io::Result<SocketAddr>>,
) {
    let listener = match TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %bind_addr, error = %e, "receiver bind failed");
            ready_tx.send(Err(e)).ok();
            return;
        }
    };

    let local_addr = match listener.local_addr() {
        Ok(addr) => addr,
        Err(e) => {
            ready_tx.send(Err(e)).ok();
            return;
        }
    };
    if ready_tx.send(Ok(local_addr)).is_err() {
        // start() gave up waiting
        return;
    }

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                log_join(joined);
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(serve(shared.clone(), stream, peer, cancel.clone()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }

    drop(listener);
    if !connections.is_empty() {
        tracing::info!(connections = connections.len(), "waiting for in-flight pushes");
    }
    while let Some(joined) = connections.join_next().await {
        log_join(joined);
    }
}

fn log_join(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::warn!(error = %e, "push connection task ended abnormally");
    }
}

/// Handle one inbound connection; never fails the listener
async fn serve(
    shared: Arc<Shared>,
    mut stream: TcpStream,
    peer: SocketAddr,
    cancel: CancellationToken,
) {
    tracing::debug!(peer = %peer, "push connection accepted");

    shared.in_flight.fetch_add(1, Ordering::SeqCst);
    let outcome = receive_push(&shared, &mut stream, &cancel).await;
    shared.in_flight.fetch_sub(1, Ordering::SeqCst);

    match outcome {
        Ok(Some(event)) => {
            tracing::info!(
                peer = %peer,
                count = event.count,
                filename = %event.declared_filename,
                bytes = event.declared_length,
                path = %event.path.display(),
                "push stored"
            );
            shared.notifier.notify(&event);
            if let Some(tx) = &shared.event_tx {
                tx.send(Event::FileReceived(event)).ok();
            }
        }
        Ok(None) => {}
        Err(Error::Cancelled) => {
            tracing::debug!(peer = %peer, "receiver stopping, dropped connection without header");
        }
        Err(e) => tracing::warn!(peer = %peer, error = %e, "push rejected"),
    }

    stream.shutdown().await.ok();
}

/// Read one push off `stream`
///
/// Returns `Ok(None)` for a push without a length token: it is acknowledged
/// but nothing is stored.
///
/// Waiting for the header ends when `cancel` fires or `header_timeout` elapses.
async fn receive_push<S>(
    shared: &Shared,
    stream: &mut S,
    cancel: &CancellationToken,
) -> Result<Option<FileReceivedEvent>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let raw = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        read = tokio::time::timeout(
            shared.header_timeout,
            framing::read_header(stream, shared.max_header_bytes),
        ) => read.map_err(|_| Error::Timeout(shared.header_timeout))??,
    };
    let header = framing::parse_header(&raw.text)?;

    let Some(length) = header.length else {
        tracing::warn!(filename = %header.filename, "push without length token, nothing stored");
        stream.write_all(framing::ACK).await?;
        return Ok(None);
    };

    let index = shared.next_index.fetch_add(1, Ordering::SeqCst);
    let path = shared.storage_dir.join(format!("incoming_{index}"));

    if let Err(e) = store_body(&path, &raw.body_prefix, stream, length, shared.block_size).await {
        tokio::fs::remove_file(&path).await.ok();
        return Err(e);
    }

    let count = shared.received.fetch_add(1, Ordering::SeqCst) + 1;

    if let Err(e) = stream.write_all(framing::ACK).await {
        tracing::warn!(error = %e, count, "could not acknowledge stored push");
    }

    Ok(Some(FileReceivedEvent {
        count,
        path,
        declared_filename: header.filename,
        declared_length: length,
        received_at: Utc::now(),
    }))
}

/// Copy exactly `length` body bytes into a fresh file at `path`
async fn store_body<R>(
    path: &Path,
    prefix: &[u8],
    reader: &mut R,
    length: u64,
    block_size: usize,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut file = tokio::fs::File::create(path).await?;

    let from_prefix = prefix.len().min(usize::try_from(length).unwrap_or(usize::MAX));
    file.write_all(&prefix[..from_prefix]).await?;
    let mut written = from_prefix as u64;

    let mut buf = vec![0u8; block_size];
    while written < length {
        let want = usize::try_from(length - written).map_or(block_size, |r| r.min(block_size));
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(FramingError::IncompleteBody {
                expected: length,
                received: written,
            }
            .into());
        }
        file.write_all(&buf[..n]).await?;
        written += n as u64;
    }

    file.flush().await?;
    Ok(())
}
