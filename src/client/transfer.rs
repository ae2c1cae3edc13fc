//! ARCHIVE uploads and RETRIEVE downloads
//!
//! Both go through the Connection Manager, so they fail over and follow
//! redirects like any other command. Bodies are streamed, never buffered
//! whole, and both directions stop promptly when their cancellation token
//! fires.

use super::{NgasClient, settle};
use crate::command::Command;
use crate::connection::{Exchange, Payload, Request};
use crate::error::{Error, Result};
use crate::status::Status;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, HeaderMap, HeaderValue};
use std::future::Future;
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Options of an ARCHIVE command
#[derive(Clone, Debug)]
pub struct ArchiveOptions {
    /// MIME type of the payload (required)
    pub content_type: Option<String>,
    /// Archive without creating a new file version (default: true)
    pub no_versioning: bool,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            content_type: None,
            no_versioning: true,
        }
    }
}

impl ArchiveOptions {
    /// Options for a payload of the given MIME type
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            ..Default::default()
        }
    }
}

/// Options of a RETRIEVE command
#[derive(Clone, Debug, Default)]
pub struct RetrieveOptions {
    /// File to retrieve
    pub file_id: String,
    /// Specific version (latest if absent)
    pub file_version: Option<String>,
    /// Name of an internal server file to retrieve instead of an archived one
    pub internal: Option<String>,
    /// Retrieve the server log (`ng_log` flag)
    pub log: bool,
}

impl RetrieveOptions {
    /// Retrieve the latest version of `file_id`
    pub fn new(file_id: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            ..Default::default()
        }
    }

    fn command(&self) -> Command {
        let command = Command::new("RETRIEVE")
            .param("file_id", self.file_id.as_str())
            .param_opt("file_version", self.file_version.as_deref())
            .param_opt("internal", self.internal.as_deref());
        if self.log {
            command.flag("ng_log")
        } else {
            command
        }
    }
}

/// `Content-Disposition` value of an ARCHIVE request
fn content_disposition(filename: &str, no_versioning: bool) -> String {
    let mut value = format!("attachment;filename=\"{filename}\";wait=\"1\";");
    if !no_versioning {
        value.push_str(" no_versioning=0");
    }
    value
}

/// Await `future` unless `cancel` fires first
async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = future => result,
    }
}

impl NgasClient {
    /// Archive a file from disk
    ///
    /// A missing file or content type is reported as a local failure status
    /// before any network activity.
    ///
    /// # Errors
    /// Connectivity failures, or [`Error::Cancelled`] if `cancel` fires.
    pub async fn archive(
        &self,
        path: impl AsRef<Path>,
        options: &ArchiveOptions,
        cancel: &CancellationToken,
    ) -> Result<Status> {
        let path = path.as_ref();

        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {}
            _ => {
                tracing::warn!(path = %path.display(), "file to archive does not exist");
                return Ok(Status::local(
                    false,
                    format!("file to archive does not exist: {}", path.display()),
                ));
            }
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.archive_payload(Payload::File(path.to_path_buf()), &filename, options, cancel)
            .await
    }

    /// Archive an in-memory payload under `filename`
    ///
    /// # Errors
    /// Connectivity failures, or [`Error::Cancelled`] if `cancel` fires.
    pub async fn archive_bytes(
        &self,
        data: impl Into<Bytes>,
        filename: &str,
        options: &ArchiveOptions,
        cancel: &CancellationToken,
    ) -> Result<Status> {
        self.archive_payload(Payload::Bytes(data.into()), filename, options, cancel)
            .await
    }

    async fn archive_payload(
        &self,
        payload: Payload,
        filename: &str,
        options: &ArchiveOptions,
        cancel: &CancellationToken,
    ) -> Result<Status> {
        let Some(content_type) = options.content_type.as_deref().filter(|t| !t.is_empty()) else {
            tracing::warn!(filename, "archive request without content type");
            return Ok(Status::local(false, "a content type must be given to archive"));
        };

        let mut headers = HeaderMap::new();
        match (
            HeaderValue::from_str(content_type),
            HeaderValue::from_bytes(content_disposition(filename, options.no_versioning).as_bytes()),
        ) {
            (Ok(ct), Ok(cd)) => {
                headers.insert(CONTENT_TYPE, ct);
                headers.insert(CONTENT_DISPOSITION, cd);
            }
            _ => {
                return Ok(Status::local(
                    false,
                    format!("content type '{content_type}' or filename '{filename}' is not a valid header value"),
                ));
            }
        }

        let request = Request::Post {
            path: self.encode_with_directives(Command::new("ARCHIVE")),
            payload,
            headers,
        };

        tracing::info!(filename, content_type, "archiving");
        let exchange = match cancellable(cancel, self.connection.execute(&request)).await {
            Ok(exchange) => exchange,
            Err(e) => return settle("ARCHIVE", Err(e)),
        };
        let status = cancellable(cancel, self.read_status("ARCHIVE", exchange)).await?;
        if !status.ok() {
            tracing::warn!(
                filename,
                code = ?status.http_code(),
                "archive request rejected, see the returned status"
            );
        }
        Ok(status)
    }

    /// Retrieve a file into `destination`
    ///
    /// On a non-200 reply nothing is written and the returned status carries
    /// the server's code, message and body. A cancelled or broken transfer
    /// removes the partially written file.
    ///
    /// # Errors
    /// Connectivity failures, I/O errors on `destination`, or
    /// [`Error::Cancelled`] if `cancel` fires.
    pub async fn retrieve(
        &self,
        options: &RetrieveOptions,
        destination: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<Status> {
        let destination = destination.as_ref();
        let exchange = match cancellable(cancel, self.execute_get(options.command())).await {
            Ok(exchange) => exchange,
            Err(e) => return settle("RETRIEVE", Err(e)),
        };

        if !exchange.response.status().is_success() {
            return cancellable(cancel, self.read_status("RETRIEVE", exchange)).await;
        }

        let mut file = tokio::fs::File::create(destination).await?;
        match self.stream_reply(exchange, &mut file, cancel).await {
            Ok(status) => Ok(status),
            Err(e) => {
                drop(file);
                tokio::fs::remove_file(destination).await.ok();
                tracing::warn!(
                    file_id = %options.file_id,
                    destination = %destination.display(),
                    error = %e,
                    "retrieve aborted, partial file removed"
                );
                Err(e)
            }
        }
    }

    /// Retrieve a file into any writer
    ///
    /// # Errors
    /// Connectivity failures, write errors, or [`Error::Cancelled`] if `cancel` fires.
    pub async fn retrieve_to_writer<W>(
        &self,
        options: &RetrieveOptions,
        writer: &mut W,
        cancel: &CancellationToken,
    ) -> Result<Status>
    where
        W: AsyncWrite + Unpin,
    {
        let exchange = match cancellable(cancel, self.execute_get(options.command())).await {
            Ok(exchange) => exchange,
            Err(e) => return settle("RETRIEVE", Err(e)),
        };
        if !exchange.response.status().is_success() {
            return cancellable(cancel, self.read_status("RETRIEVE", exchange)).await;
        }
        self.stream_reply(exchange, writer, cancel).await
    }

    /// Copy a successful reply body into `writer` chunk by chunk
    async fn stream_reply<W>(
        &self,
        exchange: Exchange,
        writer: &mut W,
        cancel: &CancellationToken,
    ) -> Result<Status>
    where
        W: AsyncWrite + Unpin,
    {
        let Exchange { endpoint, response } = exchange;
        let code = response.status();
        let expected = response.content_length();
        let mut body = response.bytes_stream();
        let mut written: u64 = 0;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    writer.write_all(&bytes).await?;
                    written += bytes.len() as u64;
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }
        writer.flush().await?;

        if let Some(expected) = expected
            && expected != written
        {
            tracing::warn!(expected, written, "retrieved body length differs from Content-Length");
        }
        tracing::info!(endpoint = %endpoint, bytes = written, "retrieve complete");

        self.emit_event(crate::types::Event::CommandCompleted {
            command: "RETRIEVE".into(),
            endpoint,
            http_code: code.as_u16(),
        });

        Ok(Status::from_http(
            code.as_u16(),
            code.canonical_reason().unwrap_or_default(),
            None,
        )
        .with_bytes_transferred(written))
    }
}
