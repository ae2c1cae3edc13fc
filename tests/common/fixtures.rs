//! Fake archive servers and canned replies

use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Status document as returned by an archive server for `STATUS?disk_id=..&file_id=..`
pub const STATUS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE NgamsStatus SYSTEM "http://localhost:7777/RETRIEVE?internal=ngamsInternal.dtd">
<NgamsStatus>
  <Status CompletionTime="2009-03-05T11:30:42.123" Date="2009-03-05T11:30:42.456" HostId="ngas1" LastRequestStatUpdate="2009-03-05T11:30:42.789" Message="Successfully handled command STATUS" RequestId="42" RequestTime="2009-03-05T11:30:41.999" State="ONLINE" Status="SUCCESS" SubState="IDLE" Version="v3.2/2009-02-20T10:00:00"/>
  <DiskStatus Archive="ESO-ARCHIVE" AvailableMb="409600" BytesStored="1073741824" Checksum="0xdeadbeef" Completed="0" CompletionDate="" DiskId="disk-001" InstallationDate="2008-11-01T09:00:00" LastCheck="2009-03-01T00:00:00" LogicalName="Main-1" Manufacturer="Seagate" MountPoint="/NGAS/data1" Mounted="1" NumberOfFiles="17" SlotId="1" TotalDiskWriteTime="12.5" Type="MAGNETIC DISK">
    <FileStatus Checksum="1234567" ChecksumPlugIn="ngamsGenCrc32" Compression="gzip" CreationDate="2009-03-02T12:00:00" FileId="TEST.2001-05-08T15:25:00.123" FileName="saf/2001-05-08/1/TEST.fits.gz" FileSize="3000" FileStatus="00000000" FileVersion="1" Format="application/x-gfits" Ignore="0" IngestionDate="2009-03-02T12:00:01" Tag="" UncompressedFileSize="12000"/>
  </DiskStatus>
</NgamsStatus>
"#;

/// Failure reply as sent with a non-200 status
pub const FAILURE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<NgamsStatus>
  <Status Date="2009-03-05T11:30:42.456" HostId="ngas1" Message="NGAMS_ER_UNAVAIL_FILE:4005:ERROR: File with ID: missing is not available" State="ONLINE" Status="FAILURE" SubState="IDLE" Version="v3.2"/>
</NgamsStatus>
"#;

/// Start a fake archive answering every request with [`STATUS_XML`]
pub async fn fake_archive() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200).set_body_string(STATUS_XML))
        .mount(&server)
        .await;
    server
}

/// Commands received by `server`, as `NAME?params` without the leading slash
pub async fn received_commands(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|request| {
            let path = request.url.path().trim_start_matches('/');
            match request.url.query() {
                Some(query) => format!("{path}?{query}"),
                None => path.to_string(),
            }
        })
        .collect()
}

/// Most recent command received by `server`
pub async fn last_command(server: &MockServer) -> Option<String> {
    received_commands(server).await.pop()
}

/// Push `body` to a subscription receiver the way an archive server does
///
/// Returns whatever the receiver answered before closing the connection.
pub async fn push_file(
    receiver: SocketAddr,
    filename: &str,
    body: &[u8],
) -> std::io::Result<String> {
    let mut stream = TcpStream::connect(receiver).await?;
    let header = format!(
        "POST /ARCHIVE HTTP/1.0\r\n\
         Content-Type: application/x-gfits\r\n\
         Content-Disposition: attachment; filename=\"{filename}\"; wait=\"1\"\r\n\
         Content-Length: {}\r\n\
         \r\n",
        body.len()
    );
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;

    let mut reply = String::new();
    stream.read_to_string(&mut reply).await?;
    Ok(reply)
}
