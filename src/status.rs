//! Status / response model
//!
//! Every command produces one [`Status`]. It is built either from an HTTP
//! exchange (code, reason, XML body) or from a purely local outcome such as a
//! missing source file. Attribute lookups read the status document the archive
//! server returns:
//!
//! ```xml
//! <NgamsStatus>
//!   <Status CompletionTime="..." State="ONLINE" Status="SUCCESS" .../>
//!   <DiskStatus DiskId="..." MountPoint="..." .../>
//!   <FileStatus FileId="..." FileVersion="1" .../>
//! </NgamsStatus>
//! ```
//!
//! Missing documents, elements or attributes yield `None`, never an error.

use crate::error::{Error, Result};
use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::reader::Reader;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level elements of a status document
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusElement {
    /// General request status (`<Status>`)
    Status,
    /// Disk information (`<DiskStatus>`)
    DiskStatus,
    /// File information (`<FileStatus>`)
    FileStatus,
}

impl StatusElement {
    /// XML tag name of the element
    pub fn tag(self) -> &'static str {
        match self {
            StatusElement::Status => "Status",
            StatusElement::DiskStatus => "DiskStatus",
            StatusElement::FileStatus => "FileStatus",
        }
    }

    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"Status" => Some(StatusElement::Status),
            b"DiskStatus" => Some(StatusElement::DiskStatus),
            b"FileStatus" => Some(StatusElement::FileStatus),
            _ => None,
        }
    }
}

/// Parsed attributes of a status document
///
/// Only the first occurrence of each known element is kept.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusDocument {
    elements: HashMap<StatusElement, HashMap<String, String>>,
}

impl StatusDocument {
    /// Parse a status document
    ///
    /// # Errors
    /// Returns [`Error::Xml`] when the text is not well-formed XML.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut elements = HashMap::new();
        loop {
            match reader.read_event() {
                Ok(XmlEvent::Start(ref e)) | Ok(XmlEvent::Empty(ref e)) => {
                    if let Some(element) = StatusElement::from_tag(e.name().as_ref())
                        && !elements.contains_key(&element)
                    {
                        elements.insert(element, read_attributes(e)?);
                    }
                }
                Ok(XmlEvent::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(Error::Xml(format!(
                        "at position {}: {e}",
                        reader.buffer_position()
                    )));
                }
            }
        }

        Ok(Self { elements })
    }

    /// Look up one attribute of one element
    pub fn attribute(&self, element: StatusElement, name: &str) -> Option<&str> {
        self.elements
            .get(&element)
            .and_then(|attrs| attrs.get(name))
            .map(String::as_str)
    }

    /// Whether the element was present in the document
    pub fn has_element(&self, element: StatusElement) -> bool {
        self.elements.contains_key(&element)
    }
}

fn read_attributes(start: &BytesStart<'_>) -> Result<HashMap<String, String>> {
    let mut attrs = HashMap::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| Error::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| Error::Xml(e.to_string()))?
            .into_owned();
        attrs.entry(key).or_insert(value);
    }
    Ok(attrs)
}

/// Outcome of one command
#[derive(Clone, Debug)]
pub struct Status {
    http_code: Option<u16>,
    http_message: String,
    body: Option<String>,
    ok: bool,
    error_description: Option<String>,
    document: Option<StatusDocument>,
    bytes_transferred: Option<u64>,
    error_kind: Option<&'static str>,
}

impl Status {
    /// Build a status from an HTTP exchange
    ///
    /// `ok` is true iff `code` is 200. A body that is not well-formed XML is
    /// kept verbatim and every attribute lookup yields `None`.
    pub fn from_http(code: u16, message: impl Into<String>, body: Option<String>) -> Self {
        let http_message = message.into();
        let body = body.filter(|b| !b.trim().is_empty());
        let document = body.as_deref().and_then(|b| match StatusDocument::parse(b) {
            Ok(doc) => Some(doc),
            Err(e) => {
                tracing::debug!(error = %e, "status body is not a well-formed document");
                None
            }
        });
        let ok = code == 200;

        let error_description = if ok {
            None
        } else {
            document
                .as_ref()
                .and_then(|d| d.attribute(StatusElement::Status, "Message"))
                .map(str::to_string)
                .or_else(|| body.clone())
                .or_else(|| Some(format!("{code} {http_message}")))
        };

        Self {
            http_code: Some(code),
            http_message,
            body,
            ok,
            error_description,
            document,
            bytes_transferred: None,
            error_kind: None,
        }
    }

    /// Build a status for an outcome decided without any HTTP exchange
    pub fn local(ok: bool, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            http_code: None,
            error_description: (!ok).then(|| message.clone()),
            http_message: message,
            body: None,
            ok,
            document: None,
            bytes_transferred: None,
            error_kind: None,
        }
    }

    /// Build a failure status from an error that ended the call
    ///
    /// The error's code stays available through [`Status::error_kind`].
    pub fn from_error(err: &Error) -> Self {
        let mut status = Self::local(false, err.to_string());
        status.error_kind = Some(err.error_code());
        status
    }

    /// Record the number of payload bytes moved by a transfer
    pub(crate) fn with_bytes_transferred(mut self, bytes: u64) -> Self {
        self.bytes_transferred = Some(bytes);
        self
    }

    /// Whether the command succeeded
    pub fn ok(&self) -> bool {
        self.ok
    }

    /// HTTP status code, `None` for local outcomes
    pub fn http_code(&self) -> Option<u16> {
        self.http_code
    }

    /// HTTP reason phrase, or the free-text message of a local outcome
    pub fn http_message(&self) -> &str {
        &self.http_message
    }

    /// Raw response body
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Description of the failure when `ok` is false
    pub fn error_description(&self) -> Option<&str> {
        self.error_description.as_deref()
    }

    /// Parsed status document, if the body was well-formed XML
    pub fn document(&self) -> Option<&StatusDocument> {
        self.document.as_ref()
    }

    /// Payload bytes moved by an archive or retrieve transfer
    pub fn bytes_transferred(&self) -> Option<u64> {
        self.bytes_transferred
    }

    /// Code of the error that produced this status (e.g. "too_many_redirects")
    pub fn error_kind(&self) -> Option<&'static str> {
        self.error_kind
    }

    /// Look up an attribute of the status document
    pub fn attribute(&self, element: StatusElement, name: &str) -> Option<&str> {
        self.document.as_ref()?.attribute(element, name)
    }
}

macro_rules! attribute_accessors {
    ($element:ident { $($method:ident => $attr:literal),+ $(,)? }) => {
        impl Status {
            $(
                #[doc = concat!("`", $attr, "` attribute of the `<", stringify!($element), ">` element")]
                pub fn $method(&self) -> Option<&str> {
                    self.attribute(StatusElement::$element, $attr)
                }
            )+
        }
    };
}

attribute_accessors!(Status {
    completion_time => "CompletionTime",
    date => "Date",
    host_id => "HostId",
    last_request_stat_update => "LastRequestStatUpdate",
    message => "Message",
    request_id => "RequestId",
    request_time => "RequestTime",
    state => "State",
    status => "Status",
    sub_state => "SubState",
    version => "Version",
});

attribute_accessors!(DiskStatus {
    archive => "Archive",
    available_mb => "AvailableMb",
    bytes_stored => "BytesStored",
    disk_checksum => "Checksum",
    completed => "Completed",
    completion_date => "CompletionDate",
    disk_id => "DiskId",
    installation_date => "InstallationDate",
    last_check => "LastCheck",
    logical_name => "LogicalName",
    manufacturer => "Manufacturer",
    mount_point => "MountPoint",
    mounted => "Mounted",
    number_of_files => "NumberOfFiles",
    slot_id => "SlotId",
    total_disk_write_time => "TotalDiskWriteTime",
    disk_type => "Type",
});

attribute_accessors!(FileStatus {
    file_checksum => "Checksum",
    checksum_plug_in => "ChecksumPlugIn",
    compression => "Compression",
    creation_date => "CreationDate",
    file_id => "FileId",
    file_name => "FileName",
    file_size => "FileSize",
    file_status => "FileStatus",
    file_version => "FileVersion",
    format => "Format",
    ignore => "Ignore",
    ingestion_date => "IngestionDate",
    tag => "Tag",
    uncompressed_file_size => "UncompressedFileSize",
});
