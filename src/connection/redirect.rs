//! Redirect target parsing
//!
//! Archive servers answer a redirect with a bare `host:port` Location value;
//! standard HTTP servers send an absolute URL. Both forms are accepted. Any
//! path in the Location is ignored: the same logical command is reissued
//! against the new target.

use crate::error::{Error, Result};
use crate::types::Endpoint;
use url::Url;

/// Parse a `Location` header value into the endpoint to contact next
pub fn parse_location(location: &str) -> Result<Endpoint> {
    let location = location.trim();
    if location.is_empty() {
        return Err(Error::InvalidRedirect("empty Location header".into()));
    }

    let absolute = if location.contains("://") {
        location.to_string()
    } else {
        format!("http://{location}")
    };

    let url = Url::parse(&absolute)
        .map_err(|e| Error::InvalidRedirect(format!("unparsable Location '{location}': {e}")))?;

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| Error::InvalidRedirect(format!("no host in Location '{location}'")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| Error::InvalidRedirect(format!("no port in Location '{location}'")))?;

    Ok(Endpoint::new(host, port))
}
