//! Command codec
//!
//! Maps a command name, an ordered parameter list and the pending one-shot
//! processing directives to the request path sent to the archive server:
//!
//! ```text
//! <COMMAND>[?key1[=value1][&key2[=value2]...]][&processing=<name>][&processing_pars=<value>]
//! ```
//!
//! Values are passed through verbatim; the legacy wire format does not
//! percent-encode them.

use serde::{Deserialize, Serialize};

/// A named archive command with ordered parameters
///
/// A parameter without a value is sent as a bare flag (`STATUS?flush_log`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    name: String,
    params: Vec<(String, Option<String>)>,
}

impl Command {
    /// Start a command with no parameters
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Append a `key=value` parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), Some(value.into())));
        self
    }

    /// Append a `key=value` parameter only when `value` is present
    pub fn param_opt<V: Into<String>>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.param(key, value),
            None => self,
        }
    }

    /// Append a value-less flag parameter
    pub fn flag(mut self, key: impl Into<String>) -> Self {
        self.params.push((key.into(), None));
        self
    }

    /// Append a boolean parameter encoded as `1`/`0`
    pub fn bool_param(self, key: impl Into<String>, value: bool) -> Self {
        self.param(key, if value { "1" } else { "0" })
    }

    /// Command name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameters in insertion order
    pub fn params(&self) -> &[(String, Option<String>)] {
        &self.params
    }

    /// Path and query without any directives
    pub fn path(&self) -> String {
        let mut path = self.name.clone();
        for (i, (key, value)) in self.params.iter().enumerate() {
            path.push(if i == 0 { '?' } else { '&' });
            path.push_str(key);
            if let Some(value) = value {
                path.push('=');
                path.push_str(value);
            }
        }
        path
    }
}

/// Processing directives applied to exactly one command
///
/// Set through [`NgasClient::set_processing`](crate::NgasClient::set_processing)
/// and consumed by the next command that is encoded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Directives {
    processing: Option<String>,
    processing_pars: Option<String>,
}

impl Directives {
    /// Set the processing plug-in for the next command
    pub fn set_processing(&mut self, name: impl Into<String>) {
        self.processing = Some(name.into());
    }

    /// Set the processing parameters for the next command
    pub fn set_processing_parameters(&mut self, pars: impl Into<String>) {
        self.processing_pars = Some(pars.into());
    }

    /// Whether no directive is pending
    pub fn is_empty(&self) -> bool {
        self.processing.is_none() && self.processing_pars.is_none()
    }

    /// Take the pending directives, leaving none behind
    pub fn take(&mut self) -> Directives {
        std::mem::take(self)
    }
}

/// Encode `command` and consume the pending `directives`
///
/// After this call `directives` is empty, so the directives never leak into
/// the following command.
pub fn encode(command: &Command, directives: &mut Directives) -> String {
    let Directives {
        processing,
        processing_pars,
    } = directives.take();

    let mut path = command.path();
    if let Some(processing) = processing {
        path.push_str("&processing=");
        path.push_str(&processing);
    }
    if let Some(pars) = processing_pars {
        path.push_str("&processing_pars=");
        path.push_str(&pars);
    }
    path
}
