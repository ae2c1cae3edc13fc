//! Simple GET commands
//!
//! Each wrapper only builds a [`Command`] and hands it to
//! [`NgasClient::send_command`].

use super::NgasClient;
use crate::command::Command;
use crate::error::Result;
use crate::status::Status;

/// Parameters of a CLONE command
///
/// At least one of `disk_id` and `file_id` must be given.
#[derive(Clone, Debug, Default)]
pub struct CloneOptions {
    /// Disk to clone
    pub disk_id: Option<String>,
    /// File to clone
    pub file_id: Option<String>,
    /// Version of `file_id`
    pub file_version: Option<String>,
}

impl CloneOptions {
    /// Clone one file
    pub fn file(file_id: impl Into<String>) -> Self {
        Self {
            file_id: Some(file_id.into()),
            ..Default::default()
        }
    }

    /// Clone a whole disk
    pub fn disk(disk_id: impl Into<String>) -> Self {
        Self {
            disk_id: Some(disk_id.into()),
            ..Default::default()
        }
    }
}

/// Parameters of a REMFILE command
#[derive(Clone, Debug, Default)]
pub struct RemFileOptions {
    /// Restrict removal to one disk
    pub disk_id: Option<String>,
    /// File to remove
    pub file_id: String,
    /// Version of `file_id`
    pub file_version: Option<String>,
    /// Actually remove (otherwise only report what would be removed)
    pub execute: bool,
}

impl NgasClient {
    /// `STATUS`
    pub async fn status(&self) -> Result<Status> {
        self.send_command(Command::new("STATUS")).await
    }

    /// `STATUS?configuration_file`
    pub async fn config_status(&self) -> Result<Status> {
        self.send_command(Command::new("STATUS").flag("configuration_file"))
            .await
    }

    /// `STATUS?disk_id=<disk_id>`
    pub async fn disk_status(&self, disk_id: &str) -> Result<Status> {
        self.send_command(Command::new("STATUS").param("disk_id", disk_id))
            .await
    }

    /// `STATUS?file_id=<file_id>`
    pub async fn file_status(&self, file_id: &str) -> Result<Status> {
        self.send_command(Command::new("STATUS").param("file_id", file_id))
            .await
    }

    /// `STATUS?flush_log`
    pub async fn flush_log(&self) -> Result<Status> {
        self.send_command(Command::new("STATUS").flag("flush_log"))
            .await
    }

    /// `INIT`: re-initialize the server
    pub async fn init(&self) -> Result<Status> {
        self.send_command(Command::new("INIT")).await
    }

    /// `EXIT`: terminate the server
    pub async fn exit(&self) -> Result<Status> {
        self.send_command(Command::new("EXIT")).await
    }

    /// `ONLINE`
    pub async fn online(&self) -> Result<Status> {
        self.send_command(Command::new("ONLINE")).await
    }

    /// `OFFLINE`
    pub async fn offline(&self) -> Result<Status> {
        self.send_command(Command::new("OFFLINE")).await
    }

    /// `OFFLINE?force`: go offline even while requests are being handled
    pub async fn offline_force(&self) -> Result<Status> {
        self.send_command(Command::new("OFFLINE").flag("force"))
            .await
    }

    /// `LABEL?slot_id=<slot>[&host_id=<host>]`
    pub async fn label(&self, slot_id: &str, host_id: Option<&str>) -> Result<Status> {
        let command = Command::new("LABEL")
            .param("slot_id", slot_id)
            .param_opt("host_id", host_id);
        self.send_command(command).await
    }

    /// `CLONE?[disk_id=..][&file_id=..][&file_version=..]`
    ///
    /// Returns a local failure status, without contacting any server, when
    /// neither a disk nor a file is given.
    pub async fn clone_files(&self, options: &CloneOptions) -> Result<Status> {
        if options.disk_id.is_none() && options.file_id.is_none() {
            tracing::warn!("CLONE needs a disk id or a file id");
            return Ok(Status::local(
                false,
                "CLONE needs at least a disk id or a file id",
            ));
        }
        let command = Command::new("CLONE")
            .param_opt("disk_id", options.disk_id.as_deref())
            .param_opt("file_id", options.file_id.as_deref())
            .param_opt("file_version", options.file_version.as_deref());
        self.send_command(command).await
    }

    /// `REGISTER?path=<path>[&mime_type=<mime>]`
    pub async fn register(&self, path: &str, mime_type: Option<&str>) -> Result<Status> {
        let command = Command::new("REGISTER")
            .param("path", path)
            .param_opt("mime_type", mime_type);
        self.send_command(command).await
    }

    /// `REMDISK?disk_id=<disk>&execute=0|1`
    pub async fn remdisk(&self, disk_id: &str, execute: bool) -> Result<Status> {
        let command = Command::new("REMDISK")
            .param("disk_id", disk_id)
            .bool_param("execute", execute);
        self.send_command(command).await
    }

    /// `REMFILE?[disk_id=..&]file_id=..[&file_version=..]&execute=0|1`
    pub async fn remfile(&self, options: &RemFileOptions) -> Result<Status> {
        let command = Command::new("REMFILE")
            .param_opt("disk_id", options.disk_id.as_deref())
            .param("file_id", options.file_id.as_str())
            .param_opt("file_version", options.file_version.as_deref())
            .bool_param("execute", options.execute);
        self.send_command(command).await
    }
}
