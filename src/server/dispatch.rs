use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::flasher::Flasher;
use crate::link::write_byte;
use crate::proto::command::{Command, NACK};
use crate::status::{StatusRegistry, UploadStatus};
use crate::transfer;

/// What a handled command amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Tested,
    /// Image received and handed to the flasher.
    Flashed { bytes: u64, status: UploadStatus },
    StatusSent(UploadStatus),
    Ignored,
}

/// Maps recognized commands to their handlers.
///
/// Cheap to clone; clones share the registry, the flasher and the upload
/// lock.
#[derive(Clone)]
pub struct Dispatcher {
    firmware: PathBuf,
    flasher: Arc<dyn Flasher>,
    registry: Arc<StatusRegistry>,
    // the firmware path is shared by every session
    upload_lock: Arc<Mutex<()>>,
}

impl Dispatcher {
    pub fn new(
        firmware: impl Into<PathBuf>,
        flasher: Arc<dyn Flasher>,
        registry: Arc<StatusRegistry>,
    ) -> Self {
        Self {
            firmware: firmware.into(),
            flasher,
            registry,
            upload_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn firmware_path(&self) -> &Path {
        &self.firmware
    }

    pub fn registry(&self) -> &StatusRegistry {
        &self.registry
    }

    pub fn handle<S: Read + Write>(&self, conn: &mut S, cmd: Command) -> Result<Outcome> {
        match cmd {
            Command::FwUploader => self.upload(conn),
            Command::GetUploaderStatus => {
                let code = self.registry.code();
                write_byte(conn, code)?;
                Ok(Outcome::StatusSent(UploadStatus::from(code)))
            }
            Command::Test => {
                info!("test command received");
                Ok(Outcome::Tested)
            }
            Command::Unrecognized => Ok(Outcome::Ignored),
        }
    }

    fn upload<S: Read + Write>(&self, conn: &mut S) -> Result<Outcome> {
        info!(path = %self.firmware.display(), "uploader command received");
        let _guard = self.upload_lock.lock();

        let bytes = match transfer::receive(conn, &self.firmware) {
            Ok(n) if n > 0 => n,
            Ok(_) => return self.reject(conn, None),
            Err(e) => return self.reject(conn, Some(e)),
        };
        info!(bytes, "received firmware file");

        let status = match self.flasher.flash(&self.firmware) {
            Ok(code) => UploadStatus::from(code),
            Err(e) => {
                error!("{}", e);
                self.registry.store(UploadStatus::UploaderFailed.code());
                return Err(e);
            }
        };
        self.registry.store(status.code());
        if status.is_ok() {
            info!(%status, "flash done");
        } else {
            warn!(%status, "flash failed");
        }
        Ok(Outcome::Flashed { bytes, status })
    }

    // NACK the client; the registry keeps its previous value.
    fn reject<S: Write>(&self, conn: &mut S, cause: Option<Error>) -> Result<Outcome> {
        warn!(cause = ?cause.as_ref().map(|e| e.to_string()), "received file error");
        if let Err(e) = write_byte(conn, NACK) {
            warn!("NACK write failed: {}", e);
        }
        match cause {
            Some(Error::ConnectionClosed) => Err(Error::ConnectionClosed),
            _ => Err(Error::ReceivedFile),
        }
    }
}
