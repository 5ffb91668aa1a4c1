use std::fmt;

use parking_lot::RwLock;

/// Outcome of the last flash attempt, as carried by the status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Ok,
    M4StopFailed,
    M4StartFailed,
    UploaderFailed,
    LastSketchFailed,
    Unknown(u8),
}

impl UploadStatus {
    pub fn code(self) -> u8 {
        match self {
            UploadStatus::Ok => 0,
            UploadStatus::M4StopFailed => 2,
            UploadStatus::M4StartFailed => 3,
            UploadStatus::UploaderFailed => 4,
            UploadStatus::LastSketchFailed => 5,
            UploadStatus::Unknown(c) => c,
        }
    }

    pub fn is_ok(self) -> bool {
        self == UploadStatus::Ok
    }

    /// Operator-facing explanation of the code.
    pub fn describe(self) -> String {
        match self {
            UploadStatus::Ok => "M4 sketch is running".into(),
            UploadStatus::M4StopFailed => "M4 sketch STOP failed: reboot system!".into(),
            UploadStatus::M4StartFailed => "M4 sketch START failed: reboot system!".into(),
            UploadStatus::UploaderFailed => {
                "M4 uploader failed: cannot upload sketch, check system status".into()
            }
            UploadStatus::LastSketchFailed => {
                "M4 uploader failed: sketch will not start on next reboot".into()
            }
            UploadStatus::Unknown(c) => format!("something went wrong: {} - try uploading again", c),
        }
    }
}

impl From<u8> for UploadStatus {
    fn from(code: u8) -> Self {
        match code {
            0 => UploadStatus::Ok,
            2 => UploadStatus::M4StopFailed,
            3 => UploadStatus::M4StartFailed,
            4 => UploadStatus::UploaderFailed,
            5 => UploadStatus::LastSketchFailed,
            c => UploadStatus::Unknown(c),
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadStatus::Unknown(c) => write!(f, "unknown({})", c),
            s => write!(f, "{:?}({})", s, s.code()),
        }
    }
}

/// Single-slot store of the most recent flash outcome.
///
/// Starts at [`UploadStatus::Ok`]; each completed upload attempt overwrites
/// it. One writer at a time, any number of readers.
#[derive(Debug)]
pub struct StatusRegistry {
    slot: RwLock<u8>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(UploadStatus::Ok.code()),
        }
    }

    /// Raw code as last stored; served to clients without re-validation.
    pub fn code(&self) -> u8 {
        *self.slot.read()
    }

    pub fn get(&self) -> UploadStatus {
        UploadStatus::from(self.code())
    }

    pub fn store(&self, code: u8) {
        *self.slot.write() = code;
    }
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}
