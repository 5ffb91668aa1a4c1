use std::path::Path;
use std::process::Command;

use tracing::{debug, info};

use crate::error::{Error, Result};

/// Code stored when the flasher ended without an exit code that fits a byte
/// (killed by a signal, or a wide exit code on non-Unix hosts).
pub const NO_EXIT_CODE: u8 = 0xFF;

/// Writes a received image onto the M4 core.
///
/// The returned exit code is opaque to the protocol and stored verbatim.
pub trait Flasher: Send + Sync {
    fn flash(&self, image: &Path) -> Result<u8>;
}

/// Runs an external program with the image path as its only argument.
#[derive(Debug, Clone)]
pub struct ProcessFlasher {
    program: String,
}

impl ProcessFlasher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Flasher for ProcessFlasher {
    fn flash(&self, image: &Path) -> Result<u8> {
        debug!(program = %self.program, image = %image.display(), "running flasher");
        let status = Command::new(&self.program)
            .arg(image)
            .status()
            .map_err(|source| Error::FlasherInvocation {
                program: self.program.clone(),
                source,
            })?;

        let code = exit_code(status.code());
        info!(program = %self.program, code, "flasher finished");
        Ok(code)
    }
}

// Signals and codes outside a byte both end up as NO_EXIT_CODE.
fn exit_code(code: Option<i32>) -> u8 {
    code.and_then(|c| u8::try_from(c).ok()).unwrap_or(NO_EXIT_CODE)
}
