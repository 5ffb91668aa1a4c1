use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info};

use crate::cli::{TargetOpts, UploadOpts};
use crate::error::{Error, Result};
use crate::link::{self, Target};
use crate::proto::command::{ACK, Command};
use crate::status::UploadStatus;
use crate::transfer;

const BOARD: &str = "UDOONeo";

pub fn run_upload(opts: UploadOpts) -> anyhow::Result<()> {
    let target = opts.target.target()?;
    let report = upload(&target, &opts.file, &opts.client_config())
        .with_context(|| format!("uploading {} to {}", opts.file.display(), target))?;
    println!("{} {} bytes sent", BOARD, report.bytes_sent);
    println!("{} {}", BOARD, report.status.describe());
    Ok(())
}

pub fn run_status(opts: TargetOpts) -> anyhow::Result<()> {
    let target = opts.target()?;
    let status = query_status(&target).with_context(|| format!("querying {}", target))?;
    println!("{} last upload: {} - {}", BOARD, status, status.describe());
    Ok(())
}

pub fn run_ping(opts: TargetOpts) -> anyhow::Result<()> {
    let target = opts.target()?;
    ping(&target).with_context(|| format!("pinging {}", target))?;
    println!("{} at {} is answering", BOARD, target);
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Pause around the end-of-payload frame.
    pub settle_gap: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            settle_gap: Duration::from_secs(1),
        }
    }
}

/// Result of a complete upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReport {
    pub bytes_sent: u64,
    pub status: UploadStatus,
}

pub fn open(target: &Target) -> Result<TcpStream> {
    let addr = target.resolve()?;
    info!(address = %addr.ip(), port = addr.port(), "connecting");
    link::connect(addr)
}

/// Push `firmware` to the board and fetch the flasher's verdict.
///
/// A retrieved status is a successful session whatever its value; every
/// connection or protocol failure aborts at once.
pub fn upload(target: &Target, firmware: &Path, cfg: &ClientConfig) -> Result<UploadReport> {
    let mut conn = open(target)?;
    upload_over(&mut conn, firmware, cfg)
}

pub fn upload_over<S: Read + Write>(
    conn: &mut S,
    firmware: &Path,
    cfg: &ClientConfig,
) -> Result<UploadReport> {
    command(conn, Command::FwUploader)?;

    let bytes_sent = transfer::send(conn, firmware, cfg.settle_gap)?;
    info!(bytes_sent, "firmware sent");

    let status = status_over(conn)?;
    Ok(UploadReport { bytes_sent, status })
}

/// Ask the board for the outcome of its last flash attempt.
pub fn query_status(target: &Target) -> Result<UploadStatus> {
    let mut conn = open(target)?;
    status_over(&mut conn)
}

pub fn status_over<S: Read + Write>(conn: &mut S) -> Result<UploadStatus> {
    command(conn, Command::GetUploaderStatus)?;
    let code = link::read_byte(conn)?.ok_or(Error::ConnectionClosed)?;
    let status = UploadStatus::from(code);
    debug!(code, %status, "uploader status");
    Ok(status)
}

/// TEST round trip; proves the board side is up and talking.
pub fn ping(target: &Target) -> Result<()> {
    let mut conn = open(target)?;
    command(&mut conn, Command::Test)
}

// Send one command line and require the ACK byte back.
fn command<S: Read + Write>(conn: &mut S, cmd: Command) -> Result<()> {
    link::write_line(conn, &cmd.line())?;
    match link::read_byte(conn)? {
        Some(ACK) => Ok(()),
        got => Err(Error::AckMismatch {
            command: cmd.name(),
            got,
        }),
    }
}
