use std::{io, net::SocketAddr, path::PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // ---- Client: reaching the board ----
    #[error("cannot resolve host {host}: {source}")]
    Resolution {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("address is not valid: {0}")]
    Address(String),
    #[error("connect to {addr} failed: {source}")]
    Connection {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    // ---- Protocol ----
    /// Peer answered a command with something other than ACK (or hung up).
    #[error("expected ACK after {command}, got {}", describe_reply(.got))]
    AckMismatch {
        command: &'static str,
        got: Option<u8>,
    },
    #[error("connection closed by peer")]
    ConnectionClosed,

    // ---- Files and streaming ----
    #[error("file {}: {source}", .path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("transfer failed: {0}")]
    Transfer(#[source] io::Error),
    /// Upload command produced no payload; the client got a NACK.
    #[error("received file error: no payload before end of transfer")]
    ReceivedFile,

    // ---- Flasher ----
    #[error("cannot run flasher {program}: {source}")]
    FlasherInvocation {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn file_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }
}

fn describe_reply(got: &Option<u8>) -> String {
    match *got {
        Some(b) if b.is_ascii_graphic() => format!("0x{:02X} ('{}')", b, b as char),
        Some(b) => format!("0x{:02X}", b),
        None => "end of stream".into(),
    }
}
