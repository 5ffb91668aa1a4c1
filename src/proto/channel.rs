// src/proto/channel.rs
use std::io::{ErrorKind, Read, Write};

use tracing::{debug, trace};

use super::command::{ACK, Command, MatchMode};
use crate::error::{Error, Result};

/// Bytes taken from the connection per read while waiting for a command.
pub const COMMAND_CHUNK: usize = 32;

/// Longest line kept while waiting for CR/LF. Past this only the last
/// [`COMMAND_CHUNK`] bytes survive, enough to hold any vocabulary name.
pub const MAX_LINE: usize = COMMAND_CHUNK * 8;

/// Read one command line from `conn` and acknowledge it if recognized.
///
/// Chunks are accumulated until the most recent one carries CR or LF. EOF and
/// read errors both end the session as [`Error::ConnectionClosed`]. A
/// recognized command is ACKed before it is returned; an unrecognized line
/// gets no reply.
pub fn read_command<S: Read + Write>(conn: &mut S, mode: MatchMode) -> Result<Command> {
    let line = read_line(conn)?;
    let cmd = match_command(&line, mode);
    debug!(line = %String::from_utf8_lossy(&line).escape_debug(), ?cmd, "command line");

    if cmd != Command::Unrecognized {
        conn.write_all(&[ACK]).map_err(|e| {
            debug!("ACK write failed: {}", e);
            Error::ConnectionClosed
        })?;
    }
    Ok(cmd)
}

fn read_line<S: Read>(conn: &mut S) -> Result<Vec<u8>> {
    let mut chunk = [0u8; COMMAND_CHUNK];
    let mut acc = Vec::with_capacity(COMMAND_CHUNK);
    loop {
        let n = match conn.read(&mut chunk) {
            Ok(0) => return Err(Error::ConnectionClosed),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("command read failed: {}", e);
                return Err(Error::ConnectionClosed);
            }
        };
        trace!(n, "command chunk");
        if acc.len() + n > MAX_LINE {
            let keep = acc.len().min(COMMAND_CHUNK);
            acc.drain(..acc.len() - keep);
        }
        acc.extend_from_slice(&chunk[..n]);
        if chunk[..n].iter().any(|&b| b == b'\r' || b == b'\n') {
            return Ok(acc);
        }
    }
}

/// Match an accumulated line against the vocabulary.
pub fn match_command(line: &[u8], mode: MatchMode) -> Command {
    match mode {
        MatchMode::Containment => Command::ALL
            .into_iter()
            .find(|c| contains(line, c.name().as_bytes()))
            .unwrap_or(Command::Unrecognized),
        MatchMode::Strict => {
            let token = trim_line(line);
            Command::ALL
                .into_iter()
                .find(|c| c.name().as_bytes() == token)
                .unwrap_or(Command::Unrecognized)
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

// Old clients send the C string terminator along with the line.
fn trim_line(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| !matches!(b, b'\r' | b'\n' | b'\0' | b' '))
        .map_or(0, |i| i + 1);
    &line[..end]
}

/* ---------- tests ---------- */
