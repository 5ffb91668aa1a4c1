use std::fs::File;
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::link::settle;
use crate::stats::TransferStats;

/// Payload chunk size on both ends of a transfer.
pub const CHUNK_SIZE: usize = 256;

/// End-of-payload marker. Sent as one frame right after the firmware bytes.
pub const SENTINEL: &[u8; 32] = b"********????????@@@@@@@@++++++++";

/// True when one received chunk is the end-of-payload frame.
///
/// Accepts the bare literal and the literal followed by its C string
/// terminator. Payload bytes equal to either are indistinguishable from the
/// real marker.
pub fn is_sentinel(chunk: &[u8]) -> bool {
    match chunk.len() {
        32 => chunk == SENTINEL,
        33 => chunk[..32] == SENTINEL[..] && chunk[32] == 0,
        _ => false,
    }
}

/// Receive a payload from `conn` into `dest`, replacing its content.
///
/// Returns the number of payload bytes written (sentinel excluded). The file
/// is synced to disk before returning. EOF or an expired read timeout before
/// the sentinel is [`Error::ConnectionClosed`].
pub fn receive<R: Read>(conn: &mut R, dest: &Path) -> Result<u64> {
    let file = File::create(dest).map_err(|e| Error::file_io(dest, e))?;
    let mut out = BufWriter::new(file);
    let mut stats = TransferStats::new();
    let mut chunk = [0u8; CHUNK_SIZE];

    loop {
        let n = match conn.read(&mut chunk) {
            Ok(0) => {
                warn!(bytes = stats.bytes, "peer closed before end of payload");
                return Err(Error::ConnectionClosed);
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                warn!(bytes = stats.bytes, "peer idle before end of payload");
                return Err(Error::ConnectionClosed);
            }
            Err(e) => return Err(Error::Transfer(e)),
        };
        if is_sentinel(&chunk[..n]) {
            debug!("end of payload");
            break;
        }
        out.write_all(&chunk[..n])
            .map_err(|e| Error::file_io(dest, e))?;
        stats.add_chunk(n);
    }

    let file = out
        .into_inner()
        .map_err(|e| Error::file_io(dest, e.into_error()))?;
    file.sync_all().map_err(|e| Error::file_io(dest, e))?;

    stats.finish();
    stats.log("rx");
    Ok(stats.bytes)
}

/// Stream `src` over `conn` and close the payload with the sentinel frame.
///
/// `gap` is waited after the last payload chunk and again after the
/// sentinel, so the receiver's chunked reads see the sentinel on its own.
pub fn send<W: Write>(conn: &mut W, src: &Path, gap: Duration) -> Result<u64> {
    let mut file = File::open(src).map_err(|e| Error::file_io(src, e))?;
    let mut stats = TransferStats::new();
    let mut chunk = [0u8; CHUNK_SIZE];

    loop {
        let n = fill_chunk(&mut file, &mut chunk).map_err(|e| Error::file_io(src, e))?;
        if n > 0 {
            conn.write_all(&chunk[..n]).map_err(Error::Transfer)?;
            stats.add_chunk(n);
        }
        // a short chunk is the end of the file
        if n < CHUNK_SIZE {
            break;
        }
    }

    settle(conn, gap)?;
    conn.write_all(SENTINEL).map_err(Error::Transfer)?;
    settle(conn, gap)?;

    stats.finish();
    stats.log("tx");
    Ok(stats.bytes)
}

// Reads until `buf` is full or the file ends.
fn fill_chunk<R: Read>(src: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/* ---------- tests ---------- */
