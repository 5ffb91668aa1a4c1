use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_PORT: u16 = 5152;

/// Board address as given on the command line: `host[:port]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`. A bare IPv6 literal
    /// (more than one colon, no brackets) is taken as a host without port.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| Error::Address(format!("unterminated '[' in {}", s)))?;
            (host, tail.strip_prefix(':'))
        } else {
            match s.split_once(':') {
                Some((host, port)) if !port.contains(':') => (host, Some(port)),
                _ => (s, None),
            }
        };
        if host.is_empty() {
            return Err(Error::Address(format!("missing host in '{}'", s)));
        }
        let port = match port {
            None => DEFAULT_PORT,
            Some(p) => match p.parse::<u16>() {
                Ok(p) if p > 0 => p,
                _ => return Err(Error::Address(format!("bad port '{}'", p))),
            },
        };
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Look the host up and pick the address to dial.
    ///
    /// IPv4 is preferred since the board side listens on IPv4 only.
    pub fn resolve(&self) -> Result<SocketAddr> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|source| Error::Resolution {
                host: self.host.clone(),
                source,
            })?
            .collect();

        let addr = addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| Error::Address(format!("{} resolved to no address", self.host)))?;

        if !is_dialable(addr.ip()) {
            return Err(Error::Address(format!("{} resolved to {}", self.host, addr.ip())));
        }
        Ok(addr)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn is_dialable(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !v4.is_unspecified() && !v4.is_broadcast(),
        IpAddr::V6(v6) => !v6.is_unspecified(),
    }
}

pub fn connect(addr: SocketAddr) -> Result<TcpStream> {
    TcpStream::connect(addr).map_err(|source| Error::Connection { addr, source })
}

/// Read exactly one byte; `None` when the peer closed first.
pub fn read_byte<R: Read>(conn: &mut R) -> Result<Option<u8>> {
    let mut b = [0u8; 1];
    loop {
        match conn.read(&mut b) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(b[0])),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Transfer(e)),
        }
    }
}

pub fn write_byte<W: Write>(conn: &mut W, b: u8) -> Result<()> {
    conn.write_all(&[b]).map_err(Error::Transfer)
}

pub fn write_line<W: Write>(conn: &mut W, line: &str) -> Result<()> {
    debug!(line = %line.escape_debug(), "send");
    conn.write_all(line.as_bytes()).map_err(Error::Transfer)?;
    conn.flush().map_err(Error::Transfer)
}

/// Flush, then give the peer time to drain its socket so the next write is
/// read as a frame of its own.
pub fn settle<W: Write>(conn: &mut W, gap: Duration) -> Result<()> {
    conn.flush().map_err(Error::Transfer)?;
    if !gap.is_zero() {
        std::thread::sleep(gap);
    }
    Ok(())
}
