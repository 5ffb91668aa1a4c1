use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, error, info, info_span, warn};

use crate::cli::ServeOpts;
use crate::error::Error;
use crate::flasher::{Flasher, ProcessFlasher};
use crate::proto::channel::read_command;
use crate::proto::command::{Command, MatchMode};
use crate::status::StatusRegistry;

pub mod dispatch;

use dispatch::{Dispatcher, Outcome};

pub fn run(opts: ServeOpts) -> anyhow::Result<()> {
    let config = opts.server_config()?;
    let flasher = Arc::new(ProcessFlasher::new(opts.flasher.clone()));
    info!(flasher = flasher.program(), "M4 uploader server {}", env!("CARGO_PKG_VERSION"));

    let server = Server::new(config, flasher);
    let listener = server
        .bind()
        .with_context(|| format!("listening on port {}", opts.port))?;
    server.serve(listener).context("accept loop")?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub firmware: PathBuf,
    pub match_mode: MatchMode,
    /// Serve each connection on its own thread instead of one at a time.
    pub concurrent: bool,
    /// Pause after closing a connection (sequential mode only).
    pub cooldown: Duration,
    /// Read timeout per connection; `None` waits forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: crate::link::DEFAULT_PORT,
            firmware: PathBuf::from("M4_file.fw"),
            match_mode: MatchMode::Containment,
            concurrent: false,
            cooldown: Duration::from_secs(1),
            idle_timeout: None,
        }
    }
}

pub struct Server {
    config: ServerConfig,
    dispatcher: Dispatcher,
    next_session: AtomicU64,
}

impl Server {
    pub fn new(config: ServerConfig, flasher: Arc<dyn Flasher>) -> Self {
        let registry = Arc::new(StatusRegistry::new());
        let dispatcher = Dispatcher::new(config.firmware.clone(), flasher, registry);
        Self {
            config,
            dispatcher,
            next_session: AtomicU64::new(1),
        }
    }

    pub fn bind(&self) -> io::Result<TcpListener> {
        TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.port)))
    }

    /// Accept loop. Only returns if the listener itself fails.
    pub fn serve(&self, listener: TcpListener) -> io::Result<()> {
        let local = listener.local_addr()?;
        info!(
            %local,
            firmware = %self.dispatcher.firmware_path().display(),
            mode = ?self.config.match_mode,
            concurrent = self.config.concurrent,
            "listening"
        );

        for stream in listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    continue;
                }
            };
            let mut session = match self.open_session(stream) {
                Ok(s) => s,
                Err(e) => {
                    warn!("cannot set up connection: {}", e);
                    continue;
                }
            };

            if self.config.concurrent {
                let dispatcher = self.dispatcher.clone();
                std::thread::spawn(move || session.run(&dispatcher));
            } else {
                session.run(&self.dispatcher);
                debug!(status = %self.dispatcher.registry().get(), "last flash status");
                if !self.config.cooldown.is_zero() {
                    std::thread::sleep(self.config.cooldown);
                }
            }
        }
        error!("listener closed");
        Ok(())
    }

    fn open_session(&self, stream: TcpStream) -> io::Result<Session> {
        stream.set_read_timeout(self.config.idle_timeout)?;
        let peer = stream.peer_addr()?;
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        Ok(Session::new(id, peer, stream, self.config.match_mode))
    }
}

/// One accepted connection and the commands processed on it.
pub struct Session<S = TcpStream> {
    pub id: u64,
    pub peer: SocketAddr,
    conn: S,
    mode: MatchMode,
    commands: u64,
}

impl<S: io::Read + io::Write> Session<S> {
    pub fn new(id: u64, peer: SocketAddr, conn: S, mode: MatchMode) -> Self {
        Self {
            id,
            peer,
            conn,
            mode,
            commands: 0,
        }
    }

    /// Process commands one after another until the peer goes away.
    pub fn run(&mut self, dispatcher: &Dispatcher) -> u64 {
        let span = info_span!("session", id = self.id, peer = %self.peer);
        let _enter = span.enter();
        info!("connection accepted");

        loop {
            let cmd = match read_command(&mut self.conn, self.mode) {
                Ok(Command::Unrecognized) => {
                    debug!("ignoring unrecognized command");
                    continue;
                }
                Ok(cmd) => cmd,
                Err(_) => break,
            };
            self.commands += 1;

            match dispatcher.handle(&mut self.conn, cmd) {
                Ok(Outcome::Flashed { bytes, status }) => {
                    info!(bytes, %status, "remote command [{}] done", cmd.name());
                }
                Ok(outcome) => {
                    debug!(?outcome, "remote command [{}] done", cmd.name());
                }
                Err(Error::ConnectionClosed) => {
                    warn!("remote command [{}] failed: connection closed", cmd.name());
                    break;
                }
                Err(e) => {
                    warn!("remote command [{}] failed: {}", cmd.name(), e);
                }
            }
        }

        info!(commands = self.commands, "connection closed");
        self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::command::{ACK, NACK};
    use crate::client::{self, ClientConfig};
    use crate::link::Target;
    use crate::server::dispatch::tests::FakeFlasher;
    use crate::status::UploadStatus;
    use crate::testutil::ScriptedStream;
    use crate::transfer::SENTINEL;
    use clap::Parser;
    use std::io::{Read, Write};
    use std::sync::atomic::Ordering;
    use std::sync::mpsc;
    use std::time::Instant;
    use tempfile::tempdir;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn spawn(config: ServerConfig, flasher: Arc<FakeFlasher>) -> SocketAddr {
        let server = Server::new(config, flasher);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || server.serve(listener));
        addr
    }

    #[test]
    fn session_runs_upload_then_status() {
        let dir = tempdir().unwrap();
        let flasher = FakeFlasher::new(2);
        let d = Dispatcher::new(
            dir.path().join("M4_file.fw"),
            flasher.clone(),
            Arc::new(StatusRegistry::new()),
        );

        let conn = ScriptedStream::new([
            b"GET_UPLOADER_STATUS\n".to_vec(),
            b"FW_UPLOADER\n".to_vec(),
            vec![0x5A; 256],
            vec![0x5A; 44],
            SENTINEL.to_vec(),
            b"GET_UPLOADER_STATUS\n".to_vec(),
        ]);
        let mut session = Session::new(1, peer(), conn, MatchMode::Containment);
        assert_eq!(session.run(&d), 3);
        assert_eq!(session.conn.written, vec![ACK, 0, ACK, ACK, 2]);
        assert_eq!(flasher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(d.firmware_path()).unwrap().len(), 300);
    }

    #[test]
    fn session_survives_unrecognized_and_failed_upload() {
        let dir = tempdir().unwrap();
        let flasher = FakeFlasher::new(0);
        let d = Dispatcher::new(
            dir.path().join("M4_file.fw"),
            flasher.clone(),
            Arc::new(StatusRegistry::new()),
        );

        let conn = ScriptedStream::new([
            b"HELLO\n".to_vec(),
            b"FW_UPLOADER\n".to_vec(),
            SENTINEL.to_vec(),
            b"TEST\n".to_vec(),
        ]);
        let handled = Session::new(7, peer(), conn, MatchMode::Containment).run(&d);
        // FW_UPLOADER and TEST; HELLO is not counted
        assert_eq!(handled, 2);
        assert_eq!(flasher.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn strict_session_ignores_decorated_commands() {
        let dir = tempdir().unwrap();
        let d = Dispatcher::new(
            dir.path().join("M4_file.fw"),
            FakeFlasher::new(0),
            Arc::new(StatusRegistry::new()),
        );
        let conn = ScriptedStream::new([b"please TEST\n".to_vec(), b"TEST\r\n".to_vec()]);
        let handled = Session::new(3, peer(), conn, MatchMode::Strict).run(&d);
        assert_eq!(handled, 1);
    }

    #[test]
    fn nack_precedes_next_ack() {
        let dir = tempdir().unwrap();
        let d = Dispatcher::new(
            dir.path().join("M4_file.fw"),
            FakeFlasher::new(0),
            Arc::new(StatusRegistry::new()),
        );
        let mut conn = ScriptedStream::new([
            b"FW_UPLOADER\n".to_vec(),
            SENTINEL.to_vec(),
            b"GET_UPLOADER_STATUS\n".to_vec(),
        ]);
        for _ in 0..2 {
            let cmd = read_command(&mut conn, MatchMode::Containment).unwrap();
            let _ = d.handle(&mut conn, cmd);
        }
        assert_eq!(conn.written, vec![ACK, NACK, ACK, 0]);
    }

    #[test]
    fn idle_upload_closes_after_one_timeout() {
        let dir = tempdir().unwrap();
        let addr = spawn(
            ServerConfig {
                firmware: dir.path().join("M4_file.fw"),
                cooldown: Duration::ZERO,
                idle_timeout: Some(Duration::from_millis(300)),
                ..Default::default()
            },
            FakeFlasher::new(0),
        );

        let mut conn = TcpStream::connect(addr).unwrap();
        conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        conn.write_all(b"FW_UPLOADER\n").unwrap();
        let mut b = [0u8; 1];
        conn.read_exact(&mut b).unwrap();
        assert_eq!(b[0], ACK);

        let start = Instant::now();
        conn.write_all(&[7u8; 10]).unwrap();
        conn.read_exact(&mut b).unwrap();
        assert_eq!(b[0], NACK);

        // the session is gone: no second read_command picks this up
        let _ = conn.write_all(b"TEST\n");
        let mut rest = Vec::new();
        let _ = conn.read_to_end(&mut rest);
        assert!(rest.is_empty(), "got {:?}", rest);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn concurrent_sessions_share_registry() {
        let dir = tempdir().unwrap();
        let host = tempdir().unwrap();
        let flasher = FakeFlasher::new(2);
        let addr = spawn(
            ServerConfig {
                firmware: dir.path().join("M4_file.fw"),
                concurrent: true,
                cooldown: Duration::ZERO,
                ..Default::default()
            },
            flasher.clone(),
        );
        let target = Target::parse(&addr.to_string()).unwrap();

        // first client stalls halfway through a command line
        let mut stalled = TcpStream::connect(addr).unwrap();
        stalled.write_all(b"FW_UPL").unwrap();

        let fw = host.path().join("sketch.fw");
        std::fs::write(&fw, [0x42u8; 700]).unwrap();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let before = client::query_status(&target);
            let cfg = ClientConfig {
                settle_gap: Duration::from_millis(150),
            };
            let report = client::upload(&target, &fw, &cfg);
            let after = client::query_status(&target);
            let _ = tx.send((before, report, after));
        });

        let (before, report, after) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(before.unwrap(), UploadStatus::Ok);
        let report = report.unwrap();
        assert_eq!(report.bytes_sent, 700);
        assert_eq!(report.status, UploadStatus::M4StopFailed);
        assert_eq!(after.unwrap(), UploadStatus::M4StopFailed);
        assert_eq!(flasher.calls.load(Ordering::SeqCst), 1);

        // the stalled session is still served once it finishes its line
        stalled.write_all(b"OADER\n").unwrap();
        stalled.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut b = [0u8; 1];
        stalled.read_exact(&mut b).unwrap();
        assert_eq!(b[0], ACK);
    }

    #[test]
    fn busy_port_fails_with_context() {
        let taken = TcpListener::bind("0.0.0.0:0").unwrap();
        let port = taken.local_addr().unwrap().port().to_string();
        let cli = crate::cli::Cli::try_parse_from(["m4-uploader", "serve", port.as_str()]).unwrap();
        let crate::cli::Cmd::Serve(opts) = cli.cmd else {
            panic!("wrong subcommand");
        };

        let err = run(opts).unwrap_err();
        assert_eq!(err.to_string(), format!("listening on port {}", port));
        let io = err.downcast_ref::<io::Error>().unwrap();
        assert_eq!(io.kind(), io::ErrorKind::AddrInUse);
    }
}
