use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::client::ClientConfig;
use crate::link::{DEFAULT_PORT, Target};
use crate::proto::command::MatchMode;
use crate::server::ServerConfig;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "m4-uploader",
    version,
    disable_version_flag = true,
    about = "Push M4 firmware to a board over TCP and query the flash result"
)]
pub struct Cli {
    /// Print version
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    pub version: Option<bool>,
    /// Debug logging (RUST_LOG overrides)
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Board side: receive firmware and run the flasher
    Serve(ServeOpts),
    /// Host side: upload a firmware file and report the result
    Upload(UploadOpts),
    /// Host side: ask for the result of the last flash attempt
    Status(TargetOpts),
    /// Host side: send TEST and wait for the ACK
    Ping(TargetOpts),
}

#[derive(Args, Debug, Clone)]
pub struct ServeOpts {
    /// TCP port to listen on
    #[arg(default_value_t = DEFAULT_PORT, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,
    /// Where the received image is stored (overwritten on every upload)
    #[arg(long, default_value = "M4_file.fw")]
    pub firmware: PathBuf,
    /// Flasher program, called with the image path as only argument
    #[arg(long, default_value = "udooneo_m4uploader")]
    pub flasher: String,
    /// Command matching: "containment" (compatible) or "strict"
    #[arg(long = "match", default_value = "containment")]
    pub match_mode: String,
    /// Serve connections concurrently, one thread each
    #[arg(long, default_value_t = false)]
    pub concurrent: bool,
    /// Milliseconds to wait after a connection closes (sequential mode)
    #[arg(long, default_value_t = 1000)]
    pub cooldown_ms: u64,
    /// Drop a connection after this many idle seconds (0 = never)
    #[arg(long, default_value_t = 0)]
    pub idle_timeout: u64,
}

#[derive(Args, Debug, Clone)]
pub struct TargetOpts {
    /// Board address, host[:port]
    pub target: String,
}

#[derive(Args, Debug, Clone)]
pub struct UploadOpts {
    #[command(flatten)]
    pub target: TargetOpts,
    /// M4 firmware file
    pub file: PathBuf,
    /// Milliseconds to pause around the end-of-payload frame
    #[arg(long, default_value_t = 1000)]
    pub settle_ms: u64,
}

impl ServeOpts {
    pub fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let match_mode: MatchMode = self
            .match_mode
            .parse()
            .map_err(|_| anyhow!("match must be 'containment' or 'strict'"))?;
        Ok(ServerConfig {
            port: self.port,
            firmware: self.firmware.clone(),
            match_mode,
            concurrent: self.concurrent,
            cooldown: Duration::from_millis(self.cooldown_ms),
            idle_timeout: (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout)),
        })
    }
}

impl TargetOpts {
    pub fn target(&self) -> anyhow::Result<Target> {
        Target::parse(&self.target).map_err(|e| anyhow!("target '{}': {}", self.target, e))
    }
}

impl UploadOpts {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            settle_gap: Duration::from_millis(self.settle_ms),
        }
    }
}
