use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod client;
mod error;
mod flasher;
mod link;
mod proto;
mod server;
mod stats;
mod status;
mod transfer;

#[cfg(test)]
mod testutil;

fn main() -> Result<()> {
    let args = cli::Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if args.debug {
            "m4_uploader=debug"
        } else {
            "m4_uploader=info"
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match args.cmd {
        cli::Cmd::Serve(opts) => server::run(opts),
        cli::Cmd::Upload(opts) => client::run_upload(opts),
        cli::Cmd::Status(opts) => client::run_status(opts),
        cli::Cmd::Ping(opts) => client::run_ping(opts),
    }
}
