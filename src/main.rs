use std::env;
use std::io::{self, Write};
use std::process;

use tracing_subscriber::EnvFilter;

mod config;
mod constants;
mod cpu;
mod cpuinfo;
mod error;
mod hostname;
mod response;
mod server;

use config::{parse_args, Invocation, Sources, USAGE};
use error::{HostInfoError, Result};
use server::{bind_listener, Server};

/// Log to stderr, filtered by RUST_LOG (default `hinfosvc=info`).
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hinfosvc=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Parse arguments, bind, then serve until killed. Only startup errors return.
fn start() -> Result<()> {
    match parse_args(env::args().skip(1), Sources::from_env())? {
        Invocation::Help => {
            io::stdout()
                .write_all(USAGE.as_bytes())
                .map_err(|err| HostInfoError::Internal(format!("cannot print usage: {err}")))
        }
        Invocation::Serve(config) => {
            let listener = bind_listener(config.port)?;
            Server::new(listener, config.sources).run()
        }
    }
}

fn main() {
    init_logging();

    let code = match start() {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!(error = %err, code = err.exit_code(), "fatal");
            if matches!(err, HostInfoError::Argument(_)) {
                eprint!("{USAGE}");
            }
            err.exit_code()
        }
    };
    process::exit(code);
}
