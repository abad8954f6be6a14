//! Script engine host process.
//!
//! Speaks the line-JSON protocol on stdin/stdout and logs to stderr, so
//! the protocol stream stays clean. Meant to be spawned and torn down by
//! [`kiln_remote::RemoteEngine`], not run by hand.

use anyhow::Result;
use clap::Parser;
use kiln_core::EngineConfig;
use kiln_remote::RemoteHost;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "kiln-hostd", about = "kiln script engine host process")]
struct Args {
    /// Directory scanned for .ncl libraries; repeatable.
    #[arg(long = "library-root")]
    library_roots: Vec<PathBuf>,

    /// Context name, for log correlation with the client.
    #[arg(long)]
    context: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    if let Some(context) = &args.context {
        tracing::info!(context, "host starting");
    }
    let mut host = RemoteHost::new(EngineConfig {
        library_roots: args.library_roots,
    });
    host.serve(io::stdin().lock(), io::stdout().lock())?;
    Ok(())
}
