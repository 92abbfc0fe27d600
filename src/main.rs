use clap::Parser;
use mt32synth::runtime::{run, HostOptions};

fn main() {
    tracing_subscriber::fmt::init();

    if let Err(err) = run(HostOptions::parse()) {
        tracing::error!(%err, "mt32synth failed");
        std::process::exit(1);
    }
}
