use anyhow::{Context, Result};
use clap::Parser;
use pinball::cli::RelayArgs;
use pinball::relay;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{:?}", e.context("fatal error"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    env_logger::init();
    let args = RelayArgs::parse();
    relay::serve(args.port).await
}
