mod cli;
mod server;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let parsed = cli::Cli::parse();
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: cannot start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(cli::run(parsed)) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
