#[macro_use]
extern crate log;

use clap::Parser;

mod cli;
mod policy;
mod serve;

use cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    let default_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::new().filter_or("SHMFS_LOG", default_filter))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => serve::serve(&args),
        Commands::Clean(args) => {
            let names = args.names();
            serve::clean(&names)?;
            info!("{} and {} are gone", names.segment, names.semaphore);
            Ok(())
        }
    }
}
