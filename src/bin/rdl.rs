use std::process::ExitCode;

use clap::Parser;
use range_dl::cli::{self, Args};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .init();

    cli::run(Args::parse()).await
}
