use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use damscan::app::logging;
use damscan::{Cli, run};

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_logging();

    let cli = Cli::parse();
    match run(cli).await.context("extraction run failed") {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("damscan error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
