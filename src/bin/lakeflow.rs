//! Lakeflow Binary
//!
//! Commands: bronze, features, train [--single | --distributed], status

use lakeflow::*;

#[tokio::main]
async fn main() {
    log();
    kys();
    brb();
    if let Err(e) = cli::Cli::run().await {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}
