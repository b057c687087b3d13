// src/main.rs

use workgraph::{cli, logging, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();

    if let Err(e) = logging::init_logging(args.log_level) {
        eprintln!("failed to initialise logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "workgraph failed");
        std::process::exit(1);
    }
}
