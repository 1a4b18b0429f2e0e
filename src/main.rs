use clap::Parser;

use ownbite_access::{Cli, run_server};

#[cfg(all(not(debug_assertions), feature = "demo"))]
compile_error!("Demo mode MUST NOT be enabled in release builds");

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run_server(cli).await {
        // The subscriber may not be installed yet if configuration failed.
        eprintln!("ownbite-access failed: {:#}", e);
        ::tracing::error!(error = %e, "Server exited with error");
        std::process::exit(1);
    }
}
