use clap::Parser;
use devbridge::cli::{self, Cli};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    if let Err(e) = cli::run(cli).await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
