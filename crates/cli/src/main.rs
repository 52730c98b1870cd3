use clap::Parser;
use collectorctl::{cli::Cli, output::print_error};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = collectorctl::run(cli).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
