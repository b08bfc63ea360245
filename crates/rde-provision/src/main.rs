use clap::Parser;
use rde_provision::{Cli, EnvOverrides};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(error) = rde_provision::run(cli, EnvOverrides::capture()).await {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}
