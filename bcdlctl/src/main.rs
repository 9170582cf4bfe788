use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = bcdlctl::Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    if let Err(err) = bcdlctl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
