use clap::Parser;
use gmail_gate::cli::Cli;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so `ask` output stays pipeable.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gmail_gate=info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    gmail_gate::cli::run(cli).await
}
