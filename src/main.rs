mod app;
mod cli;
mod error;
mod extension;
mod host;
mod lsp;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = cli::Cli::from_args().into_config();
    app::run(config).await
}

/// Logs go to stderr; stdout carries build output and diagnostics.
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
