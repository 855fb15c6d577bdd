use anyhow::Result;
use spodr::cli::SpodrCli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    if let Err(e) = real_main() {
        eprintln!("spodr error: {:#}", e);
        std::process::exit(1);
    }
}

fn real_main() -> Result<()> {
    let cli = SpodrCli::parse();
    let default_filter = if cli.verbose { "spodr=debug,info" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    cli.run()
}
