use tracing_subscriber::{fmt, EnvFilter};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .event_format(fmt::format())
        .init();

    tracing::info!("objtreed: directory-tree core starting up (library entry point, no kernel adapter wired in this binary)");
    Ok(())
}
