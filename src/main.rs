use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use respawn::internal::launch::spec::{LaunchSpecResolver, RESOURCE_DIR_TOKEN};
use respawn::internal::proxy::ProxyFront;

#[derive(Parser)]
#[command(name = "respawn-kernel")]
#[command(about = "In-place restart proxy for Jupyter kernels", long_about = None)]
struct Args {
    /// Connection file written by the launching frontend
    #[arg(short = 'f', long)]
    connection_file: PathBuf,

    /// Resource directory of the kernelspec being proxied
    #[arg(long)]
    resource_dir: Option<PathBuf>,

    /// Resource directory recorded at install time, used when the frontend
    /// does not substitute the {resource_dir} placeholder
    #[arg(long)]
    resource_dir_fallback: Option<PathBuf>,

    /// Launch command for the real kernel when no kernelspec is available
    #[arg(long, num_args = 1.., value_name = "ARG")]
    fallback_argv: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout belongs to the frontend's process capture
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "respawn=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let resource_dir = match args.resource_dir {
        // Some frontends pass the placeholder through literally instead of
        // substituting it.
        Some(dir) if dir.as_os_str() != RESOURCE_DIR_TOKEN => Some(dir),
        other => {
            if other.is_some() {
                tracing::warn!(
                    "resource dir placeholder was not substituted, using the recorded fallback"
                );
            }
            args.resource_dir_fallback
        }
    };
    let fallback_argv = if args.fallback_argv.is_empty() {
        None
    } else {
        Some(args.fallback_argv)
    };

    let resolver = LaunchSpecResolver::new(resource_dir, fallback_argv);
    let mut front = ProxyFront::bind(args.connection_file, resolver).await?;
    front.run().await?;

    Ok(())
}
