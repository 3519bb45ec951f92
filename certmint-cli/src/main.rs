//! certmint - request a key and certificate from a certmint daemon

use anyhow::{Context, Result};
use certmint_cli::{save, Args, ClientOutcome, IdentityClient};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let client = IdentityClient::new(&args.host, args.port);

    let outcome = client
        .request(&args.identity, &args.client_options())
        .await
        .with_context(|| format!("Request for {:?} to {} failed", args.identity, client.addr()))?;

    match outcome {
        ClientOutcome::Abandoned => {
            println!("Exited before reading the response");
        }
        ClientOutcome::Issued(result) => {
            let (key_path, cert_path) = save(&args.output_prefix, &result).await?;
            println!("Saved {} and {}", key_path.display(), cert_path.display());
        }
    }
    Ok(())
}
