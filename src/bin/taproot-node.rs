//! Run one locality's bootstrap episode from the command line.
//!
//! A root for two joiners:
//!
//! ```text
//! taproot-node --local 10.0.0.1:7910 --bootstrap 10.0.0.1:7910 --role root --expected-peers 2
//! taproot-node --local 10.0.0.2:7910 --bootstrap 10.0.0.1:7910 --role joining
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use taproot::config::{BootConfig, RoleConfig};
use taproot::locality::LocalityAddress;

#[derive(Debug, Parser)]
#[command(name = "taproot-node", about = "Bootstrap one locality of the distributed runtime")]
struct Args {
    /// Address to bind and advertise (host:port, port 0 for OS-assigned).
    #[arg(long)]
    local: Option<LocalityAddress>,

    /// Address of the root locality (host:port).
    #[arg(long)]
    bootstrap: Option<LocalityAddress>,

    /// Runtime role: root or joining.
    #[arg(long)]
    role: Option<RoleConfig>,

    /// Registrations the root requires before opening (root only).
    #[arg(long)]
    expected_peers: Option<u32>,

    /// Deadline on the rendezvous, in milliseconds.
    #[arg(long)]
    boot_timeout_ms: Option<u64>,
}

impl Args {
    fn into_overrides(self) -> BootConfig {
        let mut overrides = BootConfig::default();
        if let Some(local) = self.local {
            overrides.local = local;
        }
        if let Some(bootstrap) = self.bootstrap {
            overrides.bootstrap = bootstrap;
        }
        if let Some(role) = self.role {
            overrides.role = role;
        }
        if let Some(expected_peers) = self.expected_peers {
            overrides.role = RoleConfig::Root { expected_peers };
        }
        if let Some(boot_timeout_ms) = self.boot_timeout_ms {
            overrides.boot_timeout_ms = boot_timeout_ms;
        }
        overrides
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = BootConfig::from_env();
    config.merge(args.into_overrides());

    let handle = taproot::boot::bootstrap(config).await?;
    handle
        .complete()
        .await
        .context("could not establish distributed addressing")?;

    info!(
        locality_id = ?handle.protocol.locality_id().await,
        "bootstrap complete"
    );
    handle.shutdown().await
}
