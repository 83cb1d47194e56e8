//! Command-line argument parsing

use crate::config::{ADDRESS_ENV, NAMESPACE_ENV, PullConfig};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "acr-image-puller")]
#[command(about = "Pull an image from an Azure Container Registry into a local content store")]
#[command(version, author)]
pub struct Args {
    /// Image reference to pull
    #[arg(
        value_name = "IMAGE",
        help = "Image reference to pull, e.g. myregistry.azurecr.io/team/app:v1"
    )]
    pub image: String,

    /// Image store endpoint
    #[arg(
        long = "address",
        short = 'a',
        help = "Address of the image store (defaults to $CONTAINERD_ADDRESS)"
    )]
    pub address: Option<String>,

    /// Namespace for store objects
    #[arg(
        long = "namespace",
        short = 'n',
        help = "Namespace to use for store objects (defaults to $CONTAINERD_NAMESPACE)"
    )]
    pub namespace: Option<String>,

    /// Timeout in seconds for network operations
    #[arg(
        long = "timeout",
        short = 't',
        default_value = "300",
        help = "Timeout for network operations in seconds"
    )]
    pub timeout: u64,

    /// Number of concurrent layer downloads
    #[arg(
        long = "concurrency",
        short = 'j',
        default_value = "3",
        help = "Number of concurrent layer downloads"
    )]
    pub concurrency: usize,

    /// Skip TLS verification
    #[arg(
        long = "skip-tls",
        short = 'k',
        help = "Skip TLS certificate verification"
    )]
    pub skip_tls: bool,

    /// Verbose output
    #[arg(long = "verbose", short = 'v', help = "Enable verbose output")]
    pub verbose: bool,

    /// Quiet output
    #[arg(long = "quiet", short = 'q', help = "Suppress non-error output")]
    pub quiet: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    /// Resolve the effective configuration: flags win over environment,
    /// environment wins over compiled defaults
    pub fn to_config(&self) -> PullConfig {
        PullConfig::from_parts(
            self.address
                .clone()
                .or_else(|| std::env::var(ADDRESS_ENV).ok()),
            self.namespace
                .clone()
                .or_else(|| std::env::var(NAMESPACE_ENV).ok()),
        )
        .with_timeout(self.timeout)
        .with_concurrency(self.concurrency)
        .with_skip_tls(self.skip_tls)
    }
}
