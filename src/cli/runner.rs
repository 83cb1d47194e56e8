//! Runner wiring arguments into one pull operation

use crate::cli::args::Args;
use crate::error::{PullerError, Result};
use crate::identity::DefaultAzureCredential;
use crate::logging::Logger;
use crate::reference::ImageReference;
use crate::registry::AcrCredentialResolver;
use crate::transfer::{ImageStore, LogReporter, OciRegistrySource, Transfer};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct Runner {
    args: Args,
    output: Logger,
}

impl Runner {
    pub fn new(args: Args) -> Self {
        let output = if args.quiet {
            Logger::new_quiet()
        } else {
            Logger::new(args.verbose)
        };
        Self { args, output }
    }

    pub fn output(&self) -> &Logger {
        &self.output
    }

    pub async fn run(&self) -> Result<()> {
        self.output.section("ACR Image Puller");
        self.output
            .info(&format!("Pulling {}", self.args.image));

        let config = self.args.to_config();
        config.validate()?;

        let reference = ImageReference::parse(&self.args.image)?;
        self.output.detail(&format!("Registry: {}", reference.host));
        self.output
            .detail(&format!("Repository: {}", reference.repository));
        self.output.detail(&format!("Namespace: {}", config.namespace));

        // Unusable store addresses fail here, before any network work
        let store = ImageStore::open(&config.address, &config.namespace)?;

        let client = build_http_client(config.timeout, config.skip_tls)?;

        let cancel = CancellationToken::new();
        spawn_interrupt_watcher(cancel.clone(), self.output.clone());

        let credential = Arc::new(DefaultAzureCredential::new(client.clone()));
        let resolver = AcrCredentialResolver::builder(client.clone(), credential)
            .with_cancellation(cancel.clone())
            .with_logger(self.output.clone())
            .build();

        let source = OciRegistrySource::new(
            client,
            reference,
            Arc::new(resolver),
            cancel.clone(),
            self.output.clone(),
        );
        let reporter = LogReporter::new(self.output.clone());

        Transfer::new(config.concurrency, cancel)
            .run(&source, &store, &reporter)
            .await?;

        self.output.success(&format!(
            "Pulled {} in {}",
            self.args.image,
            self.output.format_duration(self.output.elapsed())
        ));
        Ok(())
    }
}

fn build_http_client(timeout: u64, skip_tls: bool) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(timeout));
    if skip_tls {
        builder = builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }
    builder
        .build()
        .map_err(|e| PullerError::Config(format!("failed to create HTTP client: {}", e)))
}

/// Ctrl-C cancels the governing token; in-flight calls abort promptly
fn spawn_interrupt_watcher(cancel: CancellationToken, output: Logger) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            output.warning("Interrupt received, cancelling transfer");
            cancel.cancel();
        }
    });
}
