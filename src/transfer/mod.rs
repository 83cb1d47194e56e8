//! Transfer engine: registry source, local store destination, orchestration
//!
//! The engine resolves a manifest from the source registry, downloads the
//! config and layer blobs, and commits them to the local content store,
//! emitting lifecycle events along the way. Credentials are pulled lazily
//! per host through the [`CredentialResolver`] seam; an empty credentials
//! value means anonymous access, never an error.

pub mod progress;
pub mod source;
pub mod store;

pub use progress::{LogReporter, ProgressEvent, ProgressKind, ProgressSink};
pub use source::OciRegistrySource;
pub use store::ImageStore;

use crate::error::{PullerError, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Registry credentials produced by the exchange
///
/// The default value is the explicit "no credentials" result. The secret
/// never appears in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() && self.secret.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &format!("<redacted, {} chars>", self.secret.len()))
            .finish()
    }
}

/// Capability for resolving per-host registry credentials
///
/// The engine may call this concurrently and at arbitrary times during a
/// transfer, including not at all when no authenticated host is touched.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn get_credentials(&self, image_ref: &str, host: &str) -> Result<Credentials>;
}

/// Drives one source-to-store transfer
pub struct Transfer {
    concurrency: usize,
    cancel: CancellationToken,
}

impl Transfer {
    pub fn new(concurrency: usize, cancel: CancellationToken) -> Self {
        Self {
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    pub async fn run(
        &self,
        source: &OciRegistrySource,
        store: &ImageStore,
        on_progress: &dyn ProgressSink,
    ) -> Result<()> {
        let subject = source.reference().to_string();
        let emit = |kind: ProgressKind, name: &str| {
            on_progress.handle(&ProgressEvent::new(kind, name));
        };

        emit(ProgressKind::Resolving, &subject);
        let resolved = source.resolve().await?;
        emit(ProgressKind::Resolved, &resolved.digest);

        let image_dir = store.prepare(source.reference())?;
        store
            .put_manifest(&image_dir, &resolved.manifest_bytes)
            .await?;

        emit(ProgressKind::Downloading, &resolved.config.digest);
        let config_path = store.config_path(&image_dir, &resolved.config.digest);
        source
            .download_blob(&resolved.config.digest, &config_path)
            .await?;
        emit(ProgressKind::Downloaded, &resolved.config.digest);

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let downloads = resolved.layers.iter().map(|layer| {
            let semaphore = Arc::clone(&semaphore);
            let layer_path = store.blob_path(&image_dir, &layer.digest);
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| PullerError::Cancelled)?;
                on_progress.handle(&ProgressEvent::new(ProgressKind::Downloading, &layer.digest));
                let written = source.download_blob(&layer.digest, &layer_path).await?;
                on_progress.handle(&ProgressEvent::new(ProgressKind::Downloaded, &layer.digest));
                Ok::<u64, PullerError>(written)
            }
        });
        let layer_sizes = try_join_all(downloads).await?;

        emit(ProgressKind::Committing, &subject);
        if self.cancel.is_cancelled() {
            return Err(PullerError::Cancelled);
        }
        store
            .commit(
                &image_dir,
                source.reference(),
                &resolved,
                layer_sizes.iter().sum(),
            )
            .await?;
        emit(ProgressKind::Complete, &subject);

        Ok(())
    }
}
