//! Local content store destination
//!
//! Images land in `<root>/<namespace>/<sanitized reference>/` as
//! `manifest.json`, a `config_<digest>.json` blob, layer files named by
//! digest, and an `index.json` written last at commit time.

use crate::error::{PullerError, Result};
use crate::reference::ImageReference;
use crate::transfer::source::ResolvedImage;
use std::path::{Path, PathBuf};

pub struct ImageStore {
    root: PathBuf,
    namespace: String,
}

impl ImageStore {
    /// Open the store, failing before any network work if the address is
    /// not a usable location
    pub fn open(address: &str, namespace: &str) -> Result<Self> {
        let root = PathBuf::from(address);
        std::fs::create_dir_all(root.join(namespace)).map_err(|e| {
            PullerError::Config(format!(
                "store address {} is not usable: {}",
                address, e
            ))
        })?;
        Ok(Self {
            root,
            namespace: namespace.to_string(),
        })
    }

    /// Create and return the directory for one image
    pub fn prepare(&self, reference: &ImageReference) -> Result<PathBuf> {
        let dir = self
            .root
            .join(&self.namespace)
            .join(sanitize_image_name(&reference.to_string()));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub async fn put_manifest(&self, image_dir: &Path, bytes: &[u8]) -> Result<()> {
        tokio::fs::write(image_dir.join("manifest.json"), bytes).await?;
        Ok(())
    }

    pub fn config_path(&self, image_dir: &Path, digest: &str) -> PathBuf {
        image_dir.join(format!("config_{}.json", digest.replace(':', "_")))
    }

    pub fn blob_path(&self, image_dir: &Path, digest: &str) -> PathBuf {
        image_dir.join(digest.replace(':', "_"))
    }

    /// Write the lookup index; its presence marks the image as complete
    pub async fn commit(
        &self,
        image_dir: &Path,
        reference: &ImageReference,
        resolved: &ResolvedImage,
        total_layer_bytes: u64,
    ) -> Result<()> {
        let layers: Vec<serde_json::Value> = resolved
            .layers
            .iter()
            .map(|layer| {
                serde_json::json!({
                    "digest": layer.digest,
                    "mediaType": layer.media_type,
                    "size": layer.size,
                })
            })
            .collect();
        let index = serde_json::json!({
            "reference": reference.to_string(),
            "namespace": self.namespace,
            "manifest": "manifest.json",
            "manifest_digest": resolved.digest,
            "config": resolved.config.digest,
            "layers": layers,
            "total_layer_bytes": total_layer_bytes,
            "committed_at": std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        });
        let index_json = serde_json::to_string_pretty(&index)?;
        tokio::fs::write(image_dir.join("index.json"), index_json).await?;
        Ok(())
    }
}

fn sanitize_image_name(image_name: &str) -> String {
    image_name
        .replace('/', "_")
        .replace(':', "_")
        .replace('@', "_")
}
