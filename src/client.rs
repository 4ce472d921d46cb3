//! Registry client: push, inspect, and delete images with Kubernetes-scoped
//! credentials.
//!
//! Uses the `oci-client` crate for reference parsing, authenticated registry
//! reads and writes, and manifest construction. This module only orchestrates:
//! credential resolution, zip-to-layer conversion, and the best-effort tag
//! cascade on delete.

use oci_client::client::{ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_client::manifest::{
    OciImageManifest, OciManifest, IMAGE_CONFIG_MEDIA_TYPE, IMAGE_LAYER_GZIP_MEDIA_TYPE,
};
use oci_client::secrets::RegistryAuth;
use oci_client::{Client as RegistryClient, Reference, RegistryOperation};
use oci_spec::image::ImageConfiguration;
use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::config::ImageConfig;
use crate::credentials::{resolve_keychain, Credentials};
use crate::error::{CourierError, Result};
use crate::layer;

/// Pushes, inspects, and deletes images in remote registries.
///
/// Holds only a cloneable Kubernetes API handle; every call resolves its own
/// keychain, opens its own registry connection, and owns its own temp file,
/// so calls may run concurrently.
#[derive(Clone)]
pub struct ImageClient {
    kube: kube::Client,
}

/// Outcome of a single manifest delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeleteOutcome {
    Deleted,
    /// The manifest was already absent. Treated as success by callers.
    NotFound,
}

/// Outcome of the best-effort tag cleanup pass before a delete.
///
/// Tag cleanup never fails the overall delete; failures land in `skipped`
/// and are logged.
#[derive(Debug, Default)]
pub(crate) struct TagCleanup {
    pub deleted: Vec<String>,
    pub skipped: Vec<String>,
}

impl ImageClient {
    /// Create a new image client from a Kubernetes API handle.
    pub fn new(kube: kube::Client) -> Self {
        Self { kube }
    }

    /// Push a zip archive as a single-layer image.
    ///
    /// The archive stream is materialized to a temp file (zip reading needs
    /// random access), converted to one gzipped tar layer on an empty base,
    /// and uploaded. Each entry in `tags` is then applied to the same image
    /// content. Returns the reference qualified by the digest the registry
    /// reports, an immutable pointer to exactly what was pushed.
    ///
    /// Partial uploads are not rolled back: if tagging fails after upload,
    /// the registry may retain an untagged manifest.
    pub async fn push(
        &self,
        creds: &Credentials,
        repo_ref: &str,
        archive: impl AsyncRead + Unpin,
        tags: &[String],
    ) -> Result<Reference> {
        let reference = parse_reference(repo_ref)?;

        let tmp = tempfile::NamedTempFile::new().map_err(|e| {
            CourierError::LayerError(format!("failed to create temp file for image source: {}", e))
        })?;
        let reopened = tmp.reopen().map_err(|e| {
            CourierError::LayerError(format!(
                "failed to open temp file '{}': {}",
                tmp.path().display(),
                e
            ))
        })?;
        let mut file = tokio::fs::File::from_std(reopened);
        let mut archive = archive;
        tokio::io::copy(&mut archive, &mut file).await.map_err(|e| {
            CourierError::LayerError(format!(
                "failed to copy image source into temp file '{}': {}",
                tmp.path().display(),
                e
            ))
        })?;
        file.flush().await?;
        drop(file);

        let source_layer = layer::layer_from_zip(tmp.path())?;

        let keychain = resolve_keychain(&self.kube, creds).await?;
        let auth = keychain.resolve(reference.resolve_registry());
        let remote = self.remote_client();

        let layers = vec![ImageLayer::new(
            source_layer.data,
            IMAGE_LAYER_GZIP_MEDIA_TYPE.to_string(),
            None,
        )];
        let config_doc = serde_json::json!({
            "architecture": host_architecture(),
            "os": "linux",
            "config": {},
            "rootfs": {
                "type": "layers",
                "diff_ids": [source_layer.diff_id],
            },
        });
        let config = Config::new(
            serde_json::to_vec(&config_doc)?,
            IMAGE_CONFIG_MEDIA_TYPE.to_string(),
            None,
        );
        let manifest = OciImageManifest::build(&layers, &config, None);

        remote
            .push(&reference, &layers, config, &auth, Some(manifest.clone()))
            .await
            .map_err(|e| registry_error(&reference, format!("failed to upload image: {}", e)))?;

        for tag in tags {
            let tag_ref = Reference::with_tag(
                reference.registry().to_string(),
                reference.repository().to_string(),
                tag.clone(),
            );
            remote
                .push_manifest(&tag_ref, &OciManifest::Image(manifest.clone()))
                .await
                .map_err(|e| {
                    registry_error(&tag_ref, format!("failed to tag image as '{}': {}", tag, e))
                })?;
        }

        let digest = remote
            .fetch_manifest_digest(&reference, &auth)
            .await
            .map_err(|e| registry_error(&reference, format!("failed to get image digest: {}", e)))?;

        tracing::info!(reference = %reference, digest = %digest, tags = tags.len(), "image pushed");

        Ok(Reference::with_digest(
            reference.registry().to_string(),
            reference.repository().to_string(),
            digest,
        ))
    }

    /// Fetch an image's declared labels and exposed ports.
    ///
    /// Pulls only the manifest and config blob, never layer content. Fails
    /// if any exposed port is not a valid port number.
    pub async fn config(&self, creds: &Credentials, image_ref: &str) -> Result<ImageConfig> {
        let reference = parse_reference(image_ref)?;

        let keychain = resolve_keychain(&self.kube, creds).await?;
        let auth = keychain.resolve(reference.resolve_registry());
        let remote = self.remote_client();

        let (_manifest, _digest, config_json) = remote
            .pull_manifest_and_config(&reference, &auth)
            .await
            .map_err(|e| registry_error(&reference, format!("failed to get image config: {}", e)))?;

        let configuration: ImageConfiguration = serde_json::from_str(&config_json)
            .map_err(|e| {
                CourierError::SerializationError(format!("failed to parse image config: {}", e))
            })?;

        ImageConfig::from_oci_config(&configuration)
    }

    /// Delete an image, cascading over tags that point at the same digest.
    ///
    /// Registries commonly refuse to garbage-collect a manifest while tags
    /// still reference it, so known tags pointing at the target digest are
    /// deleted first. Tag listing and per-tag failures are logged and
    /// skipped. Deleting an already-absent image succeeds.
    pub async fn delete(&self, creds: &Credentials, image_ref: &str) -> Result<()> {
        let reference = parse_reference(image_ref)?;
        tracing::debug!(reference = %reference, "deleting image");

        let keychain = resolve_keychain(&self.kube, creds).await?;
        let auth = keychain.resolve(reference.resolve_registry());
        let remote = self.remote_client();

        let cleanup = self.cleanup_tags(&remote, &reference, &auth).await;
        if !cleanup.deleted.is_empty() || !cleanup.skipped.is_empty() {
            tracing::debug!(
                reference = %reference,
                deleted = cleanup.deleted.len(),
                skipped = cleanup.skipped.len(),
                "tag cleanup finished"
            );
        }

        match self
            .delete_manifest(&remote, &reference, &auth, reference_identifier(&reference))
            .await?
        {
            DeleteOutcome::Deleted => {
                tracing::info!(reference = %reference, "image deleted");
                Ok(())
            }
            DeleteOutcome::NotFound => {
                tracing::debug!(reference = %reference, "manifest already absent");
                Ok(())
            }
        }
    }

    /// Best-effort pass deleting tags that resolve to the target's digest.
    async fn cleanup_tags(
        &self,
        remote: &RegistryClient,
        reference: &Reference,
        auth: &RegistryAuth,
    ) -> TagCleanup {
        let mut cleanup = TagCleanup::default();

        let target_digest = match reference.digest() {
            Some(digest) => digest.to_string(),
            None => match remote.fetch_manifest_digest(reference, auth).await {
                Ok(digest) => digest,
                Err(e) => {
                    tracing::debug!(
                        reference = %reference,
                        reason = %e,
                        "failed to resolve target digest - skipping tag cleanup"
                    );
                    return cleanup;
                }
            },
        };

        let tags = match remote.list_tags(reference, auth, None, None).await {
            Ok(response) => response.tags,
            Err(e) => {
                tracing::debug!(
                    reference = %reference,
                    reason = %e,
                    "failed to list tags - skipping tag cleanup"
                );
                return cleanup;
            }
        };

        for tag in tags {
            let tag_ref = Reference::with_tag(
                reference.registry().to_string(),
                reference.repository().to_string(),
                tag.clone(),
            );

            let tag_digest = match remote.fetch_manifest_digest(&tag_ref, auth).await {
                Ok(digest) => digest,
                Err(e) => {
                    tracing::debug!(tag = %tag, reason = %e, "failed to resolve tag - continuing");
                    cleanup.skipped.push(tag);
                    continue;
                }
            };
            if tag_digest != target_digest {
                continue;
            }

            tracing::debug!(tag = %tag, "deleting tag");
            match self.delete_manifest(remote, &tag_ref, auth, &tag).await {
                Ok(_) => cleanup.deleted.push(tag),
                Err(e) => {
                    tracing::debug!(tag = %tag, reason = %e, "failed to delete tag - continuing");
                    cleanup.skipped.push(tag);
                }
            }
        }

        cleanup
    }

    /// Issue a raw manifest DELETE; `oci-client` has no delete verb.
    ///
    /// Reuses the collaborator's auth flow: a bearer token when the registry
    /// hands one out, otherwise the keychain's basic credentials.
    async fn delete_manifest(
        &self,
        remote: &RegistryClient,
        reference: &Reference,
        auth: &RegistryAuth,
        identifier: &str,
    ) -> Result<DeleteOutcome> {
        let url = format!(
            "https://{}/v2/{}/manifests/{}",
            reference.resolve_registry(),
            reference.repository(),
            identifier
        );

        let token = remote
            .auth(reference, auth, RegistryOperation::Push)
            .await
            .map_err(|e| {
                registry_error(reference, format!("failed to authenticate for delete: {}", e))
            })?;

        let http = reqwest::Client::new();
        let mut request = http.delete(&url);
        request = match token {
            Some(token) => request.bearer_auth(token),
            None => match auth {
                RegistryAuth::Basic(username, password) => {
                    request.basic_auth(username, Some(password))
                }
                _ => request,
            },
        };

        let response = request.send().await.map_err(|e| {
            registry_error(reference, format!("delete request to {} failed: {}", url, e))
        })?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(DeleteOutcome::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(registry_error(
                reference,
                format!("failed to delete manifest '{}': {} {}", identifier, status, body),
            ));
        }

        Ok(DeleteOutcome::Deleted)
    }

    /// A fresh registry connection for one call.
    fn remote_client(&self) -> RegistryClient {
        RegistryClient::new(ClientConfig {
            protocol: ClientProtocol::Https,
            ..Default::default()
        })
    }
}

/// Wrap a registry failure with the registry it came from.
fn registry_error(reference: &Reference, message: String) -> CourierError {
    CourierError::RegistryError {
        registry: reference.resolve_registry().to_string(),
        message,
    }
}

/// Parse a reference string, wrapping parse failures as input errors.
fn parse_reference(raw: &str) -> Result<Reference> {
    raw.parse::<Reference>()
        .map_err(|e| CourierError::InvalidReference {
            reference: raw.to_string(),
            message: e.to_string(),
        })
}

/// The digest or tag a reference addresses, defaulting to `latest`.
fn reference_identifier(reference: &Reference) -> &str {
    reference
        .digest()
        .or_else(|| reference.tag())
        .unwrap_or("latest")
}

/// The image architecture for pushed configs, in registry vocabulary.
fn host_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reference_valid() {
        let reference = parse_reference("ghcr.io/org/app:v1").unwrap();
        assert_eq!(reference.registry(), "ghcr.io");
        assert_eq!(reference.repository(), "org/app");
        assert_eq!(reference.tag(), Some("v1"));
    }

    #[test]
    fn test_parse_reference_invalid() {
        let result = parse_reference("registry.io/UPPER CASE??");
        assert!(matches!(
            result,
            Err(CourierError::InvalidReference { .. })
        ));
    }

    #[test]
    fn test_reference_identifier_digest() {
        let reference = parse_reference(
            "ghcr.io/org/app@sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
        )
        .unwrap();
        assert!(reference_identifier(&reference).starts_with("sha256:"));
    }

    #[test]
    fn test_reference_identifier_tag() {
        let reference = parse_reference("ghcr.io/org/app:v2").unwrap();
        assert_eq!(reference_identifier(&reference), "v2");
    }

    #[test]
    fn test_reference_identifier_defaults_to_latest() {
        let reference = parse_reference("ghcr.io/org/app").unwrap();
        assert_eq!(reference_identifier(&reference), "latest");
    }

    #[test]
    fn test_host_architecture_registry_vocabulary() {
        // Whatever the host, the value must be a registry-style arch name.
        assert_ne!(host_architecture(), "x86_64");
        assert_ne!(host_architecture(), "aarch64");
    }

    #[test]
    fn test_tag_cleanup_default_is_empty() {
        let cleanup = TagCleanup::default();
        assert!(cleanup.deleted.is_empty());
        assert!(cleanup.skipped.is_empty());
    }
}
