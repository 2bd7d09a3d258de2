//! Artifact resolution

use crate::error::{DeploymentError, Result};
use async_trait::async_trait;
use skyway_types::{ArtifactDescriptor, ResolvedArtifact};
use std::path::Path;
use tracing::debug;

/// Turns an artifact descriptor into something a manifest can reference
#[async_trait]
pub trait ArtifactResolver: Send + Sync {
    async fn resolve(
        &self,
        artifact: &ArtifactDescriptor,
        working_dir: &Path,
    ) -> Result<ResolvedArtifact>;
}

/// Resolves packages from the local filesystem
#[derive(Debug, Default, Clone)]
pub struct LocalArtifactResolver;

#[async_trait]
impl ArtifactResolver for LocalArtifactResolver {
    async fn resolve(
        &self,
        artifact: &ArtifactDescriptor,
        working_dir: &Path,
    ) -> Result<ResolvedArtifact> {
        match artifact {
            ArtifactDescriptor::Package { source } => {
                let file_name = source.file_name().ok_or_else(|| {
                    DeploymentError::invalid_argument(format!(
                        "artifact path {} has no file name",
                        source.display()
                    ))
                })?;
                if !tokio::fs::try_exists(source).await.unwrap_or(false) {
                    return Err(DeploymentError::invalid_argument(format!(
                        "artifact {} does not exist",
                        source.display()
                    )));
                }
                let target = working_dir.join(file_name);
                tokio::fs::copy(source, &target).await?;
                debug!(source = %source.display(), target = %target.display(), "Copied package artifact");
                Ok(ResolvedArtifact::Package { path: target })
            }
            ArtifactDescriptor::Container { image, registry } => Ok(ResolvedArtifact::Container {
                image: image.clone(),
                username: registry.as_ref().map(|r| r.username.clone()),
                password: registry.as_ref().map(|r| r.password.clone()),
            }),
        }
    }
}
