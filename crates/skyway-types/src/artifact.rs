//! Artifact descriptors

use crate::connection::Secret;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Registry credentials for container artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: Secret,
}

/// What the caller asks to deploy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArtifactDescriptor {
    /// A package file (zip, jar, directory) already available locally
    Package { source: PathBuf },
    /// A container image with optional registry credentials
    Container {
        image: String,
        #[serde(default)]
        registry: Option<RegistryCredentials>,
    },
}

/// Artifact resolved against a working directory, ready for a push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedArtifact {
    Package {
        path: PathBuf,
    },
    Container {
        image: String,
        username: Option<String>,
        /// Passed to the platform out-of-band, never written to a manifest
        password: Option<Secret>,
    },
}

impl ResolvedArtifact {
    /// Secret values carried by this artifact
    pub fn secrets(&self) -> Vec<&str> {
        match self {
            ResolvedArtifact::Container {
                password: Some(password),
                ..
            } if !password.is_empty() => vec![password.expose()],
            _ => Vec::new(),
        }
    }
}
