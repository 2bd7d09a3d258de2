//! Manifest rendering

use anyhow::{Context, Result};
use skyway_deployment::{manifest, ManifestEdit};
use skyway_types::{ResolvedArtifact, RouteSet};
use std::path::PathBuf;

/// Arguments of `skyway render-manifest`
#[derive(clap::Args, Debug)]
pub struct RenderArgs {
    /// Manifest template
    #[arg(short, long)]
    pub manifest: PathBuf,

    /// Release name written into the manifest
    #[arg(short, long)]
    pub name: String,

    /// Route to attach; repeat for several. None selects a random route.
    #[arg(short, long = "route")]
    pub routes: Vec<String>,

    /// Package path to push
    #[arg(long, conflicts_with = "image")]
    pub path: Option<PathBuf>,

    /// Container image to push
    #[arg(long)]
    pub image: Option<String>,

    /// Push with zero instances
    #[arg(long)]
    pub zero_instances: bool,

    /// Mark the release INACTIVE
    #[arg(long)]
    pub inactive: bool,
}

impl RenderArgs {
    fn edit(&self) -> ManifestEdit {
        let mut edit = ManifestEdit::new(&self.name)
            .with_routes(self.routes.iter().cloned().collect::<RouteSet>());
        if let Some(path) = &self.path {
            edit = edit.with_artifact(ResolvedArtifact::Package { path: path.clone() });
        }
        if let Some(image) = &self.image {
            edit = edit.with_artifact(ResolvedArtifact::Container {
                image: image.clone(),
                username: None,
                password: None,
            });
        }
        if self.zero_instances {
            edit = edit.with_zero_instances();
        }
        if self.inactive {
            edit = edit.with_inactive_marker();
        }
        edit
    }
}

/// Render the manifest and print it
pub fn execute(args: &RenderArgs) -> Result<()> {
    let template = std::fs::read_to_string(&args.manifest)
        .with_context(|| format!("Failed to read manifest {}", args.manifest.display()))?;
    let rendered = manifest::render(&template, &args.edit())?;
    print!("{}", rendered);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(routes: &[&str]) -> RenderArgs {
        RenderArgs {
            manifest: PathBuf::from("manifest.yml"),
            name: "pay__8".to_string(),
            routes: routes.iter().map(|r| r.to_string()).collect(),
            path: None,
            image: Some("registry.example.com/pay:8".to_string()),
            zero_instances: true,
            inactive: true,
        }
    }

    #[test]
    fn test_flags_build_edit() {
        let edit = args(&["pay.example.com"]).edit();
        assert_eq!(edit.release_name, "pay__8");
        assert!(edit.routes.contains("pay.example.com"));
        assert!(edit.zero_instances);
        assert!(edit.inactive_marker);
        assert!(matches!(edit.artifact, Some(ResolvedArtifact::Container { .. })));
    }

    #[test]
    fn test_render_writes_release_name() {
        let template = "applications:\n- name: pay\n  instances: 2\n";
        let rendered = manifest::render(template, &args(&[]).edit()).unwrap();
        assert!(rendered.contains("pay__8"));
        assert!(rendered.contains("INACTIVE"));
    }
}
