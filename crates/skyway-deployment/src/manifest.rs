//! Manifest mutator
//!
//! Rewrites the first application block of a push manifest from computed
//! deployment data. Only a closed set of keys is touched; every other key
//! keeps its value and relative position.

use crate::error::{DeploymentError, Result};
use serde_yaml::{Mapping, Value};
use skyway_types::{ResolvedArtifact, RouteSet, StatusMarker, STATUS_MARKER_ENV};

const APPLICATIONS: &str = "applications";
const NAME: &str = "name";
const PATH: &str = "path";
const DOCKER: &str = "docker";
const IMAGE: &str = "image";
const USERNAME: &str = "username";
const INSTANCES: &str = "instances";
const PROCESSES: &str = "processes";
const PROCESS_TYPE: &str = "type";
const WEB_PROCESS: &str = "web";
const ROUTES: &str = "routes";
const ROUTE: &str = "route";
const NO_ROUTE: &str = "no-route";
const RANDOM_ROUTE: &str = "random-route";
const CREATE_SERVICES: &str = "create-services";
const ENV: &str = "env";

/// Edits applied to a manifest template
#[derive(Debug, Clone, Default)]
pub struct ManifestEdit {
    pub release_name: String,
    pub artifact: Option<ResolvedArtifact>,
    /// Caller routes; empty selects random-route mode
    pub routes: RouteSet,
    /// Push with zero instances, scaling happens afterwards
    pub zero_instances: bool,
    pub inactive_marker: bool,
}

impl ManifestEdit {
    pub fn new(release_name: impl Into<String>) -> Self {
        Self {
            release_name: release_name.into(),
            ..Default::default()
        }
    }

    pub fn with_artifact(mut self, artifact: ResolvedArtifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn with_routes(mut self, routes: RouteSet) -> Self {
        self.routes = routes;
        self
    }

    pub fn with_zero_instances(mut self) -> Self {
        self.zero_instances = true;
        self
    }

    pub fn with_inactive_marker(mut self) -> Self {
        self.inactive_marker = true;
        self
    }
}

/// Route block chosen for the push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMode {
    NoRoute,
    Random,
    Explicit(Vec<String>),
}

/// Route resolution in priority order: template no-route, then random, then caller routes
pub fn route_mode(app: &Mapping, routes: &RouteSet) -> RouteMode {
    if flag(app, NO_ROUTE) {
        RouteMode::NoRoute
    } else if flag(app, RANDOM_ROUTE) || routes.is_empty() {
        RouteMode::Random
    } else {
        RouteMode::Explicit(routes.as_slice().to_vec())
    }
}

/// Apply `edit` to `template` and return the finalized manifest
pub fn render(template: &str, edit: &ManifestEdit) -> Result<String> {
    let mut doc: Value = serde_yaml::from_str(template)
        .map_err(|e| DeploymentError::invalid_argument(format!("malformed manifest: {}", e)))?;

    if let Some(root) = doc.as_mapping_mut() {
        root.remove(CREATE_SERVICES);
    }

    let app = application_mut(&mut doc)?;

    app.insert(key(NAME), Value::String(edit.release_name.clone()));

    if let Some(artifact) = &edit.artifact {
        set_artifact(app, artifact);
    }

    if edit.zero_instances {
        zero_instances(app);
    }

    match route_mode(app, &edit.routes) {
        RouteMode::NoRoute => {
            app.remove(ROUTES);
            app.remove(RANDOM_ROUTE);
        }
        RouteMode::Random => {
            app.remove(ROUTES);
            app.insert(key(RANDOM_ROUTE), Value::Bool(true));
        }
        RouteMode::Explicit(routes) => {
            app.remove(RANDOM_ROUTE);
            let block = routes
                .into_iter()
                .map(|route| {
                    let mut entry = Mapping::new();
                    entry.insert(key(ROUTE), Value::String(route));
                    Value::Mapping(entry)
                })
                .collect();
            app.insert(key(ROUTES), Value::Sequence(block));
        }
    }

    app.remove(CREATE_SERVICES);

    if edit.inactive_marker {
        let env = app
            .entry(key(ENV))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if !env.is_mapping() {
            *env = Value::Mapping(Mapping::new());
        }
        if let Some(env) = env.as_mapping_mut() {
            env.insert(
                key(STATUS_MARKER_ENV),
                Value::String(StatusMarker::Inactive.as_env_value().to_string()),
            );
        }
    }

    serde_yaml::to_string(&doc)
        .map_err(|e| DeploymentError::Internal(format!("failed to serialize manifest: {}", e)))
}

/// Instance count declared by the template, top-level or on the web process
pub fn declared_instances(template: &str) -> Result<Option<u32>> {
    let mut doc: Value = serde_yaml::from_str(template)
        .map_err(|e| DeploymentError::invalid_argument(format!("malformed manifest: {}", e)))?;
    let app = application_mut(&mut doc)?;
    let top = app.get(INSTANCES).and_then(Value::as_u64);
    let web = web_processes(app)
        .find_map(|p| p.get(INSTANCES).and_then(Value::as_u64));
    top.or(web)
        .map(|n| {
            u32::try_from(n).map_err(|_| {
                DeploymentError::invalid_argument(format!("instance count {} is out of range", n))
            })
        })
        .transpose()
}

fn application_mut(doc: &mut Value) -> Result<&mut Mapping> {
    doc.get_mut(APPLICATIONS)
        .and_then(Value::as_sequence_mut)
        .and_then(|apps| apps.first_mut())
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| DeploymentError::invalid_argument("manifest has no application block"))
}

fn set_artifact(app: &mut Mapping, artifact: &ResolvedArtifact) {
    match artifact {
        ResolvedArtifact::Package { path } => {
            app.remove(DOCKER);
            app.insert(key(PATH), Value::String(path.display().to_string()));
        }
        ResolvedArtifact::Container {
            image, username, ..
        } => {
            app.remove(PATH);
            let mut docker = Mapping::new();
            docker.insert(key(IMAGE), Value::String(image.clone()));
            if let Some(username) = username {
                docker.insert(key(USERNAME), Value::String(username.clone()));
            }
            app.insert(key(DOCKER), Value::Mapping(docker));
        }
    }
}

fn zero_instances(app: &mut Mapping) {
    let mut web_seen = false;
    if let Some(processes) = app.get_mut(PROCESSES).and_then(Value::as_sequence_mut) {
        for process in processes.iter_mut().filter_map(Value::as_mapping_mut) {
            if process.get(PROCESS_TYPE).and_then(Value::as_str) == Some(WEB_PROCESS) {
                process.insert(key(INSTANCES), Value::from(0u32));
                web_seen = true;
            }
        }
    }
    if !web_seen || app.contains_key(INSTANCES) {
        app.insert(key(INSTANCES), Value::from(0u32));
    }
}

fn web_processes(app: &Mapping) -> impl Iterator<Item = &Mapping> {
    app.get(PROCESSES)
        .and_then(Value::as_sequence)
        .into_iter()
        .flatten()
        .filter_map(Value::as_mapping)
        .filter(|p| p.get(PROCESS_TYPE).and_then(Value::as_str) == Some(WEB_PROCESS))
}

fn flag(app: &Mapping, name: &str) -> bool {
    match app.get(name) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn key(name: &str) -> Value {
    Value::String(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyway_types::Secret;
    use std::path::PathBuf;

    const TEMPLATE: &str = r#"
applications:
- name: placeholder
  memory: 1G
  instances: 4
  buildpacks:
  - java_buildpack
  routes:
  - route: old.example.com
  create-services:
  - name: db
  env:
    SPRING_PROFILES_ACTIVE: prod
"#;

    fn parse(manifest: &str) -> Mapping {
        let doc: Value = serde_yaml::from_str(manifest).unwrap();
        doc[APPLICATIONS][0].as_mapping().unwrap().clone()
    }

    #[test]
    fn test_setup_push_edits() {
        let edit = ManifestEdit::new("PaymentService__4")
            .with_artifact(ResolvedArtifact::Package {
                path: PathBuf::from("/work/app.jar"),
            })
            .with_routes(RouteSet::from(vec!["pay-temp.example.com".to_string()]))
            .with_zero_instances()
            .with_inactive_marker();
        let rendered = render(TEMPLATE, &edit).unwrap();
        let app = parse(&rendered);

        assert_eq!(app[NAME], Value::from("PaymentService__4"));
        assert_eq!(app[PATH], Value::from("/work/app.jar"));
        assert_eq!(app[INSTANCES], Value::from(0u32));
        assert_eq!(app[ROUTES][0][ROUTE], Value::from("pay-temp.example.com"));
        assert_eq!(app[ROUTES].as_sequence().unwrap().len(), 1);
        assert!(!app.contains_key(CREATE_SERVICES));
        assert_eq!(app[ENV][STATUS_MARKER_ENV], Value::from("INACTIVE"));
        assert_eq!(app[ENV]["SPRING_PROFILES_ACTIVE"], Value::from("prod"));
    }

    #[test]
    fn test_untouched_keys_keep_order() {
        let rendered = render(TEMPLATE, &ManifestEdit::new("svc__1")).unwrap();
        let keys: Vec<String> = parse(&rendered)
            .keys()
            .filter_map(|k| k.as_str().map(str::to_string))
            .collect();
        assert_eq!(keys[0], NAME);
        assert_eq!(keys[1], "memory");
        assert_eq!(keys[2], INSTANCES);
        assert_eq!(keys[3], "buildpacks");
    }

    #[test]
    fn test_no_route_wins_over_caller_routes() {
        let template = "applications:\n- name: x\n  no-route: true\n  random-route: true\n";
        let edit = ManifestEdit::new("svc__2").with_routes(RouteSet::from(vec!["a.example.com".to_string()]));
        let app = parse(&render(template, &edit).unwrap());
        assert!(!app.contains_key(ROUTES));
        assert!(!app.contains_key(RANDOM_ROUTE));
        assert_eq!(app[NO_ROUTE], Value::Bool(true));
    }

    #[test]
    fn test_empty_routes_select_random_route() {
        let app = parse(&render(TEMPLATE, &ManifestEdit::new("svc__2")).unwrap());
        assert!(!app.contains_key(ROUTES));
        assert_eq!(app[RANDOM_ROUTE], Value::Bool(true));

        let template = "applications:\n- name: x\n  random-route: true\n";
        let edit = ManifestEdit::new("svc__3").with_routes(RouteSet::from(vec!["a.example.com".to_string()]));
        let app = parse(&render(template, &edit).unwrap());
        assert_eq!(app[RANDOM_ROUTE], Value::Bool(true));
        assert!(!app.contains_key(ROUTES));
    }

    #[test]
    fn test_container_artifact_never_writes_password() {
        let edit = ManifestEdit::new("svc__1").with_artifact(ResolvedArtifact::Container {
            image: "registry.example.com/pay:1.4".to_string(),
            username: Some("robot".to_string()),
            password: Some(Secret::new("hunter2")),
        });
        let rendered = render("applications:\n- name: x\n  path: ./app.jar\n", &edit).unwrap();
        assert!(!rendered.contains("hunter2"));
        let app = parse(&rendered);
        assert!(!app.contains_key(PATH));
        assert_eq!(app[DOCKER][IMAGE], Value::from("registry.example.com/pay:1.4"));
        assert_eq!(app[DOCKER][USERNAME], Value::from("robot"));
    }

    #[test]
    fn test_web_process_instances_zeroed() {
        let template = "applications:\n- name: x\n  processes:\n  - type: web\n    instances: 3\n  - type: worker\n    instances: 2\n";
        let app = parse(&render(template, &ManifestEdit::new("svc__1").with_zero_instances()).unwrap());
        assert_eq!(app[PROCESSES][0][INSTANCES], Value::from(0u32));
        assert_eq!(app[PROCESSES][1][INSTANCES], Value::from(2u32));
        assert!(!app.contains_key(INSTANCES));
        assert_eq!(declared_instances(template).unwrap(), Some(3));
    }

    #[test]
    fn test_oversized_instance_count_rejected() {
        let err = declared_instances("applications:\n- name: x\n  instances: 5000000000\n").unwrap_err();
        assert!(matches!(err, DeploymentError::InvalidArgument(_)));
        assert_eq!(
            declared_instances("applications:\n- name: x\n  instances: 4294967295\n").unwrap(),
            Some(u32::MAX)
        );
    }

    #[test]
    fn test_missing_application_block_is_invalid_argument() {
        let err = render("version: 1\n", &ManifestEdit::new("svc__1")).unwrap_err();
        assert!(matches!(err, DeploymentError::InvalidArgument(_)));
        let err = render("applications: [", &ManifestEdit::new("svc__1")).unwrap_err();
        assert!(matches!(err, DeploymentError::InvalidArgument(_)));
    }
}
