//! In-memory foundation
//!
//! Models one organization/space: applications keyed by GUID, route
//! bindings, env markers, attached autoscalers and instance indices. Used by
//! the test suites and by the CLI's dry-run mode. Faults and steady-state
//! delays can be injected to exercise failure paths.

use crate::client::{
    PlatformConnector, PlatformOperation, PluginOutcome, PluginScript, PushRequest,
    TargetPlatform,
};
use crate::error::{PlatformError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use skyway_types::{
    AppGuid, InstanceDetail, InstanceState, PlatformConnection, ReleaseDetail, ReleaseSummary,
    StatusMarker, STATUS_MARKER_ENV,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Stored state of one application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    pub guid: AppGuid,
    pub name: String,
    pub desired_instances: u32,
    #[serde(default)]
    pub instances: Vec<InstanceDetail>,
    #[serde(default)]
    pub routes: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Path or image of the last pushed artifact
    #[serde(default)]
    pub artifact: Option<String>,
    /// `Some(enabled)` when an autoscaler is attached
    #[serde(default)]
    pub autoscaler: Option<bool>,
    /// Creation order
    #[serde(default)]
    pub sequence: u64,
}

impl AppRecord {
    pub fn detail(&self) -> ReleaseDetail {
        ReleaseDetail {
            guid: self.guid.clone(),
            name: self.name.clone(),
            desired_instances: self.desired_instances,
            routes: self.routes.clone(),
            instances: self.instances.clone(),
            env: self.env.clone(),
        }
    }

    /// Scale instance indices to `0..count`, keeping existing indices
    fn scale_to(&mut self, count: u32) {
        self.instances.retain(|i| i.index < count);
        for index in 0..count {
            if !self.instances.iter().any(|i| i.index == index) {
                self.instances.push(InstanceDetail {
                    index,
                    state: InstanceState::Running,
                });
            }
        }
        self.instances.sort_by_key(|i| i.index);
        self.desired_instances = count;
    }
}

/// A recorded platform call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformCall {
    pub operation: PlatformOperation,
    /// Application name (or script) at the time of the call
    pub target: String,
    pub detail: String,
}

/// Makes matching calls fail
#[derive(Debug, Clone)]
pub struct FaultRule {
    pub operation: PlatformOperation,
    /// GUID or current name; `None` matches any target
    pub target: Option<String>,
    /// Number of calls that fail before the rule expires
    pub remaining: u32,
    pub message: String,
}

impl FaultRule {
    pub fn new(operation: PlatformOperation, message: impl Into<String>) -> Self {
        Self {
            operation,
            target: None,
            remaining: u32::MAX,
            message: message.into(),
        }
    }

    pub fn on(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn times(mut self, count: u32) -> Self {
        self.remaining = count;
        self
    }
}

/// Serializable view of a foundation, used to seed and persist dry runs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FoundationSnapshot {
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub space: Option<String>,
    #[serde(default)]
    pub apps: Vec<AppRecord>,
}

struct FoundationState {
    apps: DashMap<AppGuid, AppRecord>,
    sequence: AtomicU64,
    faults: Mutex<Vec<FaultRule>>,
    journal: Mutex<Vec<PlatformCall>>,
    steady_state_delay: RwLock<Duration>,
    plugin_exit_code: RwLock<i32>,
    route_domain: String,
    organization: Option<String>,
    space: Option<String>,
    credentials: Option<(String, String)>,
}

/// In-memory target platform
#[derive(Clone)]
pub struct InMemoryPlatform {
    state: Arc<FoundationState>,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::build(None, None, None, "apps.internal")
    }

    /// Restrict connections to one organization/space
    pub fn for_target(organization: impl Into<String>, space: impl Into<String>) -> Self {
        Self::build(
            Some(organization.into()),
            Some(space.into()),
            None,
            "apps.internal",
        )
    }

    /// Require these credentials on connect
    pub fn with_credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        let state = &self.state;
        Self::build(
            state.organization.clone(),
            state.space.clone(),
            Some((username.into(), password.into())),
            &state.route_domain,
        )
    }

    fn build(
        organization: Option<String>,
        space: Option<String>,
        credentials: Option<(String, String)>,
        route_domain: &str,
    ) -> Self {
        Self {
            state: Arc::new(FoundationState {
                apps: DashMap::new(),
                sequence: AtomicU64::new(0),
                faults: Mutex::new(Vec::new()),
                journal: Mutex::new(Vec::new()),
                steady_state_delay: RwLock::new(Duration::ZERO),
                plugin_exit_code: RwLock::new(0),
                route_domain: route_domain.to_string(),
                organization,
                space,
                credentials,
            }),
        }
    }

    pub fn from_snapshot(snapshot: FoundationSnapshot) -> Self {
        let platform = Self::build(
            snapshot.organization,
            snapshot.space,
            None,
            "apps.internal",
        );
        let mut apps = snapshot.apps;
        apps.sort_by_key(|a| a.sequence);
        for mut app in apps {
            app.sequence = platform.next_sequence();
            platform.state.apps.insert(app.guid.clone(), app);
        }
        platform
    }

    pub fn snapshot(&self) -> FoundationSnapshot {
        FoundationSnapshot {
            organization: self.state.organization.clone(),
            space: self.state.space.clone(),
            apps: self.records(),
        }
    }

    /// Create a running release directly, bypassing the push path
    pub fn seed_release(&self, name: &str, instances: u32, routes: &[&str]) -> AppGuid {
        let guid = AppGuid::generate();
        let mut record = AppRecord {
            guid: guid.clone(),
            name: name.to_string(),
            desired_instances: 0,
            instances: Vec::new(),
            routes: routes.iter().map(|r| r.to_string()).collect(),
            env: BTreeMap::new(),
            artifact: None,
            autoscaler: None,
            sequence: self.next_sequence(),
        };
        record.scale_to(instances);
        self.state.apps.insert(guid.clone(), record);
        guid
    }

    /// Set an env marker directly, bypassing the journal
    pub fn seed_marker(&self, guid: &AppGuid, marker: StatusMarker) {
        if let Some(mut app) = self.state.apps.get_mut(guid) {
            app.env
                .insert(STATUS_MARKER_ENV.to_string(), marker.as_env_value().to_string());
        }
    }

    pub fn attach_autoscaler(&self, guid: &AppGuid, enabled: bool) {
        if let Some(mut app) = self.state.apps.get_mut(guid) {
            app.autoscaler = Some(enabled);
        }
    }

    pub fn set_steady_state_delay(&self, delay: Duration) {
        *self.state.steady_state_delay.write() = delay;
    }

    pub fn set_plugin_exit_code(&self, code: i32) {
        *self.state.plugin_exit_code.write() = code;
    }

    pub fn inject_fault(&self, rule: FaultRule) {
        self.state.faults.lock().push(rule);
    }

    pub fn clear_faults(&self) {
        self.state.faults.lock().clear();
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.state.journal.lock().clone()
    }

    pub fn release(&self, guid: &AppGuid) -> Option<AppRecord> {
        self.state.apps.get(guid).map(|a| a.clone())
    }

    pub fn release_by_name(&self, name: &str) -> Option<AppRecord> {
        self.state
            .apps
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .map(|a| a.clone())
    }

    /// All applications, oldest first
    pub fn records(&self) -> Vec<AppRecord> {
        let mut apps: Vec<AppRecord> = self.state.apps.iter().map(|a| a.clone()).collect();
        apps.sort_by_key(|a| a.sequence);
        apps
    }

    fn next_sequence(&self) -> u64 {
        self.state.sequence.fetch_add(1, Ordering::SeqCst)
    }

    fn record_call(&self, operation: PlatformOperation, target: &str, detail: impl Into<String>) {
        self.state.journal.lock().push(PlatformCall {
            operation,
            target: target.to_string(),
            detail: detail.into(),
        });
    }

    /// Fail the call when a matching fault rule is armed
    fn check_fault(&self, operation: PlatformOperation, guid: Option<&AppGuid>) -> Result<()> {
        let name = guid.and_then(|g| self.state.apps.get(g).map(|a| a.name.clone()));
        self.check_fault_named(operation, guid, name)
    }

    fn check_fault_named(
        &self,
        operation: PlatformOperation,
        guid: Option<&AppGuid>,
        name: Option<String>,
    ) -> Result<()> {
        let mut faults = self.state.faults.lock();
        let hit = faults.iter_mut().find(|rule| {
            rule.operation == operation
                && rule.remaining > 0
                && match &rule.target {
                    None => true,
                    Some(target) => {
                        guid.map(|g| g.as_str() == target).unwrap_or(false)
                            || name.as_deref() == Some(target.as_str())
                    }
                }
        });
        match hit {
            Some(rule) => {
                rule.remaining -= 1;
                Err(PlatformError::api(operation, rule.message.clone()))
            }
            None => Ok(()),
        }
    }

    fn app_name(&self, guid: &AppGuid) -> Result<String> {
        self.state
            .apps
            .get(guid)
            .map(|a| a.name.clone())
            .ok_or_else(|| PlatformError::ApplicationNotFound(guid.to_string()))
    }

    fn find_guid_by_name(&self, name: &str) -> Option<AppGuid> {
        self.state
            .apps
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .map(|a| a.guid.clone())
    }

    async fn wait_for_steady_state(&self) {
        let delay = *self.state.steady_state_delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn random_route(&self, name: &str) -> String {
        let suffix: u32 = rand::thread_rng().gen_range(1000..10000);
        format!(
            "{}-{}.{}",
            name.to_ascii_lowercase().replace('_', "-"),
            suffix,
            self.state.route_domain
        )
    }
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

/// Fields of the first application block the foundation cares about
struct PushedApplication {
    name: String,
    instances: u32,
    routes: Vec<String>,
    random_route: bool,
    no_route: bool,
    env: BTreeMap<String, String>,
    artifact: Option<String>,
}

fn parse_manifest(manifest: &str) -> Result<PushedApplication> {
    let doc: Value = serde_yaml::from_str(manifest)
        .map_err(|e| PlatformError::InvalidManifest(e.to_string()))?;
    let app = doc
        .get("applications")
        .and_then(Value::as_sequence)
        .and_then(|apps| apps.first())
        .ok_or_else(|| PlatformError::InvalidManifest("no applications block".to_string()))?;
    let name = app
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| PlatformError::InvalidManifest("application has no name".to_string()))?
        .to_string();

    let web_process_instances = app
        .get("processes")
        .and_then(Value::as_sequence)
        .and_then(|processes| {
            processes
                .iter()
                .find(|p| p.get("type").and_then(Value::as_str) == Some("web"))
        })
        .and_then(|p| p.get("instances"))
        .and_then(Value::as_u64);
    let instances = app
        .get("instances")
        .and_then(Value::as_u64)
        .or(web_process_instances)
        .unwrap_or(1) as u32;

    let routes = app
        .get("routes")
        .and_then(Value::as_sequence)
        .map(|routes| {
            routes
                .iter()
                .filter_map(|r| r.get("route").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let env = app
        .get("env")
        .and_then(Value::as_mapping)
        .map(|env| {
            env.iter()
                .filter_map(|(k, v)| {
                    let key = k.as_str()?.to_string();
                    let value = match v {
                        Value::String(s) => s.clone(),
                        Value::Bool(b) => b.to_string(),
                        Value::Number(n) => n.to_string(),
                        _ => return None,
                    };
                    Some((key, value))
                })
                .collect()
        })
        .unwrap_or_default();

    let artifact = app
        .get("docker")
        .and_then(|d| d.get("image"))
        .and_then(Value::as_str)
        .or_else(|| app.get("path").and_then(Value::as_str))
        .map(str::to_string);

    Ok(PushedApplication {
        name,
        instances,
        routes,
        random_route: app.get("random-route").and_then(Value::as_bool) == Some(true),
        no_route: app.get("no-route").and_then(Value::as_bool) == Some(true),
        env,
        artifact,
    })
}

#[async_trait]
impl TargetPlatform for InMemoryPlatform {
    async fn push_application(&self, push: &PushRequest) -> Result<ReleaseDetail> {
        let pushed = parse_manifest(&push.manifest)?;
        let existing = self.find_guid_by_name(&pushed.name);
        self.check_fault_named(
            PlatformOperation::Push,
            existing.as_ref(),
            Some(pushed.name.clone()),
        )?;
        self.record_call(
            PlatformOperation::Push,
            &pushed.name,
            format!("instances={} rolling={}", pushed.instances, push.rolling),
        );

        let routes = if pushed.no_route {
            Vec::new()
        } else if pushed.random_route {
            vec![self.random_route(&pushed.name)]
        } else {
            pushed.routes
        };

        let guid = match existing {
            Some(guid) => {
                if let Some(mut app) = self.state.apps.get_mut(&guid) {
                    if push.rolling {
                        app.instances.clear();
                    }
                    app.scale_to(pushed.instances);
                    for route in routes {
                        if !app.routes.contains(&route) {
                            app.routes.push(route);
                        }
                    }
                    app.env.extend(pushed.env);
                    app.artifact = pushed.artifact;
                }
                guid
            }
            None => {
                let guid = AppGuid::generate();
                let mut record = AppRecord {
                    guid: guid.clone(),
                    name: pushed.name,
                    desired_instances: 0,
                    instances: Vec::new(),
                    routes,
                    env: pushed.env,
                    artifact: pushed.artifact,
                    autoscaler: None,
                    sequence: self.next_sequence(),
                };
                record.scale_to(pushed.instances);
                self.state.apps.insert(guid.clone(), record);
                guid
            }
        };

        if push.rolling {
            self.wait_for_steady_state().await;
        }

        let detail = self
            .state
            .apps
            .get(&guid)
            .map(|a| a.detail())
            .ok_or_else(|| PlatformError::ApplicationNotFound(guid.to_string()))?;
        debug!(release = %detail.name, guid = %detail.guid, "Pushed application");
        Ok(detail)
    }

    async fn resize_application(&self, guid: &AppGuid, instances: u32) -> Result<ReleaseDetail> {
        self.check_fault(PlatformOperation::Resize, Some(guid))?;
        let name = self.app_name(guid)?;
        self.record_call(PlatformOperation::Resize, &name, instances.to_string());
        if let Some(mut app) = self.state.apps.get_mut(guid) {
            app.scale_to(instances);
        }
        self.wait_for_steady_state().await;
        self.state
            .apps
            .get(guid)
            .map(|a| a.detail())
            .ok_or_else(|| PlatformError::ApplicationNotFound(guid.to_string()))
    }

    async fn rename_application(&self, guid: &AppGuid, new_name: &str) -> Result<()> {
        self.check_fault(PlatformOperation::Rename, Some(guid))?;
        let name = self.app_name(guid)?;
        if let Some(holder) = self.find_guid_by_name(new_name) {
            if &holder != guid {
                return Err(PlatformError::NameTaken(new_name.to_string()));
            }
        }
        self.record_call(PlatformOperation::Rename, &name, new_name);
        if let Some(mut app) = self.state.apps.get_mut(guid) {
            app.name = new_name.to_string();
        }
        Ok(())
    }

    async fn delete_application(&self, guid: &AppGuid) -> Result<()> {
        self.check_fault(PlatformOperation::Delete, Some(guid))?;
        let name = self.app_name(guid)?;
        self.record_call(PlatformOperation::Delete, &name, "");
        self.state.apps.remove(guid);
        Ok(())
    }

    async fn map_routes(&self, guid: &AppGuid, routes: &[String]) -> Result<()> {
        self.check_fault(PlatformOperation::MapRoutes, Some(guid))?;
        let name = self.app_name(guid)?;
        self.record_call(PlatformOperation::MapRoutes, &name, routes.join(","));
        if let Some(mut app) = self.state.apps.get_mut(guid) {
            for route in routes {
                if !app.routes.contains(route) {
                    app.routes.push(route.clone());
                }
            }
        }
        Ok(())
    }

    async fn unmap_routes(&self, guid: &AppGuid, routes: &[String]) -> Result<()> {
        self.check_fault(PlatformOperation::UnmapRoutes, Some(guid))?;
        let name = self.app_name(guid)?;
        self.record_call(PlatformOperation::UnmapRoutes, &name, routes.join(","));
        if let Some(mut app) = self.state.apps.get_mut(guid) {
            app.routes.retain(|r| !routes.contains(r));
        }
        Ok(())
    }

    async fn get_application_by_name(&self, name: &str) -> Result<Option<ReleaseDetail>> {
        let guid = self.find_guid_by_name(name);
        self.check_fault(PlatformOperation::GetApplication, guid.as_ref())?;
        Ok(guid.and_then(|g| self.state.apps.get(&g).map(|a| a.detail())))
    }

    async fn get_application_by_guid(&self, guid: &AppGuid) -> Result<Option<ReleaseDetail>> {
        self.check_fault(PlatformOperation::GetApplication, Some(guid))?;
        Ok(self.state.apps.get(guid).map(|a| a.detail()))
    }

    async fn list_releases(&self, prefix: &str) -> Result<Vec<ReleaseSummary>> {
        self.check_fault(PlatformOperation::ListReleases, None)?;
        let versioned = format!("{}__", prefix.to_ascii_lowercase());
        Ok(self
            .records()
            .into_iter()
            .filter(|a| {
                let name = a.name.to_ascii_lowercase();
                name == prefix.to_ascii_lowercase() || name.starts_with(&versioned)
            })
            .map(|a| a.detail().summary())
            .collect())
    }

    async fn set_status_marker(&self, guid: &AppGuid, marker: StatusMarker) -> Result<()> {
        self.check_fault(PlatformOperation::SetStatusMarker, Some(guid))?;
        let name = self.app_name(guid)?;
        self.record_call(PlatformOperation::SetStatusMarker, &name, marker.as_env_value());
        if let Some(mut app) = self.state.apps.get_mut(guid) {
            app.env
                .insert(STATUS_MARKER_ENV.to_string(), marker.as_env_value().to_string());
        }
        Ok(())
    }

    async fn unset_status_marker(&self, guid: &AppGuid) -> Result<()> {
        self.check_fault(PlatformOperation::UnsetStatusMarker, Some(guid))?;
        let name = self.app_name(guid)?;
        self.record_call(PlatformOperation::UnsetStatusMarker, &name, "");
        if let Some(mut app) = self.state.apps.get_mut(guid) {
            app.env.remove(STATUS_MARKER_ENV);
        }
        Ok(())
    }

    async fn status_marker(&self, guid: &AppGuid) -> Result<Option<StatusMarker>> {
        self.check_fault(PlatformOperation::QueryStatusMarker, Some(guid))?;
        Ok(self
            .state
            .apps
            .get(guid)
            .and_then(|a| a.detail().status_marker()))
    }

    async fn is_autoscaler_enabled(&self, guid: &AppGuid) -> Result<bool> {
        self.check_fault(PlatformOperation::QueryAutoscaler, Some(guid))?;
        Ok(self
            .state
            .apps
            .get(guid)
            .and_then(|a| a.autoscaler)
            .unwrap_or(false))
    }

    async fn set_autoscaler_enabled(&self, guid: &AppGuid, enabled: bool) -> Result<()> {
        self.check_fault(PlatformOperation::ToggleAutoscaler, Some(guid))?;
        let name = self.app_name(guid)?;
        self.record_call(PlatformOperation::ToggleAutoscaler, &name, enabled.to_string());
        if let Some(mut app) = self.state.apps.get_mut(guid) {
            if app.autoscaler.is_some() {
                app.autoscaler = Some(enabled);
            }
        }
        Ok(())
    }

    async fn run_plugin(&self, script: &PluginScript) -> Result<PluginOutcome> {
        self.check_fault(PlatformOperation::RunPlugin, None)?;
        self.record_call(
            PlatformOperation::RunPlugin,
            &script.working_dir.display().to_string(),
            script.script.clone(),
        );
        let exit_code = *self.state.plugin_exit_code.read();
        let output = script
            .script
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| format!("$ {}", l.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(PluginOutcome { exit_code, output })
    }
}

#[async_trait]
impl PlatformConnector for InMemoryPlatform {
    async fn connect(&self, connection: &PlatformConnection) -> Result<Arc<dyn TargetPlatform>> {
        if let Some((username, password)) = &self.state.credentials {
            if username != &connection.username || password != connection.password.expose() {
                return Err(PlatformError::Authentication {
                    username: connection.username.clone(),
                    endpoint: connection.endpoint.clone(),
                });
            }
        }
        let org_matches = self
            .state
            .organization
            .as_ref()
            .map(|o| o == &connection.organization)
            .unwrap_or(true);
        let space_matches = self
            .state
            .space
            .as_ref()
            .map(|s| s == &connection.space)
            .unwrap_or(true);
        if !org_matches || !space_matches {
            return Err(PlatformError::UnknownTarget {
                organization: connection.organization.clone(),
                space: connection.space.clone(),
            });
        }
        Ok(Arc::new(self.clone()))
    }
}
