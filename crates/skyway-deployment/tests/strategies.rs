//! Rolling and standard strategies, conflict detection and timeouts

use skyway_deployment::{EngineConfig, MemoryLogSink, Stage, StrategyDispatcher};
use skyway_platform::{InMemoryPlatform, PlatformOperation};
use skyway_types::{
    ArtifactDescriptor, CommandHeader, CommandStatus, DataFetchRequest, DeploymentOutput,
    DeploymentRequest, ErrorKind, InstanceState, PlatformConnection, ReleaseInfo, ResizeStrategy,
    RollingDeployRequest, RollingRollbackRequest, RouteMappingRequest, RouteOperation, Secret,
    StandardDeployRequest, StatusMarker,
};
use std::sync::Arc;
use std::time::Duration;

const MANIFEST: &str = "applications:\n- name: web\n  instances: 3\n";

fn header() -> CommandHeader {
    CommandHeader::new(PlatformConnection {
        endpoint: "api.sys.example.com".to_string(),
        organization: "retail".to_string(),
        space: "staging".to_string(),
        username: "deployer".to_string(),
        password: Secret::new("pw"),
    })
}

fn dispatcher(platform: &InMemoryPlatform) -> (StrategyDispatcher, Arc<MemoryLogSink>) {
    let sink = Arc::new(MemoryLogSink::new());
    let dispatcher = StrategyDispatcher::new(
        Arc::new(platform.clone()),
        sink.clone(),
        EngineConfig::immediate(),
    );
    (dispatcher, sink)
}

fn rolling_request(image: &str) -> DeploymentRequest {
    DeploymentRequest::RollingDeploy(RollingDeployRequest {
        header: header(),
        release_name_prefix: "web".to_string(),
        manifest: MANIFEST.to_string(),
        artifact: ArtifactDescriptor::Container {
            image: image.to_string(),
            registry: None,
        },
        routes: ["web.example.com"].into_iter().collect(),
    })
}

#[tokio::test]
async fn rolling_deploy_reports_every_instance_as_upsized() {
    let platform = InMemoryPlatform::new();
    let (dispatcher, _) = dispatcher(&platform);

    let response = dispatcher.dispatch(&rolling_request("registry.example.com/web:1")).await;
    let output = match response.output {
        Some(DeploymentOutput::RollingDeploy(output)) => output,
        other => panic!("unexpected output {other:?}"),
    };

    assert!(output.first_deployment);
    assert!(output.previous_release.is_none());
    assert_eq!(output.release.name, "web");
    let indices: Vec<u32> = output.new_instances.iter().map(|i| i.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert!(output.new_instances.iter().all(|i| i.is_upsize));
    assert!(output
        .new_instances
        .iter()
        .all(|i| i.state == InstanceState::Running));
}

#[tokio::test]
async fn rolling_rollback_repushes_previous_artifact() {
    let platform = InMemoryPlatform::new();
    let (dispatcher, _) = dispatcher(&platform);

    dispatcher.dispatch(&rolling_request("registry.example.com/web:1")).await;
    let response = dispatcher.dispatch(&rolling_request("registry.example.com/web:2")).await;
    let deployed = match response.output {
        Some(DeploymentOutput::RollingDeploy(output)) => output,
        other => panic!("unexpected output {other:?}"),
    };
    assert!(!deployed.first_deployment);
    assert_eq!(deployed.previous_release.unwrap().running_count, 3);

    let rollback = DeploymentRequest::RollingRollback(RollingRollbackRequest {
        header: header(),
        release_name_prefix: "web".to_string(),
        first_deployment: false,
        previous_manifest: Some(MANIFEST.to_string()),
        previous_artifact: Some(ArtifactDescriptor::Container {
            image: "registry.example.com/web:1".to_string(),
            registry: None,
        }),
        routes: ["web.example.com"].into_iter().collect(),
    });
    let response = dispatcher.dispatch(&rollback).await;
    assert!(response.is_success(), "{:?}", response.error_message);

    let record = platform.release_by_name("web").unwrap();
    assert_eq!(record.artifact.as_deref(), Some("registry.example.com/web:1"));
    assert_eq!(record.desired_instances, 3);
}

#[tokio::test]
async fn rolling_rollback_of_first_deployment_deletes_release() {
    let platform = InMemoryPlatform::new();
    let (dispatcher, _) = dispatcher(&platform);
    dispatcher.dispatch(&rolling_request("registry.example.com/web:1")).await;

    let rollback = DeploymentRequest::RollingRollback(RollingRollbackRequest {
        header: header(),
        release_name_prefix: "web".to_string(),
        first_deployment: true,
        previous_manifest: None,
        previous_artifact: None,
        routes: Default::default(),
    });
    let response = dispatcher.dispatch(&rollback).await;

    assert!(response.is_success());
    assert!(platform.release_by_name("web").is_none());
}

#[tokio::test]
async fn two_inactive_markers_are_reported_with_both_names() {
    let platform = InMemoryPlatform::new();
    let first = platform.seed_release("cart__4", 0, &[]);
    let second = platform.seed_release("cart__5", 0, &[]);
    platform.seed_marker(&first, StatusMarker::Inactive);
    platform.seed_marker(&second, StatusMarker::Inactive);
    platform.seed_release("cart__6", 2, &["cart.example.com"]);
    let (dispatcher, sink) = dispatcher(&platform);

    let response = dispatcher
        .dispatch(&DeploymentRequest::DataFetch(DataFetchRequest {
            header: header(),
            release_name_prefix: "cart".to_string(),
            blue_green: true,
        }))
        .await;

    assert_eq!(response.error_kind, Some(ErrorKind::InvalidPlatformState));
    let message = response.error_message.unwrap();
    assert!(message.contains("cart__4"));
    assert!(message.contains("cart__5"));
    assert_eq!(sink.status(Stage::DataFetch), Some(CommandStatus::Failure));
    assert_eq!(sink.status(Stage::Wrapup), Some(CommandStatus::Success));
}

#[tokio::test]
async fn unmapping_twice_is_idempotent() {
    let platform = InMemoryPlatform::new();
    let guid = platform.seed_release("cart__6", 2, &["cart.example.com", "cart-canary.example.com"]);
    let (dispatcher, _) = dispatcher(&platform);
    let request = DeploymentRequest::RouteMapping(RouteMappingRequest {
        header: header(),
        release_name: "cart__6".to_string(),
        routes: ["cart-canary.example.com"].into_iter().collect(),
        operation: RouteOperation::Unmap,
    });

    let first = dispatcher.dispatch(&request).await;
    let second = dispatcher.dispatch(&request).await;

    assert!(first.is_success());
    assert!(second.is_success());
    assert_eq!(
        platform.release(&guid).unwrap().routes,
        vec!["cart.example.com".to_string()]
    );
}

#[tokio::test]
async fn slow_steady_state_times_out() {
    let platform = InMemoryPlatform::new();
    let guid = platform.seed_release("svc__2", 0, &[]);
    platform.set_steady_state_delay(Duration::from_secs(5));
    let (dispatcher, sink) = dispatcher(&platform);

    let new_release = ReleaseInfo::from_detail(&platform.release(&guid).unwrap().detail());
    let request = DeploymentRequest::StandardDeploy(StandardDeployRequest {
        header: header().with_timeout(Duration::from_millis(50)),
        release_name_prefix: "svc".to_string(),
        new_release,
        upsize_count: 2,
        downsize_count: 0,
        resize_strategy: ResizeStrategy::UpscaleNewFirst,
        standard_blue_green: true,
    });
    let response = dispatcher.dispatch(&request).await;

    assert_eq!(response.error_kind, Some(ErrorKind::Timeout));
    assert_eq!(sink.status(Stage::Upsize), Some(CommandStatus::Failure));
    assert!(platform
        .calls()
        .iter()
        .any(|c| c.operation == PlatformOperation::Resize));
}
