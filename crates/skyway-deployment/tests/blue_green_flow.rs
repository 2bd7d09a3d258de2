//! Blue-green deployments driven end to end through the dispatcher

use skyway_deployment::{EngineConfig, MemoryLogSink, Stage, StrategyDispatcher};
use skyway_platform::{FaultRule, InMemoryPlatform, PlatformOperation};
use skyway_types::{
    ArtifactDescriptor, BlueGreenSetupRequest, CommandHeader, DeploymentOutput, DeploymentRequest,
    NamingStrategy, PlatformConnection, ReleaseInfo, ResizeStrategy, RouteSet, ScalingOutput,
    Secret, SetupOutput, StandardDeployRequest, StatusMarker, SwapRollbackOutput,
    SwapRollbackRequest, SwapRouteRequest, SwapRoutesOutput, SwapState,
};
use std::sync::Arc;

const PREFIX: &str = "PaymentService";
const MANIFEST: &str = "applications:\n- name: payment-service\n  instances: 2\n  memory: 512M\n";
const TEMP_ROUTE: &str = "payment-service-temp.apps.example.com";
const FINAL_ROUTE: &str = "payment-service.apps.example.com";

fn header() -> CommandHeader {
    CommandHeader::new(PlatformConnection {
        endpoint: "api.sys.example.com".to_string(),
        organization: "payments".to_string(),
        space: "prod".to_string(),
        username: "deployer".to_string(),
        password: Secret::new("s3cret"),
    })
}

fn routes(items: &[&str]) -> RouteSet {
    items.iter().copied().collect()
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

async fn run(dispatcher: &StrategyDispatcher, request: DeploymentRequest) -> DeploymentOutput {
    let response = dispatcher.dispatch(&request).await;
    assert!(
        response.is_success(),
        "{} failed: {:?}",
        response.kind,
        response.error_message
    );
    response.output.expect("successful response carries output")
}

async fn setup(dispatcher: &StrategyDispatcher, naming: NamingStrategy) -> SetupOutput {
    let request = DeploymentRequest::BlueGreenSetup(BlueGreenSetupRequest {
        header: header(),
        release_name_prefix: PREFIX.to_string(),
        manifest: MANIFEST.to_string(),
        artifact: ArtifactDescriptor::Container {
            image: "registry.example.com/payment-service:3".to_string(),
            registry: None,
        },
        temp_routes: routes(&[TEMP_ROUTE]),
        final_routes: routes(&[FINAL_ROUTE]),
        older_versions_to_keep: None,
        naming,
    });
    match run(dispatcher, request).await {
        DeploymentOutput::Setup(output) => output,
        other => panic!("unexpected output {other:?}"),
    }
}

async fn upsize(dispatcher: &StrategyDispatcher, new_release: &ReleaseInfo, count: u32) -> ScalingOutput {
    let request = DeploymentRequest::StandardDeploy(StandardDeployRequest {
        header: header(),
        release_name_prefix: PREFIX.to_string(),
        new_release: new_release.clone(),
        upsize_count: count,
        downsize_count: 0,
        resize_strategy: ResizeStrategy::UpscaleNewFirst,
        standard_blue_green: true,
    });
    match run(dispatcher, request).await {
        DeploymentOutput::Scaling(output) => output,
        other => panic!("unexpected output {other:?}"),
    }
}

fn swap_request(setup: &SetupOutput, naming: NamingStrategy) -> DeploymentRequest {
    DeploymentRequest::SwapRoute(SwapRouteRequest {
        header: header(),
        release_name_prefix: PREFIX.to_string(),
        new_release: setup.new_release.clone(),
        existing_release: setup.active_release.clone(),
        inactive_release: setup.inactive_release.clone(),
        temp_routes: routes(&[TEMP_ROUTE]),
        final_routes: routes(&[FINAL_ROUTE]),
        downsize_old_release: false,
        naming,
    })
}

fn swap_rollback_request(setup: &SetupOutput, swap_occurred: bool) -> DeploymentRequest {
    DeploymentRequest::SwapRollback(SwapRollbackRequest {
        header: header(),
        release_name_prefix: PREFIX.to_string(),
        new_release: setup.new_release.clone(),
        active_release: setup.active_release.clone(),
        inactive_release: setup.inactive_release.clone(),
        temp_routes: routes(&[TEMP_ROUTE]),
        final_routes: routes(&[FINAL_ROUTE]),
        swap_occurred,
        upsize_inactive_release: false,
        delete_new_release: true,
    })
}

fn inactive_names(platform: &InMemoryPlatform) -> Vec<String> {
    platform
        .records()
        .iter()
        .filter(|r| r.detail().status_marker() == Some(StatusMarker::Inactive))
        .map(|r| r.name.clone())
        .collect()
}

/// `PaymentService__2` serving production, `PaymentService__1` kept INACTIVE
fn live_foundation() -> InMemoryPlatform {
    let platform = InMemoryPlatform::new();
    let inactive = platform.seed_release("PaymentService__1", 0, &[]);
    platform.seed_marker(&inactive, StatusMarker::Inactive);
    let active = platform.seed_release("PaymentService__2", 2, &[FINAL_ROUTE]);
    platform.seed_marker(&active, StatusMarker::Active);
    platform
}

#[tokio::test]
async fn setup_deploy_swap_then_rollback_restores_topology() {
    let platform = live_foundation();
    let before: Vec<_> = platform.records().iter().map(|r| r.detail()).collect();
    let (dispatcher, sink) = dispatcher(&platform);

    let setup = setup(&dispatcher, NamingStrategy::Versioned).await;
    assert_eq!(setup.new_release.name, "PaymentService__3");
    assert_eq!(setup.active_release.as_ref().unwrap().name, "PaymentService__2");
    assert_eq!(setup.inactive_release.as_ref().unwrap().name, "PaymentService__1");

    let scaling = upsize(&dispatcher, &setup.new_release, 2).await;
    assert_eq!(scaling.new_instances.len(), 2);
    assert!(scaling.old_instances.is_empty());

    let swapped = match run(&dispatcher, swap_request(&setup, NamingStrategy::Versioned)).await {
        DeploymentOutput::SwapRoutes(output) => output,
        other => panic!("unexpected output {other:?}"),
    };
    assert_eq!(swapped.state, SwapState::Done);
    assert_eq!(swapped.new_release.attached_routes, vec![FINAL_ROUTE.to_string()]);
    let old = platform.release(&setup.active_release.as_ref().unwrap().guid).unwrap();
    assert_eq!(old.routes, vec![TEMP_ROUTE.to_string()]);
    assert_eq!(old.detail().status_marker(), Some(StatusMarker::Inactive));

    let rollback = match run(&dispatcher, swap_rollback_request(&setup, true)).await {
        DeploymentOutput::SwapRollback(output) => output,
        other => panic!("unexpected output {other:?}"),
    };
    assert!(rollback.deleted_new_release);
    assert_eq!(
        rollback.restored_active.unwrap().attached_routes,
        vec![FINAL_ROUTE.to_string()]
    );

    let after: Vec<_> = platform.records().iter().map(|r| r.detail()).collect();
    assert_eq!(after, before);
    assert!(sink.stages().contains(&Stage::Rollback));
}

#[tokio::test]
async fn production_naming_renames_and_rolls_back() {
    let platform = live_foundation();
    let (dispatcher, _) = dispatcher(&platform);

    let setup = setup(&dispatcher, NamingStrategy::ProductionName).await;
    upsize(&dispatcher, &setup.new_release, 2).await;

    let swapped: SwapRoutesOutput = match run(&dispatcher, swap_request(&setup, NamingStrategy::ProductionName)).await
    {
        DeploymentOutput::SwapRoutes(output) => output,
        other => panic!("unexpected output {other:?}"),
    };

    let new = platform.release(&setup.new_release.guid).unwrap();
    let old = platform.release(&setup.active_release.as_ref().unwrap().guid).unwrap();
    assert_eq!(new.name, PREFIX);
    assert_eq!(old.name, "PaymentService__INACTIVE");
    let renamed: Vec<(&str, &str)> = swapped
        .renames
        .iter()
        .map(|r| (r.from.as_str(), r.to.as_str()))
        .collect();
    assert_eq!(
        renamed,
        vec![
            ("PaymentService__2", "PaymentService__interim"),
            ("PaymentService__3", "PaymentService"),
            ("PaymentService__interim", "PaymentService__INACTIVE"),
        ]
    );

    let rollback: SwapRollbackOutput = match run(&dispatcher, swap_rollback_request(&setup, true)).await {
        DeploymentOutput::SwapRollback(output) => output,
        other => panic!("unexpected output {other:?}"),
    };
    assert_eq!(rollback.renames.len(), 2);
    let restored = platform.release(&setup.active_release.as_ref().unwrap().guid).unwrap();
    assert_eq!(restored.name, "PaymentService__2");
    assert_eq!(restored.routes, vec![FINAL_ROUTE.to_string()]);
    assert_eq!(restored.detail().status_marker(), Some(StatusMarker::Active));
    assert!(platform.release(&setup.new_release.guid).is_none());
}

#[tokio::test]
async fn rollback_before_swap_only_retires_new_release() {
    let platform = live_foundation();
    let (dispatcher, _) = dispatcher(&platform);

    let setup = setup(&dispatcher, NamingStrategy::Versioned).await;
    upsize(&dispatcher, &setup.new_release, 2).await;

    let rollback = match run(&dispatcher, swap_rollback_request(&setup, false)).await {
        DeploymentOutput::SwapRollback(output) => output,
        other => panic!("unexpected output {other:?}"),
    };

    assert!(rollback.deleted_new_release);
    assert!(platform.release_by_name("PaymentService__3").is_none());
    let active = platform.release_by_name("PaymentService__2").unwrap();
    assert_eq!(active.routes, vec![FINAL_ROUTE.to_string()]);
    assert_eq!(active.desired_instances, 2);
    let inactive = platform.release_by_name("PaymentService__1").unwrap();
    assert_eq!(inactive.detail().status_marker(), Some(StatusMarker::Inactive));
}

#[tokio::test]
async fn failed_swap_before_routes_move_leaves_one_inactive_release() {
    let platform = live_foundation();
    let (dispatcher, _) = dispatcher(&platform);

    let setup = setup(&dispatcher, NamingStrategy::Versioned).await;
    upsize(&dispatcher, &setup.new_release, 2).await;
    platform.inject_fault(
        FaultRule::new(PlatformOperation::MapRoutes, "route service unavailable").on("PaymentService__3"),
    );

    let response = dispatcher
        .dispatch(&swap_request(&setup, NamingStrategy::Versioned))
        .await;
    assert!(!response.is_success());
    match response.output {
        Some(DeploymentOutput::SwapRoutes(partial)) => {
            assert_eq!(partial.state, SwapState::PreSwap);
            assert!(partial.rolled_back);
        }
        other => panic!("unexpected output {other:?}"),
    }

    assert_eq!(inactive_names(&platform), vec!["PaymentService__1".to_string()]);
    let active = platform.release_by_name("PaymentService__2").unwrap();
    assert_eq!(active.routes, vec![FINAL_ROUTE.to_string()]);
}

#[tokio::test]
async fn rollback_keeping_new_release_strips_its_marker() {
    let platform = live_foundation();
    let (dispatcher, _) = dispatcher(&platform);

    let setup = setup(&dispatcher, NamingStrategy::Versioned).await;
    assert_eq!(inactive_names(&platform), vec!["PaymentService__3".to_string()]);

    let request = match swap_rollback_request(&setup, false) {
        DeploymentRequest::SwapRollback(mut request) => {
            request.delete_new_release = false;
            DeploymentRequest::SwapRollback(request)
        }
        other => panic!("unexpected request {other:?}"),
    };
    run(&dispatcher, request).await;

    assert!(platform.release_by_name("PaymentService__3").is_some());
    assert_eq!(inactive_names(&platform), vec!["PaymentService__1".to_string()]);
}

#[tokio::test]
async fn rollback_after_swap_restores_route_order() {
    let platform = InMemoryPlatform::new();
    let inactive = platform.seed_release("PaymentService__1", 0, &[]);
    platform.seed_marker(&inactive, StatusMarker::Inactive);
    let active = platform.seed_release(
        "PaymentService__2",
        2,
        &[FINAL_ROUTE, "payment-service-internal.apps.example.com"],
    );
    platform.seed_marker(&active, StatusMarker::Active);
    let (dispatcher, _) = dispatcher(&platform);

    let setup = setup(&dispatcher, NamingStrategy::Versioned).await;
    upsize(&dispatcher, &setup.new_release, 2).await;
    run(&dispatcher, swap_request(&setup, NamingStrategy::Versioned)).await;
    assert_eq!(
        platform.release(&active).unwrap().routes,
        vec![
            "payment-service-internal.apps.example.com".to_string(),
            TEMP_ROUTE.to_string()
        ]
    );

    run(&dispatcher, swap_rollback_request(&setup, true)).await;

    assert_eq!(
        platform.release(&active).unwrap().routes,
        vec![
            FINAL_ROUTE.to_string(),
            "payment-service-internal.apps.example.com".to_string()
        ]
    );
    assert_eq!(inactive_names(&platform), vec!["PaymentService__1".to_string()]);
}
