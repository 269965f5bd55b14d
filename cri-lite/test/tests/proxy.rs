use std::sync::Arc;

use cri_lite_api::v1;
use cri_lite_core::ReadOnly;
use cri_lite_test::{fake::FakeCri, init_tracing, Upstream};

#[tokio::test]
async fn upstream_errors_surface_with_code_and_message() {
    let _tracing = init_tracing();
    let fake = FakeCri::new().failing_status(tonic::Status::unavailable("upstream is down"));
    let mut proxy = Upstream::spawn(fake)
        .await
        .proxy(Some(Arc::new(ReadOnly::new())))
        .await;

    let err = proxy
        .runtime
        .status(v1::StatusRequest::default())
        .await
        .expect_err("status");
    assert_eq!(err.code(), tonic::Code::Unavailable);
    assert_eq!(err.message(), "upstream is down");
}

#[tokio::test]
async fn run_pod_sandbox_is_blocked_even_without_a_policy() {
    let _tracing = init_tracing();
    let mut proxy = Upstream::spawn(FakeCri::new()).await.proxy(None).await;

    let err = proxy
        .runtime
        .run_pod_sandbox(v1::RunPodSandboxRequest::default())
        .await
        .expect_err("run pod sandbox");
    assert_eq!(err.code(), tonic::Code::PermissionDenied);
    assert_eq!(
        err.message(),
        "RunPodSandbox is disabled by cri-lite for security reasons"
    );
    assert!(proxy.fake.calls().is_empty());
}

#[tokio::test]
async fn checkpoint_container_is_not_proxied() {
    let _tracing = init_tracing();
    let mut proxy = Upstream::spawn(FakeCri::new()).await.proxy(None).await;

    let err = proxy
        .runtime
        .checkpoint_container(v1::CheckpointContainerRequest::default())
        .await
        .expect_err("checkpoint");
    assert_eq!(err.code(), tonic::Code::Unimplemented);
    assert!(proxy.fake.calls().is_empty());
}

#[tokio::test]
async fn caller_user_agent_is_forwarded_upstream() {
    let _tracing = init_tracing();
    let mut proxy = Upstream::spawn(FakeCri::new()).await.proxy(None).await;

    proxy
        .runtime
        .version(v1::VersionRequest::default())
        .await
        .expect("version");

    // The test client dials through the same channel builder as the proxy, so
    // its user agent carries the cri-lite prefix.
    let agents = proxy.fake.forwarded_user_agents();
    assert_eq!(agents.len(), 1);
    assert!(agents[0].starts_with("cri-lite/"), "agent: {}", agents[0]);
}

#[tokio::test]
async fn unscoped_proxy_forwards_requests_and_responses_faithfully() {
    let _tracing = init_tracing();
    let fake = FakeCri::new().with_containers(vec![v1::Container {
        id: "c1".to_string(),
        pod_sandbox_id: "s1".to_string(),
        ..Default::default()
    }]);
    let mut proxy = Upstream::spawn(fake).await.proxy(None).await;

    let containers = proxy
        .runtime
        .list_containers(v1::ListContainersRequest {
            filter: Some(v1::ContainerFilter {
                id: "c1".to_string(),
                ..Default::default()
            }),
        })
        .await
        .expect("list containers")
        .into_inner()
        .containers;
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].pod_sandbox_id, "s1");

    let stats = proxy
        .runtime
        .container_stats(v1::ContainerStatsRequest {
            container_id: "c1".to_string(),
        })
        .await
        .expect("container stats")
        .into_inner()
        .stats;
    assert_eq!(stats.expect("stats").attributes.expect("attributes").id, "c1");
}
