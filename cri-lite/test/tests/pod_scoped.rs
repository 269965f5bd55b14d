use std::sync::Arc;

use cri_lite_api::v1;
use cri_lite_core::{PodScoped, SandboxResolver};
use cri_lite_test::{fake::FakeCri, init_tracing, Upstream};

const SANDBOX: &str = "test-sandbox-id";
const OTHER_SANDBOX: &str = "other-sandbox-id";
const CALLER_CONTAINER: &str = "4a5b362bcf3c8e3dcd3e07e0b1b3ba6e7fefe1a1b1f3062bd4ba1f4b5ae505c6";

fn container(id: &str, pod: &str) -> v1::Container {
    v1::Container {
        id: id.to_string(),
        pod_sandbox_id: pod.to_string(),
        ..Default::default()
    }
}

fn pod_stats(id: &str) -> v1::PodSandboxStats {
    v1::PodSandboxStats {
        attributes: Some(v1::PodSandboxAttributes {
            id: id.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn fake_with_two_pods() -> FakeCri {
    FakeCri::new().with_containers(vec![
        container("c1", SANDBOX),
        container("c2", OTHER_SANDBOX),
        container(CALLER_CONTAINER, SANDBOX),
    ])
}

#[tokio::test]
async fn static_sandbox_admits_matching_rejects_foreign() {
    let _tracing = init_tracing();
    let upstream = Upstream::spawn(fake_with_two_pods()).await;
    let policy = PodScoped::new(SANDBOX, SandboxResolver::new(upstream.lookup()));
    let mut proxy = upstream.proxy(Some(Arc::new(policy))).await;

    proxy
        .runtime
        .pod_sandbox_status(v1::PodSandboxStatusRequest {
            pod_sandbox_id: SANDBOX.to_string(),
            ..Default::default()
        })
        .await
        .expect("matching sandbox");

    let err = proxy
        .runtime
        .port_forward(v1::PortForwardRequest {
            pod_sandbox_id: OTHER_SANDBOX.to_string(),
            ..Default::default()
        })
        .await
        .expect_err("foreign sandbox");
    assert_eq!(err.code(), tonic::Code::PermissionDenied);
    assert!(
        err.message().contains("method not allowed by policy"),
        "message: {}",
        err.message()
    );
    assert!(!proxy.fake.calls().contains(&"PortForward"));
}

#[tokio::test]
async fn list_containers_is_tightened_and_response_filtered() {
    let _tracing = init_tracing();
    // The upstream ignores filters, so containment rests on the response
    // rewrite alone.
    let upstream = Upstream::spawn(fake_with_two_pods().ignoring_filters()).await;
    let policy = PodScoped::new(SANDBOX, SandboxResolver::new(upstream.lookup()));
    let mut proxy = upstream.proxy(Some(Arc::new(policy))).await;

    let containers = proxy
        .runtime
        .list_containers(v1::ListContainersRequest::default())
        .await
        .expect("list containers")
        .into_inner()
        .containers;

    assert!(containers.iter().all(|c| c.pod_sandbox_id == SANDBOX));
    assert!(containers.iter().any(|c| c.id == "c1"));
    assert!(!containers.iter().any(|c| c.id == "c2"));

    // The request filter was tightened regardless.
    let filters = proxy.fake.list_container_filters();
    let filter = filters.last().expect("one list call").clone().expect("filter set");
    assert_eq!(filter.pod_sandbox_id, SANDBOX);
}

#[tokio::test]
async fn image_service_is_denied() {
    let _tracing = init_tracing();
    let upstream = Upstream::spawn(fake_with_two_pods()).await;
    let policy = PodScoped::new(SANDBOX, SandboxResolver::new(upstream.lookup()));
    let mut proxy = upstream.proxy(Some(Arc::new(policy))).await;

    let err = proxy
        .image
        .list_images(v1::ListImagesRequest::default())
        .await
        .expect_err("image service");
    assert_eq!(err.code(), tonic::Code::PermissionDenied);
    assert!(!proxy.fake.calls().contains(&"ListImages"));
}

#[tokio::test]
async fn pod_sandbox_stats_are_filtered_to_the_sandbox() {
    let _tracing = init_tracing();
    let fake = fake_with_two_pods()
        .with_pod_stats(vec![pod_stats(SANDBOX), pod_stats(OTHER_SANDBOX)])
        .ignoring_filters();
    let upstream = Upstream::spawn(fake).await;
    let policy = PodScoped::new(SANDBOX, SandboxResolver::new(upstream.lookup()));
    let mut proxy = upstream.proxy(Some(Arc::new(policy))).await;

    let stats = proxy
        .runtime
        .list_pod_sandbox_stats(v1::ListPodSandboxStatsRequest::default())
        .await
        .expect("list pod sandbox stats")
        .into_inner()
        .stats;

    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].attributes.as_ref().expect("attributes").id, SANDBOX);
}

#[tokio::test]
async fn container_events_outside_the_sandbox_are_dropped() {
    let _tracing = init_tracing();
    let event = |container: &str, sandbox: &str| v1::ContainerEventResponse {
        container_id: container.to_string(),
        pod_sandbox_status: Some(v1::PodSandboxStatus {
            id: sandbox.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    };
    let fake = fake_with_two_pods().with_events(vec![
        event("c1", SANDBOX),
        event("c2", OTHER_SANDBOX),
        event("c1", SANDBOX),
    ]);
    let upstream = Upstream::spawn(fake).await;
    let policy = PodScoped::new(SANDBOX, SandboxResolver::new(upstream.lookup()));
    let mut proxy = upstream.proxy(Some(Arc::new(policy))).await;

    let mut stream = proxy
        .runtime
        .get_container_events(v1::GetEventsRequest::default())
        .await
        .expect("open event stream")
        .into_inner();

    let mut seen = Vec::new();
    while let Some(event) = stream.message().await.expect("receive event") {
        seen.push(event);
    }

    assert_eq!(seen.len(), 2);
    assert!(seen
        .iter()
        .all(|e| e.pod_sandbox_status.as_ref().expect("status").id == SANDBOX));
}

#[tokio::test]
async fn dynamic_resolution_scopes_the_caller_to_its_own_pod() {
    let _tracing = init_tracing();
    // The caller is this test process; its cgroup file lives under a private
    // proc root and names a container that the upstream places in SANDBOX.
    let proc_root = tempfile::tempdir().expect("tempdir");
    let pid = std::process::id();
    let proc_dir = proc_root.path().join(pid.to_string());
    std::fs::create_dir_all(&proc_dir).expect("proc dir");
    std::fs::write(
        proc_dir.join("cgroup"),
        format!("0::/kubepods/burstable/pod1234/{CALLER_CONTAINER}\n"),
    )
    .expect("cgroup file");

    let upstream = Upstream::spawn(fake_with_two_pods()).await;
    let resolver = SandboxResolver::new(upstream.lookup()).with_proc_root(proc_root.path());
    let policy = PodScoped::from_caller_pid(resolver);
    let mut proxy = upstream.proxy(Some(Arc::new(policy))).await;

    // c1 belongs to the caller's sandbox.
    proxy
        .runtime
        .container_status(v1::ContainerStatusRequest {
            container_id: "c1".to_string(),
            ..Default::default()
        })
        .await
        .expect("container in caller's pod");

    // c2 does not.
    let err = proxy
        .runtime
        .stop_container(v1::StopContainerRequest {
            container_id: "c2".to_string(),
            ..Default::default()
        })
        .await
        .expect_err("container outside caller's pod");
    assert_eq!(err.code(), tonic::Code::PermissionDenied);
    assert!(!proxy.fake.calls().contains(&"StopContainer"));
}
