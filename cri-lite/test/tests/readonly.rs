use std::sync::Arc;

use cri_lite_api::v1;
use cri_lite_core::ReadOnly;
use cri_lite_test::{fake::FakeCri, init_tracing, Upstream};

fn container(id: &str, pod: &str) -> v1::Container {
    v1::Container {
        id: id.to_string(),
        pod_sandbox_id: pod.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn version_is_annotated_with_proxy_and_policy() {
    let _tracing = init_tracing();
    let mut proxy = Upstream::spawn(FakeCri::new())
        .await
        .proxy(Some(Arc::new(ReadOnly::new())))
        .await;

    let version = proxy
        .runtime
        .version(v1::VersionRequest::default())
        .await
        .expect("version")
        .into_inner();

    assert_eq!(
        version.runtime_version,
        format!("1.0.0 via cri-lite ({})", cri_lite_grpc::VERSION)
    );
    assert_eq!(version.runtime_name, "fake-runtime with policy readonly");
    assert_eq!(proxy.fake.calls(), vec!["Version"]);
}

#[tokio::test]
async fn admits_reads_and_rejects_writes() {
    let _tracing = init_tracing();
    let fake = FakeCri::new().with_containers(vec![container("c1", "s1")]);
    let mut proxy = Upstream::spawn(fake)
        .await
        .proxy(Some(Arc::new(ReadOnly::new())))
        .await;

    let containers = proxy
        .runtime
        .list_containers(v1::ListContainersRequest::default())
        .await
        .expect("list containers")
        .into_inner()
        .containers;
    assert_eq!(containers.len(), 1);

    let err = proxy
        .runtime
        .run_pod_sandbox(v1::RunPodSandboxRequest::default())
        .await
        .expect_err("run pod sandbox");
    assert_eq!(err.code(), tonic::Code::PermissionDenied);

    let err = proxy
        .runtime
        .create_container(v1::CreateContainerRequest::default())
        .await
        .expect_err("create container");
    assert_eq!(err.code(), tonic::Code::PermissionDenied);
    assert_eq!(
        err.message(),
        "method not allowed by policy: /runtime.v1.RuntimeService/CreateContainer"
    );

    // Rejected methods never reach the upstream.
    let calls = proxy.fake.calls();
    assert!(!calls.contains(&"RunPodSandbox"), "calls: {calls:?}");
    assert!(!calls.contains(&"CreateContainer"), "calls: {calls:?}");
}
