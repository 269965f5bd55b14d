use std::sync::Arc;

use cri_lite_api::v1;
use cri_lite_core::ImageManagement;
use cri_lite_test::{fake::FakeCri, init_tracing, Upstream};

#[tokio::test]
async fn admits_images_and_version_rejects_container_writes() {
    let _tracing = init_tracing();
    let fake = FakeCri::new().with_images(vec![v1::Image {
        id: "sha256:12345".to_string(),
        repo_tags: vec!["fake-image:latest".to_string()],
        ..Default::default()
    }]);
    let mut proxy = Upstream::spawn(fake)
        .await
        .proxy(Some(Arc::new(ImageManagement::new())))
        .await;

    let images = proxy
        .image
        .list_images(v1::ListImagesRequest::default())
        .await
        .expect("list images")
        .into_inner()
        .images;
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].id, "sha256:12345");

    let pulled = proxy
        .image
        .pull_image(v1::PullImageRequest::default())
        .await
        .expect("pull image")
        .into_inner();
    assert_eq!(pulled.image_ref, "sha256:12345");

    let version = proxy
        .runtime
        .version(v1::VersionRequest::default())
        .await
        .expect("version")
        .into_inner();
    assert_eq!(version.runtime_name, "fake-runtime with policy imageManagement");

    let err = proxy
        .runtime
        .create_container(v1::CreateContainerRequest::default())
        .await
        .expect_err("create container");
    assert_eq!(err.code(), tonic::Code::PermissionDenied);
    assert!(!proxy.fake.calls().contains(&"CreateContainer"));
}
