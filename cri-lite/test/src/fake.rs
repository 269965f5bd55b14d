//! A fake upstream CRI server with canned, inspectable state.

use std::{
    pin::Pin,
    sync::{Arc, Mutex},
};

use cri_lite_api::v1::{
    self, image_service_server::ImageService, runtime_service_server::RuntimeService,
};
use futures::Stream;
use tonic::{Request, Response, Status};

/// A fake CRI upstream. Clones share state, so a test can keep one handle for
/// assertions while the server owns another.
#[derive(Clone, Debug, Default)]
pub struct FakeCri {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    containers: Mutex<Vec<v1::Container>>,
    images: Mutex<Vec<v1::Image>>,
    pod_stats: Mutex<Vec<v1::PodSandboxStats>>,
    events: Mutex<Vec<v1::ContainerEventResponse>>,
    ignore_filters: Mutex<bool>,
    status_error: Mutex<Option<Status>>,
    calls: Mutex<Vec<&'static str>>,
    forwarded_user_agents: Mutex<Vec<String>>,
    list_container_filters: Mutex<Vec<Option<v1::ContainerFilter>>>,
}

impl FakeCri {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_containers(self, containers: Vec<v1::Container>) -> Self {
        *self.inner.containers.lock().expect("lock") = containers;
        self
    }

    pub fn with_images(self, images: Vec<v1::Image>) -> Self {
        *self.inner.images.lock().expect("lock") = images;
        self
    }

    pub fn with_pod_stats(self, stats: Vec<v1::PodSandboxStats>) -> Self {
        *self.inner.pod_stats.lock().expect("lock") = stats;
        self
    }

    pub fn with_events(self, events: Vec<v1::ContainerEventResponse>) -> Self {
        *self.inner.events.lock().expect("lock") = events;
        self
    }

    /// Serves list responses unfiltered, like a runtime that ignores filters.
    pub fn ignoring_filters(self) -> Self {
        *self.inner.ignore_filters.lock().expect("lock") = true;
        self
    }

    /// Makes the `Status` RPC fail with the given status.
    pub fn failing_status(self, status: Status) -> Self {
        *self.inner.status_error.lock().expect("lock") = Some(status);
        self
    }

    /// The methods invoked on this upstream, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.inner.calls.lock().expect("lock").clone()
    }

    /// The `x-forwarded-user-agent` values observed on incoming calls.
    pub fn forwarded_user_agents(&self) -> Vec<String> {
        self.inner.forwarded_user_agents.lock().expect("lock").clone()
    }

    /// The filters observed on `ListContainers` calls, in order.
    pub fn list_container_filters(&self) -> Vec<Option<v1::ContainerFilter>> {
        self.inner.list_container_filters.lock().expect("lock").clone()
    }

    fn record<T>(&self, method: &'static str, request: &Request<T>) {
        self.inner.calls.lock().expect("lock").push(method);
        if let Some(ua) = request.metadata().get("x-forwarded-user-agent") {
            if let Ok(ua) = ua.to_str() {
                self.inner
                    .forwarded_user_agents
                    .lock()
                    .expect("lock")
                    .push(ua.to_string());
            }
        }
    }

    fn containers(&self) -> Vec<v1::Container> {
        self.inner.containers.lock().expect("lock").clone()
    }

    fn ignores_filters(&self) -> bool {
        *self.inner.ignore_filters.lock().expect("lock")
    }
}

#[tonic::async_trait]
impl RuntimeService for FakeCri {
    async fn version(
        &self,
        request: Request<v1::VersionRequest>,
    ) -> Result<Response<v1::VersionResponse>, Status> {
        self.record("Version", &request);
        Ok(Response::new(v1::VersionResponse {
            version: "1.0.0".to_string(),
            runtime_name: "fake-runtime".to_string(),
            runtime_version: "1.0.0".to_string(),
            runtime_api_version: "v1".to_string(),
        }))
    }

    async fn run_pod_sandbox(
        &self,
        request: Request<v1::RunPodSandboxRequest>,
    ) -> Result<Response<v1::RunPodSandboxResponse>, Status> {
        self.record("RunPodSandbox", &request);
        Ok(Response::new(v1::RunPodSandboxResponse {
            pod_sandbox_id: "test-sandbox-id".to_string(),
        }))
    }

    async fn stop_pod_sandbox(
        &self,
        request: Request<v1::StopPodSandboxRequest>,
    ) -> Result<Response<v1::StopPodSandboxResponse>, Status> {
        self.record("StopPodSandbox", &request);
        Ok(Response::new(Default::default()))
    }

    async fn remove_pod_sandbox(
        &self,
        request: Request<v1::RemovePodSandboxRequest>,
    ) -> Result<Response<v1::RemovePodSandboxResponse>, Status> {
        self.record("RemovePodSandbox", &request);
        Ok(Response::new(Default::default()))
    }

    async fn pod_sandbox_status(
        &self,
        request: Request<v1::PodSandboxStatusRequest>,
    ) -> Result<Response<v1::PodSandboxStatusResponse>, Status> {
        self.record("PodSandboxStatus", &request);
        let id = request.into_inner().pod_sandbox_id;
        Ok(Response::new(v1::PodSandboxStatusResponse {
            status: Some(v1::PodSandboxStatus {
                id,
                ..Default::default()
            }),
            ..Default::default()
        }))
    }

    async fn list_pod_sandbox(
        &self,
        request: Request<v1::ListPodSandboxRequest>,
    ) -> Result<Response<v1::ListPodSandboxResponse>, Status> {
        self.record("ListPodSandbox", &request);
        Ok(Response::new(Default::default()))
    }

    async fn create_container(
        &self,
        request: Request<v1::CreateContainerRequest>,
    ) -> Result<Response<v1::CreateContainerResponse>, Status> {
        self.record("CreateContainer", &request);
        Ok(Response::new(v1::CreateContainerResponse {
            container_id: "created-container-id".to_string(),
        }))
    }

    async fn start_container(
        &self,
        request: Request<v1::StartContainerRequest>,
    ) -> Result<Response<v1::StartContainerResponse>, Status> {
        self.record("StartContainer", &request);
        Ok(Response::new(Default::default()))
    }

    async fn stop_container(
        &self,
        request: Request<v1::StopContainerRequest>,
    ) -> Result<Response<v1::StopContainerResponse>, Status> {
        self.record("StopContainer", &request);
        Ok(Response::new(Default::default()))
    }

    async fn remove_container(
        &self,
        request: Request<v1::RemoveContainerRequest>,
    ) -> Result<Response<v1::RemoveContainerResponse>, Status> {
        self.record("RemoveContainer", &request);
        Ok(Response::new(Default::default()))
    }

    async fn list_containers(
        &self,
        request: Request<v1::ListContainersRequest>,
    ) -> Result<Response<v1::ListContainersResponse>, Status> {
        self.record("ListContainers", &request);
        let filter = request.into_inner().filter;
        self.inner
            .list_container_filters
            .lock()
            .expect("lock")
            .push(filter.clone());

        let mut containers = self.containers();
        if !self.ignores_filters() {
            if let Some(filter) = filter {
                containers.retain(|c| {
                    (filter.id.is_empty() || c.id == filter.id)
                        && (filter.pod_sandbox_id.is_empty()
                            || c.pod_sandbox_id == filter.pod_sandbox_id)
                });
            }
        }
        Ok(Response::new(v1::ListContainersResponse { containers }))
    }

    async fn container_status(
        &self,
        request: Request<v1::ContainerStatusRequest>,
    ) -> Result<Response<v1::ContainerStatusResponse>, Status> {
        self.record("ContainerStatus", &request);
        let id = request.into_inner().container_id;
        let container = self
            .containers()
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| Status::not_found(format!("container {id} not found")))?;
        Ok(Response::new(v1::ContainerStatusResponse {
            status: Some(v1::ContainerStatus {
                id: container.id,
                ..Default::default()
            }),
            ..Default::default()
        }))
    }

    async fn update_container_resources(
        &self,
        request: Request<v1::UpdateContainerResourcesRequest>,
    ) -> Result<Response<v1::UpdateContainerResourcesResponse>, Status> {
        self.record("UpdateContainerResources", &request);
        Ok(Response::new(Default::default()))
    }

    async fn reopen_container_log(
        &self,
        request: Request<v1::ReopenContainerLogRequest>,
    ) -> Result<Response<v1::ReopenContainerLogResponse>, Status> {
        self.record("ReopenContainerLog", &request);
        Ok(Response::new(Default::default()))
    }

    async fn exec_sync(
        &self,
        request: Request<v1::ExecSyncRequest>,
    ) -> Result<Response<v1::ExecSyncResponse>, Status> {
        self.record("ExecSync", &request);
        Ok(Response::new(Default::default()))
    }

    async fn exec(
        &self,
        request: Request<v1::ExecRequest>,
    ) -> Result<Response<v1::ExecResponse>, Status> {
        self.record("Exec", &request);
        Ok(Response::new(Default::default()))
    }

    async fn attach(
        &self,
        request: Request<v1::AttachRequest>,
    ) -> Result<Response<v1::AttachResponse>, Status> {
        self.record("Attach", &request);
        Ok(Response::new(Default::default()))
    }

    async fn port_forward(
        &self,
        request: Request<v1::PortForwardRequest>,
    ) -> Result<Response<v1::PortForwardResponse>, Status> {
        self.record("PortForward", &request);
        Ok(Response::new(Default::default()))
    }

    async fn container_stats(
        &self,
        request: Request<v1::ContainerStatsRequest>,
    ) -> Result<Response<v1::ContainerStatsResponse>, Status> {
        self.record("ContainerStats", &request);
        let id = request.into_inner().container_id;
        Ok(Response::new(v1::ContainerStatsResponse {
            stats: Some(v1::ContainerStats {
                attributes: Some(v1::ContainerAttributes {
                    id,
                    ..Default::default()
                }),
                ..Default::default()
            }),
        }))
    }

    async fn list_container_stats(
        &self,
        request: Request<v1::ListContainerStatsRequest>,
    ) -> Result<Response<v1::ListContainerStatsResponse>, Status> {
        self.record("ListContainerStats", &request);
        let mut containers = self.containers();
        if !self.ignores_filters() {
            if let Some(filter) = request.into_inner().filter {
                containers.retain(|c| {
                    (filter.id.is_empty() || c.id == filter.id)
                        && (filter.pod_sandbox_id.is_empty()
                            || c.pod_sandbox_id == filter.pod_sandbox_id)
                });
            }
        }
        let stats = containers
            .into_iter()
            .map(|c| v1::ContainerStats {
                attributes: Some(v1::ContainerAttributes {
                    id: c.id,
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect();
        Ok(Response::new(v1::ListContainerStatsResponse { stats }))
    }

    async fn pod_sandbox_stats(
        &self,
        request: Request<v1::PodSandboxStatsRequest>,
    ) -> Result<Response<v1::PodSandboxStatsResponse>, Status> {
        self.record("PodSandboxStats", &request);
        let id = request.into_inner().pod_sandbox_id;
        let stats = self
            .inner
            .pod_stats
            .lock()
            .expect("lock")
            .iter()
            .find(|s| s.attributes.as_ref().map_or(false, |a| a.id == id))
            .cloned();
        Ok(Response::new(v1::PodSandboxStatsResponse { stats }))
    }

    async fn list_pod_sandbox_stats(
        &self,
        request: Request<v1::ListPodSandboxStatsRequest>,
    ) -> Result<Response<v1::ListPodSandboxStatsResponse>, Status> {
        self.record("ListPodSandboxStats", &request);
        let mut stats = self.inner.pod_stats.lock().expect("lock").clone();
        if !self.ignores_filters() {
            if let Some(filter) = request.into_inner().filter {
                if !filter.id.is_empty() {
                    stats.retain(|s| s.attributes.as_ref().map_or(false, |a| a.id == filter.id));
                }
            }
        }
        Ok(Response::new(v1::ListPodSandboxStatsResponse { stats }))
    }

    async fn update_runtime_config(
        &self,
        request: Request<v1::UpdateRuntimeConfigRequest>,
    ) -> Result<Response<v1::UpdateRuntimeConfigResponse>, Status> {
        self.record("UpdateRuntimeConfig", &request);
        Ok(Response::new(Default::default()))
    }

    async fn status(
        &self,
        request: Request<v1::StatusRequest>,
    ) -> Result<Response<v1::StatusResponse>, Status> {
        self.record("Status", &request);
        if let Some(status) = self.inner.status_error.lock().expect("lock").clone() {
            return Err(status);
        }
        Ok(Response::new(Default::default()))
    }

    async fn checkpoint_container(
        &self,
        request: Request<v1::CheckpointContainerRequest>,
    ) -> Result<Response<v1::CheckpointContainerResponse>, Status> {
        self.record("CheckpointContainer", &request);
        Ok(Response::new(Default::default()))
    }

    type GetContainerEventsStream =
        Pin<Box<dyn Stream<Item = Result<v1::ContainerEventResponse, Status>> + Send + 'static>>;

    async fn get_container_events(
        &self,
        request: Request<v1::GetEventsRequest>,
    ) -> Result<Response<Self::GetContainerEventsStream>, Status> {
        self.record("GetContainerEvents", &request);
        let events = self.inner.events.lock().expect("lock").clone();
        Ok(Response::new(Box::pin(futures::stream::iter(
            events.into_iter().map(Ok),
        ))))
    }

    async fn list_metric_descriptors(
        &self,
        request: Request<v1::ListMetricDescriptorsRequest>,
    ) -> Result<Response<v1::ListMetricDescriptorsResponse>, Status> {
        self.record("ListMetricDescriptors", &request);
        Ok(Response::new(Default::default()))
    }

    async fn list_pod_sandbox_metrics(
        &self,
        request: Request<v1::ListPodSandboxMetricsRequest>,
    ) -> Result<Response<v1::ListPodSandboxMetricsResponse>, Status> {
        self.record("ListPodSandboxMetrics", &request);
        Ok(Response::new(Default::default()))
    }

    async fn runtime_config(
        &self,
        request: Request<v1::RuntimeConfigRequest>,
    ) -> Result<Response<v1::RuntimeConfigResponse>, Status> {
        self.record("RuntimeConfig", &request);
        Ok(Response::new(Default::default()))
    }

    async fn update_pod_sandbox_resources(
        &self,
        request: Request<v1::UpdatePodSandboxResourcesRequest>,
    ) -> Result<Response<v1::UpdatePodSandboxResourcesResponse>, Status> {
        self.record("UpdatePodSandboxResources", &request);
        Ok(Response::new(Default::default()))
    }
}

#[tonic::async_trait]
impl ImageService for FakeCri {
    async fn list_images(
        &self,
        request: Request<v1::ListImagesRequest>,
    ) -> Result<Response<v1::ListImagesResponse>, Status> {
        self.record("ListImages", &request);
        Ok(Response::new(v1::ListImagesResponse {
            images: self.inner.images.lock().expect("lock").clone(),
        }))
    }

    async fn image_status(
        &self,
        request: Request<v1::ImageStatusRequest>,
    ) -> Result<Response<v1::ImageStatusResponse>, Status> {
        self.record("ImageStatus", &request);
        let spec = request.into_inner().image.unwrap_or_default();
        let image = self
            .inner
            .images
            .lock()
            .expect("lock")
            .iter()
            .find(|i| i.id == spec.image || i.repo_tags.contains(&spec.image))
            .cloned();
        Ok(Response::new(v1::ImageStatusResponse {
            image,
            ..Default::default()
        }))
    }

    async fn pull_image(
        &self,
        request: Request<v1::PullImageRequest>,
    ) -> Result<Response<v1::PullImageResponse>, Status> {
        self.record("PullImage", &request);
        Ok(Response::new(v1::PullImageResponse {
            image_ref: "sha256:12345".to_string(),
        }))
    }

    async fn remove_image(
        &self,
        request: Request<v1::RemoveImageRequest>,
    ) -> Result<Response<v1::RemoveImageResponse>, Status> {
        self.record("RemoveImage", &request);
        Ok(Response::new(Default::default()))
    }

    async fn image_fs_info(
        &self,
        request: Request<v1::ImageFsInfoRequest>,
    ) -> Result<Response<v1::ImageFsInfoResponse>, Status> {
        self.record("ImageFsInfo", &request);
        Ok(Response::new(Default::default()))
    }
}
